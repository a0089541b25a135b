//! Voxel Operations - Pure DOP Functions
//!
//! Clear, rasterize and occlusion passes. Every pass is chunked through the
//! dispatch offset loop, so grids larger than one dispatch are handled.

use super::voxel_data::{OccupancySummary, VoxelGridDesc, VoxelGrids, VoxelInput, VoxelReport};
use crate::compute::kernel_math::grid_dimension;
use crate::compute::{
    dispatch_chunked, group_count, Bindings, BufferHandle, BufferKind, BufferRole, ComputeDevice,
    Kernel, KernelParams,
};
use crate::constants::dispatch::THREADS_PER_GROUP;
use crate::constants::voxel::MAX_VOXEL_COUNT;
use crate::error::{EngineError, EngineResult};

/// Validate the grid shape for `bounds` and `voxel_size`
pub fn grid_desc(bounds: f32, voxel_size: f32) -> EngineResult<VoxelGridDesc> {
    if !voxel_size.is_finite() || voxel_size <= 0.0 {
        return Err(EngineError::invalid_config(
            "voxel_size",
            voxel_size,
            "must be positive and finite",
        ));
    }
    if !bounds.is_finite() || bounds <= 0.0 {
        return Err(EngineError::invalid_config(
            "voxel_bounds",
            bounds,
            "must be positive and finite",
        ));
    }

    let dimension = grid_dimension(bounds, voxel_size);
    if dimension == 0 {
        return Err(EngineError::invalid_config(
            "voxel_size",
            voxel_size,
            format!("larger than voxel_bounds {}; grid would be empty", bounds),
        ));
    }
    let cells = (dimension as u64).saturating_pow(3);
    if cells > MAX_VOXEL_COUNT {
        return Err(EngineError::invalid_config(
            "voxel_size",
            voxel_size,
            format!("{}^3 cells exceed the limit of {}", dimension, MAX_VOXEL_COUNT),
        ));
    }

    Ok(VoxelGridDesc {
        dimension,
        bounds,
        voxel_size,
        cell_count: cells as u32,
    })
}

pub fn allocate_grids<D: ComputeDevice + ?Sized>(
    device: &mut D,
    desc: VoxelGridDesc,
) -> EngineResult<VoxelGrids> {
    let voxels = device.create_buffer(BufferKind::Counters, desc.cell_count, "Voxel Grid")?;
    let occlusion = device.create_buffer(BufferKind::Weights, desc.cell_count, "Occlusion Grid")?;
    log::info!(
        "[Voxelizer] Grid {}^3 = {} cells (voxel size {})",
        desc.dimension,
        desc.cell_count,
        desc.voxel_size
    );
    Ok(VoxelGrids {
        desc,
        voxels,
        occlusion,
    })
}

pub fn release_grids<D: ComputeDevice + ?Sized>(device: &mut D, grids: VoxelGrids) -> EngineResult<()> {
    device.release_buffer(grids.voxels)?;
    device.release_buffer(grids.occlusion)
}

fn grid_params(desc: &VoxelGridDesc) -> KernelParams {
    KernelParams {
        element_count: desc.cell_count,
        grid_size: desc.dimension,
        grid_bounds: desc.bounds,
        voxel_size: desc.voxel_size,
        ..KernelParams::default()
    }
}

/// Zero both grids; returns dispatches issued
pub fn clear_grids<D: ComputeDevice + ?Sized>(device: &mut D, grids: &VoxelGrids) -> EngineResult<u32> {
    let params = grid_params(&grids.desc);
    let groups = group_count(grids.desc.cell_count as u64, THREADS_PER_GROUP);

    let mut dispatches = dispatch_chunked(
        device,
        Kernel::ClearVoxels,
        Bindings::new().with(BufferRole::VoxelGrid, grids.voxels),
        params,
        groups,
    )?;
    dispatches += dispatch_chunked(
        device,
        Kernel::ClearOcclusion,
        Bindings::new().with(BufferRole::OcclusionGrid, grids.occlusion),
        params,
        groups,
    )?;
    Ok(dispatches)
}

/// Samples produced by rasterizing `count` points
pub fn sample_count(count: u32, transform_count: u32, instanced: bool) -> EngineResult<u32> {
    if !instanced {
        return Ok(count);
    }
    count.checked_mul(transform_count).ok_or_else(|| {
        EngineError::invalid_config(
            "instanced_voxelization",
            true,
            format!("{} points x {} transforms overflow u32", count, transform_count),
        )
    })
}

/// Atomically count every sample into its cell
///
/// Each sample is `final_transform · p`, or `final_transform · transform[t] · p`
/// for every `t` when instanced. Samples outside the grid are skipped.
pub fn rasterize<D: ComputeDevice + ?Sized>(
    device: &mut D,
    input: VoxelInput,
    transforms: BufferHandle,
    transform_count: u32,
    final_transform: BufferHandle,
    grids: &VoxelGrids,
    instanced: bool,
) -> EngineResult<(u32, u32)> {
    let samples = sample_count(input.count, transform_count, instanced)?;
    let params = KernelParams {
        element_count: input.count,
        input_offset: input.offset,
        instance_count: if instanced { transform_count } else { 0 },
        transform_count,
        ..grid_params(&grids.desc)
    };
    let bindings = Bindings::new()
        .with(BufferRole::Points, input.points)
        .with(BufferRole::Transforms, transforms)
        .with(BufferRole::FinalTransform, final_transform)
        .with(BufferRole::VoxelGrid, grids.voxels);

    let dispatches = dispatch_chunked(
        device,
        Kernel::Voxelize,
        bindings,
        params,
        group_count(samples as u64, THREADS_PER_GROUP),
    )?;
    Ok((samples, dispatches))
}

/// Derive the occlusion weight of every cell from neighbour occupancy
pub fn compute_occlusion<D: ComputeDevice + ?Sized>(
    device: &mut D,
    grids: &VoxelGrids,
    radius: u32,
) -> EngineResult<u32> {
    let params = KernelParams {
        occlusion_radius: radius,
        ..grid_params(&grids.desc)
    };
    dispatch_chunked(
        device,
        Kernel::Occlusion,
        Bindings::new()
            .with(BufferRole::VoxelGrid, grids.voxels)
            .with(BufferRole::OcclusionGrid, grids.occlusion),
        params,
        group_count(grids.desc.cell_count as u64, THREADS_PER_GROUP),
    )
}

/// Clear, rasterize and occlude in order
#[allow(clippy::too_many_arguments)]
pub fn voxelize<D: ComputeDevice + ?Sized>(
    device: &mut D,
    input: VoxelInput,
    transforms: BufferHandle,
    transform_count: u32,
    final_transform: BufferHandle,
    grids: &VoxelGrids,
    occlusion_radius: u32,
    instanced: bool,
) -> EngineResult<VoxelReport> {
    let mut dispatches = clear_grids(device, grids)?;
    let (samples, raster_dispatches) = rasterize(
        device,
        input,
        transforms,
        transform_count,
        final_transform,
        grids,
        instanced,
    )?;
    dispatches += raster_dispatches;
    dispatches += compute_occlusion(device, grids, occlusion_radius)?;

    log::debug!(
        "[Voxelizer] {} samples into {} cells, {} dispatches",
        samples,
        grids.desc.cell_count,
        dispatches
    );
    Ok(VoxelReport {
        samples,
        dispatches,
    })
}

/// Read back the occupancy grid and summarise it
pub fn occupancy_summary<D: ComputeDevice + ?Sized>(
    device: &mut D,
    grids: &VoxelGrids,
) -> EngineResult<OccupancySummary> {
    let counters = device.read_counters(grids.voxels)?;
    Ok(OccupancySummary {
        total: counters.iter().map(|&c| c as u64).sum(),
        occupied_cells: counters.iter().filter(|&&c| c > 0).count() as u32,
    })
}
