//! Pipeline Operations - Pure DOP Functions
//!
//! `init_pipeline → run_cycle → release_pipeline`. A cycle runs the stages
//! strictly in order on one device; each stage's dispatches are submitted
//! after the previous stage's, so every read sees the prior writes.

use super::pipeline_data::{CycleReport, PipelineBuffers, PipelineLayout, PipelineState};
use crate::bounds::{low_detail_plan, predict_bounds};
use crate::compute::{BufferHandle, BufferKind, ComputeDevice};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::generation::generate;
use crate::reduction::{allocate_scratch, release_scratch, verify_reduction, ReductionSettings};
use crate::voxel::{allocate_grids, grid_desc, release_grids, voxelize, VoxelInput, VoxelSource};

/// Validate `config` and derive the buffer layout it needs
pub fn pipeline_layout(config: &EngineConfig) -> EngineResult<PipelineLayout> {
    config.validate()?;

    let transform_count = config.transform_count();
    let low_detail = low_detail_plan(transform_count, config.low_detail_generations)?;
    let grid = grid_desc(config.voxel_bounds, config.voxel_size)?;

    Ok(PipelineLayout {
        transform_count,
        capacity: config.capacity,
        low_detail,
        grid,
        reduction_capacity: config.capacity.max(low_detail.final_count),
        reduction_group_size: config.reduction.group_size,
    })
}

fn release_all<D: ComputeDevice + ?Sized>(device: &mut D, handles: &[BufferHandle]) {
    for handle in handles {
        if let Err(e) = device.release_buffer(*handle) {
            log::warn!("[Pipeline] Failed to release buffer {}: {}", handle.id, e);
        }
    }
}

fn try_allocate<D: ComputeDevice + ?Sized>(
    device: &mut D,
    layout: &PipelineLayout,
    created: &mut Vec<BufferHandle>,
) -> EngineResult<PipelineBuffers> {
    let points = device.create_buffer(BufferKind::Points, layout.capacity, "Point Buffer")?;
    created.push(points);
    let low_detail_points = device.create_buffer(
        BufferKind::Points,
        layout.low_detail.capacity,
        "Low Detail Point Buffer",
    )?;
    created.push(low_detail_points);
    let transforms =
        device.create_buffer(BufferKind::Transforms, layout.transform_count, "Transform Buffer")?;
    created.push(transforms);
    let final_transform = device.create_buffer(BufferKind::Transforms, 1, "Final Transform")?;
    created.push(final_transform);

    let scratch_settings = ReductionSettings {
        group_size: layout.reduction_group_size,
        ..ReductionSettings::default()
    };
    let scratch = allocate_scratch(device, layout.reduction_capacity, &scratch_settings)?;
    created.extend([scratch.scratch_a, scratch.scratch_b, scratch.result]);

    let grids = allocate_grids(device, layout.grid)?;
    created.extend([grids.voxels, grids.occlusion]);

    Ok(PipelineBuffers {
        points,
        low_detail_points,
        transforms,
        final_transform,
        scratch,
        grids,
    })
}

/// Allocate every buffer of `layout`; nothing stays allocated on failure
pub fn allocate_buffers<D: ComputeDevice + ?Sized>(
    device: &mut D,
    layout: &PipelineLayout,
) -> EngineResult<PipelineBuffers> {
    let mut created = Vec::new();
    match try_allocate(device, layout, &mut created) {
        Ok(buffers) => {
            log::info!(
                "[Pipeline] Allocated {} buffers on {}: {} points, {} low detail points, {} voxels",
                created.len(),
                device.label(),
                layout.capacity,
                layout.low_detail.capacity,
                layout.grid.cell_count
            );
            Ok(buffers)
        }
        Err(e) => {
            release_all(device, &created);
            Err(e)
        }
    }
}

pub fn release_buffers<D: ComputeDevice + ?Sized>(
    device: &mut D,
    buffers: PipelineBuffers,
) -> EngineResult<()> {
    device.release_buffer(buffers.points)?;
    device.release_buffer(buffers.low_detail_points)?;
    device.release_buffer(buffers.transforms)?;
    device.release_buffer(buffers.final_transform)?;
    release_scratch(device, buffers.scratch)?;
    release_grids(device, buffers.grids)
}

/// Validate `config`, allocate its buffers and upload its transforms
pub fn init_pipeline<D: ComputeDevice + ?Sized>(
    device: &mut D,
    config: &EngineConfig,
) -> EngineResult<PipelineState> {
    let layout = pipeline_layout(config)?;
    let buffers = allocate_buffers(device, &layout)?;

    let transforms = config.compile_transforms();
    if let Err(e) = device.write_transforms(buffers.transforms, transforms.as_slice()) {
        if let Err(release) = release_buffers(device, buffers) {
            log::warn!("[Pipeline] Cleanup after failed init: {}", release);
        }
        return Err(e);
    }

    log::info!(
        "[Pipeline] Initialized with {} transforms, {} low detail particles",
        layout.transform_count,
        layout.low_detail.final_count
    );
    Ok(PipelineState {
        layout,
        buffers,
        transforms,
        last_prediction: None,
        cycles: 0,
    })
}

/// Run one full cycle and hand the state back
///
/// The state is returned whether or not the cycle succeeds. An invalid
/// config fails before any buffer is touched; a failure in a later stage
/// leaves the buffers allocated with whatever the completed stages wrote.
pub fn run_cycle<D: ComputeDevice + ?Sized>(
    device: &mut D,
    mut state: PipelineState,
    config: &EngineConfig,
) -> (PipelineState, EngineResult<CycleReport>) {
    let layout = match pipeline_layout(config) {
        Ok(layout) => layout,
        Err(e) => {
            log::warn!("[Pipeline] Cycle {} rejected: {}", state.cycles, e);
            return (state, Err(e));
        }
    };

    let reallocated = layout != state.layout;
    if reallocated {
        let buffers = match allocate_buffers(device, &layout) {
            Ok(buffers) => buffers,
            Err(e) => return (state, Err(e)),
        };
        let previous = std::mem::replace(&mut state.buffers, buffers);
        if let Err(e) = release_buffers(device, previous) {
            log::warn!("[Pipeline] Failed to release previous buffers: {}", e);
        }
        log::info!("[Pipeline] Layout changed, buffers reallocated");
        state.layout = layout;
    }

    let report = execute_cycle(device, &mut state, config, reallocated);
    if let Err(e) = &report {
        log::warn!("[Pipeline] Cycle {} failed: {}", state.cycles, e);
    }
    (state, report)
}

fn execute_cycle<D: ComputeDevice + ?Sized>(
    device: &mut D,
    state: &mut PipelineState,
    config: &EngineConfig,
    reallocated: bool,
) -> EngineResult<CycleReport> {
    let layout = state.layout;
    let buffers = state.buffers;
    let transform_count = layout.transform_count;

    let transforms = config.compile_transforms();
    device.write_transforms(buffers.transforms, transforms.as_slice())?;
    state.transforms = transforms;

    let needs_low_detail =
        config.predict_origin || config.voxel_source == VoxelSource::LowDetail;
    let low_detail = if needs_low_detail {
        Some(generate(
            device,
            buffers.low_detail_points,
            buffers.transforms,
            transform_count,
            layout.low_detail.capacity,
            config.seed_mode,
        )?)
    } else {
        None
    };

    let prediction = if config.predict_origin {
        let prediction = predict_bounds(
            device,
            buffers.low_detail_points,
            &layout.low_detail,
            &buffers.scratch,
            &config.reduction,
            config.scale_padding,
            config.voxel_bounds,
        )?;
        state.last_prediction = Some(prediction);
        Some(prediction)
    } else {
        None
    };
    let final_transform = prediction
        .map(|prediction| prediction.normalizing_transform)
        .unwrap_or_else(|| config.authored_final_transform());
    device.write_transforms(buffers.final_transform, &[final_transform])?;

    let full_detail = generate(
        device,
        buffers.points,
        buffers.transforms,
        transform_count,
        layout.capacity,
        config.seed_mode,
    )?;

    let reduction_check = if config.verify_reduction {
        Some(verify_reduction(
            device,
            buffers.points,
            0,
            full_detail.points_written,
            &buffers.scratch,
            &config.reduction,
        )?)
    } else {
        None
    };

    let input = match config.voxel_source {
        VoxelSource::FullDetail => VoxelInput {
            points: buffers.points,
            offset: 0,
            count: full_detail.points_written,
        },
        VoxelSource::LowDetail => VoxelInput {
            points: buffers.low_detail_points,
            offset: layout.low_detail.final_offset,
            count: layout.low_detail.final_count,
        },
    };
    let voxels = voxelize(
        device,
        input,
        buffers.transforms,
        transform_count,
        buffers.final_transform,
        &buffers.grids,
        config.occlusion_radius,
        config.instanced_voxelization,
    )?;

    state.cycles += 1;
    let report = CycleReport {
        cycle: state.cycles,
        transform_count,
        low_detail,
        prediction,
        final_transform,
        full_detail,
        reduction_check,
        voxels,
        reallocated,
    };
    log::info!(
        "[Pipeline] Cycle {}: {} points, {} voxel samples, {} dispatches",
        report.cycle,
        report.full_detail.points_written,
        report.voxels.samples,
        report.dispatches()
    );
    Ok(report)
}

pub fn release_pipeline<D: ComputeDevice + ?Sized>(
    device: &mut D,
    state: PipelineState,
) -> EngineResult<()> {
    release_buffers(device, state.buffers)?;
    log::info!("[Pipeline] Released after {} cycles", state.cycles);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::CpuDevice;
    use crate::voxel::occupancy_summary;
    use glam::Vec3;

    fn small_config() -> EngineConfig {
        EngineConfig {
            capacity: 2_000,
            low_detail_generations: 4,
            voxel_size: 0.5,
            scale_padding: 3.0,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_layout_of_default_config() {
        let layout = pipeline_layout(&EngineConfig::default()).unwrap();
        assert_eq!(layout.transform_count, 4);
        assert_eq!(layout.low_detail.final_count, 4u32.pow(8));
        assert_eq!(layout.grid.dimension, 40);
        assert_eq!(layout.reduction_capacity, 4u32.pow(8));
    }

    #[test]
    fn test_init_and_release_leave_no_buffers() {
        let mut device = CpuDevice::new();
        let state = init_pipeline(&mut device, &small_config()).unwrap();
        assert_eq!(device.live_buffers(), 9);
        release_pipeline(&mut device, state).unwrap();
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_invalid_config_dispatches_nothing() {
        let mut device = CpuDevice::new();
        let state = init_pipeline(&mut device, &small_config()).unwrap();
        let before = device.dispatch_count();

        let broken = EngineConfig {
            voxel_size: 0.0,
            ..small_config()
        };
        let (state, report) = run_cycle(&mut device, state, &broken);
        assert!(report.unwrap_err().is_configuration());
        assert_eq!(device.dispatch_count(), before);
        assert_eq!(state.cycles, 0);
        release_pipeline(&mut device, state).unwrap();
    }

    #[test]
    fn test_cycle_voxelizes_every_point() {
        let mut device = CpuDevice::new();
        let config = small_config();
        let state = init_pipeline(&mut device, &config).unwrap();

        let (state, report) = run_cycle(&mut device, state, &config);
        let report = report.unwrap();
        assert_eq!(report.cycle, 1);
        assert!(!report.reallocated);
        assert_eq!(report.full_detail.points_written, 2_000);
        assert_eq!(report.voxels.samples, 2_000);

        let prediction = report.prediction.unwrap();
        assert!(prediction.origin.abs_diff_eq(Vec3::ZERO, 1e-4));
        assert_eq!(state.origin_and_scale(), Some((prediction.origin, prediction.scale)));

        let summary = occupancy_summary(&mut device, &state.buffers.grids).unwrap();
        assert_eq!(summary.total, 2_000);
        assert!(summary.occupied_cells > 1);
        release_pipeline(&mut device, state).unwrap();
    }

    #[test]
    fn test_layout_change_reallocates() {
        let mut device = CpuDevice::new();
        let config = small_config();
        let state = init_pipeline(&mut device, &config).unwrap();
        let old_points = state.buffers.points;

        let bigger = EngineConfig {
            capacity: 3_000,
            ..config
        };
        let (state, report) = run_cycle(&mut device, state, &bigger);
        let report = report.unwrap();
        assert!(report.reallocated);
        assert_ne!(state.buffers.points.id, old_points.id);
        assert_eq!(state.buffers.points.len, 3_000);
        assert_eq!(device.live_buffers(), 9);
        release_pipeline(&mut device, state).unwrap();
    }

    #[test]
    fn test_authored_final_transform_without_prediction() {
        let mut device = CpuDevice::new();
        let config = EngineConfig {
            predict_origin: false,
            ..small_config()
        };
        let state = init_pipeline(&mut device, &config).unwrap();
        let (state, report) = run_cycle(&mut device, state, &config);
        let report = report.unwrap();

        assert!(report.prediction.is_none());
        assert!(report.low_detail.is_none());
        assert_eq!(report.final_transform, glam::Mat4::IDENTITY);
        assert!(state.last_prediction.is_none());
        release_pipeline(&mut device, state).unwrap();
    }

    #[test]
    fn test_low_detail_source_and_verification() {
        let mut device = CpuDevice::new();
        let config = EngineConfig {
            voxel_source: VoxelSource::LowDetail,
            verify_reduction: true,
            ..small_config()
        };
        let state = init_pipeline(&mut device, &config).unwrap();
        let (state, report) = run_cycle(&mut device, state, &config);
        let report = report.unwrap();

        assert_eq!(report.voxels.samples, 4u32.pow(4));
        assert!(report.reduction_check.unwrap().matches);
        release_pipeline(&mut device, state).unwrap();
    }
}
