//! Generation Operations - Pure DOP Functions
//!
//! Wavefront expansion of the IFS heap. Point `i >= T` is
//! `transform[i % T]` applied to point `i / T - 1`; every generation reads
//! only the generation before it, so generations are dispatched in order and
//! the work-items of one generation run in any order.

use super::generation_data::{GenerationRange, GenerationReport, SeedMode};
use crate::compute::{
    dispatch_chunked, group_count, Bindings, BufferHandle, BufferRole, ComputeDevice, Kernel,
    KernelParams,
};
use crate::constants::dispatch::THREADS_PER_GROUP;
use crate::error::{EngineError, EngineResult};
use glam::{Mat4, Vec3};

/// Split `capacity` slots into generation ranges for `transform_count` maps
///
/// The final range is clamped to capacity; clamping is not an error.
pub fn plan_generations(transform_count: u32, capacity: u32) -> EngineResult<Vec<GenerationRange>> {
    if transform_count == 0 {
        return Err(EngineError::invalid_config(
            "transforms",
            0,
            "at least one transform is required",
        ));
    }
    if capacity < transform_count {
        return Err(EngineError::invalid_config(
            "capacity",
            capacity,
            format!("must hold generation 0 ({} points)", transform_count),
        ));
    }

    let t = transform_count as u64;
    let cap = capacity as u64;
    let mut ranges = Vec::new();
    let mut offset = 0u64;
    let mut width = t;
    let mut generation = 0u32;

    while offset < cap {
        let full = offset + width;
        let limit = full.min(cap);
        ranges.push(GenerationRange {
            generation,
            offset: offset as u32,
            limit: limit as u32,
            clamped: limit < full,
        });
        offset = limit;
        width = width.saturating_mul(t);
        generation += 1;
    }

    Ok(ranges)
}

/// Smallest `r` with `r^3 >= capacity`
pub fn cube_resolution(capacity: u32) -> u32 {
    let cap = capacity as u64;
    let mut r = (cap as f64).cbrt().ceil() as u64;
    while r * r * r < cap {
        r += 1;
    }
    while r > 1 && (r - 1) * (r - 1) * (r - 1) >= cap {
        r -= 1;
    }
    r.max(1) as u32
}

/// Reset-kernel parameters for `mode`
pub fn seed_params(mode: SeedMode, capacity: u32) -> KernelParams {
    match mode {
        SeedMode::Origin => KernelParams {
            element_count: capacity,
            cube_resolution: 1,
            cube_size: 0.0,
            ..KernelParams::default()
        },
        SeedMode::UniformGrid => {
            let resolution = cube_resolution(capacity);
            KernelParams {
                element_count: capacity,
                cube_resolution: resolution,
                cube_size: 1.0 / resolution as f32,
                ..KernelParams::default()
            }
        }
    }
}

/// Overwrite all `capacity` slots with seeds; returns dispatches issued
pub fn reset_points<D: ComputeDevice + ?Sized>(
    device: &mut D,
    points: BufferHandle,
    capacity: u32,
    mode: SeedMode,
) -> EngineResult<u32> {
    dispatch_chunked(
        device,
        Kernel::ResetPoints,
        Bindings::new().with(BufferRole::Points, points),
        seed_params(mode, capacity),
        group_count(capacity as u64, THREADS_PER_GROUP),
    )
}

/// Dispatch one expand per generation, strictly in order
pub fn run_generations<D: ComputeDevice + ?Sized>(
    device: &mut D,
    points: BufferHandle,
    transforms: BufferHandle,
    transform_count: u32,
    plan: &[GenerationRange],
) -> EngineResult<u32> {
    let bindings = Bindings::new()
        .with(BufferRole::Points, points)
        .with(BufferRole::Transforms, transforms);
    let mut dispatches = 0;

    for range in plan.iter().filter(|range| !range.is_empty()) {
        let params = KernelParams {
            element_count: range.limit,
            transform_count,
            generation_offset: range.offset,
            generation_limit: range.limit,
            ..KernelParams::default()
        };
        dispatches += dispatch_chunked(
            device,
            Kernel::Expand,
            bindings,
            params,
            group_count(range.len() as u64, THREADS_PER_GROUP),
        )?;

        if range.clamped {
            log::debug!(
                "[Generation] Generation {} clamped to capacity ({} of its points written)",
                range.generation,
                range.len()
            );
        }
    }

    Ok(dispatches)
}

/// Reset the buffer and expand every generation that fits in `capacity`
pub fn generate<D: ComputeDevice + ?Sized>(
    device: &mut D,
    points: BufferHandle,
    transforms: BufferHandle,
    transform_count: u32,
    capacity: u32,
    mode: SeedMode,
) -> EngineResult<GenerationReport> {
    let plan = plan_generations(transform_count, capacity)?;
    if capacity > points.len {
        return Err(EngineError::invalid_config(
            "capacity",
            capacity,
            format!("point buffer holds only {} points", points.len),
        ));
    }

    let mut dispatches = reset_points(device, points, capacity, mode)?;
    dispatches += run_generations(device, points, transforms, transform_count, &plan)?;

    let report = GenerationReport {
        generations: plan.len() as u32,
        points_written: plan.last().map_or(0, |range| range.limit),
        clamped: plan.last().map_or(false, |range| range.clamped),
        dispatches,
    };
    log::debug!(
        "[Generation] {} generations, {} points, {} dispatches",
        report.generations,
        report.points_written,
        report.dispatches
    );
    Ok(report)
}

/// Sequential host expansion of the same heap, for checking device output
pub fn expand_on_host(transforms: &[Mat4], seeds: &[Vec3], capacity: usize) -> Vec<Vec3> {
    let t = transforms.len();
    let mut points = seeds.to_vec();
    points.resize(capacity, Vec3::ZERO);
    if t == 0 {
        return points;
    }
    for i in 0..capacity {
        let source = if i < t { points[i] } else { points[i / t - 1] };
        points[i] = transforms[i % t].transform_point3(source);
    }
    points
}
