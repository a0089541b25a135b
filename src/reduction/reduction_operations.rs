//! Reduction Operations - Pure DOP Functions
//!
//! Multi-pass min / max / sum over a point range. Tree strategies fold
//! `elements_per_group` values per work-group into a ping-pong scratch buffer
//! until one group remains; the last pass writes the op's result slot.

use super::reduction_data::{
    ReductionBuffer, ReductionCheck, ReductionPass, ReductionResult, ReductionScratch,
    ReductionSettings,
};
use crate::compute::{
    dispatch_chunked, select_reduction_kernel, Bindings, BufferHandle, BufferKind, BufferRole,
    ComputeDevice, Kernel, KernelParams, ReductionOp, ReductionStrategy,
};
use crate::constants::reduction::{MAX_SLOT, MIN_GROUP_SIZE, MIN_SLOT, RESULT_SLOTS, SUM_SLOT};
use crate::error::{EngineError, EngineResult};
use glam::Vec3;

/// Multiple of unit roundoff allowed between two summation orders
const SUM_ROUNDOFF_FACTOR: f32 = 4.0;

/// Input values dumped on a verification mismatch
const DUMP_LIMIT: u32 = 16;

/// Result slot written by `op`
pub fn result_slot(op: ReductionOp) -> u32 {
    match op {
        ReductionOp::Min => MIN_SLOT,
        ReductionOp::Max => MAX_SLOT,
        ReductionOp::Add => SUM_SLOT,
    }
}

/// Check settings against the device lane limit
pub fn validate_settings(settings: &ReductionSettings, max_lanes: u32) -> EngineResult<()> {
    let size = settings.group_size;
    if !size.is_power_of_two() || size < MIN_GROUP_SIZE || size > max_lanes {
        return Err(EngineError::invalid_config(
            "reduction.group_size",
            size,
            format!("must be a power of two in [{}, {}]", MIN_GROUP_SIZE, max_lanes),
        ));
    }
    Ok(())
}

/// Passes that fold `count` elements into `result_slot`
///
/// Intermediate passes alternate between the two scratch buffers; the final
/// pass runs a single group.
pub fn plan_reduction(count: u32, elements_per_group: u32, result_slot: u32) -> Vec<ReductionPass> {
    let per_group = elements_per_group.max(1);
    let mut passes = Vec::new();
    let mut source = ReductionBuffer::Input;
    let mut target = ReductionBuffer::ScratchA;
    let mut remaining = count;

    while remaining > per_group {
        let groups = remaining.div_ceil(per_group);
        passes.push(ReductionPass {
            source,
            target,
            element_count: remaining,
            groups,
            output_offset: 0,
        });
        source = target;
        target = match target {
            ReductionBuffer::ScratchA => ReductionBuffer::ScratchB,
            _ => ReductionBuffer::ScratchA,
        };
        remaining = groups;
    }

    passes.push(ReductionPass {
        source,
        target: ReductionBuffer::Result,
        element_count: remaining,
        groups: 1,
        output_offset: result_slot,
    });
    passes
}

/// Scratch length for reducing up to `capacity` points with `settings`
pub fn scratch_len(capacity: u32, settings: &ReductionSettings) -> u32 {
    capacity.div_ceil(settings.group_size.max(1)).max(1)
}

/// Allocate ping-pong scratch and the result buffer
pub fn allocate_scratch<D: ComputeDevice + ?Sized>(
    device: &mut D,
    capacity: u32,
    settings: &ReductionSettings,
) -> EngineResult<ReductionScratch> {
    let len = scratch_len(capacity, settings);
    Ok(ReductionScratch {
        scratch_a: device.create_buffer(BufferKind::Points, len, "Reduction Scratch A")?,
        scratch_b: device.create_buffer(BufferKind::Points, len, "Reduction Scratch B")?,
        result: device.create_buffer(BufferKind::Points, RESULT_SLOTS, "Reduction Result")?,
    })
}

pub fn release_scratch<D: ComputeDevice + ?Sized>(
    device: &mut D,
    scratch: ReductionScratch,
) -> EngineResult<()> {
    device.release_buffer(scratch.scratch_a)?;
    device.release_buffer(scratch.scratch_b)?;
    device.release_buffer(scratch.result)
}

fn buffer_for(
    buffer: ReductionBuffer,
    input: BufferHandle,
    scratch: &ReductionScratch,
) -> BufferHandle {
    match buffer {
        ReductionBuffer::Input => input,
        ReductionBuffer::ScratchA => scratch.scratch_a,
        ReductionBuffer::ScratchB => scratch.scratch_b,
        ReductionBuffer::Result => scratch.result,
    }
}

fn run_passes<D: ComputeDevice + ?Sized>(
    device: &mut D,
    kernel: Kernel,
    passes: &[ReductionPass],
    input: BufferHandle,
    input_offset: u32,
    scratch: &ReductionScratch,
) -> EngineResult<u32> {
    let mut dispatches = 0;
    for pass in passes {
        let bindings = Bindings::new()
            .with(BufferRole::ReductionInput, buffer_for(pass.source, input, scratch))
            .with(BufferRole::ReductionOutput, buffer_for(pass.target, input, scratch));
        let params = KernelParams {
            element_count: pass.element_count,
            input_offset: if pass.source == ReductionBuffer::Input {
                input_offset
            } else {
                0
            },
            output_offset: pass.output_offset,
            ..KernelParams::default()
        };
        dispatches += dispatch_chunked(device, kernel, bindings, params, pass.groups as u64)?;
    }
    Ok(dispatches)
}

/// Reduce `count` points of `input` starting at `input_offset`
pub fn reduce<D: ComputeDevice + ?Sized>(
    device: &mut D,
    input: BufferHandle,
    input_offset: u32,
    count: u32,
    scratch: &ReductionScratch,
    settings: &ReductionSettings,
) -> EngineResult<ReductionResult> {
    if count == 0 {
        return Err(EngineError::invalid_config(
            "reduction.count",
            0,
            "cannot reduce an empty range",
        ));
    }
    if input_offset as u64 + count as u64 > input.len as u64 {
        return Err(EngineError::BufferAccess {
            index: input_offset as usize + count as usize,
            size: input.len as usize,
        });
    }
    validate_settings(settings, device.limits().max_lanes_per_group)?;

    match settings.strategy {
        ReductionStrategy::SingleThreadedScan => {
            let passes = [ReductionPass {
                source: ReductionBuffer::Input,
                target: ReductionBuffer::Result,
                element_count: count,
                groups: 1,
                output_offset: 0,
            }];
            run_passes(device, Kernel::ScanReduce, &passes, input, input_offset, scratch)?;
        }
        strategy => {
            for op in ReductionOp::ALL {
                let kernel =
                    select_reduction_kernel(op, strategy, settings.double_load, settings.group_size);
                let per_group = match kernel {
                    Kernel::Reduce(variant) => variant.elements_per_group(),
                    _ => 1,
                };
                let passes = plan_reduction(count, per_group, result_slot(op));
                let needed = passes.first().map_or(0, |pass| pass.groups);
                if passes.len() > 1 && needed > scratch.scratch_a.len {
                    return Err(EngineError::BufferAccess {
                        index: needed as usize,
                        size: scratch.scratch_a.len as usize,
                    });
                }
                run_passes(device, kernel, &passes, input, input_offset, scratch)?;
            }
        }
    }

    let slots = device.read_points(scratch.result, 0, RESULT_SLOTS)?;
    let result = ReductionResult {
        min: slots[MIN_SLOT as usize],
        max: slots[MAX_SLOT as usize],
        sum: slots[SUM_SLOT as usize],
    };
    log::debug!(
        "[Reduction] {:?} over {} points: min {:?} max {:?}",
        settings.strategy,
        count,
        result.min,
        result.max
    );
    Ok(result)
}

/// Sequential host reduction
pub fn reduce_on_host(values: &[Vec3]) -> ReductionResult {
    values.iter().fold(
        ReductionResult {
            min: ReductionOp::Min.identity(),
            max: ReductionOp::Max.identity(),
            sum: ReductionOp::Add.identity(),
        },
        |acc, &v| ReductionResult {
            min: acc.min.min(v),
            max: acc.max.max(v),
            sum: acc.sum + v,
        },
    )
}

/// Mean of the reduced points
pub fn centroid(result: &ReductionResult, count: u32) -> Vec3 {
    result.sum / count.max(1) as f32
}

/// Per-component bound on the sum difference between two summation orders
///
/// Rounding error grows with the square root of `count` times the largest
/// partial sum. Partial sums are bounded by the final sum, or by a random
/// walk over the extreme magnitude when signs cancel.
pub fn sum_tolerance(expected: &ReductionResult, count: u32) -> Vec3 {
    let root = (count as f32).sqrt();
    let magnitude = expected.min.abs().max(expected.max.abs());
    let partial = expected.sum.abs().max(magnitude * root);
    partial * (SUM_ROUNDOFF_FACTOR * f32::EPSILON * root)
}

/// Min and max must agree exactly; sums within `sum_tolerance`
pub fn results_agree(expected: &ReductionResult, actual: &ReductionResult, count: u32) -> bool {
    if expected.min != actual.min || expected.max != actual.max {
        return false;
    }
    (expected.sum - actual.sum)
        .abs()
        .cmple(sum_tolerance(expected, count))
        .all()
}

/// Run `settings` and the single-threaded scan on the same range and compare
///
/// A mismatch is a diagnostic, not an error: it is logged with a dump of the
/// leading input values and returned in the check.
pub fn verify_reduction<D: ComputeDevice + ?Sized>(
    device: &mut D,
    input: BufferHandle,
    input_offset: u32,
    count: u32,
    scratch: &ReductionScratch,
    settings: &ReductionSettings,
) -> EngineResult<ReductionCheck> {
    let actual = reduce(device, input, input_offset, count, scratch, settings)?;
    let oracle = ReductionSettings {
        strategy: ReductionStrategy::SingleThreadedScan,
        ..*settings
    };
    let expected = reduce(device, input, input_offset, count, scratch, &oracle)?;
    let matches = results_agree(&expected, &actual, count);

    if !matches {
        log::warn!(
            "[Reduction] {:?} disagrees with single-threaded scan over {} points: \
             expected min {:?} max {:?} sum {:?}, got min {:?} max {:?} sum {:?}",
            settings.strategy,
            count,
            expected.min,
            expected.max,
            expected.sum,
            actual.min,
            actual.max,
            actual.sum
        );
        let dump = device.read_points(input, input_offset, count.min(DUMP_LIMIT))?;
        log::warn!("[Reduction] Leading input values: {:?}", dump);
    }

    Ok(ReductionCheck {
        strategy: settings.strategy,
        expected,
        actual,
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pass_plan() {
        let passes = plan_reduction(100, 256, SUM_SLOT);
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].source, ReductionBuffer::Input);
        assert_eq!(passes[0].target, ReductionBuffer::Result);
        assert_eq!(passes[0].output_offset, SUM_SLOT);
    }

    #[test]
    fn test_multi_pass_plan_ping_pongs() {
        // 100_000 -> 391 -> 2 -> result
        let passes = plan_reduction(100_000, 256, MAX_SLOT);
        let shape: Vec<_> = passes
            .iter()
            .map(|p| (p.source, p.target, p.element_count, p.groups))
            .collect();
        assert_eq!(
            shape,
            vec![
                (ReductionBuffer::Input, ReductionBuffer::ScratchA, 100_000, 391),
                (ReductionBuffer::ScratchA, ReductionBuffer::ScratchB, 391, 2),
                (ReductionBuffer::ScratchB, ReductionBuffer::Result, 2, 1),
            ]
        );
        assert!(passes.iter().all(|p| p.source != p.target));
    }

    #[test]
    fn test_scratch_covers_first_pass() {
        let settings = ReductionSettings {
            group_size: 64,
            double_load: false,
            ..ReductionSettings::default()
        };
        let len = scratch_len(10_000, &settings);
        let first = plan_reduction(10_000, 64, MIN_SLOT)[0];
        assert!(first.groups <= len);
    }

    #[test]
    fn test_validate_settings() {
        let mut settings = ReductionSettings::default();
        assert!(validate_settings(&settings, 256).is_ok());
        settings.group_size = 96;
        assert!(validate_settings(&settings, 256).is_err());
        settings.group_size = 512;
        assert!(validate_settings(&settings, 256).is_err());
        settings.group_size = 1;
        assert!(validate_settings(&settings, 256).is_err());
    }

    #[test]
    fn test_host_reduction() {
        let values = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(-1.0, 5.0, 0.0),
        ];
        let result = reduce_on_host(&values);
        assert_eq!(result.min, Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(result.max, Vec3::new(1.0, 5.0, 3.0));
        assert_eq!(result.sum, Vec3::new(0.0, 7.0, 3.0));
    }

    #[test]
    fn test_results_agree() {
        let a = ReductionResult {
            min: Vec3::ZERO,
            max: Vec3::ONE,
            sum: Vec3::splat(500.0),
        };
        let close = ReductionResult {
            sum: Vec3::splat(500.001),
            ..a
        };
        let wrong_min = ReductionResult {
            min: Vec3::splat(-0.5),
            ..a
        };
        assert!(results_agree(&a, &close, 1000));
        assert!(!results_agree(&a, &wrong_min, 1000));
    }

    #[test]
    fn test_sum_missing_one_point_is_rejected() {
        let values: Vec<Vec3> = (0..10_000)
            .map(|i| {
                Vec3::new(
                    0.5 + (i % 7) as f32 * 0.07,
                    1.0 - (i % 11) as f32 * 0.05,
                    0.25 + (i % 13) as f32 * 0.03,
                )
            })
            .collect();
        let full = reduce_on_host(&values);

        // same extremes, one point short
        let dropped = reduce_on_host(&values[1..]);
        assert_eq!(dropped.min, full.min);
        assert_eq!(dropped.max, full.max);
        assert!(!results_agree(&full, &dropped, 10_000));

        let reversed: Vec<Vec3> = values.iter().rev().copied().collect();
        assert!(results_agree(&full, &reduce_on_host(&reversed), 10_000));
    }

    #[test]
    fn test_centroid() {
        let result = reduce_on_host(&[Vec3::new(1.0, 2.0, 3.0), Vec3::new(3.0, 0.0, -1.0)]);
        assert_eq!(centroid(&result, 2), Vec3::new(2.0, 1.0, 1.0));
    }

    #[test]
    fn test_tolerance_rejects_large_drift() {
        let expected = ReductionResult {
            min: Vec3::ZERO,
            max: Vec3::ONE,
            sum: Vec3::splat(50_000.0),
        };
        let drifted = ReductionResult {
            sum: Vec3::splat(49_910.0),
            ..expected
        };
        assert!(!results_agree(&expected, &drifted, 100_000));
    }
}
