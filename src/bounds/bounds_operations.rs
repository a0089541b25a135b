//! Bounds Operations - Pure DOP Functions
//!
//! Predicts origin and scale from a cheap low-detail population instead of
//! the full-detail buffer.

use super::bounds_data::{BoundsPrediction, LowDetailPlan};
use crate::compute::{BufferHandle, ComputeDevice};
use crate::constants::bounds::MIN_EXTENT;
use crate::constants::capacity::MAX_POINT_CAPACITY;
use crate::error::{EngineError, EngineResult};
use crate::reduction::{centroid, reduce, ReductionResult, ReductionScratch, ReductionSettings};
use glam::{Mat4, Vec3};

/// Size the low-detail population for `transform_count` maps and depth `generations`
///
/// Fails when the population would not fit the safe point capacity.
pub fn low_detail_plan(transform_count: u32, generations: u32) -> EngineResult<LowDetailPlan> {
    if transform_count == 0 {
        return Err(EngineError::invalid_config(
            "transforms",
            0,
            "at least one transform is required",
        ));
    }
    if generations == 0 {
        return Err(EngineError::invalid_config(
            "low_detail_generations",
            0,
            "must be at least 1",
        ));
    }

    let overflow = || {
        EngineError::invalid_config(
            "low_detail_generations",
            generations,
            format!(
                "{} transforms over {} generations exceed the safe capacity of {} points",
                transform_count, generations, MAX_POINT_CAPACITY
            ),
        )
    };

    let t = transform_count as u64;
    let mut capacity = 0u64;
    let mut width = 1u64;
    for _ in 0..generations {
        width = width.checked_mul(t).ok_or_else(overflow)?;
        capacity = capacity.checked_add(width).ok_or_else(overflow)?;
        if capacity > MAX_POINT_CAPACITY {
            return Err(overflow());
        }
    }

    Ok(LowDetailPlan {
        generations,
        capacity: capacity as u32,
        final_offset: (capacity - width) as u32,
        final_count: width as u32,
    })
}

/// Centroid and padded radius of a reduced population
///
/// `scale` is the larger corner distance from the centroid times `padding`.
/// A collapsed population (scale below `MIN_EXTENT`) falls back to 1.0.
pub fn origin_and_scale(reduction: &ReductionResult, count: u32, padding: f32) -> (Vec3, f32) {
    let origin = centroid(reduction, count);
    let extent = (reduction.max - origin)
        .length()
        .max((reduction.min - origin).length());
    let scale = extent * padding;

    if !scale.is_finite() || scale < MIN_EXTENT {
        log::warn!(
            "[BoundsPredictor] Degenerate extent {} around {:?}; using unit scale",
            scale,
            origin
        );
        return (origin, 1.0);
    }
    (origin, scale)
}

/// `Scale(bounds / scale) · Translate(-origin)`
pub fn normalizing_transform(origin: Vec3, scale: f32, bounds: f32) -> Mat4 {
    Mat4::from_scale(Vec3::splat(bounds / scale)) * Mat4::from_translation(-origin)
}

/// Reduce the deepest low-detail generation and derive the normalization
///
/// `points` must already hold the expanded low-detail population.
pub fn predict_bounds<D: ComputeDevice + ?Sized>(
    device: &mut D,
    points: BufferHandle,
    plan: &LowDetailPlan,
    scratch: &ReductionScratch,
    settings: &ReductionSettings,
    padding: f32,
    bounds: f32,
) -> EngineResult<BoundsPrediction> {
    let reduction = reduce(
        device,
        points,
        plan.final_offset,
        plan.final_count,
        scratch,
        settings,
    )?;
    let (origin, scale) = origin_and_scale(&reduction, plan.final_count, padding);

    log::debug!(
        "[BoundsPredictor] origin {:?}, scale {} from {} points",
        origin,
        scale,
        plan.final_count
    );

    Ok(BoundsPrediction {
        origin,
        scale,
        normalizing_transform: normalizing_transform(origin, scale, bounds),
        reduction,
        point_count: plan.final_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_detail_plan() {
        let plan = low_detail_plan(4, 3).unwrap();
        assert_eq!(plan.capacity, 4 + 16 + 64);
        assert_eq!(plan.final_offset, 20);
        assert_eq!(plan.final_count, 64);

        let chain = low_detail_plan(1, 5).unwrap();
        assert_eq!(chain.capacity, 5);
        assert_eq!(chain.final_offset, 4);
        assert_eq!(chain.final_count, 1);
    }

    #[test]
    fn test_low_detail_overflow_is_invalid() {
        let err = low_detail_plan(1000, 8).unwrap_err();
        assert!(err.is_configuration());
        assert!(low_detail_plan(u32::MAX, 40).unwrap_err().is_configuration());
        assert!(low_detail_plan(4, 0).is_err());
        assert!(low_detail_plan(0, 4).is_err());
    }

    #[test]
    fn test_origin_and_scale() {
        let reduction = ReductionResult {
            min: Vec3::new(-1.0, 0.0, 0.0),
            max: Vec3::new(3.0, 0.0, 0.0),
            sum: Vec3::new(2.0, 0.0, 0.0),
        };
        let (origin, scale) = origin_and_scale(&reduction, 2, 2.0);
        assert_eq!(origin, Vec3::new(1.0, 0.0, 0.0));
        assert!((scale - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_scale_falls_back() {
        let reduction = ReductionResult {
            min: Vec3::ONE,
            max: Vec3::ONE,
            sum: Vec3::splat(5.0),
        };
        let (origin, scale) = origin_and_scale(&reduction, 5, 2.0);
        assert_eq!(origin, Vec3::ONE);
        assert_eq!(scale, 1.0);
    }

    #[test]
    fn test_normalizing_transform() {
        let m = normalizing_transform(Vec3::new(1.0, 2.0, 3.0), 4.0, 10.0);
        let p = m.transform_point3(Vec3::new(1.0, 2.0, 3.0));
        assert!(p.abs_diff_eq(Vec3::ZERO, 1e-6));
        let q = m.transform_point3(Vec3::new(3.0, 2.0, 3.0));
        assert!(q.abs_diff_eq(Vec3::new(5.0, 0.0, 0.0), 1e-5));
    }
}
