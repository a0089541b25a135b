//! Bounds prediction from a low-detail surrogate population

mod bounds_data;
mod bounds_operations;

pub use bounds_data::{BoundsPrediction, LowDetailPlan};
pub use bounds_operations::{low_detail_plan, normalizing_transform, origin_and_scale, predict_bounds};
