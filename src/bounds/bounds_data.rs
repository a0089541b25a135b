//! Bounds Data - Pure DOP

use crate::reduction::ReductionResult;
use glam::{Mat4, Vec3};

/// Size of the low-detail surrogate population
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowDetailPlan {
    /// Generations expanded (depth `d`)
    pub generations: u32,
    /// `T + T^2 + ... + T^d`
    pub capacity: u32,
    /// First index of the deepest generation
    pub final_offset: u32,
    /// `T^d`
    pub final_count: u32,
}

/// Normalization derived from the low-detail population
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundsPrediction {
    pub origin: Vec3,
    pub scale: f32,
    /// `Scale(bounds / scale) · Translate(-origin)`
    pub normalizing_transform: Mat4,
    pub reduction: ReductionResult,
    pub point_count: u32,
}
