//! Reduction Data - Pure DOP
//!
//! Settings, multi-pass plans and results of the min / max / sum reduction.
//! All transformations happen in reduction_operations.rs

use crate::compute::{BufferHandle, ReductionStrategy};
use crate::constants::reduction::DEFAULT_GROUP_SIZE;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Per-call reduction code path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionSettings {
    pub strategy: ReductionStrategy,
    pub double_load: bool,
    /// Lanes per work-group, a power of two
    pub group_size: u32,
}

impl Default for ReductionSettings {
    fn default() -> Self {
        Self {
            strategy: ReductionStrategy::SequentialAddressing,
            double_load: true,
            group_size: DEFAULT_GROUP_SIZE,
        }
    }
}

/// Component-wise min, max and sum of a point range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReductionResult {
    pub min: Vec3,
    pub max: Vec3,
    pub sum: Vec3,
}

/// Buffer a reduction pass reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReductionBuffer {
    Input,
    ScratchA,
    ScratchB,
    Result,
}

/// One dispatch of a multi-pass tree reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionPass {
    pub source: ReductionBuffer,
    pub target: ReductionBuffer,
    pub element_count: u32,
    pub groups: u32,
    /// First slot of `target` written (the result slot on the final pass)
    pub output_offset: u32,
}

/// Device buffers a reduction needs besides its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionScratch {
    pub scratch_a: BufferHandle,
    pub scratch_b: BufferHandle,
    /// Three points: min, max, sum
    pub result: BufferHandle,
}

/// Outcome of comparing a strategy against the single-threaded scan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReductionCheck {
    pub strategy: ReductionStrategy,
    pub expected: ReductionResult,
    pub actual: ReductionResult,
    pub matches: bool,
}
