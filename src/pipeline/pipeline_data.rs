//! Pipeline Data - Pure DOP
//!
//! Everything that survives from one cycle to the next lives in
//! `PipelineState`. Operations take the state by value and hand it back.

use crate::affine::TransformSet;
use crate::bounds::{BoundsPrediction, LowDetailPlan};
use crate::compute::BufferHandle;
use crate::generation::GenerationReport;
use crate::reduction::{ReductionCheck, ReductionScratch};
use crate::voxel::{VoxelGridDesc, VoxelGrids, VoxelReport};
use glam::{Mat4, Vec3};

/// Sizes that decide buffer allocation
///
/// Two configs with equal layouts share buffers; any difference forces a
/// reallocation at the start of the next cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineLayout {
    pub transform_count: u32,
    pub capacity: u32,
    pub low_detail: LowDetailPlan,
    pub grid: VoxelGridDesc,
    /// Largest point count any reduction of the cycle covers
    pub reduction_capacity: u32,
    pub reduction_group_size: u32,
}

/// Device buffers owned by one pipeline instance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineBuffers {
    pub points: BufferHandle,
    pub low_detail_points: BufferHandle,
    pub transforms: BufferHandle,
    pub final_transform: BufferHandle,
    pub scratch: ReductionScratch,
    pub grids: VoxelGrids,
}

/// Cross-cycle pipeline state
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub layout: PipelineLayout,
    pub buffers: PipelineBuffers,
    /// Transforms uploaded by the last successful cycle
    pub transforms: TransformSet,
    /// Most recent bounds prediction, kept when prediction is switched off
    pub last_prediction: Option<BoundsPrediction>,
    pub cycles: u64,
}

impl PipelineState {
    /// Origin and scale of the last prediction
    pub fn origin_and_scale(&self) -> Option<(Vec3, f32)> {
        self.last_prediction
            .as_ref()
            .map(|prediction| (prediction.origin, prediction.scale))
    }
}

/// Outcome of one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub transform_count: u32,
    pub low_detail: Option<GenerationReport>,
    /// `None` when the authored final transform was used
    pub prediction: Option<BoundsPrediction>,
    pub final_transform: Mat4,
    pub full_detail: GenerationReport,
    pub reduction_check: Option<ReductionCheck>,
    pub voxels: VoxelReport,
    /// Buffers were (re)allocated at the start of this cycle
    pub reallocated: bool,
}

impl CycleReport {
    pub fn dispatches(&self) -> u32 {
        self.low_detail.as_ref().map_or(0, |report| report.dispatches)
            + self.full_detail.dispatches
            + self.voxels.dispatches
    }
}
