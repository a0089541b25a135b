//! Cycle orchestration
//!
//! Owns the buffers of one pipeline instance and runs
//! generate → predict → generate → voxelize over them.

mod pipeline_data;
mod pipeline_operations;

pub use pipeline_data::{CycleReport, PipelineBuffers, PipelineLayout, PipelineState};
pub use pipeline_operations::{
    allocate_buffers, init_pipeline, pipeline_layout, release_buffers, release_pipeline, run_cycle,
};
