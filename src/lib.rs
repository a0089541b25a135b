// Attractor Engine - Data-Oriented Programming (DOP) Architecture
//
// Synthesizes iterated-function-system attractors as point clouds and
// voxelizes them, with every stage expressed as kernel dispatches over
// flat buffers.
// - Data lives in *_data modules, transformations in *_operations modules
// - Kernels run on any ComputeDevice: CpuDevice (rayon) or GpuDevice (wgpu)
// - Pipeline state is an explicit value: init_pipeline → run_cycle → release_pipeline

// Constants module
pub mod constants;

pub mod config;
pub mod error;

// Compute stages
pub mod affine;
pub mod bounds;
pub mod compute;
pub mod generation;
pub mod reduction;
pub mod voxel;

// Orchestration
pub mod pipeline;

pub use affine::{
    compile, compile_transform_set, interpolate, AffineTransform, RotationInterpolation,
    TransformInstructions, TransformSet,
};
pub use bounds::{predict_bounds, BoundsPrediction, LowDetailPlan};
pub use compute::{ComputeDevice, CpuDevice, DeviceLimits, Kernel, ReductionStrategy};
#[cfg(feature = "gpu")]
pub use compute::GpuDevice;
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorContext, OptionExt};
pub use generation::{generate, GenerationReport, SeedMode};
pub use pipeline::{init_pipeline, release_pipeline, run_cycle, CycleReport, PipelineState};
pub use reduction::{reduce, verify_reduction, ReductionCheck, ReductionResult, ReductionSettings};
pub use voxel::{voxelize, OccupancySummary, VoxelGrids, VoxelReport, VoxelSource};

// Re-export the math and GPU crates that appear in the public API
pub use glam;
#[cfg(feature = "gpu")]
pub use wgpu;
