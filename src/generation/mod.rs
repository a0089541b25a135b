//! IFS point generation
//!
//! Seeds the point buffer and fills it generation by generation on the
//! compute device.

mod generation_data;
mod generation_operations;

pub use generation_data::{GenerationRange, GenerationReport, SeedMode};
pub use generation_operations::{
    cube_resolution, expand_on_host, generate, plan_generations, reset_points,
    run_generations, seed_params,
};
