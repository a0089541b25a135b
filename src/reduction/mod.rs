//! Parallel min / max / sum reduction
//!
//! Five strategies share one host driver. `SingleThreadedScan` is the ground
//! truth the tree strategies are checked against.

mod reduction_data;
mod reduction_operations;

pub use reduction_data::{
    ReductionBuffer, ReductionCheck, ReductionPass, ReductionResult, ReductionScratch,
    ReductionSettings,
};
pub use reduction_operations::{
    allocate_scratch, centroid, plan_reduction, reduce, reduce_on_host, release_scratch, result_slot,
    results_agree, scratch_len, sum_tolerance, validate_settings, verify_reduction,
};
