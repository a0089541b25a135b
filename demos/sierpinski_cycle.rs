//! Runs the attractor pipeline on a Sierpinski tetrahedron
//!
//! Cycles through every reduction strategy, checking each against the
//! single-threaded scan, and prints the occupancy of the voxel grid.
//!
//! Usage: cargo run --example sierpinski_cycle [config.toml]

use anyhow::Result;
use attractor_engine::{
    compute::{ComputeDevice, CpuDevice},
    init_pipeline, release_pipeline, run_cycle,
    voxel::occupancy_summary,
    EngineConfig, ReductionSettings, ReductionStrategy,
};

fn open_device() -> Box<dyn ComputeDevice> {
    #[cfg(feature = "gpu")]
    match attractor_engine::GpuDevice::new() {
        Ok(device) => return Box::new(device),
        Err(e) => log::warn!("GPU unavailable ({}), falling back to CPU", e),
    }
    Box::new(CpuDevice::new())
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    println!("Sierpinski Attractor Cycle Example");
    println!("==================================");

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig {
            verify_reduction: true,
            ..EngineConfig::default()
        },
    };

    let mut device = open_device();
    println!("Device: {}", device.label());

    let mut state = init_pipeline(device.as_mut(), &config)?;

    for strategy in ReductionStrategy::ALL {
        let cycle_config = EngineConfig {
            reduction: ReductionSettings {
                strategy,
                ..config.reduction
            },
            ..config.clone()
        };

        let (next, report) = run_cycle(device.as_mut(), state, &cycle_config);
        state = next;
        let report = report?;

        println!("\n{:?}", strategy);
        if let Some(prediction) = report.prediction {
            println!(
                "  origin: ({:.4}, {:.4}, {:.4})  scale: {:.4}",
                prediction.origin.x, prediction.origin.y, prediction.origin.z, prediction.scale
            );
        }
        if let Some(check) = report.reduction_check {
            println!("  matches single-threaded scan: {}", check.matches);
        }
        let summary = occupancy_summary(device.as_mut(), &state.buffers.grids)?;
        println!(
            "  {} points, {} samples inside the grid, {} occupied cells, {} dispatches",
            report.full_detail.points_written,
            summary.total,
            summary.occupied_cells,
            report.dispatches()
        );
    }

    release_pipeline(device.as_mut(), state)?;
    Ok(())
}
