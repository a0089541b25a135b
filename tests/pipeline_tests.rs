//! Full cycles through the pipeline lifecycle

use attractor_engine::compute::{ComputeDevice, CpuDevice};
use attractor_engine::voxel::occupancy_summary;
use attractor_engine::{
    init_pipeline, release_pipeline, run_cycle, EngineConfig, ReductionSettings,
    ReductionStrategy, SeedMode, TransformInstructions, VoxelSource,
};
use glam::Vec3;

fn test_config() -> EngineConfig {
    EngineConfig {
        capacity: 10_000,
        low_detail_generations: 5,
        voxel_size: 0.5,
        scale_padding: 3.0,
        verify_reduction: true,
        ..EngineConfig::default()
    }
}

fn run_cycles<D: ComputeDevice + ?Sized>(device: &mut D, config: &EngineConfig, cycles: usize) {
    let mut state = init_pipeline(device, config).unwrap();
    for cycle in 1..=cycles {
        let (next, report) = run_cycle(device, state, config);
        state = next;
        let report = report.unwrap();

        assert_eq!(report.cycle, cycle as u64);
        assert_eq!(report.full_detail.points_written, config.capacity);
        assert!(report.reduction_check.unwrap().matches);

        let summary = occupancy_summary(device, &state.buffers.grids).unwrap();
        assert_eq!(summary.total, report.voxels.samples as u64);
    }
    release_pipeline(device, state).unwrap();
}

#[test_log::test]
fn test_every_strategy_runs_a_full_cycle() {
    let mut device = CpuDevice::new();
    for strategy in ReductionStrategy::ALL {
        let config = EngineConfig {
            reduction: ReductionSettings {
                strategy,
                ..ReductionSettings::default()
            },
            ..test_config()
        };
        run_cycles(&mut device, &config, 2);
    }
    assert_eq!(device.live_buffers(), 0);
}

#[test_log::test]
fn test_repeated_cycles_are_deterministic() {
    let mut device = CpuDevice::new();
    let config = test_config();
    let state = init_pipeline(&mut device, &config).unwrap();

    let (state, first) = run_cycle(&mut device, state, &config);
    let first = first.unwrap();
    let first_grid = device.read_counters(state.buffers.grids.voxels).unwrap();

    let (state, second) = run_cycle(&mut device, state, &config);
    let second = second.unwrap();
    let second_grid = device.read_counters(state.buffers.grids.voxels).unwrap();

    assert_eq!(first.final_transform, second.final_transform);
    assert_eq!(first_grid, second_grid);
    release_pipeline(&mut device, state).unwrap();
}

#[test_log::test]
fn test_transform_edit_between_cycles() {
    let mut device = CpuDevice::new();
    let config = test_config();
    let state = init_pipeline(&mut device, &config).unwrap();
    let (state, report) = run_cycle(&mut device, state, &config);
    let before = report.unwrap().prediction.unwrap();

    // a fifth map changes the transform count and forces reallocation
    let mut edited = config.clone();
    edited
        .transforms
        .push(TransformInstructions::uniform(0.5, Vec3::new(0.0, 3.0, 0.0)));
    let (state, report) = run_cycle(&mut device, state, &edited);
    let report = report.unwrap();

    assert!(report.reallocated);
    assert_eq!(report.transform_count, 5);
    assert_eq!(state.transforms.count(), 5);
    assert_ne!(report.prediction.unwrap().origin, before.origin);
    release_pipeline(&mut device, state).unwrap();
}

#[test_log::test]
fn test_seed_modes_and_sources() {
    let mut device = CpuDevice::new();
    for seed_mode in [SeedMode::Origin, SeedMode::UniformGrid] {
        for voxel_source in [VoxelSource::FullDetail, VoxelSource::LowDetail] {
            let config = EngineConfig {
                seed_mode,
                voxel_source,
                instanced_voxelization: voxel_source == VoxelSource::LowDetail,
                ..test_config()
            };
            run_cycles(&mut device, &config, 1);
        }
    }
}

#[test_log::test]
fn test_failed_cycle_keeps_state_usable() {
    let mut device = CpuDevice::new();
    let config = test_config();
    let state = init_pipeline(&mut device, &config).unwrap();

    let broken = EngineConfig {
        transforms: Vec::new(),
        ..config.clone()
    };
    let (state, report) = run_cycle(&mut device, state, &broken);
    assert!(report.unwrap_err().is_configuration());

    let (state, report) = run_cycle(&mut device, state, &config);
    assert_eq!(report.unwrap().cycle, 1);
    release_pipeline(&mut device, state).unwrap();
}

#[cfg(feature = "gpu")]
mod gpu {
    use super::*;
    use attractor_engine::{EngineError, GpuDevice};

    fn gpu_device() -> Option<GpuDevice> {
        match GpuDevice::new() {
            Ok(device) => Some(device),
            Err(EngineError::DeviceNotFound) => {
                log::warn!("No GPU adapter available, skipping");
                None
            }
            Err(e) => {
                log::warn!("GPU device unusable ({}), skipping", e);
                None
            }
        }
    }

    #[test_log::test]
    fn test_gpu_cycle_matches_cpu() {
        let Some(mut gpu) = gpu_device() else {
            return;
        };
        let mut cpu = CpuDevice::new();
        let config = test_config();

        let gpu_state = init_pipeline(&mut gpu, &config).unwrap();
        let cpu_state = init_pipeline(&mut cpu, &config).unwrap();
        let (gpu_state, gpu_report) = run_cycle(&mut gpu, gpu_state, &config);
        let (cpu_state, cpu_report) = run_cycle(&mut cpu, cpu_state, &config);
        let gpu_report = gpu_report.unwrap();
        let cpu_report = cpu_report.unwrap();

        let gpu_prediction = gpu_report.prediction.unwrap();
        let cpu_prediction = cpu_report.prediction.unwrap();
        let reduction = (gpu_prediction.reduction, cpu_prediction.reduction);
        assert!(reduction.0.min.abs_diff_eq(reduction.1.min, 1e-4));
        assert!(reduction.0.max.abs_diff_eq(reduction.1.max, 1e-4));
        assert!(gpu_prediction.origin.abs_diff_eq(cpu_prediction.origin, 1e-3));

        let gpu_summary = occupancy_summary(&mut gpu, &gpu_state.buffers.grids).unwrap();
        let cpu_summary = occupancy_summary(&mut cpu, &cpu_state.buffers.grids).unwrap();
        assert_eq!(gpu_summary.total, cpu_summary.total);

        release_pipeline(&mut gpu, gpu_state).unwrap();
        release_pipeline(&mut cpu, cpu_state).unwrap();
    }

    #[test_log::test]
    fn test_gpu_strategies_agree_with_scan() {
        let Some(mut gpu) = gpu_device() else {
            return;
        };
        for strategy in ReductionStrategy::ALL {
            let config = EngineConfig {
                reduction: ReductionSettings {
                    strategy,
                    ..ReductionSettings::default()
                },
                ..test_config()
            };
            run_cycles(&mut gpu, &config, 1);
        }
    }
}
