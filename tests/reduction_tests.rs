//! Reduction strategies against the host scan and the single-threaded kernel

use attractor_engine::compute::{BufferKind, ComputeDevice, CpuDevice, DeviceLimits};
use attractor_engine::reduction::{
    allocate_scratch, reduce, reduce_on_host, release_scratch, results_agree, verify_reduction,
    ReductionSettings,
};
use attractor_engine::ReductionStrategy;
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn every_setting() -> Vec<ReductionSettings> {
    let mut settings = Vec::new();
    for strategy in ReductionStrategy::ALL {
        for double_load in [false, true] {
            for group_size in [2, 4, 32, 64, 128, 256] {
                settings.push(ReductionSettings {
                    strategy,
                    double_load,
                    group_size,
                });
            }
        }
    }
    settings
}

fn random_points(seed: u64, count: usize, magnitude: f32) -> Vec<Vec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            Vec3::new(
                rng.gen_range(-magnitude..magnitude),
                rng.gen_range(-magnitude..magnitude),
                rng.gen_range(-magnitude..magnitude),
            )
        })
        .collect()
}

fn upload(device: &mut CpuDevice, points: &[Vec3]) -> attractor_engine::compute::BufferHandle {
    let buffer = device
        .create_buffer(BufferKind::Points, points.len() as u32, "input")
        .unwrap();
    device.write_points(buffer, 0, points).unwrap();
    buffer
}

#[test_log::test]
fn test_three_points_under_every_strategy() {
    let mut device = CpuDevice::new();
    let points = [
        Vec3::new(1.0, 2.0, 3.0),
        Vec3::new(-1.0, 5.0, 0.0),
        Vec3::new(4.0, -2.0, 7.0),
    ];
    let input = upload(&mut device, &points);

    for settings in every_setting() {
        let scratch = allocate_scratch(&mut device, 3, &settings).unwrap();
        let result = reduce(&mut device, input, 0, 3, &scratch, &settings).unwrap();

        assert_eq!(result.min, Vec3::new(-1.0, -2.0, 0.0), "{:?}", settings);
        assert_eq!(result.max, Vec3::new(4.0, 5.0, 7.0), "{:?}", settings);
        assert!(result.sum.abs_diff_eq(Vec3::new(4.0, 5.0, 10.0), 1e-5), "{:?}", settings);
        release_scratch(&mut device, scratch).unwrap();
    }
}

#[test_log::test]
fn test_origin_and_two_points_under_every_setting() {
    let mut device = CpuDevice::new();
    let points = [
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 2.0, 3.0),
        Vec3::new(-1.0, 5.0, 0.0),
    ];
    let input = upload(&mut device, &points);

    for settings in every_setting() {
        let scratch = allocate_scratch(&mut device, 3, &settings).unwrap();
        let result = reduce(&mut device, input, 0, 3, &scratch, &settings).unwrap();

        assert_eq!(result.min, Vec3::new(-1.0, 0.0, 0.0), "{:?}", settings);
        assert_eq!(result.max, Vec3::new(1.0, 5.0, 3.0), "{:?}", settings);
        assert_eq!(result.sum, Vec3::new(0.0, 7.0, 3.0), "{:?}", settings);
        release_scratch(&mut device, scratch).unwrap();
    }
}

#[test_log::test]
fn test_random_buffers_agree_with_host_scan() {
    let mut device = CpuDevice::new();

    for (seed, count) in [(7u64, 1usize), (11, 255), (13, 1_000), (17, 65_537)] {
        let points = random_points(seed, count, 100.0);
        let expected = reduce_on_host(&points);
        let input = upload(&mut device, &points);

        for settings in every_setting() {
            let scratch = allocate_scratch(&mut device, count as u32, &settings).unwrap();
            let result = reduce(&mut device, input, 0, count as u32, &scratch, &settings).unwrap();
            assert!(
                results_agree(&expected, &result, count as u32),
                "{} points, {:?}: expected {:?}, got {:?}",
                count,
                settings,
                expected,
                result
            );
            release_scratch(&mut device, scratch).unwrap();
        }
        device.release_buffer(input).unwrap();
    }
}

#[test_log::test]
fn test_verify_against_single_threaded_kernel() {
    let mut device = CpuDevice::new();
    let points = random_points(42, 10_000, 5.0);
    let input = upload(&mut device, &points);

    for strategy in ReductionStrategy::ALL {
        let settings = ReductionSettings {
            strategy,
            ..ReductionSettings::default()
        };
        let scratch = allocate_scratch(&mut device, 10_000, &settings).unwrap();
        let check = verify_reduction(&mut device, input, 0, 10_000, &scratch, &settings).unwrap();
        assert!(check.matches, "{:?}", check);
        assert_eq!(check.strategy, strategy);
        release_scratch(&mut device, scratch).unwrap();
    }
}

#[test_log::test]
fn test_reduce_sub_range() {
    let mut device = CpuDevice::new();
    let mut points = vec![Vec3::splat(1_000.0); 64];
    points.extend(random_points(3, 200, 1.0));
    let input = upload(&mut device, &points);
    let expected = reduce_on_host(&points[64..]);

    let settings = ReductionSettings::default();
    let scratch = allocate_scratch(&mut device, 200, &settings).unwrap();
    let result = reduce(&mut device, input, 64, 200, &scratch, &settings).unwrap();
    assert!(results_agree(&expected, &result, 200));
}

#[test_log::test]
fn test_empty_range_is_invalid() {
    let mut device = CpuDevice::new();
    let input = upload(&mut device, &[Vec3::ONE]);
    let settings = ReductionSettings::default();
    let scratch = allocate_scratch(&mut device, 1, &settings).unwrap();

    let err = reduce(&mut device, input, 0, 0, &scratch, &settings).unwrap_err();
    assert!(err.is_configuration());
}

#[test_log::test]
fn test_multi_pass_with_small_group_limit() {
    let limits = DeviceLimits {
        max_groups_per_dimension: 4,
        ..DeviceLimits::default()
    };
    let mut device = CpuDevice::with_limits(limits);
    let points = random_points(99, 5_000, 50.0);
    let expected = reduce_on_host(&points);
    let input = upload(&mut device, &points);

    let settings = ReductionSettings {
        strategy: ReductionStrategy::UnrollLastWarp,
        double_load: false,
        group_size: 8,
    };
    let scratch = allocate_scratch(&mut device, 5_000, &settings).unwrap();
    let result = reduce(&mut device, input, 0, 5_000, &scratch, &settings).unwrap();
    assert!(results_agree(&expected, &result, 5_000));
}
