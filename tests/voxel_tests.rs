//! Voxelization and bounds prediction on the CPU work-group device

use attractor_engine::bounds::{predict_bounds, LowDetailPlan};
use attractor_engine::compute::kernel_math::occlusion_weight;
use attractor_engine::compute::{BufferHandle, BufferKind, ComputeDevice, CpuDevice, DeviceLimits};
use attractor_engine::reduction::{allocate_scratch, ReductionSettings};
use attractor_engine::voxel::{
    allocate_grids, grid_desc, occupancy_summary, voxelize, VoxelGrids, VoxelInput,
};
use glam::{Mat4, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct Scene {
    points: BufferHandle,
    count: u32,
    transforms: BufferHandle,
    transform_count: u32,
    final_transform: BufferHandle,
    grids: VoxelGrids,
}

fn scene(
    device: &mut CpuDevice,
    points: &[Vec3],
    transforms: &[Mat4],
    bounds: f32,
    voxel_size: f32,
) -> Scene {
    let buffer = device
        .create_buffer(BufferKind::Points, points.len() as u32, "points")
        .unwrap();
    device.write_points(buffer, 0, points).unwrap();
    let transform_buffer = device
        .create_buffer(BufferKind::Transforms, transforms.len() as u32, "transforms")
        .unwrap();
    device.write_transforms(transform_buffer, transforms).unwrap();
    let final_transform = device
        .create_buffer(BufferKind::Transforms, 1, "final")
        .unwrap();
    device
        .write_transforms(final_transform, &[Mat4::IDENTITY])
        .unwrap();
    let grids = allocate_grids(device, grid_desc(bounds, voxel_size).unwrap()).unwrap();

    Scene {
        points: buffer,
        count: points.len() as u32,
        transforms: transform_buffer,
        transform_count: transforms.len() as u32,
        final_transform,
        grids,
    }
}

fn run(device: &mut CpuDevice, scene: &Scene, radius: u32, instanced: bool) -> u32 {
    let input = VoxelInput {
        points: scene.points,
        offset: 0,
        count: scene.count,
    };
    voxelize(
        device,
        input,
        scene.transforms,
        scene.transform_count,
        scene.final_transform,
        &scene.grids,
        radius,
        instanced,
    )
    .unwrap()
    .samples
}

#[test_log::test]
fn test_points_land_in_expected_cells() {
    let mut device = CpuDevice::new();
    let points = [
        Vec3::splat(0.5),
        Vec3::splat(0.5),
        Vec3::new(10.0, 0.0, 0.0),
        Vec3::splat(-2.0),
        Vec3::new(2.0, 0.0, 0.0),
    ];
    let scene = scene(&mut device, &points, &[Mat4::IDENTITY], 4.0, 1.0);
    let samples = run(&mut device, &scene, 1, false);
    assert_eq!(samples, 5);

    let counters = device.read_counters(scene.grids.voxels).unwrap();
    assert_eq!(counters.len(), 64);
    // (2, 2, 2) holds both copies of (0.5, 0.5, 0.5)
    assert_eq!(counters[2 + 2 * 4 + 2 * 16], 2);
    assert_eq!(counters[0], 1);
    // (10, 0, 0) and the upper face at x = 2 fall outside
    assert_eq!(counters.iter().sum::<u32>(), 3);
}

#[test_log::test]
fn test_occupancy_sum_equals_samples_inside() {
    let mut device = CpuDevice::new();
    let mut rng = StdRng::seed_from_u64(5);
    let points: Vec<Vec3> = (0..20_000)
        .map(|_| {
            Vec3::new(
                rng.gen_range(-4.9..4.9),
                rng.gen_range(-4.9..4.9),
                rng.gen_range(-4.9..4.9),
            )
        })
        .collect();
    let scene = scene(&mut device, &points, &[Mat4::IDENTITY], 10.0, 0.25);
    let samples = run(&mut device, &scene, 2, false);

    let summary = occupancy_summary(&mut device, &scene.grids).unwrap();
    assert_eq!(summary.total, samples as u64);
    assert!(summary.occupied_cells > 1);
}

#[test_log::test]
fn test_instanced_voxelization_counts_every_transform() {
    let mut device = CpuDevice::new();
    let transforms = [Mat4::IDENTITY, Mat4::from_translation(Vec3::X)];
    let scene = scene(&mut device, &[Vec3::splat(0.5)], &transforms, 4.0, 1.0);

    let samples = run(&mut device, &scene, 1, true);
    assert_eq!(samples, 2);

    let counters = device.read_counters(scene.grids.voxels).unwrap();
    assert_eq!(counters[2 + 2 * 4 + 2 * 16], 1);
    assert_eq!(counters[3 + 2 * 4 + 2 * 16], 1);
}

#[test_log::test]
fn test_occlusion_matches_host_weights() {
    let mut device = CpuDevice::new();
    let points = [Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(-2.0, 2.0, 2.0)];
    let scene = scene(&mut device, &points, &[Mat4::IDENTITY], 5.0, 1.0);
    run(&mut device, &scene, 2, false);

    let counters = device.read_counters(scene.grids.voxels).unwrap();
    let weights = device.read_weights(scene.grids.occlusion).unwrap();
    let dimension = scene.grids.desc.dimension;
    for (i, weight) in weights.iter().enumerate() {
        let expected = occlusion_weight(i, dimension, 2, |n| counters[n] > 0);
        assert!((weight - expected).abs() < 1e-6, "cell {}: {} vs {}", i, weight, expected);
        assert!((0.0..=1.0).contains(weight));
    }
    // the centre cell has an occupied neighbour at distance 1
    assert!(weights[2 + 2 * 5 + 2 * 25] > 0.0);
}

#[test_log::test]
fn test_grids_are_cleared_between_runs_with_chunked_dispatch() {
    let limits = DeviceLimits {
        max_groups_per_dimension: 2,
        ..DeviceLimits::default()
    };
    let mut device = CpuDevice::with_limits(limits);
    let points = vec![Vec3::splat(0.1); 300];
    let scene = scene(&mut device, &points, &[Mat4::IDENTITY], 10.0, 0.25);

    run(&mut device, &scene, 1, false);
    run(&mut device, &scene, 1, false);

    let summary = occupancy_summary(&mut device, &scene.grids).unwrap();
    assert_eq!(summary.total, 300);
    assert_eq!(summary.occupied_cells, 1);
}

#[test_log::test]
fn test_predicted_scale_covers_every_axis() {
    let mut device = CpuDevice::new();
    let mut rng = StdRng::seed_from_u64(21);
    let points: Vec<Vec3> = (0..4_096)
        .map(|_| {
            Vec3::new(
                rng.gen_range(-3.0..7.0),
                rng.gen_range(0.0..1.0),
                rng.gen_range(-0.5..0.25),
            )
        })
        .collect();
    let buffer = device
        .create_buffer(BufferKind::Points, points.len() as u32, "points")
        .unwrap();
    device.write_points(buffer, 0, &points).unwrap();

    let plan = LowDetailPlan {
        generations: 1,
        capacity: 4_096,
        final_offset: 0,
        final_count: 4_096,
    };
    let settings = ReductionSettings::default();
    let scratch = allocate_scratch(&mut device, 4_096, &settings).unwrap();
    let prediction =
        predict_bounds(&mut device, buffer, &plan, &scratch, &settings, 1.0, 10.0).unwrap();

    let centroid = points.iter().copied().sum::<Vec3>() / points.len() as f32;
    assert!(prediction.origin.abs_diff_eq(centroid, 1e-3));
    for p in &points {
        let offset = (*p - prediction.origin).abs();
        assert!(offset.max_element() <= prediction.scale + 1e-5);
    }

    // the normalized population fits inside [-bounds, bounds]
    for p in &points {
        let q = prediction.normalizing_transform.transform_point3(*p);
        assert!(q.abs().max_element() <= 10.0 + 1e-3);
    }
}
