//! Per-work-item math shared by the CPU kernels and host-side checks
//!
//! The WGSL modules implement the same formulas; any change here must be
//! mirrored in shaders/points.wgsl.

use glam::{UVec3, Vec3};

/// Parent of heap slot `index` for a system of `transform_count` maps
///
/// Only meaningful for `index >= transform_count`; generation-0 slots have no
/// parent and transform the seed stored in place.
#[inline]
pub fn parent_index(index: u32, transform_count: u32) -> u32 {
    index / transform_count - 1
}

/// Position of seed `index` on a centred cube grid of `resolution`^3 cells
pub fn grid_seed(index: u32, resolution: u32, cube_size: f32) -> Vec3 {
    let r = resolution.max(1);
    let cell = UVec3::new(index % r, (index / r) % r, index / (r * r));
    let extent = r as f32 * cube_size;
    (cell.as_vec3() + Vec3::splat(0.5)) * cube_size - Vec3::splat(extent * 0.5)
}

/// Cells per axis of a cube of side `bounds` split into `voxel_size` cells
pub fn grid_dimension(bounds: f32, voxel_size: f32) -> u32 {
    (bounds / voxel_size).floor().max(0.0) as u32
}

/// Cell containing `point`, or `None` when it falls outside the grid
#[inline]
pub fn voxel_cell(point: Vec3, grid_size: u32, bounds: f32, voxel_size: f32) -> Option<UVec3> {
    let local = (point + Vec3::splat(bounds * 0.5)) / voxel_size;
    if !local.is_finite() || local.min_element() < 0.0 {
        return None;
    }
    let cell = local.floor();
    let limit = grid_size as f32;
    if cell.max_element() >= limit {
        return None;
    }
    Some(cell.as_uvec3())
}

/// Linear index `x + y * D + z * D^2`
#[inline]
pub fn linear_cell(cell: UVec3, grid_size: u32) -> usize {
    let d = grid_size as usize;
    cell.x as usize + cell.y as usize * d + cell.z as usize * d * d
}

#[inline]
pub fn cell_from_linear(index: usize, grid_size: u32) -> UVec3 {
    let d = grid_size as usize;
    UVec3::new((index % d) as u32, ((index / d) % d) as u32, (index / (d * d)) as u32)
}

/// Inverse-distance share of occupied cells around `index`
///
/// Every offset within the cube of half-side `radius` (self excluded)
/// contributes `1 / distance` to the normaliser, including offsets that fall
/// outside the grid. Occupied in-range neighbours contribute the same amount
/// to the numerator, so the result lies in [0, 1].
pub fn occlusion_weight(
    index: usize,
    grid_size: u32,
    radius: u32,
    occupied: impl Fn(usize) -> bool,
) -> f32 {
    if radius == 0 {
        return 0.0;
    }
    let origin = cell_from_linear(index, grid_size).as_ivec3();
    let r = radius as i32;
    let d = grid_size as i32;

    let mut weight = 0.0f32;
    let mut total = 0.0f32;
    for dz in -r..=r {
        for dy in -r..=r {
            for dx in -r..=r {
                if dx == 0 && dy == 0 && dz == 0 {
                    continue;
                }
                let falloff = 1.0 / ((dx * dx + dy * dy + dz * dz) as f32).sqrt();
                total += falloff;

                let n = origin + glam::IVec3::new(dx, dy, dz);
                if n.min_element() < 0 || n.max_element() >= d {
                    continue;
                }
                if occupied(linear_cell(n.as_uvec3(), grid_size)) {
                    weight += falloff;
                }
            }
        }
    }
    weight / total
}
