//! Voxelizer: dense occupancy grid plus soft occlusion

mod voxel_data;
mod voxel_operations;

pub use voxel_data::{
    OccupancySummary, VoxelGridDesc, VoxelGrids, VoxelInput, VoxelReport, VoxelSource,
};
pub use voxel_operations::{
    allocate_grids, clear_grids, compute_occlusion, grid_desc, occupancy_summary, rasterize,
    release_grids, sample_count, voxelize,
};
