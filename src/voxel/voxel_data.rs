//! Voxel Data - Pure DOP
//!
//! Dense occupancy and occlusion grids of `D^3` cells over the cube
//! `[-bounds/2, bounds/2]^3`. Cell (x, y, z) lives at `x + y*D + z*D^2`.

use crate::compute::BufferHandle;
use serde::{Deserialize, Serialize};

/// Population rasterized into the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoxelSource {
    #[default]
    FullDetail,
    /// Deepest generation of the low-detail population
    LowDetail,
}

/// Grid shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGridDesc {
    /// Cells per axis
    pub dimension: u32,
    pub bounds: f32,
    pub voxel_size: f32,
    /// `dimension^3`
    pub cell_count: u32,
}

/// Device buffers of one grid pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGrids {
    pub desc: VoxelGridDesc,
    pub voxels: BufferHandle,
    pub occlusion: BufferHandle,
}

/// Point range rasterized by one voxelization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelInput {
    pub points: BufferHandle,
    pub offset: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoxelReport {
    /// Samples fed to the rasterizer (points, or points x transforms when instanced)
    pub samples: u32,
    pub dispatches: u32,
}

/// Host-side view of a read-back occupancy grid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OccupancySummary {
    /// Sum of all counters; equals the samples that landed inside the grid
    pub total: u64,
    pub occupied_cells: u32,
}
