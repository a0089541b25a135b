//! Engine constants
//!
//! Single source of truth for lane widths, dispatch limits and default sizes.
//! WGSL kernels mirror the `dispatch` values; keep them in sync.

/// Dispatch surface limits
pub mod dispatch {
    /// Lanes per work-group for the point and voxel kernels
    pub const THREADS_PER_GROUP: u32 = 64;

    /// Maximum work-groups addressable by a single dispatch dimension
    pub const MAX_GROUPS_PER_DIMENSION: u32 = 65535;

    /// Hardware warp / wavefront width assumed by the unrolled reduction tail
    pub const WARP_SIZE: u32 = 32;

    /// Upper bound on lanes in one reduction work-group (wgpu default invocation limit)
    pub const MAX_LANES_PER_GROUP: u32 = 256;
}

/// Parallel reduction sizes
pub mod reduction {
    pub const DEFAULT_GROUP_SIZE: u32 = 128;
    pub const MIN_GROUP_SIZE: u32 = 2;

    /// Result buffer layout: min, max, sum
    pub const RESULT_SLOTS: u32 = 3;
    pub const MIN_SLOT: u32 = 0;
    pub const MAX_SLOT: u32 = 1;
    pub const SUM_SLOT: u32 = 2;

    /// Identity for min / max lanes. WGSL has no infinity literal, so both sides use f32::MAX.
    pub const F32_LIMIT: f32 = f32::MAX;
}

/// Point buffer capacities
pub mod capacity {
    pub const DEFAULT_CAPACITY: u32 = 200_000;

    /// Largest point buffer the engine will allocate (12 bytes per point, ~805 MB)
    pub const MAX_POINT_CAPACITY: u64 = 1 << 26;

    pub const DEFAULT_LOW_DETAIL_GENERATIONS: u32 = 8;
}

/// Voxel grid defaults and limits
pub mod voxel {
    pub const DEFAULT_VOXEL_BOUNDS: f32 = 10.0;
    pub const DEFAULT_VOXEL_SIZE: f32 = 0.25;
    pub const DEFAULT_OCCLUSION_RADIUS: u32 = 2;
    pub const MAX_OCCLUSION_RADIUS: u32 = 4;

    /// Largest dense grid the engine will allocate (cells, per grid)
    pub const MAX_VOXEL_COUNT: u64 = 1 << 28;
}

/// Bounds prediction
pub mod bounds {
    pub const DEFAULT_SCALE_PADDING: f32 = 2.0;

    /// Extents below this are treated as a collapsed attractor
    pub const MIN_EXTENT: f32 = 1e-6;
}
