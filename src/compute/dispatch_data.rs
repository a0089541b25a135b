//! Dispatch Data - Pure DOP
//!
//! Typed buffer handles, per-role bindings and the parameter block every
//! kernel receives. Validation lives in dispatch_operations.rs

use super::kernel::Kernel;
use crate::constants::dispatch::{MAX_GROUPS_PER_DIMENSION, MAX_LANES_PER_GROUP};
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// Element type stored in a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Tightly packed f32 triples
    Points,
    /// Column-major 4x4 f32 matrices
    Transforms,
    /// Atomic u32 occupancy counters
    Counters,
    /// f32 occlusion weights
    Weights,
}

impl BufferKind {
    /// Bytes per element
    pub const fn element_size(self) -> u64 {
        match self {
            BufferKind::Points => 12,
            BufferKind::Transforms => 64,
            BufferKind::Counters => 4,
            BufferKind::Weights => 4,
        }
    }
}

/// What a bound buffer means to a kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Points,
    Transforms,
    FinalTransform,
    VoxelGrid,
    OcclusionGrid,
    ReductionInput,
    ReductionOutput,
}

impl BufferRole {
    pub const COUNT: usize = 7;

    pub const ALL: [BufferRole; Self::COUNT] = [
        BufferRole::Points,
        BufferRole::Transforms,
        BufferRole::FinalTransform,
        BufferRole::VoxelGrid,
        BufferRole::OcclusionGrid,
        BufferRole::ReductionInput,
        BufferRole::ReductionOutput,
    ];

    pub const fn index(self) -> usize {
        match self {
            BufferRole::Points => 0,
            BufferRole::Transforms => 1,
            BufferRole::FinalTransform => 2,
            BufferRole::VoxelGrid => 3,
            BufferRole::OcclusionGrid => 4,
            BufferRole::ReductionInput => 5,
            BufferRole::ReductionOutput => 6,
        }
    }
}

/// Reference to a device-owned buffer
///
/// Handles are plain values. The device that created one checks it is still
/// live on every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    pub id: u32,
    pub kind: BufferKind,
    /// Element count
    pub len: u32,
}

impl BufferHandle {
    pub fn size_bytes(&self) -> u64 {
        self.len as u64 * self.kind.element_size()
    }
}

/// Buffers bound to one dispatch, one slot per role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bindings {
    slots: [Option<BufferHandle>; BufferRole::COUNT],
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style bind
    pub fn with(mut self, role: BufferRole, buffer: BufferHandle) -> Self {
        self.slots[role.index()] = Some(buffer);
        self
    }

    pub fn get(&self, role: BufferRole) -> Option<BufferHandle> {
        self.slots[role.index()]
    }

    /// Bound (role, buffer) pairs in role order
    pub fn iter(&self) -> impl Iterator<Item = (BufferRole, BufferHandle)> + '_ {
        BufferRole::ALL
            .iter()
            .filter_map(move |role| self.get(*role).map(|buffer| (*role, buffer)))
    }
}

/// Uniform parameter block shared by every kernel
///
/// Layout matches `KernelParams` in both WGSL modules.
/// Work-item index = (group_offset + workgroup_id.x) * lanes + local_invocation_id.x
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct KernelParams {
    /// Items the kernel covers; work-items at or past this exit
    pub element_count: u32,
    /// First work-group of this chunk within the logical dispatch
    pub group_offset: u32,
    pub transform_count: u32,
    /// First point index written by `expand`
    pub generation_offset: u32,
    /// One past the last point index written by `expand`
    pub generation_limit: u32,
    /// First element read by `voxelize` and the reductions
    pub input_offset: u32,
    /// First element written by the reductions
    pub output_offset: u32,
    /// Transforms applied per point by instanced voxelization; 0 = plain
    pub instance_count: u32,
    /// Cells per grid axis
    pub grid_size: u32,
    /// Cubes per axis of the uniform seed grid
    pub cube_resolution: u32,
    pub cube_size: f32,
    pub grid_bounds: f32,
    pub voxel_size: f32,
    pub occlusion_radius: u32,
    pub _padding: [u32; 2],
}

const_assert_eq!(std::mem::size_of::<KernelParams>(), 64);

/// One kernel launch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchDescriptor {
    pub kernel: Kernel,
    pub bindings: Bindings,
    pub params: KernelParams,
    /// Work-groups along x; all kernels are one-dimensional
    pub groups: u32,
}

/// Per-device dispatch limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_groups_per_dimension: u32,
    pub max_lanes_per_group: u32,
    /// Largest single buffer in bytes
    pub max_buffer_size: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_groups_per_dimension: MAX_GROUPS_PER_DIMENSION,
            max_lanes_per_group: MAX_LANES_PER_GROUP,
            max_buffer_size: 1 << 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_indices_are_dense() {
        for (i, role) in BufferRole::ALL.iter().enumerate() {
            assert_eq!(role.index(), i);
        }
    }

    #[test]
    fn test_bindings_builder() {
        let points = BufferHandle {
            id: 1,
            kind: BufferKind::Points,
            len: 10,
        };
        let grid = BufferHandle {
            id: 2,
            kind: BufferKind::Counters,
            len: 8,
        };
        let bindings = Bindings::new()
            .with(BufferRole::VoxelGrid, grid)
            .with(BufferRole::Points, points);

        assert_eq!(bindings.get(BufferRole::Points), Some(points));
        assert_eq!(bindings.get(BufferRole::Transforms), None);
        let bound: Vec<_> = bindings.iter().map(|(role, _)| role).collect();
        assert_eq!(bound, vec![BufferRole::Points, BufferRole::VoxelGrid]);
    }

    #[test]
    fn test_params_are_pod() {
        let params = KernelParams {
            element_count: 7,
            cube_size: 0.5,
            ..KernelParams::default()
        };
        let bytes: &[u8] = bytemuck::bytes_of(&params);
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[0..4], &7u32.to_ne_bytes());
    }
}
