//! Kernel selector and signature table
//!
//! Every compute entry point is a `Kernel` variant. Its buffer contract (roles,
//! element kinds, WGSL binding slots) lives in one static table, looked up by
//! `kernel_signature`. Reduction code paths are chosen per call by
//! `select_reduction_kernel`; there is no shared toggle state.

use super::dispatch_data::{BufferKind, BufferRole};
use crate::constants::dispatch::THREADS_PER_GROUP;
use crate::constants::reduction::F32_LIMIT;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Associative operation folded by the reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReductionOp {
    Min,
    Max,
    Add,
}

impl ReductionOp {
    pub const ALL: [ReductionOp; 3] = [ReductionOp::Min, ReductionOp::Max, ReductionOp::Add];

    /// Value that leaves any lane unchanged when combined
    pub fn identity(self) -> Vec3 {
        match self {
            ReductionOp::Min => Vec3::splat(F32_LIMIT),
            ReductionOp::Max => Vec3::splat(-F32_LIMIT),
            ReductionOp::Add => Vec3::ZERO,
        }
    }

    #[inline]
    pub fn combine(self, a: Vec3, b: Vec3) -> Vec3 {
        match self {
            ReductionOp::Min => a.min(b),
            ReductionOp::Max => a.max(b),
            ReductionOp::Add => a + b,
        }
    }

    /// Numeric id shared with the WGSL template
    pub fn shader_id(self) -> u32 {
        match self {
            ReductionOp::Min => 0,
            ReductionOp::Max => 1,
            ReductionOp::Add => 2,
        }
    }
}

/// Runtime-selectable reduction strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReductionStrategy {
    /// One worker scans every element; ground truth for the others
    SingleThreadedScan,
    DivergentBranching,
    BankConflict,
    #[default]
    SequentialAddressing,
    UnrollLastWarp,
}

impl ReductionStrategy {
    pub const ALL: [ReductionStrategy; 5] = [
        ReductionStrategy::SingleThreadedScan,
        ReductionStrategy::DivergentBranching,
        ReductionStrategy::BankConflict,
        ReductionStrategy::SequentialAddressing,
        ReductionStrategy::UnrollLastWarp,
    ];

    /// Tree addressing pattern, `None` for the single-threaded scan
    pub fn tree_addressing(self) -> Option<TreeAddressing> {
        match self {
            ReductionStrategy::SingleThreadedScan => None,
            ReductionStrategy::DivergentBranching => Some(TreeAddressing::DivergentBranching),
            ReductionStrategy::BankConflict => Some(TreeAddressing::BankConflict),
            ReductionStrategy::SequentialAddressing => Some(TreeAddressing::SequentialAddressing),
            ReductionStrategy::UnrollLastWarp => Some(TreeAddressing::UnrollLastWarp),
        }
    }
}

/// In-group pairing pattern of one tree-reduction pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeAddressing {
    /// Interleaved pairs, active lanes chosen by `tid % (2s) == 0`
    DivergentBranching,
    /// Interleaved pairs through strided index `2 * s * tid`
    BankConflict,
    /// First half folds the second half
    SequentialAddressing,
    /// Sequential addressing with the last warp unrolled and unsynchronized
    UnrollLastWarp,
}

impl TreeAddressing {
    pub fn shader_id(self) -> u32 {
        match self {
            TreeAddressing::DivergentBranching => 1,
            TreeAddressing::BankConflict => 2,
            TreeAddressing::SequentialAddressing => 3,
            TreeAddressing::UnrollLastWarp => 4,
        }
    }
}

/// Compile-time shape of one tree-reduction kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReduceVariant {
    pub op: ReductionOp,
    pub addressing: TreeAddressing,
    /// Each lane folds two elements before the tree starts
    pub double_load: bool,
    /// Lanes per work-group (power of two)
    pub lanes: u32,
}

impl ReduceVariant {
    /// Input elements consumed by one work-group
    pub fn elements_per_group(&self) -> u32 {
        if self.double_load {
            self.lanes * 2
        } else {
            self.lanes
        }
    }
}

/// Compute entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    ResetPoints,
    Expand,
    ClearVoxels,
    ClearOcclusion,
    Voxelize,
    Occlusion,
    ScanReduce,
    Reduce(ReduceVariant),
}

impl Kernel {
    /// Row of this kernel in `KERNEL_TABLE`
    pub fn table_index(&self) -> usize {
        match self {
            Kernel::ResetPoints => 0,
            Kernel::Expand => 1,
            Kernel::ClearVoxels => 2,
            Kernel::ClearOcclusion => 3,
            Kernel::Voxelize => 4,
            Kernel::Occlusion => 5,
            Kernel::ScanReduce => 6,
            Kernel::Reduce(_) => 7,
        }
    }

    /// Lanes per work-group
    pub fn lanes(&self) -> u32 {
        match self {
            Kernel::ScanReduce => 1,
            Kernel::Reduce(variant) => variant.lanes,
            _ => THREADS_PER_GROUP,
        }
    }

    pub fn label(&self) -> &'static str {
        kernel_signature(self).label
    }
}

impl std::fmt::Display for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Kernel::Reduce(v) => write!(
                f,
                "reduce<{:?}, {:?}, double_load={}, lanes={}>",
                v.op, v.addressing, v.double_load, v.lanes
            ),
            other => f.write_str(other.label()),
        }
    }
}

/// Shader module a kernel lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelModule {
    Points,
    Reduction,
}

/// One buffer the kernel reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSpec {
    pub role: BufferRole,
    pub kind: BufferKind,
    /// `@binding` slot in group 0 (slot 0 is always the parameter block)
    pub binding: u32,
    pub writes: bool,
}

/// Static buffer contract of a kernel
#[derive(Debug)]
pub struct KernelSignature {
    pub label: &'static str,
    pub entry_point: &'static str,
    pub module: KernelModule,
    pub roles: &'static [RoleSpec],
}

impl KernelSignature {
    pub fn role(&self, role: BufferRole) -> Option<&RoleSpec> {
        self.roles.iter().find(|spec| spec.role == role)
    }
}

const fn spec(role: BufferRole, kind: BufferKind, binding: u32, writes: bool) -> RoleSpec {
    RoleSpec {
        role,
        kind,
        binding,
        writes,
    }
}

/// Lookup table indexed by `Kernel::table_index`
pub static KERNEL_TABLE: [KernelSignature; 8] = [
    KernelSignature {
        label: "reset_points",
        entry_point: "reset_points",
        module: KernelModule::Points,
        roles: &[spec(BufferRole::Points, BufferKind::Points, 1, true)],
    },
    KernelSignature {
        label: "expand",
        entry_point: "expand",
        module: KernelModule::Points,
        roles: &[
            spec(BufferRole::Points, BufferKind::Points, 1, true),
            spec(BufferRole::Transforms, BufferKind::Transforms, 2, false),
        ],
    },
    KernelSignature {
        label: "clear_voxels",
        entry_point: "clear_voxels",
        module: KernelModule::Points,
        roles: &[spec(BufferRole::VoxelGrid, BufferKind::Counters, 4, true)],
    },
    KernelSignature {
        label: "clear_occlusion",
        entry_point: "clear_occlusion",
        module: KernelModule::Points,
        roles: &[spec(BufferRole::OcclusionGrid, BufferKind::Weights, 5, true)],
    },
    KernelSignature {
        label: "voxelize",
        entry_point: "voxelize",
        module: KernelModule::Points,
        roles: &[
            spec(BufferRole::Points, BufferKind::Points, 1, false),
            spec(BufferRole::Transforms, BufferKind::Transforms, 2, false),
            spec(BufferRole::FinalTransform, BufferKind::Transforms, 3, false),
            spec(BufferRole::VoxelGrid, BufferKind::Counters, 4, true),
        ],
    },
    KernelSignature {
        label: "occlusion",
        entry_point: "occlusion",
        module: KernelModule::Points,
        roles: &[
            spec(BufferRole::VoxelGrid, BufferKind::Counters, 4, false),
            spec(BufferRole::OcclusionGrid, BufferKind::Weights, 5, true),
        ],
    },
    KernelSignature {
        label: "scan_reduce",
        entry_point: "scan_reduce",
        module: KernelModule::Reduction,
        roles: &[
            spec(BufferRole::ReductionInput, BufferKind::Points, 1, false),
            spec(BufferRole::ReductionOutput, BufferKind::Points, 2, true),
        ],
    },
    KernelSignature {
        label: "reduce",
        entry_point: "reduce",
        module: KernelModule::Reduction,
        roles: &[
            spec(BufferRole::ReductionInput, BufferKind::Points, 1, false),
            spec(BufferRole::ReductionOutput, BufferKind::Points, 2, true),
        ],
    },
];

/// Buffer contract of `kernel`
pub fn kernel_signature(kernel: &Kernel) -> &'static KernelSignature {
    &KERNEL_TABLE[kernel.table_index()]
}

/// Pick the code path for one reduction call
///
/// Pure function of its arguments; concurrent calls with different
/// strategies never interfere.
pub fn select_reduction_kernel(
    op: ReductionOp,
    strategy: ReductionStrategy,
    double_load: bool,
    group_size: u32,
) -> Kernel {
    match strategy.tree_addressing() {
        None => Kernel::ScanReduce,
        Some(addressing) => Kernel::Reduce(ReduceVariant {
            op,
            addressing,
            double_load,
            lanes: group_size,
        }),
    }
}
