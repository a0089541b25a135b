//! Dispatch Operations - Pure DOP Functions
//!
//! Descriptor validation and the work-group offset loop. Devices call
//! `validate_dispatch` before running a kernel; pipeline stages go through
//! `dispatch_chunked` so no single dispatch exceeds the device limit.

use super::dispatch_data::{Bindings, BufferRole, DeviceLimits, DispatchDescriptor, KernelParams};
use super::kernel::{kernel_signature, Kernel};
use super::kernel_math::parent_index;
use super::ComputeDevice;
use crate::constants::reduction::RESULT_SLOTS;
use crate::error::{EngineError, EngineResult};

/// Work-groups needed to cover `work_items` with `lanes` per group
pub fn group_count(work_items: u64, lanes: u32) -> u64 {
    work_items.div_ceil(lanes.max(1) as u64)
}

/// Split `total_groups` into dispatches of at most `max_groups`
///
/// Calls `f(group_offset, groups)` per chunk and returns the chunk count.
pub fn for_each_dispatch_chunk<F>(total_groups: u64, max_groups: u32, mut f: F) -> EngineResult<u32>
where
    F: FnMut(u32, u32) -> EngineResult<()>,
{
    let max = max_groups.max(1) as u64;
    let mut offset = 0u64;
    let mut chunks = 0u32;
    while offset < total_groups {
        let groups = (total_groups - offset).min(max);
        let group_offset = u32::try_from(offset).map_err(|_| EngineError::DispatchLimitExceeded {
            kernel: "offset loop".to_string(),
            requested: u32::MAX,
            max: max_groups,
        })?;
        f(group_offset, groups as u32)?;
        offset += groups;
        chunks += 1;
    }
    Ok(chunks)
}

/// Dispatch `total_groups` work-groups of `kernel`, chunked to the device limit
///
/// `params.group_offset` is overwritten per chunk.
pub fn dispatch_chunked<D: ComputeDevice + ?Sized>(
    device: &mut D,
    kernel: Kernel,
    bindings: Bindings,
    params: KernelParams,
    total_groups: u64,
) -> EngineResult<u32> {
    let max_groups = device.limits().max_groups_per_dimension;
    let chunks = for_each_dispatch_chunk(total_groups, max_groups, |group_offset, groups| {
        device.dispatch(&DispatchDescriptor {
            kernel,
            bindings,
            params: KernelParams {
                group_offset,
                ..params
            },
            groups,
        })
    })?;

    if chunks > 1 {
        log::debug!(
            "[Dispatch] {} needs {} groups (limit {}); issued {} chunks",
            kernel,
            total_groups,
            max_groups,
            chunks
        );
    }
    Ok(chunks)
}

fn require_len(kernel: &Kernel, role: BufferRole, len: u32, needed: u64) -> EngineResult<()> {
    if (len as u64) < needed {
        return Err(EngineError::invalid_dispatch(
            kernel.to_string(),
            format!("{:?} buffer holds {} elements, kernel addresses {}", role, len, needed),
        ));
    }
    Ok(())
}

/// Check a descriptor against the kernel's buffer contract and device limits
pub fn validate_dispatch(desc: &DispatchDescriptor, limits: &DeviceLimits) -> EngineResult<()> {
    let kernel = &desc.kernel;
    let signature = kernel_signature(kernel);

    if desc.groups == 0 {
        return Err(EngineError::invalid_dispatch(kernel.to_string(), "zero work-groups"));
    }
    if desc.groups > limits.max_groups_per_dimension {
        return Err(EngineError::DispatchLimitExceeded {
            kernel: kernel.to_string(),
            requested: desc.groups,
            max: limits.max_groups_per_dimension,
        });
    }
    let lanes = kernel.lanes();
    if !lanes.is_power_of_two() || lanes > limits.max_lanes_per_group {
        return Err(EngineError::invalid_dispatch(
            kernel.to_string(),
            format!("{} lanes per group (max {}, power of two)", lanes, limits.max_lanes_per_group),
        ));
    }

    for spec in signature.roles {
        let buffer = desc.bindings.get(spec.role).ok_or_else(|| {
            EngineError::invalid_dispatch(kernel.to_string(), format!("missing {:?} binding", spec.role))
        })?;
        if buffer.kind != spec.kind {
            return Err(EngineError::BufferKindMismatch {
                kernel: kernel.to_string(),
                role: spec.role,
                expected: spec.kind,
                found: buffer.kind,
            });
        }
    }

    let bound: Vec<_> = desc.bindings.iter().collect();
    for (i, (role, buffer)) in bound.iter().enumerate() {
        if signature.role(*role).is_none() {
            return Err(EngineError::invalid_dispatch(
                kernel.to_string(),
                format!("unexpected {:?} binding", role),
            ));
        }
        if bound[i + 1..].iter().any(|(_, other)| other.id == buffer.id) {
            return Err(EngineError::invalid_dispatch(
                kernel.to_string(),
                format!("buffer {} bound to more than one role", buffer.id),
            ));
        }
    }

    validate_ranges(desc)
}

/// Kernel-specific range checks; bindings are known to be present here
fn validate_ranges(desc: &DispatchDescriptor) -> EngineResult<()> {
    let kernel = &desc.kernel;
    let p = &desc.params;
    let len_of = |role: BufferRole| desc.bindings.get(role).map(|b| b.len).unwrap_or(0);

    match kernel {
        Kernel::ResetPoints => {
            require_len(kernel, BufferRole::Points, len_of(BufferRole::Points), p.element_count as u64)
        }
        Kernel::ClearVoxels => require_len(
            kernel,
            BufferRole::VoxelGrid,
            len_of(BufferRole::VoxelGrid),
            p.element_count as u64,
        ),
        Kernel::ClearOcclusion => require_len(
            kernel,
            BufferRole::OcclusionGrid,
            len_of(BufferRole::OcclusionGrid),
            p.element_count as u64,
        ),
        Kernel::Expand => {
            let t = p.transform_count;
            if t == 0 {
                return Err(EngineError::invalid_dispatch(kernel.to_string(), "transform_count is 0"));
            }
            require_len(kernel, BufferRole::Transforms, len_of(BufferRole::Transforms), t as u64)?;
            require_len(kernel, BufferRole::Points, len_of(BufferRole::Points), p.generation_limit as u64)?;
            if p.generation_limit <= p.generation_offset {
                return Err(EngineError::invalid_dispatch(kernel.to_string(), "empty generation range"));
            }
            // A generation may only read slots written by earlier generations
            let reads_own_output = if p.generation_offset < t {
                p.generation_limit > t
            } else {
                parent_index(p.generation_limit - 1, t) >= p.generation_offset
            };
            if reads_own_output {
                return Err(EngineError::invalid_dispatch(
                    kernel.to_string(),
                    format!(
                        "range {}..{} reads its own output",
                        p.generation_offset, p.generation_limit
                    ),
                ));
            }
            Ok(())
        }
        Kernel::Voxelize => {
            require_len(
                kernel,
                BufferRole::Points,
                len_of(BufferRole::Points),
                p.input_offset as u64 + p.element_count as u64,
            )?;
            require_len(
                kernel,
                BufferRole::Transforms,
                len_of(BufferRole::Transforms),
                p.instance_count as u64,
            )?;
            require_len(kernel, BufferRole::FinalTransform, len_of(BufferRole::FinalTransform), 1)?;
            let cells = (p.grid_size as u64).saturating_pow(3);
            require_len(kernel, BufferRole::VoxelGrid, len_of(BufferRole::VoxelGrid), cells)
        }
        Kernel::Occlusion => {
            let cells = (p.grid_size as u64).saturating_pow(3);
            require_len(kernel, BufferRole::VoxelGrid, len_of(BufferRole::VoxelGrid), cells)?;
            require_len(
                kernel,
                BufferRole::OcclusionGrid,
                len_of(BufferRole::OcclusionGrid),
                p.element_count as u64,
            )
        }
        Kernel::ScanReduce => {
            require_len(
                kernel,
                BufferRole::ReductionInput,
                len_of(BufferRole::ReductionInput),
                p.input_offset as u64 + p.element_count as u64,
            )?;
            require_len(
                kernel,
                BufferRole::ReductionOutput,
                len_of(BufferRole::ReductionOutput),
                p.output_offset as u64 + RESULT_SLOTS as u64,
            )
        }
        Kernel::Reduce(_) => {
            require_len(
                kernel,
                BufferRole::ReductionInput,
                len_of(BufferRole::ReductionInput),
                p.input_offset as u64 + p.element_count as u64,
            )?;
            require_len(
                kernel,
                BufferRole::ReductionOutput,
                len_of(BufferRole::ReductionOutput),
                p.output_offset as u64 + p.group_offset as u64 + desc.groups as u64,
            )
        }
    }
}
