//! CPU kernel bodies
//!
//! One function per `Kernel`, looked up through `CPU_KERNELS` by the kernel's
//! table row. Each call covers the work-items of one dispatch chunk:
//! `(group_offset .. group_offset + groups) * lanes`. Work-items inside a
//! chunk run on the rayon pool; chunks and dispatches run in order.

use super::cpu_device::BufferTable;
use super::dispatch_data::{BufferHandle, BufferRole, DispatchDescriptor};
use super::kernel::{Kernel, ReduceVariant, ReductionOp, TreeAddressing};
use super::kernel_math::{grid_seed, linear_cell, occlusion_weight, parent_index, voxel_cell};
use crate::constants::dispatch::WARP_SIZE;
use crate::constants::reduction::{MAX_SLOT, MIN_SLOT, RESULT_SLOTS, SUM_SLOT};
use crate::error::{EngineError, EngineResult, OptionExt};
use glam::{Mat4, Vec3};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::Ordering;

pub(super) type CpuKernelFn = fn(&mut BufferTable, &DispatchDescriptor) -> EngineResult<()>;

/// Indexed by `Kernel::table_index`
pub(super) static CPU_KERNELS: [CpuKernelFn; 8] = [
    reset_points,
    expand,
    clear_voxels,
    clear_occlusion,
    voxelize,
    occlusion,
    scan_reduce,
    reduce,
];

/// Work-items covered by this chunk, as a half-open u64 range
fn covered_items(desc: &DispatchDescriptor) -> (u64, u64) {
    let lanes = desc.kernel.lanes() as u64;
    let start = desc.params.group_offset as u64 * lanes;
    (start, start + desc.groups as u64 * lanes)
}

/// Covered work-items clipped to `[0, count)`
fn chunk_range(desc: &DispatchDescriptor, count: u64) -> Range<usize> {
    let (start, end) = covered_items(desc);
    start.min(count) as usize..end.min(count) as usize
}

fn binding(desc: &DispatchDescriptor, role: BufferRole) -> EngineResult<BufferHandle> {
    desc.bindings.get(role).ok_or_engine(|| {
        EngineError::invalid_dispatch(desc.kernel.to_string(), format!("missing {:?} binding", role))
    })
}

fn reset_points(table: &mut BufferTable, desc: &DispatchDescriptor) -> EngineResult<()> {
    let p = desc.params;
    let points = table.points_mut(binding(desc, BufferRole::Points)?)?;
    let range = chunk_range(desc, p.element_count as u64);
    let start = range.start;

    points[range].par_iter_mut().enumerate().for_each(|(k, point)| {
        *point = grid_seed((start + k) as u32, p.cube_resolution, p.cube_size);
    });
    Ok(())
}

fn expand(table: &mut BufferTable, desc: &DispatchDescriptor) -> EngineResult<()> {
    let p = desc.params;
    let t = p.transform_count as usize;
    let transforms: Vec<Mat4> = table
        .transforms(binding(desc, BufferRole::Transforms)?)?
        .get(..t)
        .ok_or_engine(|| EngineError::invalid_dispatch("expand", "transform buffer too short"))?
        .to_vec();
    let points = table.points_mut(binding(desc, BufferRole::Points)?)?;

    let (start, end) = covered_items(desc);
    let limit = p.generation_limit as u64;
    let lo = (p.generation_offset as u64 + start).min(limit) as usize;
    let hi = (p.generation_offset as u64 + end).min(limit) as usize;
    if lo >= hi {
        return Ok(());
    }

    if lo < t {
        // Generation 0 transforms the seed stored in its own slot
        points[lo..hi].par_iter_mut().enumerate().for_each(|(k, point)| {
            *point = transforms[(lo + k) % t].transform_point3(*point);
        });
    } else {
        let (parents, children) = points.split_at_mut(lo);
        let parents: &[Vec3] = parents;
        children[..hi - lo]
            .par_iter_mut()
            .enumerate()
            .for_each(|(k, point)| {
                let index = lo + k;
                let parent = parent_index(index as u32, t as u32) as usize;
                *point = transforms[index % t].transform_point3(parents[parent]);
            });
    }
    Ok(())
}

fn clear_voxels(table: &mut BufferTable, desc: &DispatchDescriptor) -> EngineResult<()> {
    let grid = table.counters(binding(desc, BufferRole::VoxelGrid)?)?;
    let range = chunk_range(desc, desc.params.element_count as u64);
    grid[range]
        .par_iter()
        .for_each(|cell| cell.store(0, Ordering::Relaxed));
    Ok(())
}

fn clear_occlusion(table: &mut BufferTable, desc: &DispatchDescriptor) -> EngineResult<()> {
    let weights = table.weights_mut(binding(desc, BufferRole::OcclusionGrid)?)?;
    let range = chunk_range(desc, desc.params.element_count as u64);
    weights[range].par_iter_mut().for_each(|w| *w = 0.0);
    Ok(())
}

fn voxelize(table: &mut BufferTable, desc: &DispatchDescriptor) -> EngineResult<()> {
    let p = desc.params;
    let points = table.points(binding(desc, BufferRole::Points)?)?;
    let transforms = table.transforms(binding(desc, BufferRole::Transforms)?)?;
    let final_transform = *table
        .transforms(binding(desc, BufferRole::FinalTransform)?)?
        .first()
        .ok_or_engine(|| EngineError::invalid_dispatch("voxelize", "empty final transform buffer"))?;
    let grid = table.counters(binding(desc, BufferRole::VoxelGrid)?)?;

    let per_point = p.instance_count.max(1) as usize;
    let samples = p.element_count as u64 * per_point as u64;

    chunk_range(desc, samples).into_par_iter().for_each(|sample| {
        let Some(&point) = points.get(p.input_offset as usize + sample / per_point) else {
            return;
        };
        let local = if p.instance_count > 0 {
            match transforms.get(sample % per_point) {
                Some(instance) => instance.transform_point3(point),
                None => return,
            }
        } else {
            point
        };
        let world = final_transform.transform_point3(local);
        if let Some(cell) = voxel_cell(world, p.grid_size, p.grid_bounds, p.voxel_size) {
            if let Some(counter) = grid.get(linear_cell(cell, p.grid_size)) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
    Ok(())
}

fn occlusion(table: &mut BufferTable, desc: &DispatchDescriptor) -> EngineResult<()> {
    let p = desc.params;
    let grid_handle = binding(desc, BufferRole::VoxelGrid)?;
    let mut slot = table.take(binding(desc, BufferRole::OcclusionGrid)?)?;

    let result = (|| -> EngineResult<()> {
        let grid = table.counters(grid_handle)?;
        let weights = slot.weights_mut()?;
        let range = chunk_range(desc, p.element_count as u64);
        let start = range.start;

        weights[range].par_iter_mut().enumerate().for_each(|(k, weight)| {
            *weight = occlusion_weight(start + k, p.grid_size, p.occlusion_radius, |n| {
                grid.get(n).map_or(false, |c| c.load(Ordering::Relaxed) > 0)
            });
        });
        Ok(())
    })();

    table.restore(slot);
    result
}

/// Input slice addressed by a reduction dispatch
fn reduction_input<'a>(table: &'a BufferTable, desc: &DispatchDescriptor) -> EngineResult<&'a [Vec3]> {
    let input = table.points(binding(desc, BufferRole::ReductionInput)?)?;
    let start = desc.params.input_offset as usize;
    let end = start + desc.params.element_count as usize;
    input.get(start..end).ok_or(EngineError::BufferAccess {
        index: end,
        size: input.len(),
    })
}

fn scan_reduce(table: &mut BufferTable, desc: &DispatchDescriptor) -> EngineResult<()> {
    // Only work-item 0 does anything
    if covered_items(desc).0 > 0 {
        return Ok(());
    }
    let p = desc.params;
    let mut slot = table.take(binding(desc, BufferRole::ReductionOutput)?)?;

    let result = (|| -> EngineResult<()> {
        let values = reduction_input(table, desc)?;
        let mut min = ReductionOp::Min.identity();
        let mut max = ReductionOp::Max.identity();
        let mut sum = ReductionOp::Add.identity();
        for &v in values {
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }

        let output = slot.points_mut()?;
        let start = p.output_offset as usize;
        let size = output.len();
        let slots = output
            .get_mut(start..start + RESULT_SLOTS as usize)
            .ok_or(EngineError::BufferAccess {
                index: start + RESULT_SLOTS as usize,
                size,
            })?;
        slots[MIN_SLOT as usize] = min;
        slots[MAX_SLOT as usize] = max;
        slots[SUM_SLOT as usize] = sum;
        Ok(())
    })();

    table.restore(slot);
    result
}

fn reduce(table: &mut BufferTable, desc: &DispatchDescriptor) -> EngineResult<()> {
    let Kernel::Reduce(variant) = desc.kernel else {
        return Err(EngineError::invalid_dispatch(desc.kernel.to_string(), "not a tree reduction"));
    };
    let p = desc.params;
    let mut slot = table.take(binding(desc, BufferRole::ReductionOutput)?)?;

    let result = (|| -> EngineResult<()> {
        let values = reduction_input(table, desc)?;
        let first = p.group_offset;
        let partials: Vec<Vec3> = (first..first + desc.groups)
            .into_par_iter()
            .map(|group| reduce_work_group(values, &variant, group))
            .collect();

        let output = slot.points_mut()?;
        let start = (p.output_offset + first) as usize;
        let size = output.len();
        output
            .get_mut(start..start + partials.len())
            .ok_or(EngineError::BufferAccess {
                index: start + partials.len(),
                size,
            })?
            .copy_from_slice(&partials);
        Ok(())
    })();

    table.restore(slot);
    result
}

/// Emulate one work-group of a tree reduction and return lane 0's value
///
/// Each inner `for tid` loop is one barrier-separated step. Within a step no
/// lane reads a slot another lane of the same step writes, so running the
/// lanes in order matches the parallel result. The unrolled warp tail has no
/// barriers; it is emulated in lockstep from a snapshot.
pub(super) fn reduce_work_group(values: &[Vec3], variant: &ReduceVariant, group: u32) -> Vec3 {
    let op = variant.op;
    let lanes = variant.lanes as usize;
    let load = |i: usize| values.get(i).copied().unwrap_or_else(|| op.identity());
    let base = group as usize * variant.elements_per_group() as usize;

    let mut shared: Vec<Vec3> = (0..lanes)
        .map(|tid| {
            let i = base + tid;
            if variant.double_load {
                op.combine(load(i), load(i + lanes))
            } else {
                load(i)
            }
        })
        .collect();

    match variant.addressing {
        TreeAddressing::DivergentBranching => {
            let mut s = 1;
            while s < lanes {
                for tid in 0..lanes {
                    if tid % (2 * s) == 0 {
                        shared[tid] = op.combine(shared[tid], shared[tid + s]);
                    }
                }
                s *= 2;
            }
        }
        TreeAddressing::BankConflict => {
            let mut s = 1;
            while s < lanes {
                for tid in 0..lanes {
                    let index = 2 * s * tid;
                    if index < lanes {
                        shared[index] = op.combine(shared[index], shared[index + s]);
                    }
                }
                s *= 2;
            }
        }
        TreeAddressing::SequentialAddressing => {
            let mut s = lanes / 2;
            while s > 0 {
                for tid in 0..s {
                    shared[tid] = op.combine(shared[tid], shared[tid + s]);
                }
                s /= 2;
            }
        }
        TreeAddressing::UnrollLastWarp => {
            let warp = WARP_SIZE as usize;
            let mut s = lanes / 2;
            while s > warp {
                for tid in 0..s {
                    shared[tid] = op.combine(shared[tid], shared[tid + s]);
                }
                s /= 2;
            }
            warp_tail(&mut shared, op, s);
        }
    }

    shared[0]
}

/// Lockstep tail: every active lane reads before any lane writes
fn warp_tail(shared: &mut [Vec3], op: ReductionOp, first_stride: usize) {
    let active = first_stride;
    let mut s = first_stride;
    while s > 0 {
        let snapshot: Vec<Vec3> = shared[..active + s].to_vec();
        for tid in 0..active {
            shared[tid] = op.combine(snapshot[tid], snapshot[tid + s]);
        }
        s /= 2;
    }
}
