//! CPU compute backend
//!
//! Buffers live in a slot table indexed by handle id. Kernels run on the
//! rayon pool, one work-group chunk per dispatch, strictly in submission
//! order, so every dispatch observes the writes of the ones before it.

use super::cpu_kernels::CPU_KERNELS;
use super::dispatch_data::{BufferHandle, BufferKind, DeviceLimits, DispatchDescriptor};
use super::dispatch_operations::validate_dispatch;
use super::ComputeDevice;
use crate::error::{EngineError, EngineResult};
use glam::{Mat4, Vec3};
use std::sync::atomic::{AtomicU32, Ordering};

/// Typed storage of one CPU buffer
pub(super) enum CpuBuffer {
    Points(Vec<Vec3>),
    Transforms(Vec<Mat4>),
    Counters(Vec<AtomicU32>),
    Weights(Vec<f32>),
}

impl CpuBuffer {
    fn zeroed(kind: BufferKind, len: usize) -> Self {
        match kind {
            BufferKind::Points => CpuBuffer::Points(vec![Vec3::ZERO; len]),
            BufferKind::Transforms => CpuBuffer::Transforms(vec![Mat4::ZERO; len]),
            BufferKind::Counters => CpuBuffer::Counters((0..len).map(|_| AtomicU32::new(0)).collect()),
            BufferKind::Weights => CpuBuffer::Weights(vec![0.0; len]),
        }
    }
}

pub(super) struct CpuSlot {
    label: String,
    handle: BufferHandle,
    data: CpuBuffer,
}

fn kind_error(label: &str, found: BufferKind, wanted: BufferKind) -> EngineError {
    EngineError::Internal {
        message: format!("buffer '{}' holds {:?}, accessed as {:?}", label, found, wanted),
    }
}

impl CpuSlot {
    pub(super) fn points_mut(&mut self) -> EngineResult<&mut [Vec3]> {
        match &mut self.data {
            CpuBuffer::Points(data) => Ok(data),
            _ => Err(kind_error(&self.label, self.handle.kind, BufferKind::Points)),
        }
    }

    pub(super) fn weights_mut(&mut self) -> EngineResult<&mut [f32]> {
        match &mut self.data {
            CpuBuffer::Weights(data) => Ok(data),
            _ => Err(kind_error(&self.label, self.handle.kind, BufferKind::Weights)),
        }
    }
}

/// Live buffers, indexed by handle id
#[derive(Default)]
pub(super) struct BufferTable {
    slots: Vec<Option<CpuSlot>>,
    /// Ids of released slots, reused before the table grows
    free: Vec<u32>,
}

impl BufferTable {
    fn slot(&self, handle: BufferHandle) -> EngineResult<&CpuSlot> {
        match self.slots.get(handle.id as usize) {
            Some(Some(slot)) if slot.handle == handle => Ok(slot),
            _ => Err(EngineError::UnknownBuffer { id: handle.id }),
        }
    }

    fn slot_mut(&mut self, handle: BufferHandle) -> EngineResult<&mut CpuSlot> {
        match self.slots.get_mut(handle.id as usize) {
            Some(Some(slot)) if slot.handle == handle => Ok(slot),
            _ => Err(EngineError::UnknownBuffer { id: handle.id }),
        }
    }

    fn insert(&mut self, kind: BufferKind, len: u32, label: &str) -> BufferHandle {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                self.slots.push(None);
                (self.slots.len() - 1) as u32
            }
        };
        let handle = BufferHandle { id, kind, len };
        self.slots[id as usize] = Some(CpuSlot {
            label: label.to_string(),
            handle,
            data: CpuBuffer::zeroed(kind, len as usize),
        });
        handle
    }

    /// Drop a buffer for good and recycle its id
    fn release(&mut self, handle: BufferHandle) -> EngineResult<CpuSlot> {
        let slot = self.remove(handle)?;
        self.free.push(handle.id);
        Ok(slot)
    }

    fn remove(&mut self, handle: BufferHandle) -> EngineResult<CpuSlot> {
        self.slot(handle)?;
        self.slots[handle.id as usize]
            .take()
            .ok_or(EngineError::UnknownBuffer { id: handle.id })
    }

    /// Move a buffer out so a kernel can write it while reading others
    pub(super) fn take(&mut self, handle: BufferHandle) -> EngineResult<CpuSlot> {
        self.remove(handle)
    }

    /// Put back a buffer moved out by `take`
    pub(super) fn restore(&mut self, slot: CpuSlot) {
        let id = slot.handle.id as usize;
        if let Some(entry) = self.slots.get_mut(id) {
            *entry = Some(slot);
        }
    }

    pub(super) fn points(&self, handle: BufferHandle) -> EngineResult<&[Vec3]> {
        let slot = self.slot(handle)?;
        match &slot.data {
            CpuBuffer::Points(data) => Ok(data),
            _ => Err(kind_error(&slot.label, slot.handle.kind, BufferKind::Points)),
        }
    }

    pub(super) fn points_mut(&mut self, handle: BufferHandle) -> EngineResult<&mut [Vec3]> {
        self.slot_mut(handle)?.points_mut()
    }

    pub(super) fn transforms(&self, handle: BufferHandle) -> EngineResult<&[Mat4]> {
        let slot = self.slot(handle)?;
        match &slot.data {
            CpuBuffer::Transforms(data) => Ok(data),
            _ => Err(kind_error(&slot.label, slot.handle.kind, BufferKind::Transforms)),
        }
    }

    pub(super) fn counters(&self, handle: BufferHandle) -> EngineResult<&[AtomicU32]> {
        let slot = self.slot(handle)?;
        match &slot.data {
            CpuBuffer::Counters(data) => Ok(data),
            _ => Err(kind_error(&slot.label, slot.handle.kind, BufferKind::Counters)),
        }
    }

    pub(super) fn weights_mut(&mut self, handle: BufferHandle) -> EngineResult<&mut [f32]> {
        self.slot_mut(handle)?.weights_mut()
    }

    fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Rayon-backed `ComputeDevice`
pub struct CpuDevice {
    table: BufferTable,
    limits: DeviceLimits,
    dispatch_count: u64,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    /// Device with custom limits, e.g. a tiny group limit to force chunking
    pub fn with_limits(limits: DeviceLimits) -> Self {
        log::info!(
            "[CpuDevice] Created with {} rayon threads (max {} groups per dispatch)",
            rayon::current_num_threads(),
            limits.max_groups_per_dimension
        );
        Self {
            table: BufferTable::default(),
            limits,
            dispatch_count: 0,
        }
    }

    /// Dispatches executed so far, chunks counted individually
    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count
    }

    pub fn live_buffers(&self) -> usize {
        self.table.live_count()
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn check_range(offset: u32, count: usize, len: u32) -> EngineResult<()> {
    let end = offset as usize + count;
    if end > len as usize {
        return Err(EngineError::BufferAccess {
            index: end,
            size: len as usize,
        });
    }
    Ok(())
}

impl ComputeDevice for CpuDevice {
    fn label(&self) -> &str {
        "cpu"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, kind: BufferKind, len: u32, label: &str) -> EngineResult<BufferHandle> {
        let bytes = len as u64 * kind.element_size();
        if bytes > self.limits.max_buffer_size {
            return Err(EngineError::invalid_config(
                label,
                bytes,
                format!("exceeds device buffer limit of {} bytes", self.limits.max_buffer_size),
            ));
        }
        let handle = self.table.insert(kind, len, label);
        log::debug!("[CpuDevice] Created buffer '{}' ({:?} x {})", label, kind, len);
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) -> EngineResult<()> {
        let slot = self.table.release(buffer)?;
        log::debug!("[CpuDevice] Released buffer '{}'", slot.label);
        Ok(())
    }

    fn write_points(&mut self, buffer: BufferHandle, offset: u32, points: &[Vec3]) -> EngineResult<()> {
        check_range(offset, points.len(), buffer.len)?;
        let target = self.table.points_mut(buffer)?;
        let start = offset as usize;
        target[start..start + points.len()].copy_from_slice(points);
        Ok(())
    }

    fn write_transforms(&mut self, buffer: BufferHandle, transforms: &[Mat4]) -> EngineResult<()> {
        check_range(0, transforms.len(), buffer.len)?;
        let slot = self.table.slot_mut(buffer)?;
        match &mut slot.data {
            CpuBuffer::Transforms(data) => {
                data[..transforms.len()].copy_from_slice(transforms);
                Ok(())
            }
            _ => Err(kind_error(&slot.label, slot.handle.kind, BufferKind::Transforms)),
        }
    }

    fn dispatch(&mut self, desc: &DispatchDescriptor) -> EngineResult<()> {
        validate_dispatch(desc, &self.limits)?;
        for (_, buffer) in desc.bindings.iter() {
            self.table.slot(buffer)?;
        }

        log::trace!(
            "[CpuDevice] {} groups {}..{}",
            desc.kernel,
            desc.params.group_offset,
            desc.params.group_offset as u64 + desc.groups as u64
        );
        CPU_KERNELS[desc.kernel.table_index()](&mut self.table, desc)?;
        self.dispatch_count += 1;
        Ok(())
    }

    fn read_points(&mut self, buffer: BufferHandle, offset: u32, count: u32) -> EngineResult<Vec<Vec3>> {
        check_range(offset, count as usize, buffer.len)?;
        let data = self.table.points(buffer)?;
        let start = offset as usize;
        Ok(data[start..start + count as usize].to_vec())
    }

    fn read_counters(&mut self, buffer: BufferHandle) -> EngineResult<Vec<u32>> {
        Ok(self
            .table
            .counters(buffer)?
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect())
    }

    fn read_weights(&mut self, buffer: BufferHandle) -> EngineResult<Vec<f32>> {
        let slot = self.table.slot(buffer)?;
        match &slot.data {
            CpuBuffer::Weights(data) => Ok(data.clone()),
            _ => Err(kind_error(&slot.label, slot.handle.kind, BufferKind::Weights)),
        }
    }
}
