//! Compute device abstraction
//!
//! Kernels are described by a `Kernel` value plus a `DispatchDescriptor`
//! (typed buffer bindings and a uniform parameter block). Two backends run
//! them:
//! - `CpuDevice`: rayon work-groups, always available, used by the tests
//! - `GpuDevice`: wgpu compute pipelines (feature `gpu`)
//!
//! Within one device, dispatches execute in submission order and each
//! dispatch observes every write of the dispatches before it. Readbacks block
//! until all prior dispatches have completed.

mod cpu_device;
mod cpu_kernels;
mod dispatch_data;
mod dispatch_operations;
#[cfg(feature = "gpu")]
mod gpu_device;
mod kernel;
pub mod kernel_math;

pub use cpu_device::CpuDevice;
pub use dispatch_data::{
    Bindings, BufferHandle, BufferKind, BufferRole, DeviceLimits, DispatchDescriptor, KernelParams,
};
pub use dispatch_operations::{
    dispatch_chunked, for_each_dispatch_chunk, group_count, validate_dispatch,
};
#[cfg(feature = "gpu")]
pub use gpu_device::GpuDevice;
pub use kernel::{
    kernel_signature, select_reduction_kernel, Kernel, KernelModule, KernelSignature, ReduceVariant,
    ReductionOp, ReductionStrategy, RoleSpec, TreeAddressing, KERNEL_TABLE,
};

use crate::error::EngineResult;
use glam::{Mat4, Vec3};

/// Backend that owns buffers and executes kernels
pub trait ComputeDevice {
    /// Human readable backend name for logs
    fn label(&self) -> &str;

    fn limits(&self) -> DeviceLimits;

    /// Allocate a zero-initialised buffer of `len` elements of `kind`
    fn create_buffer(&mut self, kind: BufferKind, len: u32, label: &str) -> EngineResult<BufferHandle>;

    /// Release a buffer; the handle is dead afterwards
    fn release_buffer(&mut self, buffer: BufferHandle) -> EngineResult<()>;

    /// Upload points starting at element `offset`
    fn write_points(&mut self, buffer: BufferHandle, offset: u32, points: &[Vec3]) -> EngineResult<()>;

    /// Upload matrices starting at element 0
    fn write_transforms(&mut self, buffer: BufferHandle, transforms: &[Mat4]) -> EngineResult<()>;

    /// Validate and run one kernel launch
    fn dispatch(&mut self, desc: &DispatchDescriptor) -> EngineResult<()>;

    fn read_points(&mut self, buffer: BufferHandle, offset: u32, count: u32) -> EngineResult<Vec<Vec3>>;

    fn read_counters(&mut self, buffer: BufferHandle) -> EngineResult<Vec<u32>>;

    fn read_weights(&mut self, buffer: BufferHandle) -> EngineResult<Vec<f32>>;
}
