//! wgpu compute backend
//!
//! One compute pipeline per `Kernel` value, compiled on first use and cached.
//! Each dispatch is its own submission, so queue order gives the required
//! dispatch-to-dispatch visibility. Readbacks copy into a staging buffer and
//! block on `Maintain::Wait`.

use super::dispatch_data::{BufferHandle, BufferKind, DeviceLimits, DispatchDescriptor};
use super::dispatch_operations::validate_dispatch;
use super::kernel::{
    kernel_signature, Kernel, KernelModule, ReduceVariant, ReductionOp, TreeAddressing,
};
use super::ComputeDevice;
use crate::constants::dispatch::MAX_LANES_PER_GROUP;
use crate::error::{EngineError, EngineResult, OptionExt};
use glam::{Mat4, Vec3};
use std::borrow::Cow;
use std::collections::HashMap;
use wgpu::util::DeviceExt;

const POINTS_SHADER: &str = include_str!("shaders/points.wgsl");
const REDUCTION_TEMPLATE: &str = include_str!("shaders/reduction.wgsl");

/// Smallest allocation; covers the 64-byte minimum binding of a mat4 array
const MIN_BUFFER_SIZE: u64 = 64;

/// Variant used to instantiate the reduction module for `scan_reduce`
const SCAN_VARIANT: ReduceVariant = ReduceVariant {
    op: ReductionOp::Add,
    addressing: TreeAddressing::SequentialAddressing,
    double_load: false,
    lanes: 2,
};

/// Reduction module source with the variant's template values filled in
pub(super) fn reduction_source(kernel: &Kernel) -> String {
    let variant = match kernel {
        Kernel::Reduce(variant) => *variant,
        _ => SCAN_VARIANT,
    };
    REDUCTION_TEMPLATE
        .replace("{{LANES}}", &variant.lanes.to_string())
        .replace("{{OP}}", &variant.op.shader_id().to_string())
        .replace("{{STRATEGY}}", &variant.addressing.shader_id().to_string())
        .replace("{{DOUBLE_LOAD}}", if variant.double_load { "true" } else { "false" })
}

struct GpuBuffer {
    label: String,
    handle: BufferHandle,
    buffer: wgpu::Buffer,
}

/// `ComputeDevice` backed by a wgpu adapter
pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    limits: DeviceLimits,
    buffers: Vec<Option<GpuBuffer>>,
    pipelines: HashMap<Kernel, wgpu::ComputePipeline>,
}

fn gpu_error(operation: impl Into<String>, error: impl std::fmt::Display) -> EngineError {
    EngineError::GpuOperationFailed {
        operation: operation.into(),
        error: error.to_string(),
    }
}

impl GpuDevice {
    /// Open the default high-performance adapter
    ///
    /// Returns `DeviceNotFound` when no adapter is available.
    pub fn new() -> EngineResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> EngineResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await
            .ok_or(EngineError::DeviceNotFound)?;

        let adapter_limits = adapter.limits();
        let required_limits = wgpu::Limits {
            max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
            max_buffer_size: adapter_limits.max_buffer_size,
            ..wgpu::Limits::default()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Attractor Compute Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: required_limits.clone(),
                },
                None,
            )
            .await
            .map_err(|e| gpu_error("request_device", e))?;

        let limits = DeviceLimits {
            max_groups_per_dimension: required_limits.max_compute_workgroups_per_dimension,
            max_lanes_per_group: required_limits
                .max_compute_invocations_per_workgroup
                .min(required_limits.max_compute_workgroup_size_x)
                .min(MAX_LANES_PER_GROUP),
            max_buffer_size: (required_limits.max_storage_buffer_binding_size as u64)
                .min(required_limits.max_buffer_size),
        };

        let adapter_name = adapter.get_info().name;
        log::info!(
            "[GpuDevice] Using adapter '{}' (max {} groups, {} lanes, {} MB buffers)",
            adapter_name,
            limits.max_groups_per_dimension,
            limits.max_lanes_per_group,
            limits.max_buffer_size / (1024 * 1024)
        );

        Ok(Self {
            device,
            queue,
            adapter_name,
            limits,
            buffers: Vec::new(),
            pipelines: HashMap::new(),
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn buffer(&self, handle: BufferHandle) -> EngineResult<&GpuBuffer> {
        match self.buffers.get(handle.id as usize) {
            Some(Some(entry)) if entry.handle == handle => Ok(entry),
            _ => Err(EngineError::UnknownBuffer { id: handle.id }),
        }
    }

    fn check_kind(entry: &GpuBuffer, wanted: BufferKind) -> EngineResult<()> {
        if entry.handle.kind != wanted {
            return Err(EngineError::Internal {
                message: format!(
                    "buffer '{}' holds {:?}, accessed as {:?}",
                    entry.label, entry.handle.kind, wanted
                ),
            });
        }
        Ok(())
    }

    fn ensure_pipeline(&mut self, kernel: &Kernel) -> EngineResult<()> {
        if self.pipelines.contains_key(kernel) {
            return Ok(());
        }
        let signature = kernel_signature(kernel);
        let source = match signature.module {
            KernelModule::Points => Cow::Borrowed(POINTS_SHADER),
            KernelModule::Reduction => Cow::Owned(reduction_source(kernel)),
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(signature.label),
                source: wgpu::ShaderSource::Wgsl(source),
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(signature.label),
                layout: None,
                module: &module,
                entry_point: signature.entry_point,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(gpu_error(format!("compile {}", kernel), error));
        }

        log::debug!("[GpuDevice] Compiled pipeline {}", kernel);
        self.pipelines.insert(*kernel, pipeline);
        Ok(())
    }

    /// Copy `size` bytes at `offset` of `source` back to the host
    fn read_bytes(&self, source: &wgpu::Buffer, offset: u64, size: u64) -> EngineResult<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback"),
            });
        encoder.copy_buffer_to_buffer(source, offset, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| EngineError::BufferMapping {
                context: "readback channel closed".to_string(),
            })?
            .map_err(|e| EngineError::BufferMapping {
                context: e.to_string(),
            })?;

        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
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

impl ComputeDevice for GpuDevice {
    fn label(&self) -> &str {
        "gpu"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, kind: BufferKind, len: u32, label: &str) -> EngineResult<BufferHandle> {
        let handle = BufferHandle {
            id: self.buffers.len() as u32,
            kind,
            len,
        };
        let bytes = handle.size_bytes();
        if bytes > self.limits.max_buffer_size {
            return Err(EngineError::invalid_config(
                label,
                bytes,
                format!("exceeds device buffer limit of {} bytes", self.limits.max_buffer_size),
            ));
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes.max(MIN_BUFFER_SIZE),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        self.buffers.push(Some(GpuBuffer {
            label: label.to_string(),
            handle,
            buffer,
        }));

        log::debug!("[GpuDevice] Created buffer '{}' ({:?} x {})", label, kind, len);
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) -> EngineResult<()> {
        self.buffer(buffer)?;
        if let Some(entry) = self.buffers[buffer.id as usize].take() {
            entry.buffer.destroy();
            log::debug!("[GpuDevice] Released buffer '{}'", entry.label);
        }
        Ok(())
    }

    fn write_points(&mut self, buffer: BufferHandle, offset: u32, points: &[Vec3]) -> EngineResult<()> {
        check_range(offset, points.len(), buffer.len)?;
        let entry = self.buffer(buffer)?;
        Self::check_kind(entry, BufferKind::Points)?;
        if !points.is_empty() {
            self.queue.write_buffer(
                &entry.buffer,
                offset as u64 * BufferKind::Points.element_size(),
                bytemuck::cast_slice(points),
            );
        }
        Ok(())
    }

    fn write_transforms(&mut self, buffer: BufferHandle, transforms: &[Mat4]) -> EngineResult<()> {
        check_range(0, transforms.len(), buffer.len)?;
        let entry = self.buffer(buffer)?;
        Self::check_kind(entry, BufferKind::Transforms)?;
        if !transforms.is_empty() {
            self.queue
                .write_buffer(&entry.buffer, 0, bytemuck::cast_slice(transforms));
        }
        Ok(())
    }

    fn dispatch(&mut self, desc: &DispatchDescriptor) -> EngineResult<()> {
        validate_dispatch(desc, &self.limits)?;
        self.ensure_pipeline(&desc.kernel)?;

        let signature = kernel_signature(&desc.kernel);
        let pipeline = self
            .pipelines
            .get(&desc.kernel)
            .ok_or_engine(|| gpu_error("dispatch", format!("no pipeline for {}", desc.kernel)))?;

        let params = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Kernel Params"),
                contents: bytemuck::bytes_of(&desc.params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: params.as_entire_binding(),
        }];
        for spec in signature.roles {
            let handle = desc.bindings.get(spec.role).ok_or_engine(|| {
                EngineError::invalid_dispatch(desc.kernel.to_string(), format!("missing {:?} binding", spec.role))
            })?;
            entries.push(wgpu::BindGroupEntry {
                binding: spec.binding,
                resource: self.buffer(handle)?.buffer.as_entire_binding(),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let layout = pipeline.get_bind_group_layout(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(signature.label),
            layout: &layout,
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Attractor Dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(signature.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(desc.groups, 1, 1);
        }
        self.queue.submit(Some(encoder.finish()));

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(gpu_error(desc.kernel.to_string(), error));
        }
        Ok(())
    }

    fn read_points(&mut self, buffer: BufferHandle, offset: u32, count: u32) -> EngineResult<Vec<Vec3>> {
        check_range(offset, count as usize, buffer.len)?;
        let entry = self.buffer(buffer)?;
        Self::check_kind(entry, BufferKind::Points)?;
        let stride = BufferKind::Points.element_size();
        let bytes = self.read_bytes(&entry.buffer, offset as u64 * stride, count as u64 * stride)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    fn read_counters(&mut self, buffer: BufferHandle) -> EngineResult<Vec<u32>> {
        let entry = self.buffer(buffer)?;
        Self::check_kind(entry, BufferKind::Counters)?;
        let bytes = self.read_bytes(&entry.buffer, 0, buffer.size_bytes())?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    fn read_weights(&mut self, buffer: BufferHandle) -> EngineResult<Vec<f32>> {
        let entry = self.buffer(buffer)?;
        Self::check_kind(entry, BufferKind::Weights)?;
        let bytes = self.read_bytes(&entry.buffer, 0, buffer.size_bytes())?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }
}
