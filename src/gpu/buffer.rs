//! GPU buffer objects
//!
//! A buffer's handle is allocated once and never reassigned. Uploads replace
//! contents in place; a dynamic buffer that outgrows its capacity is
//! reallocated by the device behind the same handle.

use super::context::{GpuContext, RetireQueue, RetiredResource};
use super::device::{BufferDescriptor, BufferId, BufferTarget, GpuDevice, UsageHint};
use crate::constants::buffers::{COPY_ALIGNMENT, MIN_BUFFER_SIZE};
use crate::error::{EngineError, EngineResult};
use crate::gpu::buffer_layouts::calculations::align_buffer_size;
use bytemuck::Pod;
use log::{debug, warn};

/// Device allocation size for a logical byte size
fn allocation_size(size: u64) -> u64 {
    align_buffer_size(size.max(MIN_BUFFER_SIZE), COPY_ALIGNMENT)
}

pub struct GpuBuffer {
    id: BufferId,
    label: String,
    target: BufferTarget,
    capacity: u64,
    stride: u64,
    usage: UsageHint,
    retire: RetireQueue,
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("target", &self.target)
            .field("capacity", &self.capacity)
            .field("stride", &self.stride)
            .field("usage", &self.usage)
            .finish()
    }
}

impl GpuBuffer {
    /// Allocate `byte_size` bytes, optionally initialised from `initial_data`
    pub fn create<D: GpuDevice>(
        ctx: &mut GpuContext<D>,
        label: &str,
        target: BufferTarget,
        byte_size: u64,
        initial_data: Option<&[u8]>,
        usage: UsageHint,
    ) -> EngineResult<Self> {
        if let Some(data) = initial_data {
            if data.len() as u64 > byte_size {
                return Err(EngineError::BufferOverflow {
                    label: label.to_string(),
                    capacity: byte_size,
                    requested: data.len() as u64,
                });
            }
        }

        let id = ctx.create_raw_buffer(&BufferDescriptor {
            label,
            target,
            size: allocation_size(byte_size),
            usage,
            contents: initial_data,
        })?;

        Ok(Self {
            id,
            label: label.to_string(),
            target,
            capacity: byte_size,
            stride: 0,
            usage,
            retire: ctx.retire_queue(),
        })
    }

    /// Allocate a buffer holding `data`, with the element stride of `T`
    pub fn with_data<D: GpuDevice, T: Pod>(
        ctx: &mut GpuContext<D>,
        label: &str,
        target: BufferTarget,
        data: &[T],
        usage: UsageHint,
    ) -> EngineResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::create(ctx, label, target, bytes.len() as u64, Some(bytes), usage)?;
        buffer.stride = std::mem::size_of::<T>() as u64;
        Ok(buffer)
    }

    /// Allocate room for `capacity` zeroed records of `T`
    pub fn with_capacity<D: GpuDevice, T: Pod>(
        ctx: &mut GpuContext<D>,
        label: &str,
        target: BufferTarget,
        capacity: u32,
        usage: UsageHint,
    ) -> EngineResult<Self> {
        let size = capacity as u64 * std::mem::size_of::<T>() as u64;
        let zeroed = vec![0u8; size as usize];
        let mut buffer = Self::create(ctx, label, target, size, Some(&zeroed), usage)?;
        buffer.stride = std::mem::size_of::<T>() as u64;
        Ok(buffer)
    }

    /// Replace contents from offset 0
    ///
    /// Static buffers reject data larger than their capacity; dynamic ones
    /// are reallocated behind the same handle.
    pub fn upload<D: GpuDevice>(&mut self, ctx: &mut GpuContext<D>, data: &[u8]) -> EngineResult<()> {
        let requested = data.len() as u64;
        if requested <= self.capacity {
            return ctx.device_mut().write_buffer(self.id, 0, data);
        }

        match self.usage {
            UsageHint::Static => {
                warn!(
                    "[GpuBuffer] Upload of {} bytes exceeds static buffer '{}' ({} bytes)",
                    requested, self.label, self.capacity
                );
                Err(EngineError::BufferOverflow {
                    label: self.label.clone(),
                    capacity: self.capacity,
                    requested,
                })
            }
            UsageHint::Dynamic => {
                debug!(
                    "[GpuBuffer] Growing '{}' from {} to {} bytes",
                    self.label, self.capacity, requested
                );
                ctx.device_mut()
                    .reallocate_buffer(self.id, allocation_size(requested), data)?;
                self.capacity = requested;
                Ok(())
            }
        }
    }

    /// Typed `upload`
    pub fn upload_slice<D: GpuDevice, T: Pod>(
        &mut self,
        ctx: &mut GpuContext<D>,
        data: &[T],
    ) -> EngineResult<()> {
        self.upload(ctx, bytemuck::cast_slice(data))
    }

    /// Overwrite a range without touching the rest
    pub fn write_at<D: GpuDevice>(
        &self,
        ctx: &mut GpuContext<D>,
        offset: u64,
        data: &[u8],
    ) -> EngineResult<()> {
        let end = offset.checked_add(data.len() as u64);
        if end.map_or(true, |end| end > self.capacity) {
            return Err(EngineError::BufferOverflow {
                label: self.label.clone(),
                capacity: self.capacity,
                requested: end.unwrap_or(u64::MAX),
            });
        }
        ctx.device_mut().write_buffer(self.id, offset, data)
    }

    /// Bind at this buffer's target; storage buffers need a binding index
    pub fn bind<D: GpuDevice>(&self, ctx: &mut GpuContext<D>, index: Option<u32>) -> EngineResult<()> {
        ctx.bind_buffer(self, index)
    }

    /// Blocking readback of the whole buffer
    pub fn read_all<D: GpuDevice>(&self, ctx: &mut GpuContext<D>) -> EngineResult<Vec<u8>> {
        ctx.read_buffer(self, 0, self.capacity)
    }

    /// Blocking readback decoded as records of `T`
    pub fn read_records<D: GpuDevice, T: Pod>(&self, ctx: &mut GpuContext<D>) -> EngineResult<Vec<T>> {
        let bytes = self.read_all(ctx)?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn target(&self) -> BufferTarget {
        self.target
    }

    /// Logical size in bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Element stride, 0 for unstructured buffers
    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn with_stride(mut self, stride: u64) -> Self {
        self.stride = stride;
        self
    }

    /// Whole elements the buffer holds
    pub fn element_capacity(&self) -> u32 {
        if self.stride == 0 {
            0
        } else {
            (self.capacity / self.stride) as u32
        }
    }

    pub fn usage(&self) -> UsageHint {
        self.usage
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.retire.retire(RetiredResource::Buffer(self.id));
    }
}
