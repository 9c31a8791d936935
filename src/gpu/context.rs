//! Explicit GPU context
//!
//! All "currently bound" state lives here instead of in the driver: vertex
//! slots, the index buffer, storage binding points and the active program.
//! Pipelines thread a `&mut GpuContext` through every call, and tests assert
//! on `bound()` and `barrier_log()` directly.

use super::device::{
    BarrierBits, BufferDescriptor, BufferId, BufferTarget, ComputeDispatch, DrawCall, GpuDevice,
    ProgramId,
};
use super::buffer::GpuBuffer;
use crate::error::{EngineError, EngineResult};
use crate::shader::ShaderProgram;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A device resource whose owner has been dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetiredResource {
    Buffer(BufferId),
    Program(ProgramId),
}

/// Queue of resources awaiting release, shared by the context and every
/// buffer and program it created
#[derive(Debug, Clone, Default)]
pub struct RetireQueue(Arc<Mutex<Vec<RetiredResource>>>);

impl RetireQueue {
    pub fn retire(&self, resource: RetiredResource) {
        self.0.lock().push(resource);
    }

    pub fn drain(&self) -> Vec<RetiredResource> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Binding state consumed by the next dispatch or draw
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundState {
    pub vertex_slots: BTreeMap<u32, BufferId>,
    pub index_buffer: Option<BufferId>,
    pub storage: BTreeMap<u32, BufferId>,
    pub active_program: Option<ProgramId>,
}

impl BoundState {
    fn forget_buffer(&mut self, buffer: BufferId) {
        self.vertex_slots.retain(|_, b| *b != buffer);
        self.storage.retain(|_, b| *b != buffer);
        if self.index_buffer == Some(buffer) {
            self.index_buffer = None;
        }
    }
}

pub struct GpuContext<D: GpuDevice> {
    device: D,
    bound: BoundState,
    barrier_log: Vec<BarrierBits>,
    retired: RetireQueue,
    frame: u64,
}

impl<D: GpuDevice> GpuContext<D> {
    pub fn new(device: D) -> Self {
        debug!("[GpuContext] Created on {} backend", device.backend_name());
        Self {
            device,
            bound: BoundState::default(),
            barrier_log: Vec::new(),
            retired: RetireQueue::default(),
            frame: 0,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn backend_name(&self) -> &'static str {
        self.device.backend_name()
    }

    pub fn bound(&self) -> &BoundState {
        &self.bound
    }

    /// Barriers issued since the last `begin_frame`
    pub fn barrier_log(&self) -> &[BarrierBits] {
        &self.barrier_log
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub(crate) fn retire_queue(&self) -> RetireQueue {
        self.retired.clone()
    }

    pub fn pending_releases(&self) -> usize {
        self.retired.len()
    }

    pub(crate) fn create_raw_buffer(&mut self, desc: &BufferDescriptor<'_>) -> EngineResult<BufferId> {
        let id = self.device.create_buffer(desc)?;
        debug!(
            "[GpuContext] Created {:?} buffer '{}' ({} bytes, {:?})",
            desc.target, desc.label, desc.size, desc.usage
        );
        Ok(id)
    }

    /// Bind a buffer at its target
    ///
    /// Vertex buffers take the vertex slot as index (slot 0 when omitted),
    /// index buffers ignore it, storage buffers require the binding point.
    pub fn bind_buffer(&mut self, buffer: &GpuBuffer, index: Option<u32>) -> EngineResult<()> {
        match buffer.target() {
            BufferTarget::Vertex => {
                self.bound.vertex_slots.insert(index.unwrap_or(0), buffer.id());
            }
            BufferTarget::Index => {
                self.bound.index_buffer = Some(buffer.id());
            }
            BufferTarget::Storage => {
                let index = index.ok_or_else(|| EngineError::MissingBindingIndex {
                    label: buffer.label().to_string(),
                })?;
                self.bound.storage.insert(index, buffer.id());
            }
        }
        trace!("[GpuContext] Bound '{}' at {:?}", buffer.label(), index);
        Ok(())
    }

    /// Bind a vertex or storage buffer as a vertex stream
    pub fn bind_vertex_stream(&mut self, slot: u32, buffer: &GpuBuffer) -> EngineResult<()> {
        if buffer.target() == BufferTarget::Index {
            return Err(EngineError::TargetMismatch {
                label: buffer.label().to_string(),
                actual: BufferTarget::Index,
                expected: BufferTarget::Vertex,
            });
        }
        self.bound.vertex_slots.insert(slot, buffer.id());
        Ok(())
    }

    pub fn unbind_storage(&mut self, index: u32) -> Option<BufferId> {
        self.bound.storage.remove(&index)
    }

    pub fn unbind_vertex_stream(&mut self, slot: u32) -> Option<BufferId> {
        self.bound.vertex_slots.remove(&slot)
    }

    pub fn unbind_index_buffer(&mut self) -> Option<BufferId> {
        self.bound.index_buffer.take()
    }

    /// Activate a program handle; false when it already was active
    pub fn set_active_program(&mut self, program: ProgramId) -> bool {
        if self.bound.active_program == Some(program) {
            return false;
        }
        self.bound.active_program = Some(program);
        true
    }

    fn require_active(&self, program: &ShaderProgram) -> EngineResult<ProgramId> {
        let handle = program.handle().ok_or_else(|| EngineError::ProgramUnusable {
            program: program.label().to_string(),
        })?;
        if self.bound.active_program != Some(handle) {
            return Err(EngineError::ProgramNotActive {
                program: program.label().to_string(),
            });
        }
        Ok(handle)
    }

    /// Storage buffers for every binding point the program declares
    fn resolve_storage(&self, program: &ShaderProgram) -> EngineResult<Vec<(u32, BufferId)>> {
        let mut storage: Vec<(u32, BufferId)> = Vec::with_capacity(program.reflection().storage.len());
        for declared in &program.reflection().storage {
            let buffer = *self.bound.storage.get(&declared.binding).ok_or_else(|| {
                EngineError::UnboundBinding {
                    program: program.label().to_string(),
                    index: declared.binding,
                }
            })?;
            if storage.iter().any(|&(_, b)| b == buffer) {
                return Err(EngineError::AliasedBinding {
                    program: program.label().to_string(),
                    buffer,
                });
            }
            storage.push((declared.binding, buffer));
        }
        Ok(storage)
    }

    /// Issue a compute dispatch with the active program and bound storage
    pub fn dispatch(&mut self, program: &ShaderProgram, workgroups: [u32; 3]) -> EngineResult<()> {
        let handle = self.require_active(program)?;
        let storage = self.resolve_storage(program)?;

        self.device.dispatch(&ComputeDispatch {
            program: handle,
            storage: &storage,
            uniforms: program.param_bytes(),
            workgroups,
        })?;
        trace!("[GpuContext] Dispatched '{}' {:?}", program.label(), workgroups);
        Ok(())
    }

    pub fn memory_barrier(&mut self, bits: BarrierBits) {
        self.barrier_log.push(bits);
        self.device.memory_barrier(bits);
    }

    /// Issue an instanced draw with the active program and bound streams
    ///
    /// Indexed when an index buffer is bound; `element_count` is then the
    /// index count.
    pub fn draw_instanced(
        &mut self,
        program: &ShaderProgram,
        element_count: u32,
        instance_count: u32,
    ) -> EngineResult<()> {
        let handle = self.require_active(program)?;

        let mut vertex_streams = Vec::with_capacity(program.vertex_streams().len());
        for layout in program.vertex_streams() {
            let buffer = *self.bound.vertex_slots.get(&layout.slot).ok_or_else(|| {
                EngineError::UnboundVertexStream {
                    program: program.label().to_string(),
                    slot: layout.slot,
                }
            })?;
            vertex_streams.push((layout.slot, buffer));
        }
        let storage = self.resolve_storage(program)?;

        self.device.draw_instanced(&DrawCall {
            program: handle,
            vertex_streams: &vertex_streams,
            index_buffer: self.bound.index_buffer,
            storage: &storage,
            uniforms: program.param_bytes(),
            element_count,
            instance_count,
        })
    }

    /// Synchronous readback of `len` bytes at `offset`
    pub fn read_buffer(&mut self, buffer: &GpuBuffer, offset: u64, len: u64) -> EngineResult<Vec<u8>> {
        if offset.checked_add(len).map_or(true, |end| end > buffer.capacity()) {
            return Err(EngineError::ReadbackOutOfRange {
                label: buffer.label().to_string(),
                offset,
                len,
                capacity: buffer.capacity(),
            });
        }
        self.device.read_buffer(buffer.id(), offset, len)
    }

    /// Start a frame: release retired resources and clear the barrier log
    pub fn begin_frame(&mut self) -> usize {
        self.frame += 1;
        self.barrier_log.clear();
        self.device.begin_frame();
        self.release_retired()
    }

    /// Release every retired resource now
    pub fn release_retired(&mut self) -> usize {
        let retired = self.retired.drain();
        for resource in &retired {
            match *resource {
                RetiredResource::Buffer(id) => {
                    self.bound.forget_buffer(id);
                    self.device.destroy_buffer(id);
                }
                RetiredResource::Program(id) => {
                    if self.bound.active_program == Some(id) {
                        self.bound.active_program = None;
                    }
                    self.device.destroy_program(id);
                }
            }
        }
        if !retired.is_empty() {
            debug!("[GpuContext] Released {} retired resources", retired.len());
        }
        retired.len()
    }

    /// Drop every binding and the active program
    pub fn reset_bindings(&mut self) {
        self.bound = BoundState::default();
    }
}

impl<D: GpuDevice> Drop for GpuContext<D> {
    fn drop(&mut self) {
        self.release_retired();
    }
}
