//! Software reference device
//!
//! Executes compute kernels on the host and records draws instead of
//! rasterising them. It also models write visibility: storage writes made by
//! a dispatch reach a consumer only once a barrier covering that consumer's
//! access class has been issued. Until then the consumer observes the
//! contents from before the dispatch, which is exactly the stale-frame
//! behaviour a missing barrier bit causes on hardware.

pub mod kernels;

use super::buffer_layouts::StepMode;
use super::device::{
    AccessClass, BarrierBits, BufferDescriptor, BufferId, BufferTarget, ComputeDispatch, DrawCall,
    GpuDevice, LinkRequest, ProgramId, UsageHint,
};
use crate::error::{EngineError, EngineResult};
use crate::shader::{ShaderStageKind, UniformSlot};
use kernels::{KernelBindings, ParamReader, SoftwareKernel};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Counters of device work, for tests and frame logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub buffers_created: u64,
    pub buffers_destroyed: u64,
    pub programs_linked: u64,
    pub programs_destroyed: u64,
    pub dispatches: u64,
    pub barriers: u64,
    pub draws: u64,
    pub instances_drawn: u64,
    pub readbacks: u64,
    pub readback_bytes: u64,
}

/// Inputs a draw fetched, as seen through the visibility model
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedDraw {
    pub program: ProgramId,
    pub element_count: u32,
    pub instance_count: u32,
    pub vertex_streams: Vec<(u32, Vec<u8>)>,
    pub index_data: Option<Vec<u8>>,
    /// Storage bindings as the vertex and fragment stages read them
    pub storage: Vec<(u32, Vec<u8>)>,
    pub uniforms: Vec<u8>,
}

impl CapturedDraw {
    pub fn stream(&self, slot: u32) -> Option<&[u8]> {
        self.vertex_streams
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, bytes)| bytes.as_slice())
    }

    pub fn storage(&self, binding: u32) -> Option<&[u8]> {
        self.storage
            .iter()
            .find(|(b, _)| *b == binding)
            .map(|(_, bytes)| bytes.as_slice())
    }
}

#[derive(Debug)]
struct SoftwareBuffer {
    label: String,
    target: BufferTarget,
    usage: UsageHint,
    data: Vec<u8>,
    /// Contents still seen by access classes no barrier has flushed since
    /// the latest kernel write
    stale: Vec<(AccessClass, Vec<u8>)>,
}

impl SoftwareBuffer {
    fn stale_view(&self, access: AccessClass) -> Option<&[u8]> {
        self.stale
            .iter()
            .find(|(class, _)| *class == access)
            .map(|(_, bytes)| bytes.as_slice())
    }

    fn view(&self, access: AccessClass) -> &[u8] {
        self.stale_view(access).unwrap_or(&self.data)
    }

    /// Every class keeps the last generation it could see: classes that are
    /// already behind stay where they are, the rest freeze at the current data
    fn record_kernel_write(&mut self, contents: Vec<u8>) {
        let previous = std::mem::replace(&mut self.data, contents);
        for access in AccessClass::ALL {
            if self.stale_view(access).is_none() {
                self.stale.push((access, previous.clone()));
            }
        }
    }

    fn host_write(&mut self, offset: usize, bytes: &[u8]) {
        let range = offset..offset + bytes.len();
        self.data[range.clone()].copy_from_slice(bytes);
        for (_, view) in &mut self.stale {
            view[range.clone()].copy_from_slice(bytes);
        }
    }

    fn flush(&mut self, bits: BarrierBits) {
        self.stale.retain(|(access, _)| !bits.contains(access.barrier_bit()));
    }
}

enum SoftwareProgram {
    Compute {
        kernel: Arc<dyn SoftwareKernel>,
        threads_per_workgroup: u32,
        uniforms: Vec<UniformSlot>,
        /// Binding points the kernel may write
        writable: Vec<u32>,
    },
    Graphics {
        instance_strides: Vec<(u32, u64)>,
    },
}

/// Host-executed reference backend
pub struct SoftwareDevice {
    next_id: u64,
    buffers: HashMap<BufferId, SoftwareBuffer>,
    programs: HashMap<ProgramId, SoftwareProgram>,
    kernels: HashMap<&'static str, Arc<dyn SoftwareKernel>>,
    stats: DeviceStats,
    capture_draws: bool,
    captured: Vec<CapturedDraw>,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    /// Device with the built-in kernels registered
    pub fn new() -> Self {
        let mut device = Self::empty();
        device.register_kernel(Arc::new(kernels::ClassifyKernel));
        device.register_kernel(Arc::new(kernels::BoidKernel));
        device.register_kernel(Arc::new(kernels::ParticleKernel));
        device
    }

    /// Device without any kernels
    pub fn empty() -> Self {
        Self {
            next_id: 1,
            buffers: HashMap::new(),
            programs: HashMap::new(),
            kernels: HashMap::new(),
            stats: DeviceStats::default(),
            capture_draws: false,
            captured: Vec::new(),
        }
    }

    /// Record the inputs of every draw from now on
    pub fn with_draw_capture(mut self) -> Self {
        self.capture_draws = true;
        self
    }

    pub fn register_kernel(&mut self, kernel: Arc<dyn SoftwareKernel>) {
        self.kernels.insert(kernel.entry_point(), kernel);
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    pub fn captured_draws(&self) -> &[CapturedDraw] {
        &self.captured
    }

    pub fn take_captured_draws(&mut self) -> Vec<CapturedDraw> {
        std::mem::take(&mut self.captured)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    /// Whether `buffer` holds kernel writes not yet visible to `access`
    pub fn is_stale_for(&self, buffer: BufferId, access: AccessClass) -> bool {
        self.buffers
            .get(&buffer)
            .map_or(false, |b| b.stale_view(access).is_some())
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer(&self, id: BufferId) -> EngineResult<&SoftwareBuffer> {
        self.buffers.get(&id).ok_or(EngineError::UnknownBuffer(id))
    }

    fn buffer_mut(&mut self, id: BufferId) -> EngineResult<&mut SoftwareBuffer> {
        self.buffers.get_mut(&id).ok_or(EngineError::UnknownBuffer(id))
    }
}

impl GpuDevice for SoftwareDevice {
    fn backend_name(&self) -> &'static str {
        "software"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> EngineResult<BufferId> {
        let mut data = vec![0u8; desc.size as usize];
        if let Some(contents) = desc.contents {
            data[..contents.len()].copy_from_slice(contents);
        }

        let id = BufferId(self.next_id());
        self.buffers.insert(
            id,
            SoftwareBuffer {
                label: desc.label.to_string(),
                target: desc.target,
                usage: desc.usage,
                data,
                stale: Vec::new(),
            },
        );
        self.stats.buffers_created += 1;
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> EngineResult<()> {
        let target = self.buffer_mut(buffer)?;
        let end = offset as usize + data.len();
        if end > target.data.len() {
            return Err(EngineError::BufferOverflow {
                label: target.label.clone(),
                capacity: target.data.len() as u64,
                requested: end as u64,
            });
        }
        target.host_write(offset as usize, data);
        Ok(())
    }

    fn reallocate_buffer(&mut self, buffer: BufferId, size: u64, contents: &[u8]) -> EngineResult<()> {
        let target = self.buffer_mut(buffer)?;
        if target.usage != UsageHint::Dynamic {
            warn!("[SoftwareDevice] Reallocating static buffer '{}'", target.label);
        }
        let mut data = vec![0u8; size as usize];
        data[..contents.len()].copy_from_slice(contents);
        target.data = data;
        target.stale.clear();
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferId, offset: u64, len: u64) -> EngineResult<Vec<u8>> {
        let source = self.buffer(buffer)?;
        let view = source.view(AccessClass::BufferUpdate);
        let (start, end) = (offset as usize, (offset + len) as usize);
        if end > view.len() {
            return Err(EngineError::ReadbackOutOfRange {
                label: source.label.clone(),
                offset,
                len,
                capacity: view.len() as u64,
            });
        }
        let bytes = view[start..end].to_vec();

        self.stats.readbacks += 1;
        self.stats.readback_bytes += len;
        Ok(bytes)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_some() {
            self.stats.buffers_destroyed += 1;
        }
    }

    fn link_program(&mut self, request: &LinkRequest<'_>) -> Result<ProgramId, String> {
        let program = match request.stages.iter().find(|s| s.kind == ShaderStageKind::Compute) {
            Some(stage) => {
                let kernel = self
                    .kernels
                    .get(stage.entry_point.as_str())
                    .cloned()
                    .ok_or_else(|| {
                        format!(
                            "no reference kernel registered for entry point '{}'",
                            stage.entry_point
                        )
                    })?;
                SoftwareProgram::Compute {
                    kernel,
                    threads_per_workgroup: request.reflection.threads_per_workgroup(),
                    uniforms: request.reflection.params.slots.clone(),
                    writable: request
                        .reflection
                        .storage
                        .iter()
                        .filter(|s| !s.read_only)
                        .map(|s| s.binding)
                        .collect(),
                }
            }
            None => SoftwareProgram::Graphics {
                instance_strides: request
                    .vertex_streams
                    .iter()
                    .filter(|s| s.step_mode == StepMode::Instance)
                    .map(|s| (s.slot, s.stride))
                    .collect(),
            },
        };

        let id = ProgramId(self.next_id());
        self.programs.insert(id, program);
        self.stats.programs_linked += 1;
        debug!("[SoftwareDevice] Linked '{}' as {:?}", request.label, id);
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_some() {
            self.stats.programs_destroyed += 1;
        }
    }

    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) -> EngineResult<()> {
        let Some(SoftwareProgram::Compute {
            kernel,
            threads_per_workgroup,
            uniforms,
            writable,
        }) = self.programs.get(&dispatch.program)
        else {
            return Err(EngineError::UnknownProgram(dispatch.program));
        };
        let kernel = Arc::clone(kernel);
        let writable = writable.clone();
        let invocations = dispatch
            .workgroups
            .iter()
            .fold(*threads_per_workgroup as u64, |acc, &g| acc * g as u64);
        let invocations = u32::try_from(invocations).unwrap_or(u32::MAX);

        // Kernels read storage through the shader-storage access class
        let mut bindings = KernelBindings::default();
        for &(index, id) in dispatch.storage {
            let view = self.buffer(id)?.view(AccessClass::ShaderStorage).to_vec();
            bindings.insert(index, view);
        }

        let params = ParamReader::new(dispatch.uniforms, uniforms);
        kernel
            .run(invocations, &params, &mut bindings)
            .map_err(|error| EngineError::Kernel {
                entry_point: kernel.entry_point().to_string(),
                error,
            })?;

        for &(index, id) in dispatch.storage {
            if !writable.contains(&index) {
                continue;
            }
            if let Some(contents) = bindings.take(index) {
                self.buffer_mut(id)?.record_kernel_write(contents);
            }
        }

        self.stats.dispatches += 1;
        Ok(())
    }

    fn memory_barrier(&mut self, bits: BarrierBits) {
        for buffer in self.buffers.values_mut() {
            buffer.flush(bits);
        }
        self.stats.barriers += 1;
    }

    fn draw_instanced(&mut self, draw: &DrawCall<'_>) -> EngineResult<()> {
        let Some(SoftwareProgram::Graphics { instance_strides }) = self.programs.get(&draw.program) else {
            return Err(EngineError::UnknownProgram(draw.program));
        };

        for &(slot, id) in draw.vertex_streams {
            let buffer = self.buffer(id)?;
            if let Some(&(_, stride)) = instance_strides.iter().find(|(s, _)| *s == slot) {
                let needed = draw.instance_count as u64 * stride;
                if needed > buffer.data.len() as u64 {
                    warn!(
                        "[SoftwareDevice] Draw fetches {} instances past the end of '{}'",
                        (needed - buffer.data.len() as u64) / stride.max(1),
                        buffer.label
                    );
                }
            }
            if buffer.target == BufferTarget::Index {
                warn!("[SoftwareDevice] Index buffer '{}' bound as a vertex stream", buffer.label);
            }
        }

        if self.capture_draws {
            let mut vertex_streams = Vec::with_capacity(draw.vertex_streams.len());
            for &(slot, id) in draw.vertex_streams {
                vertex_streams.push((slot, self.buffer(id)?.view(AccessClass::VertexFetch).to_vec()));
            }
            let index_data = match draw.index_buffer {
                Some(id) => Some(self.buffer(id)?.view(AccessClass::IndexFetch).to_vec()),
                None => None,
            };
            let mut storage = Vec::with_capacity(draw.storage.len());
            for &(binding, id) in draw.storage {
                storage.push((binding, self.buffer(id)?.view(AccessClass::ShaderStorage).to_vec()));
            }
            self.captured.push(CapturedDraw {
                program: draw.program,
                element_count: draw.element_count,
                instance_count: draw.instance_count,
                vertex_streams,
                index_data,
                storage,
                uniforms: draw.uniforms.to_vec(),
            });
        }

        self.stats.draws += 1;
        self.stats.instances_drawn += draw.instance_count as u64;
        Ok(())
    }
}
