//! wgpu device backend
//!
//! Renders into an offscreen color + depth target. Every dispatch and draw
//! is recorded into its own command buffer and submitted immediately, so
//! wgpu's usage tracking orders storage writes before later reads; explicit
//! barriers are only logged here.

use super::buffer_layouts::{groups, layouts, usage, AttributeFormat, StepMode};
use super::device::{
    BarrierBits, BufferDescriptor, BufferId, BufferTarget, ComputeDispatch, DrawCall, GpuDevice,
    LinkRequest, ProgramId, StageModule,
};
use crate::error::{buffer_mapping_error, gpu_operation_error, EngineError, EngineResult};
use crate::shader::{ProgramReflection, ShaderStageKind};
use log::{debug, error, info, trace};
use std::collections::HashMap;
use wgpu::util::DeviceExt;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Storage bindings must hold at least one record of the largest layout
const MIN_STORAGE_ALLOCATION: u64 = 64;

struct WgpuBuffer {
    buffer: wgpu::Buffer,
    label: String,
    target: BufferTarget,
}

struct ProgramLayouts {
    storage: wgpu::BindGroupLayout,
    params: Option<wgpu::BindGroupLayout>,
}

enum WgpuProgram {
    Compute {
        pipeline: wgpu::ComputePipeline,
        layouts: ProgramLayouts,
    },
    Render {
        pipeline: wgpu::RenderPipeline,
        layouts: ProgramLayouts,
    },
}

struct RenderTarget {
    _color: wgpu::Texture,
    color_view: wgpu::TextureView,
    _depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    next_id: u64,
    buffers: HashMap<BufferId, WgpuBuffer>,
    programs: HashMap<ProgramId, WgpuProgram>,
    target: RenderTarget,
    clear_next_pass: bool,
}

impl WgpuDevice {
    /// Open the first adapter wgpu offers; `NoAdapter` when there is none
    pub fn new(width: u32, height: u32) -> EngineResult<Self> {
        pollster::block_on(Self::new_async(width, height))
    }

    pub async fn new_async(width: u32, height: u32) -> EngineResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(EngineError::NoAdapter)?;
        let adapter_info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Instancing Engine Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| gpu_operation_error("request_device", e))?;

        device.on_uncaptured_error(Box::new(|e: wgpu::Error| {
            error!("[WgpuDevice] Uncaptured error: {}", e);
        }));

        let target = Self::create_target(&device, width.max(1), height.max(1));
        info!(
            "[WgpuDevice] Using {} ({:?}), target {}x{}",
            adapter_info.name, adapter_info.backend, width, height
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
            next_id: 1,
            buffers: HashMap::new(),
            programs: HashMap::new(),
            target,
            clear_next_pass: true,
        })
    }

    fn create_target(device: &wgpu::Device, width: u32, height: u32) -> RenderTarget {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = |label, format| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        };
        let color = texture("Offscreen Color", COLOR_FORMAT);
        let depth = texture("Offscreen Depth", DEPTH_FORMAT);
        RenderTarget {
            color_view: color.create_view(&wgpu::TextureViewDescriptor::default()),
            _color: color,
            depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
            _depth: depth,
        }
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer(&self, id: BufferId) -> EngineResult<&WgpuBuffer> {
        self.buffers.get(&id).ok_or(EngineError::UnknownBuffer(id))
    }

    fn allocate(&self, label: &str, target: BufferTarget, size: u64, contents: &[u8]) -> wgpu::Buffer {
        let (usage, size) = match target {
            BufferTarget::Vertex => (usage::VERTEX, size),
            BufferTarget::Index => (usage::INDEX, size),
            BufferTarget::Storage => (usage::STORAGE, size.max(MIN_STORAGE_ALLOCATION)),
        };
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: true,
        });
        if !contents.is_empty() {
            buffer.slice(..).get_mapped_range_mut()[..contents.len()].copy_from_slice(contents);
        }
        buffer.unmap();
        buffer
    }

    fn bind_group_layouts(&self, label: &str, reflection: &ProgramReflection) -> ProgramLayouts {
        let visibility = if reflection.is_compute() {
            wgpu::ShaderStages::COMPUTE
        } else {
            wgpu::ShaderStages::VERTEX_FRAGMENT
        };

        let storage_entries: Vec<wgpu::BindGroupLayoutEntry> = reflection
            .storage
            .iter()
            .map(|s| layouts::storage_buffer_entry(s.binding, s.read_only, visibility))
            .collect();
        let storage = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{} Storage Layout", label)),
                entries: &storage_entries,
            });

        let params = (!reflection.params.is_empty()).then(|| {
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{} Params Layout", label)),
                    entries: &[layouts::uniform_buffer_entry(
                        crate::gpu::buffer_layouts::bindings::PARAMS_BLOCK,
                        visibility,
                    )],
                })
        });

        ProgramLayouts { storage, params }
    }

    fn shader_module(&self, stage: &StageModule) -> wgpu::ShaderModule {
        self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&stage.label),
            source: wgpu::ShaderSource::Wgsl(stage.source.as_str().into()),
        })
    }

    fn link_pipeline(&self, request: &LinkRequest<'_>) -> Result<WgpuProgram, String> {
        let layouts = self.bind_group_layouts(request.label, request.reflection);
        let mut group_layouts = vec![&layouts.storage];
        if let Some(ref params) = layouts.params {
            group_layouts.push(params);
        }
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(request.label),
                bind_group_layouts: &group_layouts,
                push_constant_ranges: &[],
            });

        let stage = |kind| request.stages.iter().find(|s| s.kind == kind);

        if let Some(compute) = stage(ShaderStageKind::Compute) {
            let module = self.shader_module(compute);
            let pipeline = self
                .device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(request.label),
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: &compute.entry_point,
                });
            return Ok(WgpuProgram::Compute { pipeline, layouts });
        }

        let vertex = stage(ShaderStageKind::Vertex)
            .ok_or_else(|| "render program has no vertex stage".to_string())?;
        let vertex_module = self.shader_module(vertex);
        let fragment = stage(ShaderStageKind::Fragment);
        let fragment_module = fragment.map(|f| self.shader_module(f));

        // Pipeline buffer index is the vertex slot
        let mut streams = request.vertex_streams.to_vec();
        streams.sort_by_key(|s| s.slot);
        for (index, stream) in streams.iter().enumerate() {
            if stream.slot != index as u32 {
                return Err(format!("vertex slots must be contiguous from 0, found slot {}", stream.slot));
            }
        }
        let attributes: Vec<Vec<wgpu::VertexAttribute>> = streams
            .iter()
            .map(|stream| {
                stream
                    .attributes
                    .iter()
                    .map(|a| wgpu::VertexAttribute {
                        format: vertex_format(a.format),
                        offset: a.offset,
                        shader_location: a.location,
                    })
                    .collect()
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = streams
            .iter()
            .zip(&attributes)
            .map(|(stream, attributes)| wgpu::VertexBufferLayout {
                array_stride: stream.stride,
                step_mode: match stream.step_mode {
                    StepMode::Vertex => wgpu::VertexStepMode::Vertex,
                    StepMode::Instance => wgpu::VertexStepMode::Instance,
                },
                attributes,
            })
            .collect();

        let color_targets = [Some(wgpu::ColorTargetState {
            format: COLOR_FORMAT,
            blend: Some(wgpu::BlendState::REPLACE),
            write_mask: wgpu::ColorWrites::ALL,
        })];

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(request.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: &vertex.entry_point,
                    buffers: &buffers,
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                fragment: match (fragment, fragment_module.as_ref()) {
                    (Some(fragment), Some(module)) => Some(wgpu::FragmentState {
                        module,
                        entry_point: &fragment.entry_point,
                        targets: &color_targets,
                    }),
                    _ => None,
                },
                multiview: None,
            });

        Ok(WgpuProgram::Render { pipeline, layouts })
    }

    fn bind_groups(
        &self,
        label: &str,
        layouts: &ProgramLayouts,
        storage: &[(u32, BufferId)],
        uniforms: &[u8],
    ) -> EngineResult<(wgpu::BindGroup, Option<(wgpu::BindGroup, wgpu::Buffer)>)> {
        let mut entries = Vec::with_capacity(storage.len());
        for &(binding, id) in storage {
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: self.buffer(id)?.buffer.as_entire_binding(),
            });
        }
        let storage_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Storage", label)),
            layout: &layouts.storage,
            entries: &entries,
        });

        let params = match layouts.params {
            Some(ref layout) => {
                let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("{} Params", label)),
                    contents: uniforms,
                    usage: usage::UNIFORM,
                });
                let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("{} Params", label)),
                    layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: crate::gpu::buffer_layouts::bindings::PARAMS_BLOCK,
                        resource: buffer.as_entire_binding(),
                    }],
                });
                Some((group, buffer))
            }
            None => None,
        };

        Ok((storage_group, params))
    }

    fn pop_error(&self, operation: &str) -> EngineResult<()> {
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(e) => Err(gpu_operation_error(operation, e)),
            None => Ok(()),
        }
    }
}

fn vertex_format(format: AttributeFormat) -> wgpu::VertexFormat {
    match format {
        AttributeFormat::Float32 => wgpu::VertexFormat::Float32,
        AttributeFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        AttributeFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        AttributeFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
    }
}

impl GpuDevice for WgpuDevice {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> EngineResult<BufferId> {
        let buffer = self.allocate(desc.label, desc.target, desc.size, desc.contents.unwrap_or(&[]));
        let id = BufferId(self.next_id());
        self.buffers.insert(
            id,
            WgpuBuffer {
                buffer,
                label: desc.label.to_string(),
                target: desc.target,
            },
        );
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> EngineResult<()> {
        let target = self.buffer(buffer)?;
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(gpu_operation_error(
                "write_buffer",
                format!(
                    "write of {} bytes at {} into '{}' is not 4-byte aligned",
                    data.len(),
                    offset,
                    target.label
                ),
            ));
        }
        if offset + data.len() as u64 > target.buffer.size() {
            return Err(EngineError::BufferOverflow {
                label: target.label.clone(),
                capacity: target.buffer.size(),
                requested: offset + data.len() as u64,
            });
        }
        self.queue.write_buffer(&target.buffer, offset, data);
        Ok(())
    }

    fn reallocate_buffer(&mut self, buffer: BufferId, size: u64, contents: &[u8]) -> EngineResult<()> {
        let (label, target) = {
            let existing = self.buffer(buffer)?;
            (existing.label.clone(), existing.target)
        };
        let replacement = self.allocate(&label, target, size, contents);
        if let Some(entry) = self.buffers.get_mut(&buffer) {
            let old = std::mem::replace(&mut entry.buffer, replacement);
            old.destroy();
        }
        debug!("[WgpuDevice] Reallocated '{}' to {} bytes", label, size);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferId, offset: u64, len: u64) -> EngineResult<Vec<u8>> {
        let source = self.buffer(buffer)?;
        let align = wgpu::COPY_BUFFER_ALIGNMENT;
        let start = offset - offset % align;
        let end = (offset + len).div_ceil(align) * align;
        if end > source.buffer.size() {
            return Err(EngineError::ReadbackOutOfRange {
                label: source.label.clone(),
                offset,
                len,
                capacity: source.buffer.size(),
            });
        }
        let copy_size = end - start;
        if copy_size == 0 {
            return Ok(Vec::new());
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size: copy_size,
            usage: usage::STAGING,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&source.buffer, start, &staging, 0, copy_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            if tx.send(result).is_err() {
                error!("[WgpuDevice] Failed to send map_async result - receiver dropped");
            }
        });
        self.device.poll(wgpu::Maintain::Wait);

        match pollster::block_on(rx) {
            Ok(result) => result.map_err(|e| buffer_mapping_error(&source.label, e))?,
            Err(_) => return Err(buffer_mapping_error(&source.label, "map_async sender dropped")),
        }

        let skip = (offset - start) as usize;
        let bytes = {
            let mapped = slice.get_mapped_range();
            mapped[skip..skip + len as usize].to_vec()
        };
        staging.unmap();
        trace!("[WgpuDevice] Read back {} bytes of '{}'", len, source.label);
        Ok(bytes)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(entry) = self.buffers.remove(&buffer) {
            entry.buffer.destroy();
        }
    }

    fn link_program(&mut self, request: &LinkRequest<'_>) -> Result<ProgramId, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let linked = self.link_pipeline(request);
        let validation = pollster::block_on(self.device.pop_error_scope());

        let program = linked?;
        if let Some(e) = validation {
            return Err(e.to_string());
        }

        let id = ProgramId(self.next_id());
        self.programs.insert(id, program);
        debug!("[WgpuDevice] Linked '{}' as {:?}", request.label, id);
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) -> EngineResult<()> {
        let Some(WgpuProgram::Compute { pipeline, layouts }) = self.programs.get(&dispatch.program) else {
            return Err(EngineError::UnknownProgram(dispatch.program));
        };

        let (storage_group, params) =
            self.bind_groups("Dispatch", layouts, dispatch.storage, dispatch.uniforms)?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Dispatch Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Dispatch Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(groups::STORAGE, &storage_group, &[]);
            if let Some((ref group, _)) = params {
                pass.set_bind_group(groups::PARAMS, group, &[]);
            }
            let [x, y, z] = dispatch.workgroups;
            pass.dispatch_workgroups(x, y, z);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.pop_error("dispatch")
    }

    fn memory_barrier(&mut self, bits: BarrierBits) {
        // Submissions are ordered by wgpu's resource tracking
        trace!("[WgpuDevice] Barrier {:#x}", bits.bits());
    }

    fn draw_instanced(&mut self, draw: &DrawCall<'_>) -> EngineResult<()> {
        let Some(WgpuProgram::Render { pipeline, layouts }) = self.programs.get(&draw.program) else {
            return Err(EngineError::UnknownProgram(draw.program));
        };

        let (storage_group, params) = self.bind_groups("Draw", layouts, draw.storage, draw.uniforms)?;

        let mut vertex_buffers = Vec::with_capacity(draw.vertex_streams.len());
        for &(slot, id) in draw.vertex_streams {
            vertex_buffers.push((slot, &self.buffer(id)?.buffer));
        }
        let index_buffer = match draw.index_buffer {
            Some(id) => Some(&self.buffer(id)?.buffer),
            None => None,
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let (color_load, depth_load) = if self.clear_next_pass {
            (
                wgpu::LoadOp::Clear(wgpu::Color {
                    r: 0.02,
                    g: 0.02,
                    b: 0.04,
                    a: 1.0,
                }),
                wgpu::LoadOp::Clear(1.0),
            )
        } else {
            (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Draw Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Instanced Draw Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(groups::STORAGE, &storage_group, &[]);
            if let Some((ref group, _)) = params {
                pass.set_bind_group(groups::PARAMS, group, &[]);
            }
            for &(slot, buffer) in &vertex_buffers {
                pass.set_vertex_buffer(slot, buffer.slice(..));
            }
            match index_buffer {
                Some(indices) => {
                    pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..draw.element_count, 0, 0..draw.instance_count);
                }
                None => pass.draw(0..draw.element_count, 0..draw.instance_count),
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.clear_next_pass = false;
        self.pop_error("draw_instanced")
    }

    fn begin_frame(&mut self) {
        self.clear_next_pass = true;
    }
}
