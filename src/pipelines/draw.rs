//! Instanced draw stage
//!
//! Procedural geometry is fetched per vertex from slot 0. Instance records
//! come either per instance from slot 1 or, for passes built with
//! `pulled`, from a storage binding the vertex stage indexes by instance.
//! Either way the records are usually written by a compute kernel, so the
//! caller must have issued a barrier covering vertex fetch or shader storage
//! before drawing.

use super::geometry::{GeometryBuffers, MeshData};
use crate::error::EngineResult;
use crate::gpu::buffer_layouts::{bindings::vertex_slots, GeometryVertex, VertexStreamLayout};
use crate::gpu::{GpuBuffer, GpuContext, GpuDevice};
use crate::shader::{ProgramDesc, ShaderProgram, StageSource, UniformSet, UniformTable};
use glam::{Mat4, Vec3};
use std::path::Path;
use std::time::Duration;

/// Members of the `ViewParams` block shared by every vertex stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawUniform {
    ViewProjection,
    ViewPosition,
    Time,
}

impl UniformSet for DrawUniform {
    const ALL: &'static [Self] = &[Self::ViewProjection, Self::ViewPosition, Self::Time];

    fn name(self) -> &'static str {
        match self {
            Self::ViewProjection => "view_projection",
            Self::ViewPosition => "view_position",
            Self::Time => "time",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Per-frame view inputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewParams {
    pub view_projection: Mat4,
    pub view_position: Vec3,
    pub time: f32,
}

impl ViewParams {
    pub fn look_at(eye: Vec3, target: Vec3, aspect: f32, time: f32) -> Self {
        let projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 500.0);
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        Self {
            view_projection: projection * view,
            view_position: eye,
            time,
        }
    }

    /// Viewpoint circling the origin at `radius`, `height` above the ground
    pub fn orbit(angle: f32, radius: f32, height: f32, aspect: f32, time: f32) -> Self {
        let eye = Vec3::new(angle.cos() * radius, height, angle.sin() * radius);
        Self::look_at(eye, Vec3::ZERO, aspect, time)
    }
}

pub struct InstancedDrawPass {
    program: ShaderProgram,
    uniforms: UniformTable<DrawUniform>,
    geometry: GeometryBuffers,
}

impl InstancedDrawPass {
    pub fn new<D: GpuDevice>(
        ctx: &mut GpuContext<D>,
        label: &str,
        vertex_source: impl AsRef<Path>,
        fragment_source: impl AsRef<Path>,
        instance_layout: VertexStreamLayout,
        mesh: &MeshData,
        watch: Option<Duration>,
    ) -> EngineResult<Self> {
        let desc = ProgramDesc::new(label)
            .stage(StageSource::vertex(vertex_source.as_ref()))
            .stage(StageSource::fragment(fragment_source.as_ref()))
            .vertex_stream(GeometryVertex::vertex_layout())
            .vertex_stream(instance_layout)
            .watch(watch);
        Self::build(ctx, label, desc, mesh)
    }

    /// Pass whose vertex stage reads instance records from storage
    pub fn pulled<D: GpuDevice>(
        ctx: &mut GpuContext<D>,
        label: &str,
        vertex_source: impl AsRef<Path>,
        fragment_source: impl AsRef<Path>,
        mesh: &MeshData,
        watch: Option<Duration>,
    ) -> EngineResult<Self> {
        let desc = ProgramDesc::new(label)
            .stage(StageSource::vertex(vertex_source.as_ref()))
            .stage(StageSource::fragment(fragment_source.as_ref()))
            .vertex_stream(GeometryVertex::vertex_layout())
            .watch(watch);
        Self::build(ctx, label, desc, mesh)
    }

    fn build<D: GpuDevice>(
        ctx: &mut GpuContext<D>,
        label: &str,
        desc: ProgramDesc,
        mesh: &MeshData,
    ) -> EngineResult<Self> {
        let program = ShaderProgram::build_strict(ctx, desc)?;
        let uniforms = UniformTable::resolve(&program);
        let geometry = GeometryBuffers::upload(ctx, label, mesh)?;

        Ok(Self {
            program,
            uniforms,
            geometry,
        })
    }

    /// One indexed instanced draw of `instance_count` records from `instances`
    pub fn draw<D: GpuDevice>(
        &mut self,
        ctx: &mut GpuContext<D>,
        instances: &GpuBuffer,
        instance_count: u32,
        view: &ViewParams,
    ) -> EngineResult<()> {
        self.program.use_program(ctx)?;
        ctx.bind_vertex_stream(vertex_slots::INSTANCES, instances)?;
        self.draw_bound(ctx, instance_count, view)
    }

    /// One indexed instanced draw with `instances` bound at storage `binding`
    pub fn draw_pulled<D: GpuDevice>(
        &mut self,
        ctx: &mut GpuContext<D>,
        binding: u32,
        instances: &GpuBuffer,
        instance_count: u32,
        view: &ViewParams,
    ) -> EngineResult<()> {
        self.program.use_program(ctx)?;
        instances.bind(ctx, Some(binding))?;
        self.draw_bound(ctx, instance_count, view)
    }

    fn draw_bound<D: GpuDevice>(
        &mut self,
        ctx: &mut GpuContext<D>,
        instance_count: u32,
        view: &ViewParams,
    ) -> EngineResult<()> {
        ctx.bind_vertex_stream(vertex_slots::GEOMETRY, &self.geometry.vertices)?;
        self.geometry.indices.bind(ctx, None)?;

        self.uniforms
            .upload(&mut self.program, DrawUniform::ViewProjection, view.view_projection);
        self.uniforms
            .upload(&mut self.program, DrawUniform::ViewPosition, view.view_position);
        self.uniforms.upload(&mut self.program, DrawUniform::Time, view.time);

        ctx.draw_instanced(&self.program, self.geometry.index_count(), instance_count)
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut ShaderProgram {
        &mut self.program
    }

    pub fn geometry(&self) -> &GeometryBuffers {
        &self.geometry
    }
}
