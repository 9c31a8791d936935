//! Flocking simulation pipeline
//!
//! The boid buffer is both the kernel's storage and the draw stage's instance
//! stream. It is updated in place; nothing is read back per frame.

use crate::compute::{dispatch, ComputeKernel, DispatchReport, DispatchRequest};
use crate::config::FlockingParams;
use crate::error::EngineResult;
use crate::gpu::buffer_layouts::{bindings, BoidInstance};
use crate::gpu::{AccessClass, BarrierBits, BufferTarget, GpuBuffer, GpuContext, GpuDevice, UsageHint};
use crate::shader::{UniformSet, UniformValue};
use glam::Vec3;
use std::path::Path;
use std::time::Duration;

/// Members of the `FlockParams` block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoidUniform {
    MaxSpeed,
    MaxForce,
    Alignment,
    Cohesion,
    Separation,
    PerceptionRadius,
    BoundsHalfExtent,
    Dt,
    Paused,
}

impl UniformSet for BoidUniform {
    const ALL: &'static [Self] = &[
        Self::MaxSpeed,
        Self::MaxForce,
        Self::Alignment,
        Self::Cohesion,
        Self::Separation,
        Self::PerceptionRadius,
        Self::BoundsHalfExtent,
        Self::Dt,
        Self::Paused,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::MaxSpeed => "max_speed",
            Self::MaxForce => "max_force",
            Self::Alignment => "alignment",
            Self::Cohesion => "cohesion",
            Self::Separation => "separation",
            Self::PerceptionRadius => "perception_radius",
            Self::BoundsHalfExtent => "bounds_half_extent",
            Self::Dt => "dt",
            Self::Paused => "paused",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Next step's kernel and the boid draw
pub const FLOCK_CONSUMERS: &[AccessClass] = &[AccessClass::ShaderStorage, AccessClass::VertexFetch];

pub struct FlockingPipeline {
    kernel: ComputeKernel<BoidUniform>,
    boids: GpuBuffer,
    count: u32,
}

impl FlockingPipeline {
    pub fn new<D: GpuDevice>(
        ctx: &mut GpuContext<D>,
        shader_path: impl AsRef<Path>,
        boids: &[BoidInstance],
        watch: Option<Duration>,
    ) -> EngineResult<Self> {
        let kernel = ComputeKernel::load(ctx, "Update Boids", shader_path, watch)?;
        let buffer = GpuBuffer::with_data(
            ctx,
            "Boid Instances",
            BufferTarget::Storage,
            boids,
            UsageHint::Static,
        )?;

        log::debug!("Flocking pipeline: {} boids", boids.len());
        Ok(Self {
            kernel,
            boids: buffer,
            count: boids.len() as u32,
        })
    }

    /// Advance every boid by `dt`; a paused flock is left untouched
    pub fn step<D: GpuDevice>(
        &mut self,
        ctx: &mut GpuContext<D>,
        params: &FlockingParams,
        dt: f32,
    ) -> EngineResult<DispatchReport> {
        let storage = [(bindings::flocking::BOIDS, &self.boids)];
        let uniforms: [(BoidUniform, UniformValue); 9] = [
            (BoidUniform::MaxSpeed, params.max_speed.into()),
            (BoidUniform::MaxForce, params.max_force.into()),
            (BoidUniform::Alignment, params.alignment.into()),
            (BoidUniform::Cohesion, params.cohesion.into()),
            (BoidUniform::Separation, params.separation.into()),
            (BoidUniform::PerceptionRadius, params.perception_radius.into()),
            (BoidUniform::BoundsHalfExtent, params.bounds_half_extent.into()),
            (BoidUniform::Dt, dt.into()),
            (BoidUniform::Paused, params.paused.into()),
        ];
        dispatch(
            ctx,
            &mut self.kernel,
            &DispatchRequest {
                bindings: &storage,
                uniforms: &uniforms,
                invocations: self.count,
                consumers: FLOCK_CONSUMERS,
            },
        )
    }

    /// Overwrite the first `boids.len()` records; later records keep their state
    pub fn upload_boids<D: GpuDevice>(
        &mut self,
        ctx: &mut GpuContext<D>,
        boids: &[BoidInstance],
    ) -> EngineResult<()> {
        self.boids.upload_slice(ctx, boids)
    }

    /// Blocking copy of the whole flock, for diagnostics and tests
    pub fn read_back<D: GpuDevice>(&self, ctx: &mut GpuContext<D>) -> EngineResult<Vec<BoidInstance>> {
        ctx.memory_barrier(BarrierBits::BUFFER_UPDATE);
        self.boids.read_records(ctx)
    }

    /// Mean boid position
    pub fn centroid<D: GpuDevice>(&self, ctx: &mut GpuContext<D>) -> EngineResult<Vec3> {
        let boids = self.read_back(ctx)?;
        if boids.is_empty() {
            return Ok(Vec3::ZERO);
        }
        let sum: Vec3 = boids.iter().map(BoidInstance::position).sum();
        Ok(sum / boids.len() as f32)
    }

    pub fn boids(&self) -> &GpuBuffer {
        &self.boids
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn kernel(&self) -> &ComputeKernel<BoidUniform> {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut ComputeKernel<BoidUniform> {
        &mut self.kernel
    }
}
