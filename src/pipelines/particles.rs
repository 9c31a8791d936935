//! Particle stream pipeline
//!
//! One storage buffer holds every particle. The update kernel rewrites it in
//! place each frame and the particle vertex stage reads it back through the
//! same storage binding, so the barrier after the update covers shader
//! storage rather than vertex fetch.

use crate::compute::{dispatch, ComputeKernel, DispatchReport, DispatchRequest};
use crate::error::EngineResult;
use crate::gpu::buffer_layouts::{bindings, Particle};
use crate::gpu::{AccessClass, BarrierBits, BufferTarget, GpuBuffer, GpuContext, GpuDevice, UsageHint};
use crate::shader::{UniformSet, UniformValue};
use glam::Vec3;
use std::path::Path;
use std::time::Duration;

/// Members of the `ParticleParams` block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticleUniform {
    CenterOfMass,
    Mass,
    Dt,
    ParticleCount,
}

impl UniformSet for ParticleUniform {
    const ALL: &'static [Self] = &[Self::CenterOfMass, Self::Mass, Self::Dt, Self::ParticleCount];

    fn name(self) -> &'static str {
        match self {
            Self::CenterOfMass => "center_of_mass",
            Self::Mass => "mass",
            Self::Dt => "dt",
            Self::ParticleCount => "particle_count",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Next update and the particle vertex stage both read through storage
pub const PARTICLE_CONSUMERS: &[AccessClass] = &[AccessClass::ShaderStorage];

pub struct ParticlePipeline {
    kernel: ComputeKernel<ParticleUniform>,
    particles: GpuBuffer,
    count: u32,
    center_of_mass: Vec3,
    mass: f32,
}

impl ParticlePipeline {
    pub fn new<D: GpuDevice>(
        ctx: &mut GpuContext<D>,
        shader_path: impl AsRef<Path>,
        particles: &[Particle],
        watch: Option<Duration>,
    ) -> EngineResult<Self> {
        let kernel = ComputeKernel::load(ctx, "Update Particles", shader_path, watch)?;
        let buffer = GpuBuffer::with_data(
            ctx,
            "Particles",
            BufferTarget::Storage,
            particles,
            UsageHint::Static,
        )?;

        log::debug!("Particle pipeline: {} particles", particles.len());
        Ok(Self {
            kernel,
            particles: buffer,
            count: particles.len() as u32,
            center_of_mass: Vec3::ZERO,
            mass: 0.0,
        })
    }

    /// Attractor position used from the next step on
    pub fn set_center_of_mass(&mut self, center_of_mass: Vec3) {
        self.center_of_mass = center_of_mass;
    }

    /// Attractor mass; zero lets particles drift
    pub fn set_mass(&mut self, mass: f32) {
        self.mass = mass;
    }

    pub fn center_of_mass(&self) -> Vec3 {
        self.center_of_mass
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    /// Integrate every particle over `dt`
    pub fn step<D: GpuDevice>(&mut self, ctx: &mut GpuContext<D>, dt: f32) -> EngineResult<DispatchReport> {
        self.step_with_consumers(ctx, dt, PARTICLE_CONSUMERS)
    }

    /// Same as `step`, with an explicit consumer set for the closing barrier
    pub fn step_with_consumers<D: GpuDevice>(
        &mut self,
        ctx: &mut GpuContext<D>,
        dt: f32,
        consumers: &[AccessClass],
    ) -> EngineResult<DispatchReport> {
        let storage = [(bindings::particles::PARTICLES, &self.particles)];
        let uniforms: [(ParticleUniform, UniformValue); 4] = [
            (ParticleUniform::CenterOfMass, self.center_of_mass.into()),
            (ParticleUniform::Mass, self.mass.into()),
            (ParticleUniform::Dt, dt.into()),
            (ParticleUniform::ParticleCount, self.count.into()),
        ];
        dispatch(
            ctx,
            &mut self.kernel,
            &DispatchRequest {
                bindings: &storage,
                uniforms: &uniforms,
                invocations: self.count,
                consumers,
            },
        )
    }

    /// Overwrite the first `particles.len()` records
    pub fn upload_particles<D: GpuDevice>(
        &mut self,
        ctx: &mut GpuContext<D>,
        particles: &[Particle],
    ) -> EngineResult<()> {
        self.particles.upload_slice(ctx, particles)
    }

    /// Blocking copy of the whole stream, for diagnostics and tests
    pub fn read_back<D: GpuDevice>(&self, ctx: &mut GpuContext<D>) -> EngineResult<Vec<Particle>> {
        ctx.memory_barrier(BarrierBits::BUFFER_UPDATE);
        let mut particles: Vec<Particle> = self.particles.read_records(ctx)?;
        particles.truncate(self.count as usize);
        Ok(particles)
    }

    /// Mean distance of the particles from the attractor
    pub fn mean_distance<D: GpuDevice>(&self, ctx: &mut GpuContext<D>) -> EngineResult<f32> {
        let particles = self.read_back(ctx)?;
        if particles.is_empty() {
            return Ok(0.0);
        }
        let sum: f32 = particles
            .iter()
            .map(|p| p.position().distance(self.center_of_mass))
            .sum();
        Ok(sum / particles.len() as f32)
    }

    pub fn particles(&self) -> &GpuBuffer {
        &self.particles
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn kernel(&self) -> &ComputeKernel<ParticleUniform> {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut ComputeKernel<ParticleUniform> {
        &mut self.kernel
    }
}
