//! Complete per-frame scenes built from the pipelines

use super::classification::ClassificationPipeline;
use super::draw::{InstancedDrawPass, ViewParams};
use super::flocking::FlockingPipeline;
use super::geometry::MeshData;
use super::particles::ParticlePipeline;
use super::spawn;
use crate::compute::ResolvedDraws;
use crate::config::{EngineConfig, FlockingConfig, FlockingParams, ParticleConfig};
use crate::constants::{particles::SPRITE_HALF_EXTENT, shader_files};
use crate::error::EngineResult;
use crate::gpu::buffer_layouts::{bindings, BoidInstance, ClassifyInstance, InstanceCategory, Particle};
use crate::gpu::{GpuContext, GpuDevice};
use glam::Vec3;
use log::info;

/// Classify, read counters back, draw near instances as meshes and far ones
/// as billboards
pub struct BatchScene {
    classification: ClassificationPipeline,
    mesh_pass: InstancedDrawPass,
    billboard_pass: InstancedDrawPass,
    lod_distance: f32,
}

impl BatchScene {
    pub fn new<D: GpuDevice>(ctx: &mut GpuContext<D>, config: &EngineConfig) -> EngineResult<Self> {
        let settings = &config.classification;
        let watch = config.hot_reload.watch_debounce();
        let shaders = &config.shader_dir;

        let instances = spawn::batch_instances(settings.instance_count, settings.spawn_extent, settings.seed);
        let classification = ClassificationPipeline::new(
            ctx,
            shaders.join(shader_files::CLASSIFY_COMPUTE),
            &instances,
            settings.output_capacity(),
            watch,
        )?;
        let mesh_pass = InstancedDrawPass::new(
            ctx,
            "Batch Mesh",
            shaders.join(shader_files::BATCH_MESH_VERTEX),
            shaders.join(shader_files::LIT_FRAGMENT),
            ClassifyInstance::vertex_layout(),
            &MeshData::cube(0.5),
            watch,
        )?;
        let billboard_pass = InstancedDrawPass::new(
            ctx,
            "Batch Billboard",
            shaders.join(shader_files::BATCH_BILLBOARD_VERTEX),
            shaders.join(shader_files::LIT_FRAGMENT),
            ClassifyInstance::vertex_layout(),
            &MeshData::quad(0.5),
            watch,
        )?;

        info!("Batch scene ready with {} instances", instances.len());
        Ok(Self {
            classification,
            mesh_pass,
            billboard_pass,
            lod_distance: settings.lod_distance,
        })
    }

    pub fn render_frame<D: GpuDevice>(
        &mut self,
        ctx: &mut GpuContext<D>,
        view: &ViewParams,
    ) -> EngineResult<ResolvedDraws> {
        let draws = self
            .classification
            .classify(ctx, view.view_position, self.lod_distance)?;

        self.mesh_pass.draw(
            ctx,
            self.classification.stream(InstanceCategory::Near),
            draws.instance_count(InstanceCategory::Near),
            view,
        )?;
        self.billboard_pass.draw(
            ctx,
            self.classification.stream(InstanceCategory::Far),
            draws.instance_count(InstanceCategory::Far),
            view,
        )?;

        Ok(draws)
    }

    pub fn lod_distance(&self) -> f32 {
        self.lod_distance
    }

    pub fn set_lod_distance(&mut self, lod_distance: f32) {
        self.lod_distance = lod_distance;
    }

    pub fn classification(&self) -> &ClassificationPipeline {
        &self.classification
    }

    pub fn classification_mut(&mut self) -> &mut ClassificationPipeline {
        &mut self.classification
    }

    pub fn mesh_pass_mut(&mut self) -> &mut InstancedDrawPass {
        &mut self.mesh_pass
    }

    pub fn billboard_pass_mut(&mut self) -> &mut InstancedDrawPass {
        &mut self.billboard_pass
    }
}

/// Simulate the flock, then draw every boid from the same buffer
pub struct FlockScene {
    flocking: FlockingPipeline,
    pass: InstancedDrawPass,
    spawn: FlockingConfig,
    params: FlockingParams,
}

impl FlockScene {
    pub fn new<D: GpuDevice>(ctx: &mut GpuContext<D>, config: &EngineConfig) -> EngineResult<Self> {
        let watch = config.hot_reload.watch_debounce();
        let shaders = &config.shader_dir;

        let boids = Self::spawn_boids(&config.flocking);
        let flocking = FlockingPipeline::new(
            ctx,
            shaders.join(shader_files::BOIDS_COMPUTE),
            &boids,
            watch,
        )?;
        let pass = InstancedDrawPass::new(
            ctx,
            "Boids",
            shaders.join(shader_files::BOIDS_VERTEX),
            shaders.join(shader_files::LIT_FRAGMENT),
            BoidInstance::vertex_layout(),
            &MeshData::boid(),
            watch,
        )?;

        info!("Flock scene ready with {} boids", boids.len());
        Ok(Self {
            flocking,
            pass,
            spawn: config.flocking.clone(),
            params: config.flocking.params,
        })
    }

    fn spawn_boids(settings: &FlockingConfig) -> Vec<BoidInstance> {
        spawn::boids(settings.instance_count, settings.spawn_extent, settings.seed)
    }

    pub fn render_frame<D: GpuDevice>(
        &mut self,
        ctx: &mut GpuContext<D>,
        view: &ViewParams,
        dt: f32,
    ) -> EngineResult<()> {
        self.flocking.step(ctx, &self.params, dt)?;
        self.pass
            .draw(ctx, self.flocking.boids(), self.flocking.count(), view)
    }

    /// Restore default parameters and respawn the flock
    pub fn reset<D: GpuDevice>(&mut self, ctx: &mut GpuContext<D>) -> EngineResult<()> {
        self.params.reset();
        let boids = Self::spawn_boids(&self.spawn);
        self.flocking.upload_boids(ctx, &boids)?;
        info!("Flock reset");
        Ok(())
    }

    pub fn params(&self) -> &FlockingParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut FlockingParams {
        &mut self.params
    }

    pub fn flocking(&self) -> &FlockingPipeline {
        &self.flocking
    }

    pub fn flocking_mut(&mut self) -> &mut FlockingPipeline {
        &mut self.flocking
    }

    pub fn pass_mut(&mut self) -> &mut InstancedDrawPass {
        &mut self.pass
    }
}

/// Step the particle stream, then draw it straight from the same storage
pub struct ParticleScene {
    particles: ParticlePipeline,
    pass: InstancedDrawPass,
    spawn: ParticleConfig,
}

impl ParticleScene {
    pub fn new<D: GpuDevice>(ctx: &mut GpuContext<D>, config: &EngineConfig) -> EngineResult<Self> {
        let watch = config.hot_reload.watch_debounce();
        let shaders = &config.shader_dir;

        let particles = Self::spawn_particles(&config.particles);
        let pipeline = ParticlePipeline::new(
            ctx,
            shaders.join(shader_files::PARTICLES_COMPUTE),
            &particles,
            watch,
        )?;
        let pass = InstancedDrawPass::pulled(
            ctx,
            "Particles",
            shaders.join(shader_files::PARTICLES_VERTEX),
            shaders.join(shader_files::LIT_FRAGMENT),
            &MeshData::quad(SPRITE_HALF_EXTENT),
            watch,
        )?;

        info!("Particle scene ready with {} particles", particles.len());
        Ok(Self {
            particles: pipeline,
            pass,
            spawn: config.particles.clone(),
        })
    }

    fn spawn_particles(settings: &ParticleConfig) -> Vec<Particle> {
        spawn::particles(settings.particle_count, settings.spawn_extent, settings.seed)
    }

    /// Hold the attractor at `center_of_mass` with the configured mass
    pub fn attract(&mut self, center_of_mass: Vec3) {
        self.particles.set_center_of_mass(center_of_mass);
        self.particles.set_mass(self.spawn.attractor_mass);
    }

    /// Drop the attractor's mass; particles keep their velocity
    pub fn release(&mut self) {
        self.particles.set_mass(0.0);
    }

    pub fn is_attracting(&self) -> bool {
        self.particles.mass() != 0.0
    }

    pub fn render_frame<D: GpuDevice>(
        &mut self,
        ctx: &mut GpuContext<D>,
        view: &ViewParams,
        dt: f32,
    ) -> EngineResult<()> {
        self.particles.step(ctx, dt)?;
        self.pass.draw_pulled(
            ctx,
            bindings::particles::PARTICLES,
            self.particles.particles(),
            self.particles.count(),
            view,
        )
    }

    /// Respawn every particle at rest and release the attractor
    pub fn reset<D: GpuDevice>(&mut self, ctx: &mut GpuContext<D>) -> EngineResult<()> {
        self.release();
        let particles = Self::spawn_particles(&self.spawn);
        self.particles.upload_particles(ctx, &particles)?;
        info!("Particles reset");
        Ok(())
    }

    pub fn particles(&self) -> &ParticlePipeline {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut ParticlePipeline {
        &mut self.particles
    }

    pub fn pass_mut(&mut self) -> &mut InstancedDrawPass {
        &mut self.pass
    }
}
