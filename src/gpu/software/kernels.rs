//! Host implementations of the WGSL kernels in `src/shaders`
//!
//! Each kernel mirrors the WGSL entry point of the same name: the same
//! bindings, parameter names, bounds guard and update rules.

use crate::constants::flocking::SEPARATION_EPSILON;
use crate::constants::particles::SOFTENING;
use crate::constants::kernels::entry_points;
use crate::gpu::buffer_layouts::{bindings, BoidInstance, ClassifyInstance, InstanceCategory, Particle};
use crate::shader::{UniformKind, UniformSlot};
use bytemuck::Pod;
use glam::Vec3;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Storage contents handed to a kernel, keyed by binding point
#[derive(Debug, Default)]
pub struct KernelBindings {
    buffers: BTreeMap<u32, Vec<u8>>,
}

impl KernelBindings {
    pub fn insert(&mut self, binding: u32, bytes: Vec<u8>) {
        self.buffers.insert(binding, bytes);
    }

    pub fn take(&mut self, binding: u32) -> Option<Vec<u8>> {
        self.buffers.remove(&binding)
    }

    /// Decode the records at `binding`; a trailing partial record is ignored
    pub fn records<T: Pod>(&self, binding: u32) -> Result<Vec<T>, String> {
        let bytes = self
            .buffers
            .get(&binding)
            .ok_or_else(|| format!("storage binding {} is not bound", binding))?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Write records back to the start of `binding`
    pub fn store<T: Pod>(&mut self, binding: u32, records: &[T]) -> Result<(), String> {
        let bytes = self
            .buffers
            .get_mut(&binding)
            .ok_or_else(|| format!("storage binding {} is not bound", binding))?;
        let src: &[u8] = bytemuck::cast_slice(records);
        bytes[..src.len()].copy_from_slice(src);
        Ok(())
    }
}

/// Named access to a dispatch's parameter block
pub struct ParamReader<'a> {
    block: &'a [u8],
    slots: &'a [UniformSlot],
}

impl<'a> ParamReader<'a> {
    pub fn new(block: &'a [u8], slots: &'a [UniformSlot]) -> Self {
        Self { block, slots }
    }

    fn member(&self, name: &str, kind: UniformKind) -> Result<&'a [u8], String> {
        let slot = self
            .slots
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| format!("parameter '{}' is not declared", name))?;
        if slot.kind != kind {
            return Err(format!("parameter '{}' is {:?}, expected {:?}", name, slot.kind, kind));
        }
        let start = slot.offset as usize;
        self.block
            .get(start..start + kind.size())
            .ok_or_else(|| format!("parameter '{}' lies outside the block", name))
    }

    pub fn f32(&self, name: &str) -> Result<f32, String> {
        Ok(bytemuck::pod_read_unaligned(self.member(name, UniformKind::F32)?))
    }

    pub fn u32(&self, name: &str) -> Result<u32, String> {
        Ok(bytemuck::pod_read_unaligned(self.member(name, UniformKind::U32)?))
    }

    pub fn vec3(&self, name: &str) -> Result<Vec3, String> {
        let xyz: [f32; 3] = bytemuck::pod_read_unaligned(self.member(name, UniformKind::Vec3)?);
        Ok(Vec3::from_array(xyz))
    }
}

/// A compute entry point the software device can execute
pub trait SoftwareKernel: Send + Sync {
    fn entry_point(&self) -> &'static str;

    /// Run `invocations` threads; threads past the data are guarded out
    fn run(&self, invocations: u32, params: &ParamReader<'_>, bindings: &mut KernelBindings) -> Result<(), String>;
}

/// `classify_instances`: distance-based scatter into near/far streams
pub struct ClassifyKernel;

impl SoftwareKernel for ClassifyKernel {
    fn entry_point(&self) -> &'static str {
        entry_points::CLASSIFY_INSTANCES
    }

    fn run(&self, invocations: u32, params: &ParamReader<'_>, storage: &mut KernelBindings) -> Result<(), String> {
        use bindings::classify::*;

        let view_position = params.vec3("view_position")?;
        let lod_distance = params.f32("lod_distance")?;
        let instance_count = params.u32("instance_count")? as usize;

        let input: Vec<ClassifyInstance> = storage.records(INPUT_INSTANCES)?;
        let mut near: Vec<ClassifyInstance> = storage.records(NEAR_INSTANCES)?;
        let mut far: Vec<ClassifyInstance> = storage.records(FAR_INSTANCES)?;
        let mut counters: Vec<u32> = storage.records(CATEGORY_COUNTERS)?;
        if counters.len() < InstanceCategory::ALL.len() {
            return Err(format!("counter buffer holds {} counters", counters.len()));
        }

        let slots = [AtomicU32::new(counters[0]), AtomicU32::new(counters[1])];
        // Same guard as the WGSL kernel; the input may be padded past the last record
        let live = input.len().min(invocations as usize).min(instance_count);

        // Slot order follows thread scheduling, as with atomicAdd on hardware
        let placed: Vec<(InstanceCategory, u32, usize)> = input[..live]
            .par_iter()
            .enumerate()
            .map(|(index, instance)| {
                let category = InstanceCategory::classify(instance.position(), view_position, lod_distance);
                let slot = slots[category.counter_index()].fetch_add(1, Ordering::Relaxed);
                (category, slot, index)
            })
            .collect();

        for (category, slot, index) in placed {
            let stream = match category {
                InstanceCategory::Near => &mut near,
                InstanceCategory::Far => &mut far,
            };
            // Acquired slots past the stream capacity are dropped
            if let Some(record) = stream.get_mut(slot as usize) {
                *record = input[index];
            }
        }

        counters[0] = slots[0].load(Ordering::Relaxed);
        counters[1] = slots[1].load(Ordering::Relaxed);

        storage.store(NEAR_INSTANCES, &near)?;
        storage.store(FAR_INSTANCES, &far)?;
        storage.store(CATEGORY_COUNTERS, &counters)?;
        Ok(())
    }
}

/// Parameters of one flocking step
#[derive(Debug, Clone, Copy)]
pub struct FlockStep {
    pub max_speed: f32,
    pub max_force: f32,
    pub alignment: f32,
    pub cohesion: f32,
    pub separation: f32,
    pub perception_radius: f32,
    pub bounds_half_extent: f32,
    pub dt: f32,
}

impl FlockStep {
    fn from_params(params: &ParamReader<'_>) -> Result<Self, String> {
        Ok(Self {
            max_speed: params.f32("max_speed")?,
            max_force: params.f32("max_force")?,
            alignment: params.f32("alignment")?,
            cohesion: params.f32("cohesion")?,
            separation: params.f32("separation")?,
            perception_radius: params.f32("perception_radius")?,
            bounds_half_extent: params.f32("bounds_half_extent")?,
            dt: params.f32("dt")?,
        })
    }
}

fn limit(v: Vec3, max: f32) -> Vec3 {
    let length = v.length();
    if length > max && length > 0.0 {
        v * (max / length)
    } else {
        v
    }
}

fn steer_towards(direction: Vec3, velocity: Vec3, step: &FlockStep) -> Vec3 {
    limit(
        direction.normalize_or_zero() * step.max_speed - velocity,
        step.max_force,
    )
}

/// Update boid `index` in place, reading neighbours from the same slice
pub fn update_boid(boids: &mut [BoidInstance], index: usize, step: &FlockStep) {
    let me = boids[index];
    let position = me.position();
    let velocity = me.velocity();

    let mut heading = Vec3::ZERO;
    let mut centre = Vec3::ZERO;
    let mut avoidance = Vec3::ZERO;
    let mut neighbours = 0u32;

    for (other_index, other) in boids.iter().enumerate() {
        if other_index == index {
            continue;
        }
        let offset = other.position() - position;
        let distance = offset.length();
        if distance > 0.0 && distance < step.perception_radius {
            heading += other.velocity();
            centre += other.position();
            avoidance -= offset / (distance * distance).max(SEPARATION_EPSILON);
            neighbours += 1;
        }
    }

    let mut acceleration = Vec3::ZERO;
    if neighbours > 0 {
        let n = neighbours as f32;
        acceleration += steer_towards(heading / n, velocity, step) * step.alignment;
        acceleration += steer_towards(centre / n - position, velocity, step) * step.cohesion;
        acceleration += steer_towards(avoidance / n, velocity, step) * step.separation;
    }

    let mut velocity = limit(velocity + acceleration, step.max_speed);
    let mut position = position + velocity * step.dt;

    // Reflect off the bounds cube
    let h = step.bounds_half_extent;
    for axis in 0..3 {
        if position[axis] > h {
            position[axis] = h;
            velocity[axis] = -velocity[axis].abs();
        } else if position[axis] < -h {
            position[axis] = -h;
            velocity[axis] = velocity[axis].abs();
        }
    }

    let record = &mut boids[index];
    record.position = position.to_array();
    record.velocity = velocity.to_array();
    record.acceleration = acceleration.to_array();
}

/// `update_boids`: in-place flocking step
///
/// Invocations run in index order, so later boids see the already updated
/// state of earlier ones, matching the single-buffer kernel.
pub struct BoidKernel;

impl SoftwareKernel for BoidKernel {
    fn entry_point(&self) -> &'static str {
        entry_points::UPDATE_BOIDS
    }

    fn run(&self, invocations: u32, params: &ParamReader<'_>, storage: &mut KernelBindings) -> Result<(), String> {
        if params.u32("paused")? != 0 {
            return Ok(());
        }
        let step = FlockStep::from_params(params)?;

        let mut boids: Vec<BoidInstance> = storage.records(bindings::flocking::BOIDS)?;
        let live = boids.len().min(invocations as usize);
        for index in 0..live {
            update_boid(&mut boids[..live], index, &step);
        }

        storage.store(bindings::flocking::BOIDS, &boids)
    }
}

/// Attractor parameters of one particle update
#[derive(Debug, Clone, Copy)]
pub struct Attractor {
    pub center_of_mass: Vec3,
    pub mass: f32,
}

/// Pull one particle toward the attractor and integrate it over `dt`
pub fn update_particle(particle: &mut Particle, attractor: &Attractor, dt: f32) {
    let offset = attractor.center_of_mass - particle.position();
    let d2 = offset.length_squared() + SOFTENING;
    let acceleration = offset * (attractor.mass / (d2 * d2.sqrt()));

    let velocity = particle.velocity() + acceleration * dt;
    particle.position = (particle.position() + velocity * dt).to_array();
    particle.velocity = velocity.to_array();
}

/// `update_particles`: in-place attractor step
pub struct ParticleKernel;

impl SoftwareKernel for ParticleKernel {
    fn entry_point(&self) -> &'static str {
        entry_points::UPDATE_PARTICLES
    }

    fn run(&self, invocations: u32, params: &ParamReader<'_>, storage: &mut KernelBindings) -> Result<(), String> {
        let attractor = Attractor {
            center_of_mass: params.vec3("center_of_mass")?,
            mass: params.f32("mass")?,
        };
        let dt = params.f32("dt")?;
        let particle_count = params.u32("particle_count")? as usize;

        let mut particles: Vec<Particle> = storage.records(bindings::particles::PARTICLES)?;
        let live = particles.len().min(invocations as usize).min(particle_count);
        particles[..live]
            .par_iter_mut()
            .for_each(|particle| update_particle(particle, &attractor, dt));

        storage.store(bindings::particles::PARTICLES, &particles[..live])
    }
}
