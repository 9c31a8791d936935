//! Seeded instance generation

use crate::gpu::buffer_layouts::{BoidInstance, ClassifyInstance, Particle};
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_color(rng: &mut StdRng) -> Vec3 {
    Vec3::new(rng.gen(), rng.gen(), rng.gen())
}

/// Batch instances scattered over the ground plane in `[-extent, extent]`
pub fn batch_instances(count: u32, extent: f32, seed: u64) -> Vec<ClassifyInstance> {
    let mut rng = StdRng::seed_from_u64(seed);
    let extent = extent.abs();
    (0..count)
        .map(|_| {
            let position = Vec3::new(
                rng.gen_range(-extent..=extent),
                0.0,
                rng.gen_range(-extent..=extent),
            );
            let color = random_color(&mut rng);
            let scale = rng.gen_range(0.7..1.0);
            let random = rng.gen::<f32>();
            ClassifyInstance::new(position, color, scale, random)
        })
        .collect()
}

/// Boids inside the cube `[-extent, extent]^3` with velocities in `[-1, 1)^3`
pub fn boids(count: u32, extent: f32, seed: u64) -> Vec<BoidInstance> {
    let mut rng = StdRng::seed_from_u64(seed);
    let extent = extent.abs();
    (0..count)
        .map(|_| {
            let position = Vec3::new(
                rng.gen_range(-extent..=extent),
                rng.gen_range(-extent..=extent),
                rng.gen_range(-extent..=extent),
            );
            let color = random_color(&mut rng);
            let velocity = Vec3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            BoidInstance::new(position, color, velocity)
        })
        .collect()
}

/// Particles at rest inside the cube `[-extent, extent]^3`
pub fn particles(count: u32, extent: f32, seed: u64) -> Vec<Particle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let extent = extent.abs();
    (0..count)
        .map(|_| {
            Particle::at_rest(Vec3::new(
                rng.gen_range(-extent..=extent),
                rng.gen_range(-extent..=extent),
                rng.gen_range(-extent..=extent),
            ))
        })
        .collect()
}
