//! Rendering pipelines built on the compute and shader primitives
//!
//! - `classification`: distance-based scatter into near/far instance streams
//! - `flocking`: in-place boid simulation
//! - `particles`: attractor-driven particle stream drawn from storage
//! - `draw`: instanced draws fed by those streams
//! - `scenes`: the per-frame composition of the above

pub mod classification;
pub mod draw;
pub mod flocking;
pub mod geometry;
pub mod particles;
pub mod scenes;
pub mod spawn;

#[cfg(test)]
mod tests;

pub use classification::{ClassificationPipeline, ClassifyUniform, CLASSIFY_CONSUMERS};
pub use draw::{DrawUniform, InstancedDrawPass, ViewParams};
pub use flocking::{BoidUniform, FlockingPipeline, FLOCK_CONSUMERS};
pub use geometry::{GeometryBuffers, MeshData};
pub use particles::{ParticlePipeline, ParticleUniform, PARTICLE_CONSUMERS};
pub use scenes::{BatchScene, FlockScene, ParticleScene};
