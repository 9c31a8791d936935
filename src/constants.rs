// Instancing Engine Constants - SINGLE SOURCE OF TRUTH
//
// Host-side constants shared by pipelines, kernels and the reference device.
// Binding indices live in `gpu::buffer_layouts::bindings`, next to the record
// layouts they describe.

/// Compute kernel constants
pub mod kernels {
    /// Local workgroup size declared by every kernel in `src/shaders`
    pub const WORKGROUP_SIZE: u32 = 64;

    /// Entry point names, used to match WGSL entry points to reference kernels
    pub mod entry_points {
        pub const CLASSIFY_INSTANCES: &str = "classify_instances";
        pub const UPDATE_BOIDS: &str = "update_boids";
        pub const UPDATE_PARTICLES: &str = "update_particles";
    }
}

/// Shader source file names under the configured shader directory
pub mod shader_files {
    pub const CLASSIFY_COMPUTE: &str = "classify_instances.comp.wgsl";
    pub const BOIDS_COMPUTE: &str = "boids.comp.wgsl";
    pub const BATCH_MESH_VERTEX: &str = "batch_mesh.vert.wgsl";
    pub const BATCH_BILLBOARD_VERTEX: &str = "batch_billboard.vert.wgsl";
    pub const BOIDS_VERTEX: &str = "boids.vert.wgsl";
    pub const PARTICLES_COMPUTE: &str = "particles.comp.wgsl";
    pub const PARTICLES_VERTEX: &str = "particles.vert.wgsl";
    pub const LIT_FRAGMENT: &str = "lit.frag.wgsl";
}

/// Buffer sizing rules
pub mod buffers {
    /// Copy and write offsets/sizes must be multiples of this
    pub const COPY_ALIGNMENT: u64 = 4;

    /// Smallest allocation handed to a device
    pub const MIN_BUFFER_SIZE: u64 = 16;

    /// Uniform parameter blocks are padded to this
    pub const UNIFORM_ALIGNMENT: u64 = 16;
}

/// Classification defaults
pub mod classification {
    /// Number of output categories (near mesh, far billboard)
    pub const CATEGORY_COUNT: usize = 2;

    pub const DEFAULT_INSTANCE_COUNT: u32 = 10_000;
    pub const DEFAULT_LOD_DISTANCE: f32 = 15.0;
    pub const DEFAULT_SPAWN_EXTENT: f32 = 20.0;
}

/// Flocking defaults
pub mod flocking {
    pub const DEFAULT_INSTANCE_COUNT: u32 = 1000;
    pub const DEFAULT_SPAWN_EXTENT: f32 = 25.0;

    pub const DEFAULT_MAX_SPEED: f32 = 2.0;
    pub const DEFAULT_MAX_FORCE: f32 = 0.005;
    pub const DEFAULT_ALIGNMENT: f32 = 1.0;
    pub const DEFAULT_COHESION: f32 = 1.0;
    pub const DEFAULT_SEPARATION: f32 = 1.0;
    pub const DEFAULT_PERCEPTION_RADIUS: f32 = 5.0;
    pub const DEFAULT_BOUNDS_HALF_EXTENT: f32 = 25.0;

    /// Squared distances below this are clamped in the separation term
    pub const SEPARATION_EPSILON: f32 = 0.0001;
}

/// Particle stream defaults
pub mod particles {
    pub const DEFAULT_PARTICLE_COUNT: u32 = 100_000;

    /// Particles spawn at rest inside `[-extent, extent]^3`
    pub const DEFAULT_SPAWN_EXTENT: f32 = 5.0;

    /// Attractor mass while the attractor is held
    pub const DEFAULT_ATTRACTOR_MASS: f32 = 1.0;

    /// Added to squared distances so a particle at the attractor stays finite
    pub const SOFTENING: f32 = 0.01;

    /// Half size of the quad drawn per particle
    pub const SPRITE_HALF_EXTENT: f32 = 0.02;
}

/// Hot-reload defaults
pub mod hot_reload {
    pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
}
