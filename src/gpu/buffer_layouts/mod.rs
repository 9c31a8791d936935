//! Centralized GPU buffer layout definitions
//!
//! This module provides a single source of truth for the record layouts,
//! binding indices, vertex locations and sizes shared by host code and the
//! WGSL sources in `src/shaders`. Every index declared in a shader has its
//! counterpart here; `tests.rs` parses the shaders and checks both sides.

pub mod compute;
pub mod instance;


// Re-export commonly used items
pub use compute::{CategoryCounters, ComputeBufferLayout, ComputeDispatchParams};
pub use instance::{
    AttributeFormat, BoidInstance, ClassifyInstance, GeometryVertex, InstanceCategory, Particle,
    StepMode, VertexAttributeDesc, VertexStreamLayout,
};

/// Buffer binding indices for consistency across shaders
pub mod bindings {
    /// Batch classification kernel storage bindings
    pub mod classify {
        pub const INPUT_INSTANCES: u32 = 2;
        pub const FAR_INSTANCES: u32 = 3; // billboard stream
        pub const NEAR_INSTANCES: u32 = 4; // full mesh stream
        pub const CATEGORY_COUNTERS: u32 = 5;
    }

    /// Flocking kernel storage bindings
    pub mod flocking {
        pub const BOIDS: u32 = 2;
    }

    /// Particle stream, written by the update kernel and read by the
    /// particle vertex stage
    pub mod particles {
        pub const PARTICLES: u32 = 2;
    }

    /// Vertex buffer slots used by instanced draws
    pub mod vertex_slots {
        pub const GEOMETRY: u32 = 0;
        pub const INSTANCES: u32 = 1;
    }

    /// Parameter block binding inside `groups::PARAMS`
    pub const PARAMS_BLOCK: u32 = 0;
}

/// Buffer group indices for bind group organization
pub mod groups {
    pub const STORAGE: u32 = 0;
    pub const PARAMS: u32 = 1;
}

/// Vertex shader input locations
pub mod locations {
    pub const GEOMETRY_POSITION: u32 = 0;
    pub const GEOMETRY_NORMAL: u32 = 1;
    pub const INSTANCE_POSITION: u32 = 2;
    pub const INSTANCE_COLOR: u32 = 3;
    /// scale + random for batches, velocity for boids
    pub const INSTANCE_PAYLOAD: u32 = 4;
}

/// Helper functions for buffer calculations
pub mod calculations {
    use super::compute::ComputeBufferLayout;

    /// Calculate total size of an instance stream
    #[inline]
    pub fn instance_buffer_size<T>(capacity: u32) -> u64 {
        capacity as u64 * std::mem::size_of::<T>() as u64
    }

    /// Calculate offset for an instance in a stream
    #[inline]
    pub fn instance_offset<T>(index: u32) -> u64 {
        index as u64 * std::mem::size_of::<T>() as u64
    }

    /// Size of the counter buffer; also the exact readback size
    #[inline]
    pub fn counter_buffer_size() -> u64 {
        ComputeBufferLayout::COUNTERS_SIZE
    }

    /// Number of records of type `T` a buffer of `byte_len` bytes holds
    #[inline]
    pub fn record_capacity<T>(byte_len: u64) -> u32 {
        (byte_len / std::mem::size_of::<T>() as u64) as u32
    }

    /// Align size to GPU requirements
    #[inline]
    pub fn align_buffer_size(size: u64, alignment: u64) -> u64 {
        (size + alignment - 1) & !(alignment - 1)
    }
}

/// Buffer usage patterns for the wgpu backend
#[cfg(feature = "native")]
pub mod usage {
    use wgpu::BufferUsages;

    /// Storage buffers are also drawn from as instance-rate vertex streams,
    /// read by vertex stages and read back after classification
    pub const STORAGE: BufferUsages = BufferUsages::STORAGE
        .union(BufferUsages::VERTEX)
        .union(BufferUsages::COPY_DST)
        .union(BufferUsages::COPY_SRC);

    /// Vertex buffer usage
    pub const VERTEX: BufferUsages = BufferUsages::VERTEX
        .union(BufferUsages::COPY_DST)
        .union(BufferUsages::COPY_SRC);

    /// Index buffer usage
    pub const INDEX: BufferUsages = BufferUsages::INDEX
        .union(BufferUsages::COPY_DST)
        .union(BufferUsages::COPY_SRC);

    /// Uniform buffer usage
    pub const UNIFORM: BufferUsages = BufferUsages::UNIFORM.union(BufferUsages::COPY_DST);

    /// Host-visible staging for readback
    pub const STAGING: BufferUsages = BufferUsages::MAP_READ.union(BufferUsages::COPY_DST);
}

/// Bind group layout entries for the wgpu backend
#[cfg(feature = "native")]
pub mod layouts {
    use wgpu::{BindGroupLayoutEntry, BindingType, BufferBindingType, ShaderStages};

    /// Create a storage buffer binding entry
    pub fn storage_buffer_entry(
        binding: u32,
        read_only: bool,
        visibility: ShaderStages,
    ) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    /// Create a uniform buffer binding entry
    pub fn uniform_buffer_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }
}
