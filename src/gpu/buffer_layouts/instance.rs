//! Instance stream layout definitions
//!
//! Defines the per-instance records written by the compute kernels and
//! fetched at instance rate by the draw programs, plus the procedural
//! geometry vertex they are drawn with.

use super::{bindings, locations};
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Per-instance record of the batch classification pipeline
/// Total size: 32 bytes, 4-byte aligned
///
/// Memory layout:
/// - Offset 0-11: Position (3 floats)
/// - Offset 12-23: Color (3 floats)
/// - Offset 24-27: Scale
/// - Offset 28-31: Random scalar for shader variation
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ClassifyInstance {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub scale: f32,
    pub random: f32,
}

impl ClassifyInstance {
    pub fn new(position: Vec3, color: Vec3, scale: f32, random: f32) -> Self {
        Self {
            position: position.to_array(),
            color: color.to_array(),
            scale,
            random,
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    /// Instance-rate vertex stream layout
    pub fn vertex_layout() -> VertexStreamLayout {
        const ATTRIBUTES: &[VertexAttributeDesc] = &[
            VertexAttributeDesc {
                offset: 0,
                location: locations::INSTANCE_POSITION,
                format: AttributeFormat::Float32x3,
            },
            VertexAttributeDesc {
                offset: 12,
                location: locations::INSTANCE_COLOR,
                format: AttributeFormat::Float32x3,
            },
            // scale, random
            VertexAttributeDesc {
                offset: 24,
                location: locations::INSTANCE_PAYLOAD,
                format: AttributeFormat::Float32x2,
            },
        ];

        VertexStreamLayout {
            slot: bindings::vertex_slots::INSTANCES,
            stride: std::mem::size_of::<Self>() as u64,
            step_mode: StepMode::Instance,
            attributes: ATTRIBUTES,
        }
    }
}

/// Per-instance record of the flocking pipeline
/// Total size: 64 bytes, every vector padded to 16 bytes
///
/// The padding matches WGSL `vec3<f32>` alignment inside storage arrays.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BoidInstance {
    pub position: [f32; 3],
    pub _pad0: f32,
    pub color: [f32; 3],
    pub _pad1: f32,
    pub velocity: [f32; 3],
    pub _pad2: f32,
    pub acceleration: [f32; 3],
    pub _pad3: f32,
}

impl BoidInstance {
    pub fn new(position: Vec3, color: Vec3, velocity: Vec3) -> Self {
        Self {
            position: position.to_array(),
            color: color.to_array(),
            velocity: velocity.to_array(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    #[inline]
    pub fn velocity(&self) -> Vec3 {
        Vec3::from_array(self.velocity)
    }

    #[inline]
    pub fn acceleration(&self) -> Vec3 {
        Vec3::from_array(self.acceleration)
    }

    /// Instance-rate vertex stream layout
    pub fn vertex_layout() -> VertexStreamLayout {
        const ATTRIBUTES: &[VertexAttributeDesc] = &[
            VertexAttributeDesc {
                offset: 0,
                location: locations::INSTANCE_POSITION,
                format: AttributeFormat::Float32x3,
            },
            VertexAttributeDesc {
                offset: 16,
                location: locations::INSTANCE_COLOR,
                format: AttributeFormat::Float32x3,
            },
            // velocity, used to orient the boid
            VertexAttributeDesc {
                offset: 32,
                location: locations::INSTANCE_PAYLOAD,
                format: AttributeFormat::Float32x3,
            },
        ];

        VertexStreamLayout {
            slot: bindings::vertex_slots::INSTANCES,
            stride: std::mem::size_of::<Self>() as u64,
            step_mode: StepMode::Instance,
            attributes: ATTRIBUTES,
        }
    }
}

/// Per-particle record of the particle stream
/// Total size: 32 bytes, both vectors padded to 16 bytes
///
/// Only ever read through storage bindings, so it has no vertex layout.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: [f32; 3],
    pub _pad0: f32,
    pub velocity: [f32; 3],
    pub _pad1: f32,
}

impl Particle {
    /// A particle at rest
    pub fn at_rest(position: Vec3) -> Self {
        Self {
            position: position.to_array(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    #[inline]
    pub fn velocity(&self) -> Vec3 {
        Vec3::from_array(self.velocity)
    }
}

/// Procedural geometry vertex
/// Total size: 24 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GeometryVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl GeometryVertex {
    pub const fn new(position: [f32; 3], normal: [f32; 3]) -> Self {
        Self { position, normal }
    }

    pub fn vertex_layout() -> VertexStreamLayout {
        const ATTRIBUTES: &[VertexAttributeDesc] = &[
            VertexAttributeDesc {
                offset: 0,
                location: locations::GEOMETRY_POSITION,
                format: AttributeFormat::Float32x3,
            },
            VertexAttributeDesc {
                offset: 12,
                location: locations::GEOMETRY_NORMAL,
                format: AttributeFormat::Float32x3,
            },
        ];

        VertexStreamLayout {
            slot: bindings::vertex_slots::GEOMETRY,
            stride: std::mem::size_of::<Self>() as u64,
            step_mode: StepMode::Vertex,
            attributes: ATTRIBUTES,
        }
    }
}

/// Output category chosen by the classification kernel
///
/// The discriminant is the index into the counter buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum InstanceCategory {
    /// Closer than the LOD distance, drawn as a full mesh
    Near = 0,
    /// At or beyond the LOD distance, drawn as a billboard
    Far = 1,
}

impl InstanceCategory {
    pub const ALL: [InstanceCategory; 2] = [InstanceCategory::Near, InstanceCategory::Far];

    /// Strict `<`: an instance exactly at `lod_distance` is far
    #[inline]
    pub fn from_distance(distance: f32, lod_distance: f32) -> Self {
        if distance < lod_distance {
            InstanceCategory::Near
        } else {
            InstanceCategory::Far
        }
    }

    #[inline]
    pub fn classify(position: Vec3, view_position: Vec3, lod_distance: f32) -> Self {
        Self::from_distance(position.distance(view_position), lod_distance)
    }

    #[inline]
    pub const fn counter_index(self) -> usize {
        self as usize
    }

    /// Storage binding of the output stream for this category
    pub const fn output_binding(self) -> u32 {
        match self {
            InstanceCategory::Near => bindings::classify::NEAR_INSTANCES,
            InstanceCategory::Far => bindings::classify::FAR_INSTANCES,
        }
    }
}

/// Vertex attribute component layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
}

impl AttributeFormat {
    pub const fn size(self) -> u64 {
        match self {
            AttributeFormat::Float32 => 4,
            AttributeFormat::Float32x2 => 8,
            AttributeFormat::Float32x3 => 12,
            AttributeFormat::Float32x4 => 16,
        }
    }

    pub const fn components(self) -> u32 {
        (self.size() / 4) as u32
    }
}

/// How a vertex stream advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepMode {
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttributeDesc {
    pub offset: u64,
    pub location: u32,
    pub format: AttributeFormat,
}

/// One vertex buffer slot as declared by a draw program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexStreamLayout {
    pub slot: u32,
    pub stride: u64,
    pub step_mode: StepMode,
    pub attributes: &'static [VertexAttributeDesc],
}

impl VertexStreamLayout {
    pub fn provides_location(&self, location: u32) -> bool {
        self.attributes.iter().any(|a| a.location == location)
    }

    pub fn attribute(&self, location: u32) -> Option<&VertexAttributeDesc> {
        self.attributes.iter().find(|a| a.location == location)
    }
}
