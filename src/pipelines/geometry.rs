//! Procedural meshes drawn per instance
//!
//! Faces wind counter-clockwise seen from outside, with flat normals.

use crate::error::EngineResult;
use crate::gpu::buffer_layouts::GeometryVertex;
use crate::gpu::{BufferTarget, GpuBuffer, GpuContext, GpuDevice, UsageHint};
use glam::Vec3;

/// Indexed triangle list
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<GeometryVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    fn push_quad(&mut self, corners: [Vec3; 4], normal: Vec3) {
        let base = self.vertices.len() as u32;
        for corner in corners {
            self.vertices.push(GeometryVertex::new(corner.to_array(), normal.to_array()));
        }
        self.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    fn push_triangle(&mut self, corners: [Vec3; 3]) {
        let normal = (corners[1] - corners[0])
            .cross(corners[2] - corners[0])
            .normalize_or_zero();
        let base = self.vertices.len() as u32;
        for corner in corners {
            self.vertices.push(GeometryVertex::new(corner.to_array(), normal.to_array()));
        }
        self.indices.extend_from_slice(&[base, base + 1, base + 2]);
    }

    /// Axis-aligned cube centred on the origin
    pub fn cube(half_extent: f32) -> Self {
        let mut mesh = Self {
            vertices: Vec::with_capacity(24),
            indices: Vec::with_capacity(36),
        };
        // (normal, u, v) with u x v = normal
        let faces = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::Y, Vec3::X),
        ];
        for (normal, u, v) in faces {
            let centre = normal * half_extent;
            let (u, v) = (u * half_extent, v * half_extent);
            mesh.push_quad(
                [centre - u - v, centre + u - v, centre + u + v, centre - u + v],
                normal,
            );
        }
        mesh
    }

    /// Unit quad in the XY plane facing +Z
    pub fn quad(half_extent: f32) -> Self {
        let mut mesh = Self {
            vertices: Vec::with_capacity(4),
            indices: Vec::with_capacity(6),
        };
        let h = half_extent;
        mesh.push_quad(
            [
                Vec3::new(-h, -h, 0.0),
                Vec3::new(h, -h, 0.0),
                Vec3::new(h, h, 0.0),
                Vec3::new(-h, h, 0.0),
            ],
            Vec3::Z,
        );
        mesh
    }

    /// Square pyramid pointing along +Z
    pub fn boid() -> Self {
        let mut mesh = Self {
            vertices: Vec::with_capacity(16),
            indices: Vec::with_capacity(18),
        };
        let tip = Vec3::new(0.0, 0.0, 1.0);
        let s = 0.3;
        let base = [
            Vec3::new(-s, -s, -0.5),
            Vec3::new(s, -s, -0.5),
            Vec3::new(s, s, -0.5),
            Vec3::new(-s, s, -0.5),
        ];
        for i in 0..4 {
            mesh.push_triangle([base[i], base[(i + 1) % 4], tip]);
        }
        mesh.push_quad([base[0], base[3], base[2], base[1]], Vec3::NEG_Z);
        mesh
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Device copies of a mesh
#[derive(Debug)]
pub struct GeometryBuffers {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    index_count: u32,
}

impl GeometryBuffers {
    pub fn upload<D: GpuDevice>(
        ctx: &mut GpuContext<D>,
        label: &str,
        mesh: &MeshData,
    ) -> EngineResult<Self> {
        let vertices = GpuBuffer::with_data(
            ctx,
            &format!("{} Vertices", label),
            BufferTarget::Vertex,
            &mesh.vertices,
            UsageHint::Static,
        )?;
        let indices = GpuBuffer::with_data(
            ctx,
            &format!("{} Indices", label),
            BufferTarget::Index,
            &mesh.indices,
            UsageHint::Static,
        )?;
        Ok(Self {
            vertices,
            indices,
            index_count: mesh.index_count(),
        })
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}
