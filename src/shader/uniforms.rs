//! Uniform values, locations and per-program location tables

use super::program::ShaderProgram;
use super::reflect::{ParamBlockLayout, UniformKind};
use crate::constants::buffers::UNIFORM_ALIGNMENT;
use crate::gpu::buffer_layouts::calculations::align_buffer_size;
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::marker::PhantomData;

/// A value uploadable to a parameter block member
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    F32(f32),
    I32(i32),
    U32(u32),
    /// Stored as a `u32` member, 0 or 1
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    /// Member kind this value is stored as
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::F32(_) => UniformKind::F32,
            UniformValue::I32(_) => UniformKind::I32,
            UniformValue::U32(_) | UniformValue::Bool(_) => UniformKind::U32,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Mat4(_) => UniformKind::Mat4,
        }
    }

    fn write_to(&self, dst: &mut [u8]) {
        match *self {
            UniformValue::F32(v) => dst.copy_from_slice(bytemuck::bytes_of(&v)),
            UniformValue::I32(v) => dst.copy_from_slice(bytemuck::bytes_of(&v)),
            UniformValue::U32(v) => dst.copy_from_slice(bytemuck::bytes_of(&v)),
            UniformValue::Bool(v) => dst.copy_from_slice(bytemuck::bytes_of(&(v as u32))),
            UniformValue::Vec2(v) => dst.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec3(v) => dst.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec4(v) => dst.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Mat4(v) => dst.copy_from_slice(bytemuck::cast_slice(&v.to_cols_array())),
        }
    }

    fn read_from(kind: UniformKind, src: &[u8]) -> Self {
        let floats = |n: usize| -> Vec<f32> {
            src[..n * 4]
                .chunks_exact(4)
                .map(bytemuck::pod_read_unaligned::<f32>)
                .collect()
        };
        match kind {
            UniformKind::F32 => UniformValue::F32(bytemuck::pod_read_unaligned(&src[..4])),
            UniformKind::I32 => UniformValue::I32(bytemuck::pod_read_unaligned(&src[..4])),
            UniformKind::U32 => UniformValue::U32(bytemuck::pod_read_unaligned(&src[..4])),
            UniformKind::Vec2 => UniformValue::Vec2(Vec2::from_slice(&floats(2))),
            UniformKind::Vec3 => UniformValue::Vec3(Vec3::from_slice(&floats(3))),
            UniformKind::Vec4 => UniformValue::Vec4(Vec4::from_slice(&floats(4))),
            UniformKind::Mat4 => UniformValue::Mat4(Mat4::from_cols_slice(&floats(16))),
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::F32(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::I32(v)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        UniformValue::U32(v)
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Bool(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        UniformValue::Mat4(v)
    }
}

/// Cached uniform location
///
/// Bound to the program generation it was resolved against; a rebuild makes
/// every older location stale, and uploads through stale or invalid
/// locations do nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation {
    pub(crate) generation: u32,
    pub(crate) slot: u32,
}

impl UniformLocation {
    /// Sentinel for a name the program does not declare
    pub const INVALID: Self = Self {
        generation: 0,
        slot: u32::MAX,
    };

    pub fn is_valid(&self) -> bool {
        self.slot != u32::MAX
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Host copy of a program's parameter block
#[derive(Debug, Clone, Default)]
pub struct ParamBlock {
    layout: ParamBlockLayout,
    bytes: Vec<u8>,
}

impl ParamBlock {
    pub fn new(layout: ParamBlockLayout) -> Self {
        let size = if layout.is_empty() {
            0
        } else {
            align_buffer_size(layout.size as u64, UNIFORM_ALIGNMENT) as usize
        };
        Self {
            layout,
            bytes: vec![0; size],
        }
    }

    pub fn layout(&self) -> &ParamBlockLayout {
        &self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Write a value into `slot`; false on a kind mismatch
    pub fn write(&mut self, slot: usize, value: UniformValue) -> bool {
        let Some(member) = self.layout.slots.get(slot) else {
            return false;
        };
        if member.kind != value.kind() {
            return false;
        }
        let start = member.offset as usize;
        value.write_to(&mut self.bytes[start..start + member.kind.size()]);
        true
    }

    pub fn read(&self, slot: usize) -> Option<UniformValue> {
        let member = self.layout.slots.get(slot)?;
        let start = member.offset as usize;
        Some(UniformValue::read_from(
            member.kind,
            &self.bytes[start..start + member.kind.size()],
        ))
    }

    /// Copy every member that exists in both blocks with the same name and kind
    pub fn carry_over_from(&mut self, previous: &ParamBlock) -> usize {
        let mut carried = 0;
        for slot in 0..self.layout.slots.len() {
            let (name, kind) = {
                let member = &self.layout.slots[slot];
                (member.name.clone(), member.kind)
            };
            if let Some((old_slot, old)) = previous.layout.slot(&name) {
                if old.kind == kind {
                    if let Some(value) = previous.read(old_slot) {
                        self.write(slot, value);
                        carried += 1;
                    }
                }
            }
        }
        carried
    }
}

/// Semantic uniform keys of one program family
pub trait UniformSet: Copy + Eq + 'static {
    const ALL: &'static [Self];

    /// Member name in the WGSL parameter block
    fn name(self) -> &'static str;

    fn index(self) -> usize;
}

/// Load-time resolved uniform locations for one program
///
/// Names are looked up once per program generation; per-frame uploads go
/// through the cached locations.
#[derive(Debug, Clone)]
pub struct UniformTable<K: UniformSet> {
    generation: u32,
    locations: Vec<UniformLocation>,
    _keys: PhantomData<K>,
}

impl<K: UniformSet> Default for UniformTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: UniformSet> UniformTable<K> {
    pub fn new() -> Self {
        Self {
            generation: 0,
            locations: vec![UniformLocation::INVALID; K::ALL.len()],
            _keys: PhantomData,
        }
    }

    /// Build the table for `program`
    pub fn resolve(program: &ShaderProgram) -> Self {
        let mut table = Self::new();
        table.refresh(program);
        table
    }

    /// Re-resolve if the program has been rebuilt; true when it was
    pub fn refresh(&mut self, program: &ShaderProgram) -> bool {
        if self.generation == program.generation() {
            return false;
        }
        for key in K::ALL {
            self.locations[key.index()] = program.uniform_location(key.name());
        }
        self.generation = program.generation();
        true
    }

    pub fn location(&self, key: K) -> UniformLocation {
        self.locations[key.index()]
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Keys the current program generation does not declare
    pub fn missing(&self) -> impl Iterator<Item = K> + '_ {
        K::ALL
            .iter()
            .copied()
            .filter(|k| !self.locations[k.index()].is_valid())
    }

    /// Refresh against `program`, then upload through the cached location
    pub fn upload(&mut self, program: &mut ShaderProgram, key: K, value: impl Into<UniformValue>) {
        self.refresh(program);
        program.upload_uniform(self.location(key), value);
    }
}
