//! Backend seam
//!
//! Everything above this trait talks in opaque handles. A device owns the
//! actual allocations and programs; the context in `gpu::context` owns the
//! bound state that decides which of them a dispatch or draw consumes.

use std::ops::BitOr;

use crate::error::EngineResult;
use crate::gpu::buffer_layouts::VertexStreamLayout;
use crate::shader::{ProgramReflection, ShaderStageKind};

/// Opaque device buffer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u64);

/// Opaque linked program handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub(crate) u64);

/// Binding target classification of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    /// Vertex attribute source
    Vertex,
    /// Index source
    Index,
    /// Read/write storage, also consumable as an instance-rate vertex stream
    Storage,
}

/// Upload frequency hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageHint {
    /// Written once or rarely; uploads may never exceed the initial capacity
    Static,
    /// Written every frame; oversized uploads reallocate behind the same handle
    Dynamic,
}

/// Memory barrier bit-set
///
/// Each bit makes prior kernel writes visible to one class of consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BarrierBits(u32);

impl BarrierBits {
    pub const NONE: Self = Self(0);
    pub const VERTEX_ATTRIB_ARRAY: Self = Self(1 << 0);
    pub const ELEMENT_ARRAY: Self = Self(1 << 1);
    pub const UNIFORM: Self = Self(1 << 2);
    pub const COMMAND: Self = Self(1 << 3);
    pub const BUFFER_UPDATE: Self = Self(1 << 4);
    pub const SHADER_STORAGE: Self = Self(1 << 5);

    pub const ALL: Self = Self::VERTEX_ATTRIB_ARRAY
        .union(Self::ELEMENT_ARRAY)
        .union(Self::UNIFORM)
        .union(Self::COMMAND)
        .union(Self::BUFFER_UPDATE)
        .union(Self::SHADER_STORAGE);

    /// Kernel writes consumed by a later kernel and by instance-rate vertex fetch
    pub const STORAGE_TO_VERTEX: Self = Self::SHADER_STORAGE.union(Self::VERTEX_ATTRIB_ARRAY);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Smallest bit-set covering every listed consumer
    pub fn covering(consumers: &[AccessClass]) -> Self {
        consumers
            .iter()
            .fold(Self::NONE, |bits, class| bits.union(class.barrier_bit()))
    }
}

impl BitOr for BarrierBits {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// How a consumer reads a buffer after a kernel wrote it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessClass {
    VertexFetch,
    IndexFetch,
    Uniform,
    IndirectCommand,
    /// Host readback and buffer-to-buffer copies
    BufferUpdate,
    ShaderStorage,
}

impl AccessClass {
    pub const ALL: [AccessClass; 6] = [
        AccessClass::VertexFetch,
        AccessClass::IndexFetch,
        AccessClass::Uniform,
        AccessClass::IndirectCommand,
        AccessClass::BufferUpdate,
        AccessClass::ShaderStorage,
    ];

    pub const fn barrier_bit(self) -> BarrierBits {
        match self {
            AccessClass::VertexFetch => BarrierBits::VERTEX_ATTRIB_ARRAY,
            AccessClass::IndexFetch => BarrierBits::ELEMENT_ARRAY,
            AccessClass::Uniform => BarrierBits::UNIFORM,
            AccessClass::IndirectCommand => BarrierBits::COMMAND,
            AccessClass::BufferUpdate => BarrierBits::BUFFER_UPDATE,
            AccessClass::ShaderStorage => BarrierBits::SHADER_STORAGE,
        }
    }
}

/// Buffer creation parameters handed to a device
#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub target: BufferTarget,
    pub size: u64,
    pub usage: UsageHint,
    pub contents: Option<&'a [u8]>,
}

/// One compiled stage as handed to the backend linker
#[derive(Debug, Clone)]
pub struct StageModule {
    pub kind: ShaderStageKind,
    pub label: String,
    pub source: String,
    pub entry_point: String,
}

/// Everything a backend needs to produce an executable program
#[derive(Debug)]
pub struct LinkRequest<'a> {
    pub label: &'a str,
    pub stages: &'a [StageModule],
    pub reflection: &'a ProgramReflection,
    pub vertex_streams: &'a [VertexStreamLayout],
}

/// A resolved compute dispatch
#[derive(Debug)]
pub struct ComputeDispatch<'a> {
    pub program: ProgramId,
    /// (binding index, buffer) for every storage binding the kernel declares
    pub storage: &'a [(u32, BufferId)],
    /// Parameter block contents
    pub uniforms: &'a [u8],
    pub workgroups: [u32; 3],
}

/// A resolved instanced draw
#[derive(Debug)]
pub struct DrawCall<'a> {
    pub program: ProgramId,
    /// (vertex slot, buffer)
    pub vertex_streams: &'a [(u32, BufferId)],
    pub index_buffer: Option<BufferId>,
    pub storage: &'a [(u32, BufferId)],
    pub uniforms: &'a [u8],
    /// Index count when indexed, vertex count otherwise
    pub element_count: u32,
    pub instance_count: u32,
}

/// Device backend
///
/// Implementations are driven from a single host thread. `dispatch` and
/// `draw_instanced` are fire-and-forget; `read_buffer` is the only call that
/// blocks on device work.
pub trait GpuDevice {
    fn backend_name(&self) -> &'static str;

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> EngineResult<BufferId>;

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> EngineResult<()>;

    /// Replace the allocation behind `buffer`; the handle stays valid
    fn reallocate_buffer(&mut self, buffer: BufferId, size: u64, contents: &[u8]) -> EngineResult<()>;

    /// Synchronous device-to-host copy
    fn read_buffer(&mut self, buffer: BufferId, offset: u64, len: u64) -> EngineResult<Vec<u8>>;

    fn destroy_buffer(&mut self, buffer: BufferId);

    /// Link a program; failure returns the link log
    fn link_program(&mut self, request: &LinkRequest<'_>) -> Result<ProgramId, String>;

    fn destroy_program(&mut self, program: ProgramId);

    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) -> EngineResult<()>;

    fn memory_barrier(&mut self, bits: BarrierBits);

    fn draw_instanced(&mut self, draw: &DrawCall<'_>) -> EngineResult<()>;

    /// Called once at the start of every frame
    fn begin_frame(&mut self) {}
}
