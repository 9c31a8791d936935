//! WGSL shader programs
//!
//! Stages are parsed and validated with naga, reflected for their storage
//! bindings, vertex inputs and parameter block, then linked by the active
//! device backend.

pub mod error;
pub mod program;
pub mod reflect;
pub mod stage;
pub mod uniforms;

#[cfg(test)]
mod tests;

pub use error::{ShaderError, ShaderResult};
pub use program::{ProgramDesc, ProgramState, ShaderProgram};
pub use reflect::{
    ParamBlockLayout, ProgramReflection, StageReflection, StorageBinding, UniformKind, UniformSlot,
};
pub use stage::{compile_stage, load_stage, CompiledStage, ShaderStageKind, StageSource};
pub use uniforms::{ParamBlock, UniformLocation, UniformSet, UniformTable, UniformValue};
