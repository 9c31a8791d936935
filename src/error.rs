//! Engine-wide error handling
//!
//! Construction errors abort the creation of the object that raised them.
//! Link and reload failures are reported and the engine keeps running with
//! whatever program handle was last usable.

use crate::gpu::{BufferId, BufferTarget, ProgramId};
use crate::shader::ShaderStageKind;
use thiserror::Error;

/// Result alias used across the crate
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("shader program '{program}' declares the {stage:?} stage more than once")]
    DuplicateStage {
        program: String,
        stage: ShaderStageKind,
    },

    #[error("shader program '{program}' has no stages")]
    EmptyStageSet { program: String },

    #[error("failed to link shader program '{program}': {log}")]
    Link { program: String, log: String },

    #[error("failed to reload shader program '{program}', keeping previous handle: {log}")]
    Reload { program: String, log: String },

    #[error("shader program '{program}' has no linked handle")]
    ProgramUnusable { program: String },

    #[error("shader program '{program}' is not the active program")]
    ProgramNotActive { program: String },

    #[error("I/O error on {path}: {error}")]
    Io { path: String, error: String },

    #[error("buffer '{label}' holds {capacity} bytes, upload of {requested} bytes exceeds it")]
    BufferOverflow {
        label: String,
        capacity: u64,
        requested: u64,
    },

    #[error("storage buffer '{label}' must be bound with a binding index")]
    MissingBindingIndex { label: String },

    #[error("buffer '{label}' has target {actual:?}, expected {expected:?}")]
    TargetMismatch {
        label: String,
        actual: BufferTarget,
        expected: BufferTarget,
    },

    #[error("binding point {index} used by '{program}' has no buffer bound")]
    UnboundBinding { program: String, index: u32 },

    #[error("vertex slot {slot} used by '{program}' has no buffer bound")]
    UnboundVertexStream { program: String, slot: u32 },

    #[error("buffer {buffer:?} is bound to more than one binding point of '{program}'")]
    AliasedBinding { program: String, buffer: BufferId },

    #[error("unknown buffer handle {0:?}")]
    UnknownBuffer(BufferId),

    #[error("unknown program handle {0:?}")]
    UnknownProgram(ProgramId),

    #[error("readback of {len} bytes at offset {offset} exceeds buffer '{label}' ({capacity} bytes)")]
    ReadbackOutOfRange {
        label: String,
        offset: u64,
        len: u64,
        capacity: u64,
    },

    #[error("GPU operation '{operation}' failed: {error}")]
    GpuOperationFailed { operation: String, error: String },

    #[error("failed to map GPU buffer: {0}")]
    BufferMapping(String),

    #[error("kernel '{entry_point}' failed: {error}")]
    Kernel { entry_point: String, error: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no suitable GPU adapter found")]
    NoAdapter,
}

impl EngineError {
    /// Construction errors are the only class that aborts object creation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateStage { .. } | EngineError::EmptyStageSet { .. }
        )
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, error: impl std::fmt::Display) -> Self {
        EngineError::Io {
            path: path.as_ref().display().to_string(),
            error: error.to_string(),
        }
    }
}

/// Create a GPU operation error
pub fn gpu_operation_error(operation: &str, error: impl std::fmt::Display) -> EngineError {
    EngineError::GpuOperationFailed {
        operation: operation.to_string(),
        error: error.to_string(),
    }
}

/// Create a buffer mapping error
pub fn buffer_mapping_error(buffer: &str, error: impl std::fmt::Display) -> EngineError {
    EngineError::BufferMapping(format!("{}: {}", buffer, error))
}
