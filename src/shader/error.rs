//! Shader subsystem error handling
//!
//! Compile and link failures carry the log shown to the operator. Programs
//! turn them into `EngineError::Link` or `EngineError::Reload`.

use super::stage::ShaderStageKind;
use thiserror::Error;

/// Type alias for shader compile and link results
pub type ShaderResult<T> = Result<T, ShaderError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShaderError {
    #[error("{path}: {message}")]
    Read { path: String, message: String },

    #[error("{label} ({kind}): {log}")]
    Parse {
        label: String,
        kind: ShaderStageKind,
        log: String,
    },

    #[error("{label} ({kind}): {log}")]
    Validation {
        label: String,
        kind: ShaderStageKind,
        log: String,
    },

    #[error("{label}: no {kind} entry point")]
    MissingEntryPoint { label: String, kind: ShaderStageKind },

    #[error("{label}: more than one {kind} entry point")]
    AmbiguousEntryPoint { label: String, kind: ShaderStageKind },

    /// A resource declaration the reflection cannot map
    #[error("{label}: {message}")]
    Resource { label: String, message: String },

    /// Cross-stage mismatch found while linking
    #[error("{0}")]
    Link(String),

    /// Log returned by the device backend
    #[error("{0}")]
    Backend(String),
}

impl ShaderError {
    /// Stage label the error points at, if any
    pub fn label(&self) -> Option<&str> {
        match self {
            ShaderError::Parse { label, .. }
            | ShaderError::Validation { label, .. }
            | ShaderError::MissingEntryPoint { label, .. }
            | ShaderError::AmbiguousEntryPoint { label, .. }
            | ShaderError::Resource { label, .. } => Some(label),
            ShaderError::Read { .. } | ShaderError::Link(_) | ShaderError::Backend(_) => None,
        }
    }
}
