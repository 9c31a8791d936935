//! Per-stage WGSL compilation
//!
//! A stage is parsed and validated with naga, then reflected. The parsed
//! module only lives until the program it belongs to is linked.

use super::error::{ShaderError, ShaderResult};
use super::reflect::{reflect_stage, StageReflection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Shader stage kind; a program holds at most one stage per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStageKind {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStageKind {
    pub fn naga_stage(self) -> naga::ShaderStage {
        match self {
            ShaderStageKind::Vertex => naga::ShaderStage::Vertex,
            ShaderStageKind::Fragment => naga::ShaderStage::Fragment,
            ShaderStageKind::Compute => naga::ShaderStage::Compute,
        }
    }
}

impl fmt::Display for ShaderStageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShaderStageKind::Vertex => "vertex",
            ShaderStageKind::Fragment => "fragment",
            ShaderStageKind::Compute => "compute",
        };
        f.write_str(name)
    }
}

/// Stage kind and the source file it is (re)built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSource {
    pub kind: ShaderStageKind,
    pub path: PathBuf,
}

impl StageSource {
    pub fn new(kind: ShaderStageKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn vertex(path: impl Into<PathBuf>) -> Self {
        Self::new(ShaderStageKind::Vertex, path)
    }

    pub fn fragment(path: impl Into<PathBuf>) -> Self {
        Self::new(ShaderStageKind::Fragment, path)
    }

    pub fn compute(path: impl Into<PathBuf>) -> Self {
        Self::new(ShaderStageKind::Compute, path)
    }
}

/// A validated, reflected stage awaiting link
#[derive(Debug)]
pub struct CompiledStage {
    pub kind: ShaderStageKind,
    pub label: String,
    pub source: String,
    pub entry_point: String,
    pub reflection: StageReflection,
    pub module: naga::Module,
}

/// Read a stage source from disk
pub fn read_stage_source(path: &Path) -> ShaderResult<String> {
    std::fs::read_to_string(path).map_err(|e| ShaderError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Parse, validate and reflect one stage
///
/// The error displays as a compile log suitable for the operator.
pub fn compile_stage(kind: ShaderStageKind, label: &str, source: &str) -> ShaderResult<CompiledStage> {
    let module = naga::front::wgsl::parse_str(source).map_err(|error| ShaderError::Parse {
        label: label.to_string(),
        kind,
        log: error.emit_to_string(source),
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator.validate(&module).map_err(|error| ShaderError::Validation {
        label: label.to_string(),
        kind,
        log: error.into_inner().to_string(),
    })?;

    let stage = kind.naga_stage();
    let mut entry_points = module.entry_points.iter().filter(|ep| ep.stage == stage);
    let entry = entry_points.next().ok_or_else(|| ShaderError::MissingEntryPoint {
        label: label.to_string(),
        kind,
    })?;
    if entry_points.next().is_some() {
        return Err(ShaderError::AmbiguousEntryPoint {
            label: label.to_string(),
            kind,
        });
    }

    let reflection = reflect_stage(&module, entry, kind, label)?;

    Ok(CompiledStage {
        kind,
        label: label.to_string(),
        source: source.to_string(),
        entry_point: entry.name.clone(),
        reflection,
        module,
    })
}

/// Read and compile a stage source file
pub fn load_stage(stage: &StageSource) -> ShaderResult<CompiledStage> {
    let source = read_stage_source(&stage.path)?;
    let label = stage
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| stage.path.display().to_string());
    compile_stage(stage.kind, &label, &source)
}
