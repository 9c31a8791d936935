//! Resource reflection from naga modules
//!
//! Reflection is what makes binding indices, record strides and uniform
//! offsets observable on the host. Programs resolve uniform locations from it
//! and the backends build their bind group layouts from it.

use super::error::{ShaderError, ShaderResult};
use super::stage::{CompiledStage, ShaderStageKind};
use crate::gpu::buffer_layouts::{bindings, groups};
use naga::{AddressSpace, Binding, Handle, ScalarKind, StorageAccess, Type, TypeInner, VectorSize};

/// Host-uploadable uniform types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    F32,
    I32,
    U32,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformKind {
    /// Bytes written by an upload of this kind
    pub const fn size(self) -> usize {
        match self {
            UniformKind::F32 | UniformKind::I32 | UniformKind::U32 => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 => 12,
            UniformKind::Vec4 => 16,
            UniformKind::Mat4 => 64,
        }
    }

    fn from_type(inner: &TypeInner) -> Option<Self> {
        match *inner {
            TypeInner::Scalar(scalar) if scalar.width == 4 => match scalar.kind {
                ScalarKind::Float => Some(UniformKind::F32),
                ScalarKind::Sint => Some(UniformKind::I32),
                ScalarKind::Uint => Some(UniformKind::U32),
                _ => None,
            },
            TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float && scalar.width == 4 => {
                match size {
                    VectorSize::Bi => Some(UniformKind::Vec2),
                    VectorSize::Tri => Some(UniformKind::Vec3),
                    VectorSize::Quad => Some(UniformKind::Vec4),
                }
            }
            TypeInner::Matrix {
                columns: VectorSize::Quad,
                rows: VectorSize::Quad,
                scalar,
            } if scalar.width == 4 => Some(UniformKind::Mat4),
            _ => None,
        }
    }
}

/// One member of a program's parameter block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformSlot {
    pub name: String,
    pub kind: UniformKind,
    pub offset: u32,
}

/// Layout of the uniform parameter block at `groups::PARAMS`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamBlockLayout {
    pub type_name: String,
    pub size: u32,
    pub slots: Vec<UniformSlot>,
}

impl ParamBlockLayout {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn slot(&self, name: &str) -> Option<(usize, &UniformSlot)> {
        self.slots.iter().enumerate().find(|(_, s)| s.name == name)
    }
}

/// A storage buffer declared in `groups::STORAGE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageBinding {
    pub binding: u32,
    pub name: String,
    pub read_only: bool,
    /// Array stride, or the whole size for a non-array binding
    pub element_stride: u32,
    pub element_type: String,
    /// Struct member names and byte offsets of the element type
    pub element_members: Vec<(String, u32)>,
}

/// Resources one stage declares
#[derive(Debug, Clone, PartialEq)]
pub struct StageReflection {
    pub kind: ShaderStageKind,
    pub entry_point: String,
    pub workgroup_size: Option<[u32; 3]>,
    pub storage: Vec<StorageBinding>,
    pub params: Option<ParamBlockLayout>,
    /// Input locations of the entry point
    pub inputs: Vec<u32>,
    /// Output locations of the entry point
    pub outputs: Vec<u32>,
}

fn type_name(module: &naga::Module, ty: Handle<Type>) -> String {
    module.types[ty].name.clone().unwrap_or_default()
}

fn collect_locations(
    module: &naga::Module,
    ty: Handle<Type>,
    binding: Option<&Binding>,
    out: &mut Vec<u32>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => out.push(*location),
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { ref members, .. } = module.types[ty].inner {
                for member in members {
                    if let Some(Binding::Location { location, .. }) = member.binding {
                        out.push(location);
                    }
                }
            }
        }
    }
}

fn reflect_storage(
    module: &naga::Module,
    name: String,
    binding: u32,
    ty: Handle<Type>,
    access: StorageAccess,
) -> StorageBinding {
    let (element, element_stride) = match module.types[ty].inner {
        TypeInner::Array { base, stride, .. } => (base, stride),
        TypeInner::Struct { span, .. } => (ty, span),
        ref other => (ty, other.size(module.to_ctx())),
    };

    let element_members = match module.types[element].inner {
        TypeInner::Struct { ref members, .. } => members
            .iter()
            .map(|m| (m.name.clone().unwrap_or_default(), m.offset))
            .collect(),
        _ => Vec::new(),
    };

    StorageBinding {
        binding,
        name,
        read_only: !access.contains(StorageAccess::STORE),
        element_stride,
        element_type: type_name(module, element),
        element_members,
    }
}

fn reflect_params(
    module: &naga::Module,
    label: &str,
    name: &str,
    ty: Handle<Type>,
) -> ShaderResult<ParamBlockLayout> {
    let TypeInner::Struct { ref members, span } = module.types[ty].inner else {
        return Err(resource_error(label, format!("parameter block '{}' must be a struct", name)));
    };

    let mut slots = Vec::with_capacity(members.len());
    for member in members {
        let member_name = member.name.clone().unwrap_or_default();
        // Explicit padding members are not uniforms
        if member_name.starts_with('_') {
            continue;
        }
        let kind = UniformKind::from_type(&module.types[member.ty].inner)
            .ok_or_else(|| resource_error(label, format!("uniform '{}' has an unsupported type", member_name)))?;
        slots.push(UniformSlot {
            name: member_name,
            kind,
            offset: member.offset,
        });
    }

    Ok(ParamBlockLayout {
        type_name: type_name(module, ty),
        size: span,
        slots,
    })
}

fn resource_error(label: &str, message: String) -> ShaderError {
    ShaderError::Resource {
        label: label.to_string(),
        message,
    }
}

/// Reflect the resources of one entry point
pub fn reflect_stage(
    module: &naga::Module,
    entry: &naga::EntryPoint,
    kind: ShaderStageKind,
    label: &str,
) -> ShaderResult<StageReflection> {
    let mut storage = Vec::new();
    let mut params = None;

    for (_, global) in module.global_variables.iter() {
        let name = global.name.clone().unwrap_or_default();
        let Some(ref binding) = global.binding else {
            continue;
        };

        match global.space {
            AddressSpace::Storage { access } => {
                if binding.group != groups::STORAGE {
                    return Err(resource_error(
                        label,
                        format!(
                            "storage buffer '{}' is in group {}, expected {}",
                            name,
                            binding.group,
                            groups::STORAGE
                        ),
                    ));
                }
                storage.push(reflect_storage(module, name, binding.binding, global.ty, access));
            }
            AddressSpace::Uniform => {
                if binding.group != groups::PARAMS || binding.binding != bindings::PARAMS_BLOCK {
                    return Err(resource_error(
                        label,
                        format!(
                            "parameter block '{}' is at @group({}) @binding({}), expected @group({}) @binding({})",
                            name,
                            binding.group,
                            binding.binding,
                            groups::PARAMS,
                            bindings::PARAMS_BLOCK
                        ),
                    ));
                }
                params = Some(reflect_params(module, label, &name, global.ty)?);
            }
            _ => {
                return Err(resource_error(
                    label,
                    format!("resource '{}' has an unsupported address space", name),
                ));
            }
        }
    }
    storage.sort_by_key(|s| s.binding);

    let mut inputs = Vec::new();
    for argument in &entry.function.arguments {
        collect_locations(module, argument.ty, argument.binding.as_ref(), &mut inputs);
    }
    let mut outputs = Vec::new();
    if let Some(ref result) = entry.function.result {
        collect_locations(module, result.ty, result.binding.as_ref(), &mut outputs);
    }
    inputs.sort_unstable();
    outputs.sort_unstable();

    Ok(StageReflection {
        kind,
        entry_point: entry.name.clone(),
        workgroup_size: (kind == ShaderStageKind::Compute).then_some(entry.workgroup_size),
        storage,
        params,
        inputs,
        outputs,
    })
}

/// Merged resources of a linked program
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramReflection {
    pub storage: Vec<StorageBinding>,
    pub params: ParamBlockLayout,
    pub workgroup_size: Option<[u32; 3]>,
    /// Vertex attribute locations the vertex stage reads
    pub vertex_inputs: Vec<u32>,
    pub stages: Vec<ShaderStageKind>,
}

impl ProgramReflection {
    /// Cross-stage checks and merge; the error is a link log
    pub fn link(stages: &[CompiledStage]) -> ShaderResult<Self> {
        let has = |kind| stages.iter().any(|s| s.kind == kind);
        let compute = has(ShaderStageKind::Compute);

        if compute && stages.len() > 1 {
            return Err(ShaderError::Link(
                "compute stage cannot be linked with graphics stages".to_string(),
            ));
        }
        if has(ShaderStageKind::Fragment) && !has(ShaderStageKind::Vertex) {
            return Err(ShaderError::Link("fragment stage requires a vertex stage".to_string()));
        }

        let vertex = stages.iter().find(|s| s.kind == ShaderStageKind::Vertex);
        if let (Some(vertex), Some(fragment)) = (
            vertex,
            stages.iter().find(|s| s.kind == ShaderStageKind::Fragment),
        ) {
            for location in &fragment.reflection.inputs {
                if !vertex.reflection.outputs.contains(location) {
                    return Err(ShaderError::Link(format!(
                        "fragment input @location({}) is not written by the vertex stage",
                        location
                    )));
                }
            }
        }

        let mut params: Option<&ParamBlockLayout> = None;
        let mut storage: Vec<StorageBinding> = Vec::new();
        for stage in stages {
            if let Some(ref block) = stage.reflection.params {
                match params {
                    Some(existing) if existing != block => {
                        return Err(ShaderError::Link(format!(
                            "parameter block '{}' in the {} stage does not match '{}'",
                            block.type_name, stage.kind, existing.type_name
                        )));
                    }
                    _ => params = Some(block),
                }
            }

            for binding in &stage.reflection.storage {
                match storage.iter_mut().find(|s| s.binding == binding.binding) {
                    Some(existing) => {
                        if existing.element_stride != binding.element_stride {
                            return Err(ShaderError::Link(format!(
                                "storage binding {} has stride {} in one stage and {} in another",
                                binding.binding, existing.element_stride, binding.element_stride
                            )));
                        }
                        existing.read_only &= binding.read_only;
                    }
                    None => storage.push(binding.clone()),
                }
            }
        }
        storage.sort_by_key(|s| s.binding);

        Ok(Self {
            storage,
            params: params.cloned().unwrap_or_default(),
            workgroup_size: stages.iter().find_map(|s| s.reflection.workgroup_size),
            vertex_inputs: vertex.map(|v| v.reflection.inputs.clone()).unwrap_or_default(),
            stages: stages.iter().map(|s| s.kind).collect(),
        })
    }

    pub fn is_compute(&self) -> bool {
        self.stages.contains(&ShaderStageKind::Compute)
    }

    pub fn storage_binding(&self, binding: u32) -> Option<&StorageBinding> {
        self.storage.iter().find(|s| s.binding == binding)
    }

    /// Local workgroup width of a compute program
    pub fn workgroup_width(&self) -> u32 {
        self.workgroup_size.map(|w| w[0]).unwrap_or(1)
    }

    /// Threads per workgroup of a compute program
    pub fn threads_per_workgroup(&self) -> u32 {
        self.workgroup_size.map(|w| w.iter().product()).unwrap_or(1)
    }
}
