//! Shader program lifecycle
//!
//! A program is linked from one source file per stage kind. The file paths
//! are retained so the program can be rebuilt when a source changes; the
//! rebuild happens synchronously at the next activation, before any uniform
//! upload for that frame. A failed rebuild keeps the previous handle serving.

use super::error::{ShaderError, ShaderResult};
use super::reflect::ProgramReflection;
use super::stage::{load_stage, CompiledStage, ShaderStageKind, StageSource};
use super::uniforms::{ParamBlock, UniformLocation, UniformValue};
use crate::error::{EngineError, EngineResult};
use crate::gpu::buffer_layouts::VertexStreamLayout;
use crate::gpu::{GpuContext, GpuDevice, LinkRequest, ProgramId, RetireQueue, RetiredResource, StageModule};
use crate::hot_reload::SourceWatch;
use log::{debug, error, info, trace, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Generations are unique across all programs, so a location resolved
/// against one program never addresses another
static NEXT_GENERATION: AtomicU32 = AtomicU32::new(1);

fn next_generation() -> u32 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Program construction parameters
#[derive(Debug, Clone, Default)]
pub struct ProgramDesc {
    pub label: String,
    pub stages: Vec<StageSource>,
    /// Vertex buffer slots a draw program fetches from
    pub vertex_streams: Vec<VertexStreamLayout>,
    /// Debounce window for source watching, `None` disables it
    pub watch: Option<Duration>,
}

impl ProgramDesc {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn stage(mut self, stage: StageSource) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn vertex_stream(mut self, layout: VertexStreamLayout) -> Self {
        self.vertex_streams.push(layout);
        self
    }

    pub fn watch(mut self, debounce: Option<Duration>) -> Self {
        self.watch = debounce;
        self
    }
}

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    /// No handle has ever linked
    Unbuilt,
    Active,
    /// A rebuild is due at the next activation
    Stale,
}

struct Linked {
    handle: ProgramId,
    reflection: ProgramReflection,
}

/// Linked GPU program with retained sources
pub struct ShaderProgram {
    label: String,
    sources: BTreeMap<ShaderStageKind, PathBuf>,
    vertex_streams: Vec<VertexStreamLayout>,
    handle: Option<ProgramId>,
    reflection: ProgramReflection,
    params: ParamBlock,
    generation: u32,
    stale: bool,
    watch: Option<SourceWatch>,
    last_error: Option<String>,
    retire: RetireQueue,
}

impl std::fmt::Debug for ShaderProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("label", &self.label)
            .field("handle", &self.handle)
            .field("generation", &self.generation)
            .field("stale", &self.stale)
            .finish()
    }
}

impl ShaderProgram {
    /// Compile and link every stage
    ///
    /// Duplicate stage kinds and an empty stage set abort construction. A
    /// link failure is reported and yields a program without a handle, which
    /// a later successful rebuild can bring to life.
    pub fn build<D: GpuDevice>(ctx: &mut GpuContext<D>, desc: ProgramDesc) -> EngineResult<Self> {
        if desc.stages.is_empty() {
            return Err(EngineError::EmptyStageSet { program: desc.label });
        }

        let mut sources = BTreeMap::new();
        for stage in desc.stages {
            if sources.insert(stage.kind, stage.path).is_some() {
                return Err(EngineError::DuplicateStage {
                    program: desc.label,
                    stage: stage.kind,
                });
            }
        }

        let watch = desc
            .watch
            .map(|debounce| SourceWatch::new(sources.values(), debounce));

        let mut program = Self {
            label: desc.label,
            sources,
            vertex_streams: desc.vertex_streams,
            handle: None,
            reflection: ProgramReflection::default(),
            params: ParamBlock::default(),
            generation: 0,
            stale: false,
            watch,
            last_error: None,
            retire: ctx.retire_queue(),
        };

        match program.link(ctx) {
            Ok(linked) => {
                program.install(linked);
                info!(
                    "Built shader program '{}' ({} stages, generation {})",
                    program.label,
                    program.sources.len(),
                    program.generation
                );
            }
            Err(log) => {
                error!("Failed to link shader program '{}': {}", program.label, log);
                program.last_error = Some(log.to_string());
            }
        }

        Ok(program)
    }

    /// Like `build`, but a link failure is an error
    pub fn build_strict<D: GpuDevice>(ctx: &mut GpuContext<D>, desc: ProgramDesc) -> EngineResult<Self> {
        let program = Self::build(ctx, desc)?;
        if program.handle.is_none() {
            return Err(EngineError::Link {
                program: program.label.clone(),
                log: program.last_error.clone().unwrap_or_default(),
            });
        }
        Ok(program)
    }

    fn link<D: GpuDevice>(&self, ctx: &mut GpuContext<D>) -> ShaderResult<Linked> {
        let compiled = self
            .sources
            .iter()
            .map(|(&kind, path)| load_stage(&StageSource::new(kind, path.clone())))
            .collect::<ShaderResult<Vec<CompiledStage>>>()?;

        let reflection = ProgramReflection::link(&compiled)?;

        for location in &reflection.vertex_inputs {
            if !self.vertex_streams.iter().any(|s| s.provides_location(*location)) {
                return Err(ShaderError::Link(format!(
                    "vertex input @location({}) has no attribute in the declared vertex streams",
                    location
                )));
            }
        }

        // Parsed modules are not kept past this point
        let modules: Vec<StageModule> = compiled
            .into_iter()
            .map(|stage| StageModule {
                kind: stage.kind,
                label: stage.label,
                source: stage.source,
                entry_point: stage.entry_point,
            })
            .collect();

        let handle = ctx
            .device_mut()
            .link_program(&LinkRequest {
                label: &self.label,
                stages: &modules,
                reflection: &reflection,
                vertex_streams: &self.vertex_streams,
            })
            .map_err(ShaderError::Backend)?;

        Ok(Linked { handle, reflection })
    }

    fn install(&mut self, linked: Linked) {
        let mut params = ParamBlock::new(linked.reflection.params.clone());
        let carried = params.carry_over_from(&self.params);
        if carried > 0 {
            trace!("Carried {} uniform values into '{}'", carried, self.label);
        }

        if let Some(previous) = self.handle.replace(linked.handle) {
            self.retire.retire(RetiredResource::Program(previous));
        }
        self.reflection = linked.reflection;
        self.params = params;
        self.generation = next_generation();
        self.last_error = None;
    }

    /// Rebuild from the retained source paths now
    ///
    /// On failure the previous handle, reflection and uniform values stay in
    /// place.
    pub fn rebuild<D: GpuDevice>(&mut self, ctx: &mut GpuContext<D>) -> EngineResult<()> {
        self.stale = false;
        match self.link(ctx) {
            Ok(linked) => {
                let first_link = self.handle.is_none();
                self.install(linked);
                if first_link {
                    info!("Linked shader program '{}' (generation {})", self.label, self.generation);
                } else {
                    info!("Reloaded shader program '{}' (generation {})", self.label, self.generation);
                }
                Ok(())
            }
            Err(error) => {
                let log = error.to_string();
                self.last_error = Some(log.clone());
                if self.handle.is_some() {
                    error!(
                        "Failed to reload shader program '{}', keeping previous handle: {}",
                        self.label, log
                    );
                    Err(EngineError::Reload {
                        program: self.label.clone(),
                        log,
                    })
                } else {
                    error!("Failed to link shader program '{}': {}", self.label, log);
                    Err(EngineError::Link {
                        program: self.label.clone(),
                        log,
                    })
                }
            }
        }
    }

    /// Check watched sources; true when the program became stale
    pub fn poll_sources(&mut self) -> bool {
        let Some(watch) = self.watch.as_mut() else {
            return false;
        };
        let events = watch.poll();
        if events.is_empty() {
            return false;
        }
        for event in &events {
            info!(
                "Shader source {} changed ({:?}), '{}' will rebuild",
                event.path.display(),
                event.event_type,
                self.label
            );
        }
        self.stale = true;
        true
    }

    /// Mark the program for rebuild at the next activation
    pub fn request_reload(&mut self) {
        self.stale = true;
    }

    /// Activate for subsequent dispatches and draws
    ///
    /// Pending reloads are performed first. A failed reload is reported and
    /// the previous handle is activated; only a program that has never linked
    /// fails here.
    pub fn use_program<D: GpuDevice>(&mut self, ctx: &mut GpuContext<D>) -> EngineResult<()> {
        self.poll_sources();
        if self.stale {
            // Reported inside rebuild, never fatal here
            let _ = self.rebuild(ctx);
        }

        let handle = self.handle.ok_or_else(|| EngineError::ProgramUnusable {
            program: self.label.clone(),
        })?;
        ctx.set_active_program(handle);
        Ok(())
    }

    /// Resolve a parameter block member; `INVALID` when not declared
    pub fn uniform_location(&self, name: &str) -> UniformLocation {
        if self.handle.is_none() {
            return UniformLocation::INVALID;
        }
        match self.params.layout().slot(name) {
            Some((slot, _)) => UniformLocation {
                generation: self.generation,
                slot: slot as u32,
            },
            None => {
                debug!("Program '{}' declares no uniform '{}'", self.label, name);
                UniformLocation::INVALID
            }
        }
    }

    /// Set a uniform on this program, whether or not it is active
    ///
    /// Invalid and stale locations are ignored.
    pub fn upload_uniform(&mut self, location: UniformLocation, value: impl Into<UniformValue>) {
        if !location.is_valid() {
            return;
        }
        if location.generation != self.generation {
            trace!(
                "Ignoring upload through a location from generation {} on '{}' (generation {})",
                location.generation,
                self.label,
                self.generation
            );
            return;
        }

        let value = value.into();
        if !self.params.write(location.slot as usize, value) {
            warn!(
                "Uniform kind mismatch on '{}': {:?} does not fit slot {}",
                self.label, value, location.slot
            );
        }
    }

    /// Name lookup followed by an upload; prefer cached locations per frame
    pub fn upload_uniform_by_name(&mut self, name: &str, value: impl Into<UniformValue>) {
        let location = self.uniform_location(name);
        self.upload_uniform(location, value);
    }

    /// Current value at a location
    pub fn uniform(&self, location: UniformLocation) -> Option<UniformValue> {
        if !location.is_valid() || location.generation != self.generation {
            return None;
        }
        self.params.read(location.slot as usize)
    }

    pub fn uniform_by_name(&self, name: &str) -> Option<UniformValue> {
        self.uniform(self.uniform_location(name))
    }

    /// Parameter block bytes consumed by the next dispatch or draw
    pub fn param_bytes(&self) -> &[u8] {
        self.params.bytes()
    }

    pub fn state(&self) -> ProgramState {
        match (self.handle, self.stale) {
            (None, _) => ProgramState::Unbuilt,
            (Some(_), true) => ProgramState::Stale,
            (Some(_), false) => ProgramState::Active,
        }
    }

    pub fn handle(&self) -> Option<ProgramId> {
        self.handle
    }

    pub fn is_usable(&self) -> bool {
        self.handle.is_some()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn reflection(&self) -> &ProgramReflection {
        &self.reflection
    }

    pub fn vertex_streams(&self) -> &[VertexStreamLayout] {
        &self.vertex_streams
    }

    /// Log of the last failed link or reload
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn source_path(&self, kind: ShaderStageKind) -> Option<&Path> {
        self.sources.get(&kind).map(PathBuf::as_path)
    }

    pub fn stage_kinds(&self) -> impl Iterator<Item = ShaderStageKind> + '_ {
        self.sources.keys().copied()
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.retire.retire(RetiredResource::Program(handle));
        }
    }
}
