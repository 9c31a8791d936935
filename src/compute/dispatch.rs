//! Compute dispatch orchestration
//!
//! One call performs the whole protocol in a fixed order: activate the
//! kernel (rebuilding it first if its sources changed), bind every storage
//! buffer at its binding point, upload the parameters, dispatch enough
//! workgroups to cover the invocation count, then issue one barrier covering
//! every access class that will consume the kernel's writes.

use crate::error::{EngineError, EngineResult};
use crate::gpu::buffer_layouts::ComputeDispatchParams;
use crate::gpu::{AccessClass, BarrierBits, GpuBuffer, GpuContext, GpuDevice};
use crate::shader::{ProgramDesc, ShaderProgram, StageSource, UniformSet, UniformTable, UniformValue};
use log::trace;
use std::path::Path;
use std::time::Duration;

/// A compute program with its resolved uniform locations
#[derive(Debug)]
pub struct ComputeKernel<K: UniformSet> {
    program: ShaderProgram,
    uniforms: UniformTable<K>,
}

impl<K: UniformSet> ComputeKernel<K> {
    /// Build from a single compute source; link failure is an error
    pub fn load<D: GpuDevice>(
        ctx: &mut GpuContext<D>,
        label: &str,
        path: impl AsRef<Path>,
        watch: Option<Duration>,
    ) -> EngineResult<Self> {
        let desc = ProgramDesc::new(label)
            .stage(StageSource::compute(path.as_ref()))
            .watch(watch);
        Ok(Self::from_program(ShaderProgram::build_strict(ctx, desc)?))
    }

    pub fn from_program(program: ShaderProgram) -> Self {
        let uniforms = UniformTable::resolve(&program);
        Self { program, uniforms }
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut ShaderProgram {
        &mut self.program
    }

    pub fn uniforms(&self) -> &UniformTable<K> {
        &self.uniforms
    }
}

/// Everything one dispatch needs
#[derive(Debug)]
pub struct DispatchRequest<'a, K: UniformSet> {
    /// (binding point, buffer) for every storage binding the kernel declares
    pub bindings: &'a [(u32, &'a GpuBuffer)],
    pub uniforms: &'a [(K, UniformValue)],
    /// Threads that do real work; the tail of the last group is guarded in-kernel
    pub invocations: u32,
    /// Consumers of the kernel's writes before the next barrier
    pub consumers: &'a [AccessClass],
}

/// What a dispatch issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub workgroups: [u32; 3],
    pub barrier: BarrierBits,
    pub program_generation: u32,
}

/// Bind, upload, dispatch, barrier
pub fn dispatch<D: GpuDevice, K: UniformSet>(
    ctx: &mut GpuContext<D>,
    kernel: &mut ComputeKernel<K>,
    request: &DispatchRequest<'_, K>,
) -> EngineResult<DispatchReport> {
    // Pending reloads happen here, before any upload for this frame
    kernel.program.use_program(ctx)?;

    for declared in &kernel.program.reflection().storage {
        if !request.bindings.iter().any(|(index, _)| *index == declared.binding) {
            return Err(EngineError::UnboundBinding {
                program: kernel.program.label().to_string(),
                index: declared.binding,
            });
        }
    }
    for &(index, buffer) in request.bindings {
        buffer.bind(ctx, Some(index))?;
    }

    kernel.uniforms.refresh(&kernel.program);
    for &(key, value) in request.uniforms {
        let location = kernel.uniforms.location(key);
        kernel.program.upload_uniform(location, value);
    }

    let params = ComputeDispatchParams::calculate_1d(
        request.invocations,
        kernel.program.reflection().workgroup_width(),
    );
    ctx.dispatch(&kernel.program, params.workgroup_count)?;

    let barrier = BarrierBits::covering(request.consumers);
    if !barrier.is_empty() {
        ctx.memory_barrier(barrier);
    }

    trace!(
        "Dispatch '{}': {} invocations in {:?}, barrier {:#x}",
        kernel.program.label(),
        request.invocations,
        params.workgroup_count,
        barrier.bits()
    );

    Ok(DispatchReport {
        workgroups: params.workgroup_count,
        barrier,
        program_generation: kernel.program.generation(),
    })
}
