//! Batch classification pipeline
//!
//! Per frame: zero the counters, dispatch `classify_instances` over the
//! input stream, barrier, read the counters back. The near and far streams
//! are then drawn with the resolved counts.

use crate::compute::{dispatch, ComputeKernel, DispatchRequest, DrawParameterResolver, ResolvedDraws};
use crate::error::EngineResult;
use crate::gpu::buffer_layouts::{bindings, CategoryCounters, ClassifyInstance, InstanceCategory};
use crate::gpu::{AccessClass, BufferTarget, GpuBuffer, GpuContext, GpuDevice, UsageHint};
use crate::shader::{UniformSet, UniformValue};
use glam::Vec3;
use log::debug;
use std::path::Path;
use std::time::Duration;

/// Members of the `ClassifyParams` block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyUniform {
    ViewPosition,
    LodDistance,
    InstanceCount,
}

impl UniformSet for ClassifyUniform {
    const ALL: &'static [Self] = &[Self::ViewPosition, Self::LodDistance, Self::InstanceCount];

    fn name(self) -> &'static str {
        match self {
            Self::ViewPosition => "view_position",
            Self::LodDistance => "lod_distance",
            Self::InstanceCount => "instance_count",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Consumers of the kernel's writes: next frame's kernel, the draws that
/// fetch the output streams and the counter readback
pub const CLASSIFY_CONSUMERS: &[AccessClass] = &[
    AccessClass::ShaderStorage,
    AccessClass::VertexFetch,
    AccessClass::BufferUpdate,
];

pub struct ClassificationPipeline {
    kernel: ComputeKernel<ClassifyUniform>,
    input: GpuBuffer,
    near: GpuBuffer,
    far: GpuBuffer,
    counters: GpuBuffer,
    instance_count: u32,
    resolver: DrawParameterResolver,
}

impl ClassificationPipeline {
    /// Upload `instances` and allocate both output streams with room for
    /// `output_capacity` records
    pub fn new<D: GpuDevice>(
        ctx: &mut GpuContext<D>,
        shader_path: impl AsRef<Path>,
        instances: &[ClassifyInstance],
        output_capacity: u32,
        watch: Option<Duration>,
    ) -> EngineResult<Self> {
        let kernel = ComputeKernel::load(ctx, "Classify Instances", shader_path, watch)?;

        let input = GpuBuffer::with_data(
            ctx,
            "Classify Input Instances",
            BufferTarget::Storage,
            instances,
            UsageHint::Static,
        )?;
        let near = GpuBuffer::with_capacity::<_, ClassifyInstance>(
            ctx,
            "Near Instances",
            BufferTarget::Storage,
            output_capacity,
            UsageHint::Static,
        )?;
        let far = GpuBuffer::with_capacity::<_, ClassifyInstance>(
            ctx,
            "Far Instances",
            BufferTarget::Storage,
            output_capacity,
            UsageHint::Static,
        )?;
        let counters = GpuBuffer::with_data(
            ctx,
            "Category Counters",
            BufferTarget::Storage,
            &[CategoryCounters::ZERO],
            UsageHint::Dynamic,
        )?;

        debug!(
            "Classification pipeline: {} instances, {} records per output stream",
            instances.len(),
            output_capacity
        );

        Ok(Self {
            kernel,
            input,
            near,
            far,
            counters,
            instance_count: instances.len() as u32,
            resolver: DrawParameterResolver::new(output_capacity, output_capacity),
        })
    }

    /// Classify every input instance relative to `view_position`
    pub fn classify<D: GpuDevice>(
        &mut self,
        ctx: &mut GpuContext<D>,
        view_position: Vec3,
        lod_distance: f32,
    ) -> EngineResult<ResolvedDraws> {
        self.counters
            .upload(ctx, bytemuck::bytes_of(&CategoryCounters::ZERO))?;

        let storage = [
            (bindings::classify::INPUT_INSTANCES, &self.input),
            (bindings::classify::FAR_INSTANCES, &self.far),
            (bindings::classify::NEAR_INSTANCES, &self.near),
            (bindings::classify::CATEGORY_COUNTERS, &self.counters),
        ];
        let uniforms: [(ClassifyUniform, UniformValue); 3] = [
            (ClassifyUniform::ViewPosition, view_position.into()),
            (ClassifyUniform::LodDistance, lod_distance.into()),
            (ClassifyUniform::InstanceCount, self.instance_count.into()),
        ];
        dispatch(
            ctx,
            &mut self.kernel,
            &DispatchRequest {
                bindings: &storage,
                uniforms: &uniforms,
                invocations: self.instance_count,
                consumers: CLASSIFY_CONSUMERS,
            },
        )?;

        self.resolver.resolve(ctx, &self.counters)
    }

    pub fn stream(&self, category: InstanceCategory) -> &GpuBuffer {
        match category {
            InstanceCategory::Near => &self.near,
            InstanceCategory::Far => &self.far,
        }
    }

    pub fn input(&self) -> &GpuBuffer {
        &self.input
    }

    pub fn counters(&self) -> &GpuBuffer {
        &self.counters
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn resolver(&self) -> &DrawParameterResolver {
        &self.resolver
    }

    pub fn kernel(&self) -> &ComputeKernel<ClassifyUniform> {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut ComputeKernel<ClassifyUniform> {
        &mut self.kernel
    }
}
