pub mod compute;
pub mod config;
pub mod constants;
pub mod error;
pub mod gpu;
pub mod hot_reload;
pub mod pipelines;
pub mod shader;

pub use compute::{dispatch, ComputeKernel, DispatchRequest, DrawParameterResolver, ResolvedDraws};
pub use config::{BackendKind, EngineConfig, FlockingParams, ParticleConfig};
pub use error::{EngineError, EngineResult};
pub use gpu::buffer_layouts::{BoidInstance, CategoryCounters, ClassifyInstance, InstanceCategory, Particle};
pub use gpu::{
    AccessClass, BarrierBits, BufferTarget, GpuBuffer, GpuContext, GpuDevice, SoftwareDevice, UsageHint,
};
#[cfg(feature = "native")]
pub use gpu::WgpuDevice;
pub use pipelines::{BatchScene, FlockScene, ParticleScene, ViewParams};
pub use shader::{ProgramDesc, ShaderProgram, ShaderStageKind, StageSource, UniformLocation, UniformValue};
