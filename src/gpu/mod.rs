//! GPU resources and backends
//!
//! This module provides the buffer objects, the explicit binding context and
//! the device seam, with a software reference device and a wgpu device
//! behind the same `GpuDevice` trait.

pub mod buffer;
pub mod buffer_layouts;
pub mod context;
pub mod device;
pub mod software;
#[cfg(feature = "native")]
pub mod wgpu_backend;


pub use buffer::GpuBuffer;
pub use context::{BoundState, GpuContext, RetireQueue, RetiredResource};
pub use device::{
    AccessClass, BarrierBits, BufferDescriptor, BufferId, BufferTarget, ComputeDispatch, DrawCall,
    GpuDevice, LinkRequest, ProgramId, StageModule, UsageHint,
};
pub use software::{CapturedDraw, DeviceStats, SoftwareDevice};
#[cfg(feature = "native")]
pub use wgpu_backend::WgpuDevice;
