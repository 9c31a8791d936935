//! Compute dispatch protocol and counter readback

pub mod dispatch;
pub mod readback;


pub use dispatch::{dispatch, ComputeKernel, DispatchReport, DispatchRequest};
pub use readback::{DrawParameterResolver, ResolvedDraws};
