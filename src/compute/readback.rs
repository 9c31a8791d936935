//! Counter readback and draw parameter resolution
//!
//! The counter buffer is the only data copied back per frame. Its size is
//! fixed by the category count, so the stall does not grow with the number
//! of instances.

use crate::constants::classification::CATEGORY_COUNT;
use crate::error::EngineResult;
use crate::gpu::buffer_layouts::{calculations, CategoryCounters, InstanceCategory};
use crate::gpu::{GpuBuffer, GpuContext, GpuDevice};
use log::warn;

/// Instance counts for the draws of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolvedDraws {
    /// Counter values as written by the kernel
    pub raw: CategoryCounters,
    /// Counts clamped to each output stream's capacity
    pub instance_counts: CategoryCounters,
}

impl ResolvedDraws {
    pub fn instance_count(&self, category: InstanceCategory) -> u32 {
        self.instance_counts.get(category)
    }

    /// Whether any category produced more instances than its stream holds
    pub fn overflowed(&self) -> bool {
        self.raw != self.instance_counts
    }

    pub fn total(&self) -> u64 {
        self.instance_counts.total()
    }
}

/// Turns counter buffer contents into per-category instance counts
#[derive(Debug, Clone, Copy)]
pub struct DrawParameterResolver {
    capacities: [u32; CATEGORY_COUNT],
}

impl DrawParameterResolver {
    pub fn new(near_capacity: u32, far_capacity: u32) -> Self {
        let mut capacities = [0; CATEGORY_COUNT];
        capacities[InstanceCategory::Near.counter_index()] = near_capacity;
        capacities[InstanceCategory::Far.counter_index()] = far_capacity;
        Self { capacities }
    }

    pub fn capacity(&self, category: InstanceCategory) -> u32 {
        self.capacities[category.counter_index()]
    }

    /// Clamp raw counter values to the stream capacities
    pub fn resolve_counts(&self, raw: CategoryCounters) -> ResolvedDraws {
        let mut instance_counts = raw;
        for (count, &capacity) in instance_counts.counts.iter_mut().zip(&self.capacities) {
            *count = (*count).min(capacity);
        }

        let resolved = ResolvedDraws {
            raw,
            instance_counts,
        };
        if resolved.overflowed() {
            warn!(
                "Classification overflowed its output streams: counted {:?}, drawing {:?}",
                raw.counts, instance_counts.counts
            );
        }
        resolved
    }

    /// Blocking readback of the counter buffer
    ///
    /// Must follow a barrier covering buffer-update access.
    pub fn resolve<D: GpuDevice>(
        &self,
        ctx: &mut GpuContext<D>,
        counters: &GpuBuffer,
    ) -> EngineResult<ResolvedDraws> {
        let bytes = ctx.read_buffer(counters, 0, calculations::counter_buffer_size())?;
        let raw: CategoryCounters = bytemuck::pod_read_unaligned(&bytes);
        Ok(self.resolve_counts(raw))
    }
}
