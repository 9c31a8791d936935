//! Compute shader buffer layout definitions
//!
//! Defines the counter buffer and dispatch sizing shared by the kernels.

use super::instance::InstanceCategory;
use crate::constants::classification::CATEGORY_COUNT;
use bytemuck::{Pod, Zeroable};

/// Per-category atomic counters written by the classification kernel
/// Total size: 8 bytes
///
/// Index 0 counts near instances, index 1 far ones.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CategoryCounters {
    pub counts: [u32; CATEGORY_COUNT],
}

impl CategoryCounters {
    pub const ZERO: Self = Self {
        counts: [0; CATEGORY_COUNT],
    };

    #[inline]
    pub fn get(&self, category: InstanceCategory) -> u32 {
        self.counts[category.counter_index()]
    }

    #[inline]
    pub fn near(&self) -> u32 {
        self.get(InstanceCategory::Near)
    }

    #[inline]
    pub fn far(&self) -> u32 {
        self.get(InstanceCategory::Far)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }
}

/// Workgroup grid of a 1D dispatch
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ComputeDispatchParams {
    /// Items per workgroup
    pub items_per_workgroup: u32,

    /// Number of workgroups
    pub workgroup_count: [u32; 3],
}

impl ComputeDispatchParams {
    /// Calculate dispatch parameters for 1D workload
    ///
    /// Issues `ceil(total_items / workgroup_size)` groups; the tail of the
    /// last group is guarded inside the kernel.
    pub fn calculate_1d(total_items: u32, workgroup_size: u32) -> Self {
        let workgroup_size = workgroup_size.max(1);
        let workgroups = total_items.div_ceil(workgroup_size);

        Self {
            items_per_workgroup: workgroup_size,
            workgroup_count: [workgroups, 1, 1],
        }
    }

    /// Invocations actually launched, including the guarded tail
    pub fn launched_invocations(&self) -> u64 {
        self.workgroup_count.iter().map(|&c| c as u64).product::<u64>()
            * self.items_per_workgroup as u64
    }
}

/// Compute buffer layout information
pub struct ComputeBufferLayout;

impl ComputeBufferLayout {
    /// Atomic counter size
    pub const ATOMIC_SIZE: u64 = 4;

    /// Counter buffer size
    pub const COUNTERS_SIZE: u64 = Self::ATOMIC_SIZE * CATEGORY_COUNT as u64;
}
