//! Storage plan computed by the memory-reuse pass.

use super::NodeId;
use std::collections::BTreeMap;

/// Live range of one planned argument over the operator schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    pub arg: NodeId,
    /// Schedule index of the producing operator.
    pub produced_at: usize,
    /// Schedule index of the last consuming operator (inclusive).
    pub last_used_at: usize,
}

/// Mapping from argument nodes to shared storage slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryPlan {
    /// Number of storage slots needed.
    pub num_slots: usize,
    /// Argument node to slot.
    pub arg_to_slot: BTreeMap<NodeId, usize>,
    pub lifetimes: Vec<Lifetime>,
    /// Arguments placed in a slot that an earlier argument already used.
    pub reuse_count: usize,
}

impl MemoryPlan {
    pub fn slot_of(&self, arg: NodeId) -> Option<usize> {
        self.arg_to_slot.get(&arg).copied()
    }
}
