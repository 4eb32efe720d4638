use crate::types::{SlotId, MAX_SLOTS};
use std::collections::BTreeSet;

/// Hands out the lowest free slot id
///
/// Occupancy is the union of slots this allocator has handed out (or been told
/// about) and whatever the host reports as taken.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    max: u8,
    taken: BTreeSet<SlotId>,
}

impl SlotAllocator {
    pub fn new() -> Self {
        Self::with_max(MAX_SLOTS)
    }

    /// Allocator over `1..=max`
    pub fn with_max(max: u8) -> Self {
        Self {
            max,
            taken: BTreeSet::new(),
        }
    }

    /// Mark a slot as taken (e.g. from the persisted device map)
    pub fn claim(&mut self, slot: SlotId) {
        self.taken.insert(slot);
    }

    /// Return a slot after a failed creation
    pub fn release(&mut self, slot: SlotId) {
        self.taken.remove(&slot);
    }

    /// Check if a slot was handed out
    pub fn is_taken(&self, slot: SlotId) -> bool {
        self.taken.contains(&slot)
    }

    /// Reserve the lowest id not taken here and not occupied in the host
    ///
    /// Returns `None` when the space is exhausted.
    pub fn allocate(&mut self, host_occupied: impl Fn(SlotId) -> bool) -> Option<SlotId> {
        let slot = (1..=self.max)
            .filter_map(SlotId::new)
            .find(|&slot| !self.taken.contains(&slot) && !host_occupied(slot))?;
        self.taken.insert(slot);
        Some(slot)
    }
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::new()
    }
}
