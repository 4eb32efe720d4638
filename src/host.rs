//! Home-automation host collaborator
//!
//! The bridge never talks to the host's device database directly; it goes through
//! [`DeviceHost`]. [`MemoryHost`] is an in-process implementation used by the demo
//! and by tests.

use crate::error::{BridgeError, Result};
use crate::types::{Capability, ExternalId, HostRepresentation, SlotId, SlotUpdate, SlotValue};
use std::collections::BTreeMap;

/// Parameters for creating one host slot
#[derive(Debug, Clone, Copy)]
pub struct SlotSpec<'a> {
    pub slot: SlotId,
    pub name: &'a str,
    pub capability: Capability,
}

impl SlotSpec<'_> {
    /// Host representation for the slot's capability
    pub fn representation(&self) -> HostRepresentation {
        self.capability.representation()
    }
}

/// Device-registry operations the bridge needs from the host
pub trait DeviceHost {
    /// Create a slot and return the host's handle for it
    fn create_slot(&mut self, spec: &SlotSpec<'_>) -> Result<ExternalId>;

    /// Push a new value and/or battery level
    fn update_slot(&mut self, id: ExternalId, update: &SlotUpdate) -> Result<()>;

    /// Display string the host currently shows for a slot
    fn current_value(&self, id: ExternalId) -> Option<String>;

    /// Check if a slot id is in use on the host side
    fn slot_is_occupied(&self, slot: SlotId) -> bool;
}

/// Host-side state of one slot
#[derive(Debug, Clone, PartialEq)]
pub struct HostSlot {
    pub external_id: ExternalId,
    pub name: String,
    pub representation: HostRepresentation,
    pub value: SlotValue,
    pub battery_level: Option<u8>,
}

/// In-memory host
#[derive(Debug, Default)]
pub struct MemoryHost {
    slots: BTreeMap<SlotId, HostSlot>,
    next_id: u64,
    updates: Vec<(ExternalId, SlotUpdate)>,
    record_updates: bool,
    reject_creates: bool,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `create_slot` fail
    pub fn set_reject_creates(&mut self, reject: bool) {
        self.reject_creates = reject;
    }

    /// Keep a log of every update received (off by default)
    pub fn set_record_updates(&mut self, record: bool) {
        self.record_updates = record;
        if !record {
            self.updates.clear();
        }
    }

    /// Occupy a slot with a device the bridge does not own
    pub fn occupy(&mut self, slot: SlotId, name: impl Into<String>) -> ExternalId {
        let external_id = self.next_external_id();
        self.slots.insert(
            slot,
            HostSlot {
                external_id,
                name: name.into(),
                representation: HostRepresentation::Named("Foreign"),
                value: SlotValue::default(),
                battery_level: None,
            },
        );
        external_id
    }

    /// Delete a slot, as a user would from the host UI
    pub fn remove(&mut self, slot: SlotId) -> Option<HostSlot> {
        self.slots.remove(&slot)
    }

    /// Host state of a slot
    pub fn slot(&self, slot: SlotId) -> Option<&HostSlot> {
        self.slots.get(&slot)
    }

    /// Number of slots on the host
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Updates received while recording was on, oldest first
    pub fn updates(&self) -> &[(ExternalId, SlotUpdate)] {
        &self.updates
    }

    /// Overwrite a slot's display string (e.g. a value restored by the host)
    pub fn set_display(&mut self, id: ExternalId, s_value: impl Into<String>) -> Result<()> {
        let slot = self.find_mut(id)?;
        slot.value.s_value = s_value.into();
        Ok(())
    }

    fn next_external_id(&mut self) -> ExternalId {
        self.next_id += 1;
        ExternalId(self.next_id)
    }

    fn find_mut(&mut self, id: ExternalId) -> Result<&mut HostSlot> {
        self.slots
            .values_mut()
            .find(|slot| slot.external_id == id)
            .ok_or_else(|| BridgeError::host(format!("no device with idx {}", id)))
    }
}

impl DeviceHost for MemoryHost {
    fn create_slot(&mut self, spec: &SlotSpec<'_>) -> Result<ExternalId> {
        if self.reject_creates {
            return Err(BridgeError::host("device creation disabled"));
        }
        if self.slots.contains_key(&spec.slot) {
            return Err(BridgeError::host(format!("unit {} already exists", spec.slot)));
        }

        let external_id = self.next_external_id();
        self.slots.insert(
            spec.slot,
            HostSlot {
                external_id,
                name: spec.name.to_string(),
                representation: spec.representation(),
                value: SlotValue::default(),
                battery_level: None,
            },
        );
        Ok(external_id)
    }

    fn update_slot(&mut self, id: ExternalId, update: &SlotUpdate) -> Result<()> {
        let slot = self.find_mut(id)?;
        if let Some(value) = &update.value {
            slot.value = value.clone();
        }
        if let Some(level) = update.battery_level {
            slot.battery_level = Some(level);
        }
        if self.record_updates {
            self.updates.push((id, update.clone()));
        }
        Ok(())
    }

    fn current_value(&self, id: ExternalId) -> Option<String> {
        self.slots
            .values()
            .find(|slot| slot.external_id == id)
            .map(|slot| slot.value.s_value.clone())
    }

    fn slot_is_occupied(&self, slot: SlotId) -> bool {
        self.slots.contains_key(&slot)
    }
}
