use crate::cache::{format_reading, ValueCache};
use crate::calibration::CalibrationTable;
use crate::classify::classify;
use crate::discovery::{DiscoverySequencer, Step, DEFAULT_PACING};
use crate::host::{DeviceHost, SlotSpec};
use crate::protocol::{InboundMessage, Telemetry};
use crate::slots::SlotAllocator;
use crate::store::{DeviceMap, DeviceMapStore};
use crate::subscription::BridgeEvent;
use crate::types::{
    Capability, DeviceRecord, GatewayAddress, SlotEntry, SlotUpdate, SlotValue,
};
use serde_json::{Map, Value};
use std::time::Duration;

/// Full-scale raw dimmer level reported by the gateway
const DIMMER_FULL_SCALE: f64 = 254.0;

/// Registry of gateway devices and their host slots
///
/// The registry owns every piece of bridge state (device map, discovery queue,
/// merge cache, slot allocator) and is driven from a single control flow: feed it
/// inbound payloads and act on the [`Step`] it returns.
///
/// # Example
///
/// ```
/// use zb_bridge::{DeviceRegistry, MemoryHost, Step};
///
/// let mut registry = DeviceRegistry::new(MemoryHost::new());
/// let step = registry.start_discovery();
/// assert!(matches!(step, Step::Send(_)));
///
/// let step = registry.handle_payload(br#"{"ZbStatus1":[]}"#);
/// assert_eq!(step, Step::Completed);
/// ```
pub struct DeviceRegistry<H> {
    host: H,
    devices: DeviceMap,
    allocator: SlotAllocator,
    cache: ValueCache,
    sequencer: DiscoverySequencer,
    calibration: CalibrationTable,
    store: Option<DeviceMapStore>,
    events: Vec<BridgeEvent>,
}

impl<H: DeviceHost> DeviceRegistry<H> {
    /// Create an empty registry on top of a host
    pub fn new(host: H) -> Self {
        Self {
            host,
            devices: DeviceMap::new(),
            allocator: SlotAllocator::new(),
            cache: ValueCache::new(),
            sequencer: DiscoverySequencer::new(DEFAULT_PACING),
            calibration: CalibrationTable::default(),
            store: None,
            events: Vec::new(),
        }
    }

    /// Load the persisted device map and save to it after each discovery batch
    pub fn with_store(mut self, store: DeviceMapStore) -> Self {
        for record in store.load().into_values() {
            self.insert_record(record);
        }
        self.store = Some(store);
        self
    }

    /// Set the delay between consecutive detail requests
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.sequencer = DiscoverySequencer::new(pacing);
        self
    }

    /// Use a different illuminance calibration
    pub fn with_calibration(mut self, calibration: CalibrationTable) -> Self {
        self.calibration = calibration;
        self
    }

    /// Add a known device (e.g. restored from elsewhere)
    pub fn insert_record(&mut self, record: DeviceRecord) {
        for entry in &record.slots {
            self.allocator.claim(entry.slot);
        }
        self.devices.insert(record.address.clone(), record);
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn devices(&self) -> &DeviceMap {
        &self.devices
    }

    pub fn device(&self, address: &str) -> Option<&DeviceRecord> {
        self.devices.get(address)
    }

    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    pub fn sequencer(&self) -> &DiscoverySequencer {
        &self.sequencer
    }

    /// Take the events produced since the last call
    pub fn drain_events(&mut self) -> Vec<BridgeEvent> {
        std::mem::take(&mut self.events)
    }

    /// Begin a discovery batch (no-op while one is running)
    pub fn start_discovery(&mut self) -> Step {
        let step = self.sequencer.start();
        self.on_step(step)
    }

    /// Pacing delay elapsed
    pub fn resume_discovery(&mut self) -> Step {
        let step = self.sequencer.resume();
        self.on_step(step)
    }

    /// Response timeout armed for request `seq` fired
    pub fn discovery_timeout(&mut self, seq: u64) -> Step {
        let step = self.sequencer.on_timeout(seq);
        self.on_step(step)
    }

    /// Sequence number of the most recent discovery request
    pub fn request_seq(&self) -> u64 {
        self.sequencer.request_seq()
    }

    /// Handle a raw payload from the gateway
    ///
    /// Malformed payloads are logged and dropped.
    pub fn handle_payload(&mut self, payload: &[u8]) -> Step {
        match InboundMessage::parse(payload) {
            Ok(Some(message)) => self.handle_message(message),
            Ok(None) => {
                tracing::debug!("Ignoring message without a gateway key");
                Step::Pending
            }
            Err(e) => {
                tracing::warn!("Dropping message: {}", e);
                Step::Pending
            }
        }
    }

    /// Route a classified message
    pub fn handle_message(&mut self, message: InboundMessage) -> Step {
        match message {
            InboundMessage::DeviceList(addresses) => {
                let devices = &self.devices;
                let step = self
                    .sequencer
                    .on_device_list(addresses, |address| devices.contains_key(address));
                self.on_step(step)
            }
            InboundMessage::DeviceInfo(info) => {
                let added = self.handle_device_info(info);
                if added && !self.sequencer.is_in_progress() {
                    // detail requested outside of discovery
                    self.persist();
                }
                let step = self.sequencer.on_device_info();
                self.on_step(step)
            }
            InboundMessage::Telemetry(reports) => {
                self.handle_telemetry(reports);
                Step::Pending
            }
        }
    }

    fn on_step(&mut self, step: Step) -> Step {
        if step == Step::Completed {
            self.persist();
            self.events.push(BridgeEvent::DiscoveryCompleted {
                devices: self.devices.len(),
            });
        }
        step
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.devices) {
                tracing::error!("Save error: {}", e);
            }
        }
    }

    /// Create records for unknown addresses; returns true if any were added
    fn handle_device_info(&mut self, info: Map<String, Value>) -> bool {
        if let Some(expected) = self.sequencer.awaiting() {
            if !info.contains_key(expected.as_str()) {
                tracing::warn!("Detail response does not include {}", expected);
            }
        }

        let mut added = false;
        for (address, data) in info {
            if self.devices.contains_key(&address) {
                tracing::debug!("Already known: {}", address);
                continue;
            }
            let Value::Object(attributes) = data else {
                tracing::warn!("Detail for {} is not an object", address);
                continue;
            };
            added |= self.add_device(address, &attributes);
        }
        added
    }

    fn add_device(&mut self, address: GatewayAddress, attributes: &Map<String, Value>) -> bool {
        let name = attributes
            .get("Name")
            .and_then(Value::as_str)
            .unwrap_or(address.as_str())
            .to_string();
        let model_id = attributes.get("ModelId").and_then(Value::as_str);
        let capabilities = classify(attributes, model_id.unwrap_or(""));

        tracing::info!("New: {} ({}) - {}", name, address, model_id.unwrap_or("?"));

        let multi = capabilities.len() > 1;
        let mut slots = Vec::with_capacity(capabilities.len());

        for capability in capabilities {
            let host = &self.host;
            let Some(slot) = self.allocator.allocate(|slot| host.slot_is_occupied(slot)) else {
                tracing::warn!("No free unit for {} of {}", capability, address);
                continue;
            };

            let slot_name = if multi {
                format!("{} - {} ({})", name, capability.description(), address)
            } else {
                format!("{} ({})", name, address)
            };
            let spec = SlotSpec {
                slot,
                name: &slot_name,
                capability,
            };

            match self.host.create_slot(&spec) {
                Ok(external_id) => {
                    tracing::info!(
                        "  Created {}: Unit={}, idx={}",
                        capability,
                        slot,
                        external_id
                    );
                    if capability == Capability::TemperatureHumidity {
                        self.cache.seed(slot);
                    }
                    slots.push(SlotEntry {
                        slot,
                        capability,
                        external_id,
                    });
                }
                Err(e) => {
                    tracing::error!("Create error for {} ({}): {}", slot_name, capability, e);
                    self.allocator.release(slot);
                }
            }
        }

        if slots.is_empty() {
            tracing::warn!("No units created for {}", address);
            return false;
        }

        let record = DeviceRecord {
            address: address.clone(),
            name,
            slots,
        };
        self.events.push(BridgeEvent::DeviceAdded(record.clone()));
        self.devices.insert(address, record);
        true
    }

    fn handle_telemetry(&mut self, reports: Map<String, Value>) {
        for (address, data) in reports {
            let Some(record) = self.devices.get(&address) else {
                tracing::debug!("Telemetry from unknown device {}", address);
                continue;
            };
            let Value::Object(fields) = data else {
                tracing::warn!("Telemetry for {} is not an object", address);
                continue;
            };

            let slots = record.slots.clone();
            let telemetry = Telemetry::new(&fields);
            let battery_level = telemetry
                .integer("BatteryPercentage")
                .map(|level| level.clamp(0, 100) as u8);

            for entry in slots {
                if !self.host.slot_is_occupied(entry.slot) {
                    tracing::debug!("Unit {} of {} no longer exists", entry.slot, address);
                    continue;
                }

                let update = SlotUpdate {
                    value: self.render(&address, &entry, telemetry),
                    battery_level,
                };
                if update.is_empty() {
                    continue;
                }

                match self.host.update_slot(entry.external_id, &update) {
                    Ok(()) => self.events.push(BridgeEvent::SlotUpdated {
                        address: address.clone(),
                        slot: entry.slot,
                        capability: entry.capability,
                        update,
                    }),
                    Err(e) => tracing::error!("Update error {}: {}", address, e),
                }
            }
        }
    }

    /// New primary value for a slot, or `None` if the message has nothing for it
    fn render(
        &mut self,
        address: &str,
        entry: &SlotEntry,
        telemetry: Telemetry<'_>,
    ) -> Option<SlotValue> {
        match entry.capability {
            Capability::TemperatureHumidity => {
                let host = &self.host;
                let reading = self.cache.merge(
                    entry.slot,
                    telemetry.number("Temperature"),
                    telemetry.number("Humidity"),
                    || host.current_value(entry.external_id),
                )?;
                tracing::debug!(
                    "Updated {} T+H: {}°C, {}%",
                    address,
                    reading.temperature,
                    reading.humidity
                );
                Some(SlotValue::new(0, reading.display()))
            }
            Capability::Illuminance => {
                let raw = telemetry.number("Illuminance")?;
                let lux = self.calibration.interpolate(raw);
                tracing::debug!("Updated {} Lux: {} (raw: {})", address, lux, raw);
                Some(SlotValue::new(0, format_reading(lux)))
            }
            Capability::Motion => {
                let occupied = telemetry.flag("Occupancy")?;
                tracing::debug!(
                    "Updated {} Motion: {}",
                    address,
                    if occupied { "On" } else { "Off" }
                );
                Some(SlotValue::level(i64::from(occupied)))
            }
            Capability::Water => {
                let wet = telemetry.equals("Water", 1.0)?;
                Some(SlotValue::level(if wet { 4 } else { 1 }))
            }
            Capability::Door => Some(SlotValue::level(telemetry.integer("ZoneStatusChange")?)),
            Capability::Button(_) => {
                let action = telemetry.text("LidlPower")?;
                let endpoint = telemetry.text("Endpoint").unwrap_or_else(|| "1".to_string());
                let pressed = format!("{}-{}", endpoint, action);
                tracing::info!("Button {}: {}", address, pressed);
                self.events.push(BridgeEvent::ButtonPressed {
                    address: address.to_string(),
                    action: pressed.clone(),
                });
                Some(SlotValue::new(0, pressed))
            }
            Capability::Dimmer => {
                let power = telemetry.integer("Power")?;
                let raw = telemetry.number("Dimmer").unwrap_or(DIMMER_FULL_SCALE);
                let level = (raw / DIMMER_FULL_SCALE * 100.0).round() as i64;
                Some(SlotValue::new(power, level.to_string()))
            }
            Capability::Switch => Some(SlotValue::level(telemetry.integer("Power")?)),
            Capability::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use crate::types::{ExternalId, SlotId};
    use serde_json::json;

    fn slot(n: u8) -> SlotId {
        SlotId::new(n).unwrap()
    }

    /// Registry with one device already discovered from `detail`
    fn registry_with(address: &str, detail: Value) -> DeviceRegistry<MemoryHost> {
        let mut host = MemoryHost::new();
        host.set_record_updates(true);
        let mut registry = DeviceRegistry::new(host);
        registry.handle_message(InboundMessage::DeviceInfo(
            json!({ address: detail }).as_object().cloned().unwrap(),
        ));
        registry.drain_events();
        registry
    }

    fn send(registry: &mut DeviceRegistry<MemoryHost>, address: &str, fields: Value) {
        let payload = json!({ "ZbReceived": { address: fields } }).to_string();
        registry.handle_payload(payload.as_bytes());
    }

    fn value_of(registry: &DeviceRegistry<MemoryHost>, n: u8) -> SlotValue {
        registry.host().slot(slot(n)).unwrap().value.clone()
    }

    #[test]
    fn test_multi_capability_naming() {
        let registry = registry_with(
            "0x10",
            json!({"Name": "Hall", "ModelId": "TS0601", "ZoneType": 13, "Illuminance": 1}),
        );
        let host = registry.host();
        assert_eq!(host.slot(slot(1)).unwrap().name, "Hall - Motion (0x10)");
        assert_eq!(host.slot(slot(2)).unwrap().name, "Hall - Lux (0x10)");

        let single = registry_with("0x11", json!({"Power": 0}));
        assert_eq!(single.host().slot(slot(1)).unwrap().name, "0x11 (0x11)");
    }

    #[test]
    fn test_illuminance_is_calibrated() {
        let mut registry = registry_with("0x10", json!({"Illuminance": 5}));
        send(&mut registry, "0x10", json!({"Illuminance": 30000}));
        assert_eq!(value_of(&registry, 1), SlotValue::new(0, "362.5"));
        send(&mut registry, "0x10", json!({"Illuminance": 0}));
        assert_eq!(value_of(&registry, 1), SlotValue::new(0, "0.0"));
    }

    #[test]
    fn test_binary_sensors() {
        let mut registry = registry_with("0x20", json!({"ZoneType": 13}));
        send(&mut registry, "0x20", json!({"Occupancy": 1}));
        assert_eq!(value_of(&registry, 1).n_value, 1);
        send(&mut registry, "0x20", json!({"Occupancy": 0}));
        assert_eq!(value_of(&registry, 1).n_value, 0);

        let mut water = registry_with("0x21", json!({"ZoneType": 42}));
        send(&mut water, "0x21", json!({"Water": 1}));
        assert_eq!(value_of(&water, 1).n_value, 4);
        send(&mut water, "0x21", json!({"Water": 0}));
        assert_eq!(value_of(&water, 1).n_value, 1);
        send(&mut water, "0x21", json!({"Water": 1.5}));
        assert_eq!(value_of(&water, 1).n_value, 1);
        send(&mut water, "0x21", json!({"Water": 1.0}));
        assert_eq!(value_of(&water, 1).n_value, 4);

        let mut door = registry_with("0x22", json!({"ZoneType": 21}));
        send(&mut door, "0x22", json!({"ZoneStatusChange": 1}));
        assert_eq!(value_of(&door, 1).n_value, 1);
    }

    #[test]
    fn test_dimmer_and_switch() {
        let mut dimmer = registry_with("0x30", json!({"ModelId": "ZBT-DIMLight"}));
        send(&mut dimmer, "0x30", json!({"Power": 1, "Dimmer": 127}));
        assert_eq!(value_of(&dimmer, 1), SlotValue::new(1, "50"));
        send(&mut dimmer, "0x30", json!({"Power": 1}));
        assert_eq!(value_of(&dimmer, 1), SlotValue::new(1, "100"));
        // level rounds to the nearest percent
        send(&mut dimmer, "0x30", json!({"Power": 1, "Dimmer": 200}));
        assert_eq!(value_of(&dimmer, 1), SlotValue::new(1, "79"));
        send(&mut dimmer, "0x30", json!({"Power": 0, "Dimmer": 253}));
        assert_eq!(value_of(&dimmer, 1), SlotValue::new(0, "100"));
        send(&mut dimmer, "0x30", json!({"Power": 1, "Dimmer": 1}));
        assert_eq!(value_of(&dimmer, 1), SlotValue::new(1, "0"));
        // level alone does not touch the slot
        let before = dimmer.host().updates().len();
        send(&mut dimmer, "0x30", json!({"Dimmer": 10}));
        assert_eq!(dimmer.host().updates().len(), before);

        let mut switch = registry_with("0x31", json!({"Power": 0}));
        send(&mut switch, "0x31", json!({"Power": true}));
        assert_eq!(value_of(&switch, 1), SlotValue::level(1));
    }

    #[test]
    fn test_button_action() {
        let mut registry = registry_with("0x40", json!({"ModelId": "TS0044"}));
        assert_eq!(
            registry.device("0x40").unwrap().slots[0].capability,
            Capability::Button(4)
        );

        send(&mut registry, "0x40", json!({"LidlPower": "single", "Endpoint": 3}));
        assert_eq!(value_of(&registry, 1), SlotValue::new(0, "3-single"));
        send(&mut registry, "0x40", json!({"LidlPower": 2}));
        assert_eq!(value_of(&registry, 1), SlotValue::new(0, "1-2"));

        let events = registry.drain_events();
        assert!(events.contains(&BridgeEvent::ButtonPressed {
            address: "0x40".to_string(),
            action: "3-single".to_string(),
        }));
    }

    #[test]
    fn test_battery_is_side_update() {
        let mut registry = registry_with("0x50", json!({"ZoneType": 13}));
        send(&mut registry, "0x50", json!({"Occupancy": 1}));
        send(&mut registry, "0x50", json!({"BatteryPercentage": 87}));

        let state = registry.host().slot(slot(1)).unwrap();
        assert_eq!(state.value.n_value, 1);
        assert_eq!(state.battery_level, Some(87));
        let last = &registry.host().updates().last().unwrap().1;
        assert_eq!(last.value, None);
    }

    #[test]
    fn test_restart_seeds_from_host_display() {
        let mut registry = DeviceRegistry::new(MemoryHost::new());
        let external_id = registry.host_mut().occupy(slot(9), "Bedroom (0x60)");
        registry
            .host_mut()
            .set_display(external_id, "18.5;61;1")
            .unwrap();
        registry.insert_record(DeviceRecord {
            address: "0x60".to_string(),
            name: "Bedroom".to_string(),
            slots: vec![SlotEntry {
                slot: slot(9),
                capability: Capability::TemperatureHumidity,
                external_id,
            }],
        });

        send(&mut registry, "0x60", json!({"Temperature": 19.25}));
        assert_eq!(value_of(&registry, 9).s_value, "19.25;61.0;1");
    }

    #[test]
    fn test_removed_host_slot_is_skipped() {
        let mut registry = registry_with("0x70", json!({"Power": 0}));
        registry.host_mut().remove(slot(1));
        send(&mut registry, "0x70", json!({"Power": 1}));
        assert!(registry.host().updates().is_empty());
    }

    #[test]
    fn test_creation_failure_releases_slot() {
        let mut registry = DeviceRegistry::new(MemoryHost::new());
        registry.host_mut().set_reject_creates(true);
        registry.handle_message(InboundMessage::DeviceInfo(
            json!({"0x80": {"Power": 1}}).as_object().cloned().unwrap(),
        ));
        assert!(registry.device("0x80").is_none());

        registry.host_mut().set_reject_creates(false);
        registry.handle_message(InboundMessage::DeviceInfo(
            json!({"0x80": {"Power": 1}}).as_object().cloned().unwrap(),
        ));
        let record = registry.device("0x80").unwrap();
        assert_eq!(record.slots[0].slot, slot(1));
        assert_eq!(record.slots[0].external_id, ExternalId(1));
    }

    #[test]
    fn test_unknown_capability_only_takes_battery() {
        let mut registry = registry_with("0x90", json!({"ModelId": "mystery"}));
        send(&mut registry, "0x90", json!({"Foo": 1}));
        assert!(registry.host().updates().is_empty());
        send(&mut registry, "0x90", json!({"BatteryPercentage": 120}));
        assert_eq!(registry.host().slot(slot(1)).unwrap().battery_level, Some(100));
    }
}
