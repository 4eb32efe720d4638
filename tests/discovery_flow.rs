use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use zb_bridge::{
    BridgeEvent, Capability, Command, DeviceMapStore, DeviceRegistry, DiscoveryState, MemoryHost,
    SlotId, Step,
};

fn payload(value: serde_json::Value) -> Vec<u8> {
    value.to_string().into_bytes()
}

fn slot(n: u8) -> SlotId {
    SlotId::new(n).unwrap()
}

fn temp_store() -> (TempDir, DeviceMapStore) {
    let dir = TempDir::new().unwrap();
    let store = DeviceMapStore::new(dir.path().join("device_map.json"));
    (dir, store)
}

/// Answer every step until the batch finishes, using `detail` for each request
fn drive(
    registry: &mut DeviceRegistry<MemoryHost>,
    mut step: Step,
    detail: impl Fn(&str) -> serde_json::Value,
) -> Vec<String> {
    let mut requested = Vec::new();
    loop {
        step = match step {
            Step::Send(Command::DeviceInfo(address)) => {
                requested.push(address.clone());
                registry.handle_payload(&payload(detail(&address)))
            }
            Step::Send(Command::ListDevices) => panic!("unexpected list request"),
            Step::Pace(_) => registry.resume_discovery(),
            Step::Completed | Step::Aborted | Step::Pending => return requested,
        };
    }
}

#[test]
fn temperature_humidity_end_to_end() {
    let mut registry = DeviceRegistry::new(MemoryHost::new());

    assert_eq!(registry.start_discovery(), Step::Send(Command::ListDevices));
    let step = registry.handle_payload(&payload(json!({"ZbStatus1": [{"Device": "0xA1B2"}]})));
    assert_eq!(step, Step::Send(Command::DeviceInfo("0xA1B2".to_string())));

    let step = registry.handle_payload(&payload(json!({
        "ZbInfo": {"0xA1B2": {"Name": "Bedroom", "ModelId": "TS0201", "Temperature": 21.5, "Humidity": 44}}
    })));
    assert_eq!(step, Step::Completed);

    let record = registry.device("0xA1B2").unwrap();
    let kinds: Vec<_> = record.slots.iter().map(|s| s.capability).collect();
    assert_eq!(kinds, vec![Capability::TemperatureHumidity]);
    let unit = record.slots[0].slot;
    let cached = registry.cache().get(unit).unwrap();
    assert_eq!((cached.temperature, cached.humidity), (20.0, 50.0));

    registry.handle_payload(&payload(json!({"ZbReceived": {"0xA1B2": {"Temperature": 22.0}}})));
    let cached = registry.cache().get(unit).unwrap();
    assert_eq!((cached.temperature, cached.humidity), (22.0, 50.0));
    assert_eq!(registry.host().slot(unit).unwrap().value.s_value, "22.0;50.0;1");

    registry.handle_payload(&payload(json!({"ZbReceived": {"0xA1B2": {"Humidity": 47}}})));
    let cached = registry.cache().get(unit).unwrap();
    assert_eq!((cached.temperature, cached.humidity), (22.0, 47.0));
    assert_eq!(registry.host().slot(unit).unwrap().value.s_value, "22.0;47.0;1");
}

#[test]
fn discovery_terminates_with_malformed_details() {
    let mut registry = DeviceRegistry::new(MemoryHost::new()).with_pacing(Duration::ZERO);
    registry.start_discovery();
    let step = registry.handle_payload(&payload(json!({"ZbStatus1": [
        {"Device": "0x1"}, {"Device": "0x2"}, {"Device": "0x3"}, {"Device": "0x4"}
    ]})));

    let requested = drive(&mut registry, step, |address| match address {
        "0x2" => json!({"ZbInfo": "garbage"}),
        "0x3" => json!({"ZbInfo": {"0x3": 17}}),
        other => json!({"ZbInfo": {other: {"Power": 0}}}),
    });

    assert_eq!(requested, vec!["0x1", "0x2", "0x3", "0x4"]);
    assert_eq!(registry.sequencer().state(), &DiscoveryState::Idle);
    assert_eq!(registry.sequencer().queue().count(), 0);
    assert!(!registry.sequencer().is_in_progress());
    assert_eq!(registry.sequencer().completed_batches(), 1);
    assert_eq!(registry.devices().len(), 2);

    let completions = registry
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, BridgeEvent::DiscoveryCompleted { .. }))
        .count();
    assert_eq!(completions, 1);
}

#[test]
fn discovery_skips_unanswered_request_on_timeout() {
    let mut registry = DeviceRegistry::new(MemoryHost::new());
    registry.start_discovery();
    registry.handle_payload(&payload(json!({"ZbStatus1": [{"Device": "0x1"}, {"Device": "0x2"}]})));

    let step = registry.discovery_timeout(registry.request_seq());
    assert!(matches!(step, Step::Pace(_)));
    assert_eq!(
        registry.resume_discovery(),
        Step::Send(Command::DeviceInfo("0x2".to_string()))
    );
    let step = registry.handle_payload(&payload(json!({"ZbInfo": {"0x2": {"ZoneType": 21}}})));
    assert_eq!(step, Step::Completed);
    assert!(registry.device("0x1").is_none());
    assert!(registry.device("0x2").is_some());
}

#[test]
fn rediscovery_does_not_requeue_known_devices() {
    let mut registry = DeviceRegistry::new(MemoryHost::new());
    registry.start_discovery();
    let step = registry.handle_payload(&payload(json!({"ZbStatus1": [{"Device": "0x1"}]})));
    drive(&mut registry, step, |_| json!({"ZbInfo": {"0x1": {"ZoneType": 13}}}));
    assert_eq!(registry.host().slot_count(), 1);

    registry.start_discovery();
    let step = registry.handle_payload(&payload(json!({"ZbStatus1": [{"Device": "0x1"}, {"Device": "0x9"}]})));
    assert_eq!(step, Step::Send(Command::DeviceInfo("0x9".to_string())));
    assert_eq!(
        registry.sequencer().queue().cloned().collect::<Vec<_>>(),
        vec!["0x9".to_string()]
    );

    // a stray detail for a known device creates nothing
    registry.handle_payload(&payload(json!({"ZbInfo": {"0x1": {"ZoneType": 42}}})));
    assert_eq!(registry.device("0x1").unwrap().slots[0].capability, Capability::Motion);
    assert_eq!(registry.host().slot_count(), 1);
}

#[test]
fn telemetry_flows_during_discovery() {
    let mut registry = DeviceRegistry::new(MemoryHost::new());
    registry.handle_payload(&payload(json!({"ZbInfo": {"0x5": {"Power": 0}}})));

    registry.start_discovery();
    registry.handle_payload(&payload(json!({"ZbStatus1": [{"Device": "0x6"}]})));
    assert!(registry.sequencer().is_in_progress());

    registry.handle_payload(&payload(json!({"ZbReceived": {"0x5": {"Power": 1}}})));
    assert_eq!(registry.host().slot(slot(1)).unwrap().value.n_value, 1);
    assert_eq!(registry.sequencer().awaiting().map(String::as_str), Some("0x6"));
}

#[test]
fn slots_are_lowest_free_across_a_batch() {
    let mut host = MemoryHost::new();
    host.occupy(slot(2), "Somebody else");
    let mut registry = DeviceRegistry::new(host);

    registry.start_discovery();
    let step = registry.handle_payload(&payload(json!({"ZbStatus1": [{"Device": "0xA"}, {"Device": "0xB"}]})));
    drive(&mut registry, step, |address| match address {
        "0xA" => json!({"ZbInfo": {"0xA": {"ZoneType": 13, "Illuminance": 100}}}),
        _ => json!({"ZbInfo": {"0xB": {"Temperature": 1, "Humidity": 2}}}),
    });

    let a: Vec<_> = registry.device("0xA").unwrap().slots.iter().map(|s| s.slot).collect();
    let b: Vec<_> = registry.device("0xB").unwrap().slots.iter().map(|s| s.slot).collect();
    assert_eq!(a, vec![slot(1), slot(3)]);
    assert_eq!(b, vec![slot(4)]);
}

#[test]
fn exhausted_slot_space_skips_capabilities() {
    let mut host = MemoryHost::new();
    for n in 1..=254 {
        host.occupy(slot(n), "filler");
    }
    let mut registry = DeviceRegistry::new(host);
    registry.handle_payload(&payload(json!({
        "ZbInfo": {"0xC": {"ZoneType": 13, "Temperature": 1, "Humidity": 2}}
    })));

    let record = registry.device("0xC").unwrap();
    assert_eq!(record.slots.len(), 1);
    assert_eq!(record.slots[0].capability, Capability::Motion);
    assert_eq!(record.slots[0].slot, slot(255));
}

#[test]
fn device_map_survives_restart() {
    let (_dir, store) = temp_store();
    let path = store.path().to_path_buf();

    let mut registry = DeviceRegistry::new(MemoryHost::new()).with_store(store.clone());
    registry.start_discovery();
    let step = registry.handle_payload(&payload(json!({"ZbStatus1": [{"Device": "0xD"}]})));
    drive(&mut registry, step, |_| {
        json!({"ZbInfo": {"0xD": {"Name": "Porch", "ZoneType": 13, "Illuminance": 5}}})
    });
    assert!(path.exists());

    let restored = DeviceRegistry::new(MemoryHost::new()).with_store(store);
    let record = restored.device("0xD").unwrap();
    assert_eq!(record.name, "Porch");
    assert_eq!(
        record.slots.iter().map(|s| s.capability).collect::<Vec<_>>(),
        vec![Capability::Motion, Capability::Illuminance]
    );

    // restored slots are not handed out again
    let mut restored = restored;
    restored.handle_payload(&payload(json!({"ZbInfo": {"0xE": {"Power": 1}}})));
    assert_eq!(restored.device("0xE").unwrap().slots[0].slot, slot(3));
}
