//! Capability inference from a device's detail attributes

use crate::types::Capability;
use serde_json::{Map, Value};

/// IAS zone types reported by security sensors
const ZONE_MOTION: f64 = 13.0;
const ZONE_DOOR: f64 = 21.0;
const ZONE_WATER: f64 = 42.0;

/// Infer the capabilities of a device
///
/// Zone type, temperature+humidity and illuminance are checked independently and
/// accumulate in that order. Only when none of them match does exactly one model/key
/// based fallback apply. The result is never empty.
pub fn classify(attributes: &Map<String, Value>, model_id: &str) -> Vec<Capability> {
    let mut capabilities = Vec::new();

    match attributes.get("ZoneType").and_then(Value::as_f64) {
        Some(zone) if zone == ZONE_MOTION => capabilities.push(Capability::Motion),
        Some(zone) if zone == ZONE_DOOR => capabilities.push(Capability::Door),
        Some(zone) if zone == ZONE_WATER => capabilities.push(Capability::Water),
        _ => {}
    }

    if attributes.contains_key("Temperature") && attributes.contains_key("Humidity") {
        capabilities.push(Capability::TemperatureHumidity);
    }

    if attributes.contains_key("Illuminance") {
        capabilities.push(Capability::Illuminance);
    }

    if capabilities.is_empty() {
        capabilities.push(fallback(attributes, model_id));
    }

    capabilities
}

fn fallback(attributes: &Map<String, Value>, model_id: &str) -> Capability {
    if model_id.starts_with("TS004") {
        // TS0041..TS0044 encode the button count in the last digit
        let buttons = model_id
            .chars()
            .last()
            .and_then(|c| c.to_digit(10))
            .map_or(1, |n| n as u8);
        Capability::Button(buttons)
    } else if attributes.contains_key("Dimmer") || model_id.contains("ZBT-") {
        Capability::Dimmer
    } else if attributes.contains_key("Power") {
        Capability::Switch
    } else {
        Capability::Unknown
    }
}
