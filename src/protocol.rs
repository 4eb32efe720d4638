//! Tasmota Zigbee gateway message shapes
//!
//! Inbound payloads are JSON objects classified by their top-level key; outbound
//! commands are plain publishes to `cmnd/{gateway}/...`.

use crate::error::{BridgeError, Result};
use crate::types::GatewayAddress;
use serde_json::{Map, Value};

/// Device list response (`ZbStatus1`)
pub const STATUS_KEY: &str = "ZbStatus1";
/// Device detail response (`ZbInfo`)
pub const INFO_KEY: &str = "ZbInfo";
/// Live telemetry (`ZbReceived`)
pub const RECEIVED_KEY: &str = "ZbReceived";

/// Topics carrying gateway responses and telemetry
pub fn subscribe_topics(gateway: &str) -> Vec<String> {
    vec![
        format!("tele/{}/SENSOR", gateway),
        format!("stat/{}/RESULT", gateway),
    ]
}

/// Message received from the gateway
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Addresses of all paired devices, in gateway order
    DeviceList(Vec<GatewayAddress>),
    /// Detail attributes keyed by address
    DeviceInfo(Map<String, Value>),
    /// Telemetry fields keyed by address
    Telemetry(Map<String, Value>),
}

impl InboundMessage {
    /// Parse a raw payload
    ///
    /// Returns `Ok(None)` for well-formed JSON without a recognized key.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        let value: Value = serde_json::from_slice(payload)?;
        Self::from_value(value)
    }

    /// Classify an already-decoded payload
    pub fn from_value(value: Value) -> Result<Option<Self>> {
        let Value::Object(mut obj) = value else {
            return Err(BridgeError::InvalidMessage(
                "payload is not an object".to_string(),
            ));
        };

        if let Some(list) = obj.remove(STATUS_KEY) {
            let entries = match list {
                Value::Array(entries) => entries,
                _ => {
                    return Err(BridgeError::InvalidMessage(format!(
                        "{} is not an array",
                        STATUS_KEY
                    )))
                }
            };
            let addresses = entries
                .iter()
                .filter_map(|entry| entry.get("Device").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            return Ok(Some(Self::DeviceList(addresses)));
        }

        if let Some(info) = obj.remove(INFO_KEY) {
            // A malformed detail still answers the outstanding request
            let info = match info {
                Value::Object(map) => map,
                other => {
                    tracing::warn!("{} is not an object: {}", INFO_KEY, other);
                    Map::new()
                }
            };
            return Ok(Some(Self::DeviceInfo(info)));
        }

        if let Some(received) = obj.remove(RECEIVED_KEY) {
            let Value::Object(map) = received else {
                return Err(BridgeError::InvalidMessage(format!(
                    "{} is not an object",
                    RECEIVED_KEY
                )));
            };
            return Ok(Some(Self::Telemetry(map)));
        }

        Ok(None)
    }
}

/// Command sent to the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask for the list of paired devices
    ListDevices,
    /// Ask for the attributes of one device
    DeviceInfo(GatewayAddress),
}

impl Command {
    /// Topic for this command on the given gateway
    pub fn topic(&self, gateway: &str) -> String {
        match self {
            Self::ListDevices => format!("cmnd/{}/ZbStatus", gateway),
            Self::DeviceInfo(_) => format!("cmnd/{}/ZbInfo", gateway),
        }
    }

    /// Raw command payload
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Self::ListDevices => Vec::new(),
            Self::DeviceInfo(address) => address.as_bytes().to_vec(),
        }
    }
}

/// Typed access to one device's telemetry fields
#[derive(Debug, Clone, Copy)]
pub struct Telemetry<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> Telemetry<'a> {
    pub fn new(fields: &'a Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Numeric comparison; booleans count as 0/1
    pub fn equals(&self, key: &str, expected: f64) -> Option<bool> {
        match self.fields.get(key)? {
            Value::Bool(b) => Some(f64::from(u8::from(*b)) == expected),
            Value::Number(n) => Some(n.as_f64() == Some(expected)),
            _ => Some(false),
        }
    }

    /// Numeric field as a float
    pub fn number(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    /// Integer field; booleans map to 0/1
    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.fields.get(key)? {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
    }

    /// Truthiness of a field (non-zero numbers, `true`, non-empty strings)
    pub fn flag(&self, key: &str) -> Option<bool> {
        let on = match self.fields.get(key)? {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Null => false,
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        };
        Some(on)
    }

    /// Field rendered as display text (strings unquoted)
    pub fn text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}
