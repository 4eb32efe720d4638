use serde::{Deserialize, Serialize};
use std::fmt;

/// Gateway address of a physical endpoint (e.g. `0xA1B2`)
pub type GatewayAddress = String;

/// Highest slot id the host accepts
pub const MAX_SLOTS: u8 = 255;

/// Locally-addressable slot id in `1..=MAX_SLOTS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SlotId(u8);

impl SlotId {
    /// Create a slot id, rejecting zero
    pub const fn new(value: u8) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Get the raw slot number
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for SlotId {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "slot id 0 is reserved".to_string())
    }
}

impl From<SlotId> for u8 {
    fn from(slot: SlotId) -> Self {
        slot.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque handle the host returns when a slot is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(pub u64);

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Functional role inferred from a device's reported attributes
///
/// Serialized as the compact tag stored in the device map (`temp_hum`, `button_4`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Capability {
    TemperatureHumidity,
    Illuminance,
    Motion,
    Door,
    Water,
    Dimmer,
    Switch,
    /// Scene button panel with `n` buttons
    Button(u8),
    Unknown,
}

impl Capability {
    /// Tag used in the persisted device map
    pub fn tag(&self) -> String {
        match self {
            Self::TemperatureHumidity => "temp_hum".to_string(),
            Self::Illuminance => "lux".to_string(),
            Self::Motion => "motion".to_string(),
            Self::Door => "door".to_string(),
            Self::Water => "water".to_string(),
            Self::Dimmer => "dimmer".to_string(),
            Self::Switch => "switch".to_string(),
            Self::Button(n) => format!("button_{}", n),
            Self::Unknown => "unknown".to_string(),
        }
    }

    /// Parse a persisted tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        let capability = match tag {
            "temp_hum" => Self::TemperatureHumidity,
            "lux" => Self::Illuminance,
            "motion" => Self::Motion,
            "door" => Self::Door,
            "water" => Self::Water,
            "dimmer" => Self::Dimmer,
            "switch" => Self::Switch,
            "unknown" => Self::Unknown,
            other => {
                let n = other.strip_prefix("button_")?.parse().ok()?;
                Self::Button(n)
            }
        };
        Some(capability)
    }

    /// Human-readable description used in slot names
    pub fn description(&self) -> String {
        match self {
            Self::TemperatureHumidity => "Temp+Hum".to_string(),
            Self::Illuminance => "Lux".to_string(),
            Self::Motion => "Motion".to_string(),
            Self::Door => "Door".to_string(),
            Self::Water => "Water".to_string(),
            Self::Dimmer => "Dimmer".to_string(),
            Self::Switch => "Switch".to_string(),
            Self::Button(n) => format!("{}-button", n),
            Self::Unknown => "Unknown".to_string(),
        }
    }

    /// Concrete host representation for this capability
    ///
    /// The host interprets these numbers, so they must not change.
    pub fn representation(&self) -> HostRepresentation {
        match self {
            Self::TemperatureHumidity => HostRepresentation::Named("Temp+Hum"),
            Self::Illuminance => HostRepresentation::typed(246, 1, None),
            Self::Motion => HostRepresentation::typed(244, 73, Some(8)),
            Self::Water => HostRepresentation::typed(244, 73, Some(11)),
            Self::Door => HostRepresentation::typed(244, 73, Some(2)),
            Self::Dimmer => HostRepresentation::typed(244, 73, Some(7)),
            Self::Button(_) | Self::Unknown => HostRepresentation::typed(243, 19, None),
            Self::Switch => HostRepresentation::Named("Switch"),
        }
    }
}

impl TryFrom<String> for Capability {
    type Error = String;

    fn try_from(tag: String) -> std::result::Result<Self, Self::Error> {
        Self::from_tag(&tag).ok_or_else(|| format!("unknown capability tag: {}", tag))
    }
}

impl From<Capability> for String {
    fn from(capability: Capability) -> Self {
        capability.tag()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// How the host stores and renders a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRepresentation {
    /// Host-side named device type (e.g. `Temp+Hum`)
    Named(&'static str),
    /// Numeric type/subtype with an optional switch type
    Typed {
        device_type: u8,
        subtype: u8,
        switch_type: Option<u8>,
    },
}

impl HostRepresentation {
    const fn typed(device_type: u8, subtype: u8, switch_type: Option<u8>) -> Self {
        Self::Typed {
            device_type,
            subtype,
            switch_type,
        }
    }
}

/// One slot of a device: where it lives locally and in the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    pub slot: SlotId,
    pub capability: Capability,
    pub external_id: ExternalId,
}

/// A physical endpoint known to the registry
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub address: GatewayAddress,
    pub name: String,
    /// Slots in capability order
    pub slots: Vec<SlotEntry>,
}

/// State pushed to a host slot: numeric value plus display string
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotValue {
    pub n_value: i64,
    pub s_value: String,
}

impl SlotValue {
    pub fn new(n_value: i64, s_value: impl Into<String>) -> Self {
        Self {
            n_value,
            s_value: s_value.into(),
        }
    }

    /// Numeric-only value with an empty display string
    pub fn level(n_value: i64) -> Self {
        Self::new(n_value, "")
    }
}

/// One update for a host slot
///
/// `value: None` leaves the primary value untouched, which is how battery-only
/// updates are expressed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotUpdate {
    pub value: Option<SlotValue>,
    pub battery_level: Option<u8>,
}

impl SlotUpdate {
    /// Check if the update carries nothing
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.battery_level.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_tags_parse_back() {
        for capability in [
            Capability::TemperatureHumidity,
            Capability::Illuminance,
            Capability::Motion,
            Capability::Door,
            Capability::Water,
            Capability::Dimmer,
            Capability::Switch,
            Capability::Button(4),
            Capability::Unknown,
        ] {
            assert_eq!(Capability::from_tag(&capability.tag()), Some(capability));
        }
        assert_eq!(Capability::from_tag("button_x"), None);
        assert_eq!(Capability::from_tag("heater"), None);
    }

    #[test]
    fn switch_types_match_host_semantics() {
        let switch_type = |c: Capability| match c.representation() {
            HostRepresentation::Typed { switch_type, .. } => switch_type,
            HostRepresentation::Named(_) => None,
        };
        assert_eq!(switch_type(Capability::Motion), Some(8));
        assert_eq!(switch_type(Capability::Door), Some(2));
        assert_eq!(switch_type(Capability::Water), Some(11));
        assert_eq!(switch_type(Capability::Dimmer), Some(7));
        assert_eq!(
            Capability::TemperatureHumidity.representation(),
            HostRepresentation::Named("Temp+Hum")
        );
    }

    #[test]
    fn slot_id_rejects_zero() {
        assert!(SlotId::new(0).is_none());
        assert!(serde_json::from_str::<SlotId>("0").is_err());
        assert_eq!(serde_json::from_str::<SlotId>("7").ok(), SlotId::new(7));
    }
}
