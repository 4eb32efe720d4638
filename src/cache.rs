//! Last-known values for slots whose display merges independently-arriving fields
//!
//! The gateway reports `Temperature` and `Humidity` in separate messages, but the
//! host renders them as one `"temp;humidity;trend"` string. The cache keeps the
//! sibling field so a partial update never resets it to a default.

use crate::types::SlotId;
use std::collections::HashMap;

/// Merged temperature/humidity state for one slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temperature: f64,
    pub humidity: f64,
}

impl ClimateReading {
    pub const DEFAULT: Self = Self {
        temperature: 20.0,
        humidity: 50.0,
    };

    /// Parse the host's composite display string (`"21.5;44;1"`)
    ///
    /// Returns `None` if the string is not composite. Empty or unparsable parts
    /// fall back to the defaults.
    pub fn parse_display(display: &str) -> Option<Self> {
        if !display.contains(';') {
            return None;
        }
        let mut parts = display.split(';');
        let mut field = |default: f64| {
            parts
                .next()
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .and_then(|part| part.parse().ok())
                .unwrap_or(default)
        };
        let temperature = field(Self::DEFAULT.temperature);
        let humidity = field(Self::DEFAULT.humidity);
        Some(Self {
            temperature,
            humidity,
        })
    }

    /// Composite display string with a fixed "normal" trend marker
    pub fn display(&self) -> String {
        format!(
            "{};{};1",
            format_reading(self.temperature),
            format_reading(self.humidity)
        )
    }
}

impl Default for ClimateReading {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Per-slot merge cache
#[derive(Debug, Default)]
pub struct ValueCache {
    entries: HashMap<SlotId, ClimateReading>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a freshly created slot from the defaults
    pub fn seed(&mut self, slot: SlotId) {
        self.entries.insert(slot, ClimateReading::DEFAULT);
    }

    /// Get the cached reading for a slot
    pub fn get(&self, slot: SlotId) -> Option<ClimateReading> {
        self.entries.get(&slot).copied()
    }

    /// Check if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrite the fields present in an update and return the merged reading
    ///
    /// A slot without a cache entry (e.g. after a restart) is reconstructed from
    /// `current_display`, the value the host is showing right now. Returns `None`
    /// and leaves the cache untouched when the update carries neither field.
    pub fn merge(
        &mut self,
        slot: SlotId,
        temperature: Option<f64>,
        humidity: Option<f64>,
        current_display: impl FnOnce() -> Option<String>,
    ) -> Option<ClimateReading> {
        if temperature.is_none() && humidity.is_none() {
            return None;
        }

        let entry = self.entries.entry(slot).or_insert_with(|| {
            current_display()
                .as_deref()
                .and_then(ClimateReading::parse_display)
                .unwrap_or_default()
        });

        if let Some(temperature) = temperature {
            entry.temperature = temperature;
        }
        if let Some(humidity) = humidity {
            entry.humidity = humidity;
        }

        Some(*entry)
    }
}

/// Render a reading the way the host expects: always at least one decimal
pub(crate) fn format_reading(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}
