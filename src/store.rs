//! Persisted device map
//!
//! ```json
//! { "0xA1B2": { "units": [1], "types": ["temp_hum"], "idxs": [17], "name": "Bedroom" } }
//! ```

use crate::error::Result;
use crate::types::{Capability, DeviceRecord, ExternalId, GatewayAddress, SlotEntry, SlotId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Device map keyed by gateway address
pub type DeviceMap = BTreeMap<GatewayAddress, DeviceRecord>;

/// On-disk form of one device
///
/// List entries stay raw JSON until loaded so one bad entry drops only its own
/// slot, not the whole file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedDevice {
    #[serde(default)]
    units: Vec<Value>,
    #[serde(default)]
    types: Vec<Value>,
    #[serde(default)]
    idxs: Vec<Value>,
    #[serde(default)]
    name: String,
}

impl PersistedDevice {
    fn from_record(record: &DeviceRecord) -> Self {
        Self {
            units: record.slots.iter().map(|s| Value::from(s.slot.get())).collect(),
            types: record.slots.iter().map(|s| Value::from(s.capability.tag())).collect(),
            idxs: record.slots.iter().map(|s| Value::from(s.external_id.0)).collect(),
            name: record.name.clone(),
        }
    }

    fn into_record(self, address: GatewayAddress) -> DeviceRecord {
        if self.units.len() != self.types.len() || self.units.len() != self.idxs.len() {
            tracing::warn!(
                "Device {} has mismatched units/types/idxs ({}/{}/{})",
                address,
                self.units.len(),
                self.types.len(),
                self.idxs.len()
            );
        }

        let slots = self
            .units
            .into_iter()
            .zip(self.types)
            .zip(self.idxs)
            .filter_map(|((unit, tag), idx)| {
                let entry = parse_entry(&unit, &tag, &idx);
                if entry.is_none() {
                    tracing::warn!(
                        "Device {} has invalid slot entry (unit {}, type {}, idx {})",
                        address,
                        unit,
                        tag,
                        idx
                    );
                }
                entry
            })
            .collect();

        let name = if self.name.is_empty() {
            address.clone()
        } else {
            self.name
        };

        DeviceRecord {
            address,
            name,
            slots,
        }
    }
}

fn parse_entry(unit: &Value, tag: &Value, idx: &Value) -> Option<SlotEntry> {
    let slot = SlotId::deserialize(unit).ok()?;
    let capability = tag.as_str().and_then(Capability::from_tag)?;
    let external_id = idx.as_u64().map(ExternalId)?;
    Some(SlotEntry {
        slot,
        capability,
        external_id,
    })
}

/// JSON file holding the device map
#[derive(Debug, Clone)]
pub struct DeviceMapStore {
    path: PathBuf,
}

impl DeviceMapStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the map; a missing or malformed file yields an empty map
    pub fn load(&self) -> DeviceMap {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No device map at {}", self.path.display());
                return DeviceMap::new();
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", self.path.display(), e);
                return DeviceMap::new();
            }
        };

        let persisted: BTreeMap<GatewayAddress, Value> = match serde_json::from_slice(&raw) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!("Ignoring malformed device map {}: {}", self.path.display(), e);
                return DeviceMap::new();
            }
        };

        let map: DeviceMap = persisted
            .into_iter()
            .filter_map(|(address, entry)| match PersistedDevice::deserialize(entry) {
                Ok(device) => Some((address.clone(), device.into_record(address))),
                Err(e) => {
                    tracing::warn!("Skipping device {} in device map: {}", address, e);
                    None
                }
            })
            .collect();
        tracing::info!("Loaded {} devices", map.len());
        map
    }

    /// Write the map, replacing the previous file atomically
    pub fn save(&self, devices: &DeviceMap) -> Result<()> {
        let persisted: BTreeMap<&str, PersistedDevice> = devices
            .iter()
            .map(|(address, record)| (address.as_str(), PersistedDevice::from_record(record)))
            .collect();
        let json = serde_json::to_vec_pretty(&persisted)?;

        let tmp = self.temp_path();
        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        tracing::info!("Saved {} devices", devices.len());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "device_map.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
