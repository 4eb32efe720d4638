//! Bridge a Tasmota Zigbee gateway into a home-automation device registry
//!
//! The gateway publishes JSON on MQTT. This library discovers the devices behind
//! it, infers what each one is, creates one host slot per capability and keeps
//! those slots current from live telemetry. It supports:
//!
//! - Serialized discovery (`ZbStatus` then one `ZbInfo` at a time)
//! - Capability inference from overlapping attribute payloads
//! - Partial temperature/humidity updates that never reset the sibling field
//! - Calibrated lux for the Tuya TS0601 presence sensor
//! - A persisted device map so restarts do not rediscover known devices
//!
//! # Quick Start
//!
//! ```no_run
//! use zb_bridge::{Bridge, BridgeConfig, BridgeEvent, MemoryHost};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::load("zb-bridge.toml")?;
//!     let mut bridge = Bridge::start(config, MemoryHost::new()).await?;
//!
//!     let mut events = bridge.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         if let BridgeEvent::DiscoveryCompleted { devices } = event {
//!             println!("{} devices known", devices);
//!             break;
//!         }
//!     }
//!
//!     bridge.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Without MQTT
//!
//! The registry is transport-free and can be driven directly:
//!
//! ```
//! use zb_bridge::{DeviceRegistry, MemoryHost};
//!
//! let mut registry = DeviceRegistry::new(MemoryHost::new());
//! registry.handle_payload(br#"{"ZbInfo":{"0xA1B2":{"Name":"Plug","Power":0}}}"#);
//! registry.handle_payload(br#"{"ZbReceived":{"0xA1B2":{"Power":1}}}"#);
//! assert_eq!(registry.devices().len(), 1);
//! ```
//!
//! # Architecture
//!
//! - **Bridge**: MQTT task owning all state, timers for pacing and timeouts
//! - **Registry**: routes gateway messages, creates slots, renders updates
//! - **Discovery**: state machine with one outstanding request at a time
//! - **Classify / Slots / Cache / Calibration**: the pure building blocks
//! - **Host**: the home-automation side, behind the `DeviceHost` trait
//! - **Store**: the persisted device map

mod bridge;
mod cache;
mod calibration;
mod classify;
mod config;
mod discovery;
mod error;
mod host;
mod protocol;
mod registry;
mod slots;
mod store;
mod subscription;
mod types;

// Public exports
pub use bridge::Bridge;
pub use cache::{ClimateReading, ValueCache};
pub use calibration::CalibrationTable;
pub use classify::classify;
pub use config::BridgeConfig;
pub use discovery::{DiscoverySequencer, DiscoveryState, Step, DEFAULT_PACING};
pub use error::{BridgeError, Result};
pub use host::{DeviceHost, HostSlot, MemoryHost, SlotSpec};
pub use protocol::{subscribe_topics, Command, InboundMessage, Telemetry};
pub use registry::DeviceRegistry;
pub use slots::SlotAllocator;
pub use store::{DeviceMap, DeviceMapStore};
pub use subscription::{BridgeEvent, EventReceiver};
pub use types::{
    Capability, DeviceRecord, ExternalId, GatewayAddress, HostRepresentation, SlotEntry, SlotId,
    SlotUpdate, SlotValue, MAX_SLOTS,
};
