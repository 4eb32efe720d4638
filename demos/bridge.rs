//! Run the bridge against a real broker with an in-memory host
//!
//! ```text
//! cargo run --example bridge -- zb-bridge.toml
//! ```

use tracing_subscriber::EnvFilter;
use zb_bridge::{Bridge, BridgeConfig, BridgeEvent, MemoryHost};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "zb-bridge.toml".to_string());
    let config = BridgeConfig::load(&path)?;

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut bridge = Bridge::start(config, MemoryHost::new()).await?;
    let mut events = bridge.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(BridgeEvent::DeviceAdded(record)) => {
                    println!("+ {} ({})", record.name, record.address);
                    for entry in &record.slots {
                        println!("    unit {:>3}  {}", entry.slot, entry.capability);
                    }
                }
                Ok(BridgeEvent::SlotUpdated { address, slot, capability, update }) => {
                    if let Some(value) = update.value {
                        println!("{} unit {} {}: {} / {:?}", address, slot, capability, value.n_value, value.s_value);
                    }
                    if let Some(level) = update.battery_level {
                        println!("{} unit {} battery {}%", address, slot, level);
                    }
                }
                Ok(BridgeEvent::ButtonPressed { address, action }) => {
                    println!("{} pressed {}", address, action);
                }
                Ok(BridgeEvent::DiscoveryCompleted { devices }) => {
                    println!("discovery done, {} devices", devices);
                    for record in bridge.devices().await? {
                        println!("  {} -> {} unit(s)", record.address, record.slots.len());
                    }
                }
                Err(e) => {
                    eprintln!("event stream ended: {}", e);
                    break;
                }
            },
        }
    }

    bridge.stop().await;
    Ok(())
}
