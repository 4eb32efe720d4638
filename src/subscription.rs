use crate::error::{BridgeError, Result};
use crate::types::{Capability, DeviceRecord, GatewayAddress, SlotId, SlotUpdate};
use tokio::sync::broadcast;

/// Something the bridge did that observers may care about
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// A new device got its slots during discovery
    DeviceAdded(DeviceRecord),

    /// A slot was pushed to the host
    SlotUpdated {
        address: GatewayAddress,
        slot: SlotId,
        capability: Capability,
        update: SlotUpdate,
    },

    /// A scene button reported an action (`"{endpoint}-{action}"`)
    ButtonPressed {
        address: GatewayAddress,
        action: String,
    },

    /// A discovery batch finished; `devices` is the registry size afterwards
    DiscoveryCompleted { devices: usize },
}

/// Receiver for bridge events
pub struct EventReceiver {
    rx: broadcast::Receiver<BridgeEvent>,
}

impl EventReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<BridgeEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    ///
    /// Fails with `ConnectionClosed` once the bridge has stopped.
    pub async fn recv(&mut self) -> Result<BridgeEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => BridgeError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                BridgeError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive an event without blocking
    ///
    /// Returns `None` if no event is available.
    pub fn try_recv(&mut self) -> Result<Option<BridgeEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(BridgeError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(BridgeError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }
}
