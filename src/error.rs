use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while bridging the gateway into the host
#[derive(Error, Debug)]
pub enum BridgeError {
    /// MQTT client request could not be queued
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// MQTT connection error reported by the event loop
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    /// Bridge task is gone
    #[error("Connection closed")]
    ConnectionClosed,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or incomplete configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Host device registry rejected an operation
    #[error("Host error: {detail}")]
    Host {
        /// Error detail reported by the host
        detail: String,
    },

    /// Inbound payload had an unexpected shape
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl BridgeError {
    pub(crate) fn host(detail: impl Into<String>) -> Self {
        Self::Host {
            detail: detail.into(),
        }
    }
}
