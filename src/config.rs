use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Bridge configuration
///
/// Usually loaded from TOML:
///
/// ```toml
/// broker_host = "192.168.88.115"
/// gateway_topic = "Zb_gateway_28F860"
/// map_path = "/var/lib/zb-bridge/device_map.json"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_broker_host")]
    pub broker_host: String,

    #[serde(default = "default_broker_port")]
    pub broker_port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Tasmota topic of the gateway (`%topic%` in `cmnd/%topic%/...`)
    #[serde(default)]
    pub gateway_topic: String,

    /// MQTT client id prefix; a random suffix is appended per connection
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    /// Where the device map is persisted
    #[serde(default = "default_map_path")]
    pub map_path: PathBuf,

    /// Delay between consecutive detail requests
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// How long to wait for a discovery response before skipping it
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Delay between subscribing and starting the first discovery
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Verbose logging
    #[serde(default)]
    pub debug: bool,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id_prefix() -> String {
    "zb-bridge".to_string()
}

fn default_map_path() -> PathBuf {
    PathBuf::from("device_map.json")
}

fn default_pacing_ms() -> u64 {
    500
}

fn default_response_timeout_ms() -> u64 {
    10_000
}

fn default_startup_delay_ms() -> u64 {
    3_000
}

fn default_keep_alive_secs() -> u64 {
    60
}

impl BridgeConfig {
    /// Configuration for a gateway with every other setting at its default
    pub fn new(gateway_topic: impl Into<String>) -> Self {
        Self {
            broker_host: default_broker_host(),
            broker_port: default_broker_port(),
            username: None,
            password: None,
            gateway_topic: gateway_topic.into(),
            client_id_prefix: default_client_id_prefix(),
            map_path: default_map_path(),
            pacing_ms: default_pacing_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            startup_delay_ms: default_startup_delay_ms(),
            keep_alive_secs: default_keep_alive_secs(),
            debug: false,
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Check settings that have no usable default
    pub fn validate(&self) -> Result<()> {
        let topic = self.gateway_topic.trim();
        if topic.is_empty() {
            return Err(BridgeError::Config("gateway_topic is required".to_string()));
        }
        if topic.contains(['/', '+', '#']) {
            return Err(BridgeError::Config(format!(
                "gateway_topic must be a single topic level: {}",
                topic
            )));
        }
        if self.broker_host.trim().is_empty() {
            return Err(BridgeError::Config("broker_host is empty".to_string()));
        }
        Ok(())
    }

    /// Set the broker address
    pub fn with_broker(mut self, host: impl Into<String>, port: u16) -> Self {
        self.broker_host = host.into();
        self.broker_port = port;
        self
    }

    /// Set MQTT authentication
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the device map location
    pub fn with_map_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.map_path = path.into();
        self
    }

    /// Set the delay between detail requests
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing_ms = pacing.as_millis() as u64;
        self
    }

    /// Set the discovery response timeout
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the delay before the first discovery
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Enable or disable verbose logging
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    /// Fresh client id for one connection
    pub fn client_id(&self) -> String {
        format!("{}-{}", self.client_id_prefix, Uuid::new_v4().simple())
    }

    /// MQTT options for this configuration
    pub(crate) fn mqtt_options(&self) -> rumqttc::MqttOptions {
        let mut options =
            rumqttc::MqttOptions::new(self.client_id(), self.broker_host.trim(), self.broker_port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)));

        // Credentials are only meaningful as a pair
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            options.set_credentials(user, pass);
        }
        options
    }
}
