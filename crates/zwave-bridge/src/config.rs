//! Configuration types for the gateway
//!
//! This module provides configuration structures for the MQTT connection,
//! the mesh driver connection and scene persistence, plus the fixed topic
//! protocol constants.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Topic segment under which per-gateway topics live
pub const CLIENTS_PREFIX: &str = "_CLIENTS";

/// Topic segment for tracked device status topics
pub const DEVICES_PREFIX: &str = "$devices";

/// Topic segment for consumers mirroring broadcast values
pub const BROADCAST_PREFIX: &str = "_BROADCAST";

/// Prefix of the bus client identifier
pub const NAME_PREFIX: &str = "ZWAVE_GATEWAY-";

/// Suffix marking a topic as a write request
pub const SET_SUFFIX: &str = "set";

/// Action topics every gateway subscribes to
pub const ACTIONS: [&str; 2] = ["broadcast", "api"];

/// Default MQTT port
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Main configuration for the gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// MQTT connection settings
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Mesh driver settings
    #[serde(default)]
    pub zwave: ZwaveConfig,

    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// MQTT connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Gateway name, part of the client id
    #[serde(default = "default_name")]
    pub name: String,

    /// Broker host
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root topic prefix
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// QoS used for value publishes (0, 1 or 2)
    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Retain flag used for value publishes
    #[serde(default = "default_true")]
    pub retain: bool,

    /// Start with a clean session
    #[serde(default = "default_true")]
    pub clean: bool,

    /// Keep-alive interval
    #[serde(with = "humantime_serde", default = "default_keep_alive")]
    pub keep_alive: Duration,

    /// Delay between reconnection attempts
    #[serde(with = "humantime_serde", default = "default_reconnect_period")]
    pub reconnect_period: Duration,

    /// Authenticate with username/password
    #[serde(default)]
    pub auth: bool,

    /// Username, used when `auth` is set
    #[serde(default)]
    pub username: String,

    /// Password, used when `auth` is set
    #[serde(default, skip_serializing)]
    pub password: String,
}

fn default_name() -> String {
    "zwave".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_prefix() -> String {
    "zwave".to_string()
}

fn default_qos() -> u8 {
    1
}

fn default_true() -> bool {
    true
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_reconnect_period() -> Duration {
    Duration::from_secs(3)
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            host: default_host(),
            port: DEFAULT_MQTT_PORT,
            prefix: default_prefix(),
            qos: 1,
            retain: true,
            clean: true,
            keep_alive: default_keep_alive(),
            reconnect_period: default_reconnect_period(),
            auth: false,
            username: String::new(),
            password: String::new(),
        }
    }
}

/// Mesh driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZwaveConfig {
    /// Address of the driver daemon
    #[serde(default = "default_driver_address")]
    pub driver_address: String,

    /// Network security key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_key: Option<String>,

    /// Interval between poll rounds
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Ask the driver to persist its network configuration
    #[serde(default)]
    pub save_config: bool,

    /// Enable driver side logging
    #[serde(default)]
    pub logging: bool,

    /// Connection attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout for named driver API calls
    #[serde(with = "humantime_serde", default = "default_api_timeout")]
    pub api_timeout: Duration,
}

fn default_driver_address() -> String {
    "127.0.0.1:4500".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ZwaveConfig {
    fn default() -> Self {
        Self {
            driver_address: default_driver_address(),
            network_key: None,
            poll_interval: default_poll_interval(),
            save_config: false,
            logging: false,
            max_attempts: default_max_attempts(),
            api_timeout: default_api_timeout(),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the JSON documents
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,

    /// Key of the scene collection document
    #[serde(default = "default_scenes_key")]
    pub scenes_key: String,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("store")
}

fn default_scenes_key() -> String {
    "scenes".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
            scenes_key: default_scenes_key(),
        }
    }
}

/// Builder for GatewayConfig
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gateway name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.mqtt.name = name.into();
        self
    }

    /// Set the broker address
    pub fn broker(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.mqtt.host = host.into();
        self.config.mqtt.port = port;
        self
    }

    /// Set the root topic prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.mqtt.prefix = prefix.into();
        self
    }

    /// Set the QoS for value publishes, clamped to 2
    pub fn qos(mut self, qos: u8) -> Self {
        self.config.mqtt.qos = qos.min(2);
        self
    }

    /// Set the retain flag for value publishes
    pub fn retain(mut self, retain: bool) -> Self {
        self.config.mqtt.retain = retain;
        self
    }

    /// Enable username/password authentication
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.mqtt.auth = true;
        self.config.mqtt.username = username.into();
        self.config.mqtt.password = password.into();
        self
    }

    /// Set the driver daemon address
    pub fn driver_address(mut self, address: impl Into<String>) -> Self {
        self.config.zwave.driver_address = address.into();
        self
    }

    /// Set the poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.zwave.poll_interval = interval;
        self
    }

    /// Set the store directory
    pub fn store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage.dir = dir.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
