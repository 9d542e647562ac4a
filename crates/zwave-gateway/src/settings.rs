//! Settings file loading and command line overrides

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use zwave_bridge::GatewayConfig;

/// Values given on the command line, applied over the settings file
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    /// Gateway name
    pub name: Option<String>,
    /// Broker host
    pub mqtt_host: Option<String>,
    /// Broker port
    pub mqtt_port: Option<u16>,
    /// Topic prefix
    pub prefix: Option<String>,
    /// Driver daemon address
    pub driver: Option<String>,
    /// Store directory
    pub store: Option<PathBuf>,
}

/// Load the settings file; a missing file yields the defaults
pub async fn load(path: &Path) -> anyhow::Result<GatewayConfig> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Settings file {} not found, using defaults", path.display());
            return Ok(GatewayConfig::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("reading settings from {}", path.display()))
        }
    };

    let config = serde_json::from_str(&text)
        .with_context(|| format!("parsing settings from {}", path.display()))?;
    info!("Settings loaded from {}", path.display());
    Ok(config)
}

/// Apply command line overrides
pub fn apply(mut config: GatewayConfig, overrides: Overrides) -> GatewayConfig {
    if let Some(name) = overrides.name {
        config.mqtt.name = name;
    }
    if let Some(host) = overrides.mqtt_host {
        config.mqtt.host = host;
    }
    if let Some(port) = overrides.mqtt_port {
        config.mqtt.port = port;
    }
    if let Some(prefix) = overrides.prefix {
        config.mqtt.prefix = prefix;
    }
    if let Some(driver) = overrides.driver {
        config.zwave.driver_address = driver;
    }
    if let Some(store) = overrides.store {
        config.storage.dir = store;
    }
    config
}
