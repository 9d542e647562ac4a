//! Z-Wave mesh to MQTT translation layer
//!
//! This crate mirrors the state of a Z-Wave mesh onto an MQTT broker and
//! turns broker messages back into mesh writes. It sits between a mesh driver
//! (which owns the radio) and the message bus.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                             Gateway                               │
//! ├───────────────────────────────────────────────────────────────────┤
//! │                                                                   │
//! │  ┌─────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │ MeshDriver  │──►│ MeshEventAdapter │──►│ MqttBridge       │    │
//! │  │ (TCP)       │   │ DeviceRegistry   │   │ TopicRouter      │    │
//! │  └─────────────┘   └──────────────────┘   │ BusConnector     │    │
//! │        ▲                                  └──────────────────┘    │
//! │        │           ┌──────────────────┐            │              │
//! │        └───────────│ SceneStore       │◄───────────┘ api/broadcast│
//! │       writes       │ SceneScheduler   │                           │
//! │                    └──────────────────┘                           │
//! │                                                                   │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zwave_bridge::{Gateway, GatewayConfig, MqttConnector, TcpDriver};
//! use zwave_state::JsonFileStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::default();
//!     let store = Arc::new(JsonFileStore::open(&config.storage.dir).await?);
//!     let driver = TcpDriver::new(config.zwave.clone());
//!
//!     let (gateway, handle) =
//!         Gateway::new(&config, driver, Arc::new(MqttConnector::new()), store).await?;
//!     let task = tokio::spawn(gateway.run());
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await?;
//!     task.await??;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `mqtt` - rumqttc based bus connector (default)
//! - `tcp` - TCP driver for an external driver daemon (default)
//! - `full` - Enable everything
//!
//! # Topics
//!
//! All topics live under the configured prefix:
//!
//! - `_CLIENTS/<clientId>/status` - retained gateway status `{value, time}`
//! - `_CLIENTS/<clientId>/$devices/<name>/status` - per node status
//! - `<node>/<class>/<instance>/<index>` - value state, `/set` to write
//! - `_CLIENTS/<clientId>/broadcast/<deviceId>/<class>/<instance>/<index>/set`
//! - `_CLIENTS/<clientId>/api/<operation>/set`

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Core modules
pub mod config;
pub mod error;
pub mod interface;
pub mod transport;

// Domain state
pub mod adapter;
pub mod registry;
pub mod scenes;
pub mod scheduler;
pub mod topic;

// Integration
pub mod bridge;
pub mod gateway;

// Testing utilities
pub mod test_utils;

pub use config::{
    GatewayConfig, GatewayConfigBuilder, MqttConfig, StorageConfig, ZwaveConfig,
    BROADCAST_PREFIX, CLIENTS_PREFIX, DEFAULT_MQTT_PORT,
};
pub use error::{GatewayError, Result};
pub use interface::{ConnectionState, MeshDriver};
pub use transport::{BusClient, BusConnector, BusEvent, LastWill};

#[cfg(feature = "tcp")]
pub use interface::TcpDriver;
#[cfg(feature = "mqtt")]
pub use transport::MqttConnector;

pub use adapter::{GatewayEvent, MeshEventAdapter, Reaction, POLL_INTENSITY};
pub use registry::{DeviceRegistry, NodeReady, ValueUpdate};
pub use scenes::SceneStore;
pub use scheduler::SceneScheduler;
pub use topic::{decode_payload, sanitize_name, InboundCommand, NodeRef, TopicRouter, ValuePath};

pub use bridge::{BridgeStatus, MqttBridge};
pub use gateway::{ApiResult, Gateway, GatewayCommand, GatewayHandle, GatewayStatus, API_SUCCESS};

pub use test_utils::{MockBusClient, MockBusConnector, MockDriver, MockDriverHandle, Published};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
