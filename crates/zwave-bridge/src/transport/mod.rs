//! Message bus seam
//!
//! The [`MqttBridge`](crate::bridge::MqttBridge) reaches the broker through
//! two traits: a [`BusConnector`] that opens a session and a [`BusClient`]
//! that acts on it. Session notifications arrive as [`BusEvent`]s on an
//! `mpsc` channel.
//!
//! - [`mqtt::MqttConnector`] - rumqttc based connector (requires `mqtt` feature)

#[cfg(feature = "mqtt")]
mod mqtt;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttConnector;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::MqttConfig;
use crate::error::Result;

/// Notification from a bus session
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// Broker acknowledged the connection
    Connected,
    /// Connection lost
    Disconnected,
    /// Inbound publish
    Message {
        /// Full topic
        topic: String,
        /// Raw payload
        payload: Bytes,
    },
    /// Transport failure
    Error(String),
}

/// Message the broker publishes when the session dies
#[derive(Debug, Clone, PartialEq)]
pub struct LastWill {
    /// Topic
    pub topic: String,
    /// Payload
    pub payload: Vec<u8>,
    /// Delivery guarantee
    pub qos: u8,
    /// Retain flag
    pub retain: bool,
}

/// Operations on an open bus session
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Subscribe to a topic filter
    async fn subscribe(&self, topic: &str, qos: u8) -> Result<()>;

    /// Publish a payload
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: u8, retain: bool) -> Result<()>;

    /// Terminate the session
    async fn disconnect(&self) -> Result<()>;
}

/// Opens bus sessions
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Open a session, returning its client and event stream
    async fn connect(
        &self,
        config: &MqttConfig,
        client_id: &str,
        will: LastWill,
    ) -> Result<(Box<dyn BusClient>, mpsc::Receiver<BusEvent>)>;
}
