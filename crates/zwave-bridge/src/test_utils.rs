//! Test doubles for the driver and bus seams
//!
//! [`MockDriver`] replays scripted mesh events and records every command and
//! named call it receives. [`MockBusConnector`] hands out [`MockBusClient`]s
//! that record subscriptions and publishes; tests drive the session by
//! emitting [`BusEvent`]s.
//!
//! # Example
//!
//! ```rust,ignore
//! use zwave_bridge::test_utils::{MockBusConnector, MockDriver};
//!
//! let (driver, mesh) = MockDriver::new();
//! let bus = MockBusConnector::new();
//!
//! mesh.emit(MeshEvent::NodeAdded { node_id: 2 }).await;
//! bus.emit(BusEvent::Connected).await;
//! assert!(bus.subscriptions().iter().any(|t| t.ends_with("/api/#")));
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use zwave_core::{MeshCommand, MeshEvent};

use crate::config::MqttConfig;
use crate::error::{GatewayError, Result};
use crate::interface::MeshDriver;
use crate::transport::{BusClient, BusConnector, BusEvent, LastWill};

// ============================================================================
// Mesh driver double
// ============================================================================

#[derive(Debug, Default)]
struct DriverLog {
    connected: bool,
    connects: usize,
    commands: Vec<MeshCommand>,
    calls: Vec<(String, Vec<Json>)>,
    results: HashMap<String, Json>,
}

/// Scripted mesh driver
pub struct MockDriver {
    events: mpsc::Receiver<MeshEvent>,
    log: Arc<Mutex<DriverLog>>,
    fail_connect: bool,
}

/// Test side of a [`MockDriver`]
#[derive(Clone)]
pub struct MockDriverHandle {
    events: mpsc::Sender<MeshEvent>,
    log: Arc<Mutex<DriverLog>>,
}

impl MockDriver {
    /// Create a driver and the handle that scripts it
    pub fn new() -> (Self, MockDriverHandle) {
        let (tx, rx) = mpsc::channel(256);
        let log = Arc::new(Mutex::new(DriverLog::default()));
        let driver = Self {
            events: rx,
            log: Arc::clone(&log),
            fail_connect: false,
        };
        (driver, MockDriverHandle { events: tx, log })
    }

    /// Make every connection attempt fail
    pub fn failing(mut self) -> Self {
        self.fail_connect = true;
        self
    }
}

impl MockDriverHandle {
    /// Deliver an event to the gateway
    pub async fn emit(&self, event: MeshEvent) {
        let _ = self.events.send(event).await;
    }

    /// Commands received so far
    pub fn commands(&self) -> Vec<MeshCommand> {
        self.log.lock().commands.clone()
    }

    /// Named calls received so far
    pub fn calls(&self) -> Vec<(String, Vec<Json>)> {
        self.log.lock().calls.clone()
    }

    /// Answer calls to `api` with `result`
    pub fn set_result(&self, api: &str, result: Json) {
        self.log.lock().results.insert(api.to_string(), result);
    }

    /// Whether the driver is connected
    pub fn is_connected(&self) -> bool {
        self.log.lock().connected
    }

    /// Number of successful connects
    pub fn connects(&self) -> usize {
        self.log.lock().connects
    }

    /// Forget recorded commands and calls
    pub fn clear(&self) {
        let mut log = self.log.lock();
        log.commands.clear();
        log.calls.clear();
    }
}

#[async_trait]
impl MeshDriver for MockDriver {
    async fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(GatewayError::ConnectFailed {
                address: "mock".into(),
                attempts: 1,
            });
        }
        let mut log = self.log.lock();
        log.connected = true;
        log.connects += 1;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.log.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.log.lock().connected
    }

    async fn next_event(&mut self) -> Option<MeshEvent> {
        if !self.is_connected() {
            return std::future::pending().await;
        }
        match self.events.recv().await {
            Some(event) => Some(event),
            None => {
                self.log.lock().connected = false;
                None
            }
        }
    }

    async fn send(&mut self, command: MeshCommand) -> Result<()> {
        let mut log = self.log.lock();
        if !log.connected {
            return Err(GatewayError::DriverNotConnected);
        }
        log.commands.push(command);
        Ok(())
    }

    async fn call(&mut self, api: &str, args: Vec<Json>) -> Result<Json> {
        let mut log = self.log.lock();
        if !log.connected {
            return Err(GatewayError::DriverNotConnected);
        }
        log.calls.push((api.to_string(), args));
        Ok(log.results.get(api).cloned().unwrap_or(Json::Null))
    }

    fn name(&self) -> &str {
        "MockDriver"
    }
}

// ============================================================================
// Bus double
// ============================================================================

/// A recorded publish
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    /// Full topic
    pub topic: String,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Delivery guarantee
    pub qos: u8,
    /// Retain flag
    pub retain: bool,
}

impl Published {
    /// Payload decoded as JSON
    pub fn json(&self) -> Json {
        serde_json::from_slice(&self.payload).unwrap_or(Json::Null)
    }
}

#[derive(Debug, Default)]
struct BusLog {
    connects: usize,
    disconnects: usize,
    client_ids: Vec<String>,
    wills: Vec<LastWill>,
    subscriptions: Vec<String>,
    published: Vec<Published>,
    session: Option<mpsc::Sender<BusEvent>>,
}

/// Bus connector handing out recording clients
#[derive(Clone, Default)]
pub struct MockBusConnector {
    log: Arc<Mutex<BusLog>>,
}

impl MockBusConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to the most recent session
    pub async fn emit(&self, event: BusEvent) {
        let session = self.log.lock().session.clone();
        if let Some(tx) = session {
            let _ = tx.send(event).await;
        }
    }

    /// Deliver an inbound message to the most recent session
    pub async fn message(&self, topic: &str, payload: &str) {
        self.emit(BusEvent::Message {
            topic: topic.to_string(),
            payload: bytes::Bytes::copy_from_slice(payload.as_bytes()),
        })
        .await;
    }

    /// Topics subscribed so far, in order
    pub fn subscriptions(&self) -> Vec<String> {
        self.log.lock().subscriptions.clone()
    }

    /// Publishes so far, in order
    pub fn published(&self) -> Vec<Published> {
        self.log.lock().published.clone()
    }

    /// Payloads published to `topic`, decoded as JSON
    pub fn published_to(&self, topic: &str) -> Vec<Json> {
        self.log
            .lock()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .map(Published::json)
            .collect()
    }

    /// Sessions opened so far
    pub fn connects(&self) -> usize {
        self.log.lock().connects
    }

    /// Sessions terminated so far
    pub fn disconnects(&self) -> usize {
        self.log.lock().disconnects
    }

    /// Client ids used by each session
    pub fn client_ids(&self) -> Vec<String> {
        self.log.lock().client_ids.clone()
    }

    /// Last-will messages registered by each session
    pub fn wills(&self) -> Vec<LastWill> {
        self.log.lock().wills.clone()
    }

    /// Forget recorded subscriptions and publishes
    pub fn clear(&self) {
        let mut log = self.log.lock();
        log.subscriptions.clear();
        log.published.clear();
    }
}

#[async_trait]
impl BusConnector for MockBusConnector {
    async fn connect(
        &self,
        _config: &MqttConfig,
        client_id: &str,
        will: LastWill,
    ) -> Result<(Box<dyn BusClient>, mpsc::Receiver<BusEvent>)> {
        let (tx, rx) = mpsc::channel(256);
        {
            let mut log = self.log.lock();
            log.connects += 1;
            log.client_ids.push(client_id.to_string());
            log.wills.push(will);
            log.session = Some(tx);
        }
        let client = MockBusClient {
            log: Arc::clone(&self.log),
        };
        Ok((Box::new(client), rx))
    }
}

/// Recording bus client
pub struct MockBusClient {
    log: Arc<Mutex<BusLog>>,
}

#[async_trait]
impl BusClient for MockBusClient {
    async fn subscribe(&self, topic: &str, _qos: u8) -> Result<()> {
        self.log.lock().subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: u8, retain: bool) -> Result<()> {
        self.log.lock().published.push(Published {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut log = self.log.lock();
        log.disconnects += 1;
        log.session = None;
        Ok(())
    }
}
