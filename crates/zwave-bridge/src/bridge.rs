//! MqttBridge - bus session management
//!
//! The bridge owns the bus session and its connection state machine:
//!
//! ```text
//! Disconnected ──start──► Connecting ──ConnAck──► Connected
//!                                                    │
//!                          ◄──ConnAck── Reconnecting ◄┤ connection lost
//!                                                    │
//!                                          Closed ◄──┘ close()
//! ```
//!
//! Write subscriptions requested while not connected are queued and replayed,
//! in submission order, on the next connect. Each connect then subscribes to
//! the action wildcards and publishes the retained gateway status.
//!
//! Inbound messages are decoded by the [`TopicRouter`] and handed back to the
//! caller as [`InboundCommand`]s; dispatch happens in the gateway loop.

use serde::Serialize;
use serde_json::Value as Json;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::MqttConfig;
use crate::error::Result;
use crate::interface::ConnectionState;
use crate::topic::{encode_status, InboundCommand, TopicRouter};
use crate::transport::{BusClient, BusConnector, BusEvent, LastWill};

/// QoS of status publishes
const STATUS_QOS: u8 = 1;

/// Bridge connectivity report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeStatus {
    /// Whether the bus session is up
    pub connected: bool,
    /// Last transport error, `"Offline"` when none was recorded
    pub error: String,
    /// Active configuration
    pub config: MqttConfig,
}

/// Bus session with subscription replay and status publishing
pub struct MqttBridge {
    config: MqttConfig,
    router: TopicRouter,
    connector: Arc<dyn BusConnector>,
    client: Option<Box<dyn BusClient>>,
    events: Option<mpsc::Receiver<BusEvent>>,
    state: ConnectionState,
    closed: bool,
    queue: VecDeque<String>,
    last_error: Option<String>,
}

impl MqttBridge {
    /// Create a bridge; nothing connects until [`start`](Self::start)
    pub fn new(config: MqttConfig, connector: Arc<dyn BusConnector>) -> Self {
        let router = TopicRouter::from_config(&config);
        Self {
            config,
            router,
            connector,
            client: None,
            events: None,
            state: ConnectionState::Disconnected,
            closed: false,
            queue: VecDeque::new(),
            last_error: None,
        }
    }

    /// Topic router for the active configuration
    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the bus session is up
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Relative topics waiting for the next connect
    pub fn queued(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    /// Open the bus session
    pub async fn start(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        self.closed = false;

        let will = LastWill {
            topic: self.router.status_topic(),
            payload: serde_json::to_vec(&serde_json::json!({ "value": false }))?,
            qos: STATUS_QOS,
            retain: true,
        };

        match self
            .connector
            .connect(&self.config, self.router.client_id(), will)
            .await
        {
            Ok((client, events)) => {
                self.client = Some(client);
                self.events = Some(events);
                Ok(())
            }
            Err(e) => {
                warn!("Error while connecting MQTT: {}", e);
                self.last_error = Some(e.to_string());
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Wait for the next session notification
    ///
    /// Cancel-safe. Never resolves while no session is open.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };

        let event = events.recv().await;
        if event.is_none() {
            debug!("Bus session ended");
            self.events = None;
            if !self.closed {
                self.state = ConnectionState::Disconnected;
            }
        }
        event
    }

    /// Apply a session notification, returning any decoded inbound command
    pub async fn handle(&mut self, event: BusEvent) -> Option<InboundCommand> {
        match event {
            BusEvent::Connected => {
                self.on_connect().await;
                None
            }
            BusEvent::Disconnected => {
                if self.state == ConnectionState::Connected {
                    info!("MQTT client offline");
                    self.state = ConnectionState::Reconnecting;
                }
                None
            }
            BusEvent::Error(message) => {
                self.last_error = Some(message);
                None
            }
            BusEvent::Message { topic, payload } => {
                if self.closed {
                    trace!(topic = %topic, "Ignoring message after close");
                    return None;
                }
                match self.router.decode(&topic, &payload) {
                    Ok(command) => Some(command),
                    Err(e) => {
                        debug!("Dropping inbound message: {}", e);
                        None
                    }
                }
            }
        }
    }

    async fn on_connect(&mut self) {
        if self.closed {
            return;
        }
        info!(client_id = self.router.client_id(), "MQTT client connected");
        self.state = ConnectionState::Connected;

        let queued: Vec<String> = self.queue.drain(..).collect();
        for relative in queued {
            self.subscribe(&relative).await;
        }

        for topic in self.router.action_subscriptions() {
            self.subscribe_raw(&topic).await;
        }

        self.publish_status(true).await;
    }

    /// Subscribe to write requests for a relative topic, queueing while offline
    pub async fn subscribe(&mut self, relative: &str) {
        if !self.is_connected() {
            trace!(topic = relative, "Queueing subscription");
            self.queue.push_back(relative.to_string());
            return;
        }
        let topic = self.router.set_topic(relative);
        self.subscribe_raw(&topic).await;
    }

    async fn subscribe_raw(&self, topic: &str) {
        let Some(client) = self.client.as_ref() else {
            return;
        };
        if let Err(e) = client.subscribe(topic, self.config.qos).await {
            warn!(topic, "Error while subscribing: {}", e);
        }
    }

    /// Publish JSON data on a relative topic with the configured QoS and retain flag
    pub async fn publish(&self, relative: &str, data: &Json) {
        let topic = self.router.full(relative);
        match serde_json::to_vec(data) {
            Ok(payload) => {
                self.publish_raw(&topic, payload, self.config.qos, self.config.retain)
                    .await
            }
            Err(e) => warn!(topic = %topic, "Error while encoding a value: {}", e),
        }
    }

    /// Publish the gateway status
    pub async fn publish_status(&self, connected: bool) {
        let topic = self.router.status_topic();
        self.publish_raw(&topic, encode_status(connected), STATUS_QOS, true)
            .await;
    }

    /// Publish the status of a tracked device
    pub async fn publish_device_status(&self, name: &str, connected: bool) {
        let topic = self.router.device_status_topic(name);
        self.publish_raw(&topic, encode_status(connected), STATUS_QOS, true)
            .await;
    }

    async fn publish_raw(&self, topic: &str, payload: Vec<u8>, qos: u8, retain: bool) {
        if !self.is_connected() {
            trace!(topic, "Dropping publish while offline");
            return;
        }
        let Some(client) = self.client.as_ref() else {
            return;
        };
        if let Err(e) = client.publish(topic, payload, qos, retain).await {
            warn!(topic, "Error while publishing a value: {}", e);
        }
    }

    /// Terminate the session; inbound messages are ignored from now on
    pub async fn close(&mut self) {
        self.closed = true;
        self.state = ConnectionState::Closed;
        self.events = None;

        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                warn!("Error while closing MQTT client: {}", e);
            }
        }
        info!("MQTT client closed");
    }

    /// Close, then start again with a new configuration and an empty queue
    pub async fn update(&mut self, config: MqttConfig) -> Result<()> {
        self.close().await;
        info!("Restarting MQTT client after update");

        self.router = TopicRouter::from_config(&config);
        self.config = config;
        self.queue.clear();
        self.last_error = None;
        self.state = ConnectionState::Disconnected;

        self.start().await
    }

    /// Connectivity report
    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            connected: self.is_connected(),
            error: self
                .last_error
                .clone()
                .unwrap_or_else(|| "Offline".to_string()),
            config: self.config.clone(),
        }
    }
}

impl std::fmt::Debug for MqttBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBridge")
            .field("client_id", &self.router.client_id())
            .field("state", &self.state)
            .field("closed", &self.closed)
            .field("queued", &self.queue.len())
            .finish()
    }
}
