//! Gateway - the event loop tying mesh, bus and scenes together
//!
//! The [`Gateway`] owns every component by value and runs a single
//! `tokio::select!` loop over four sources:
//!
//! - mesh driver notifications, applied through the [`MeshEventAdapter`]
//! - bus session notifications and inbound commands from the [`MqttBridge`]
//! - scene writes whose timer fired
//! - [`GatewayHandle`] requests
//!
//! Observers follow the normalized [`GatewayEvent`] stream through
//! [`GatewayHandle::subscribe_events`].

use serde::Serialize;
use serde_json::{json, Value as Json};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use zwave_core::{DeviceKey, MeshCommand, MeshEvent, Scene, Value, ValueId, ValueKey, ValuePayload};
use zwave_state::DocumentStore;

use crate::adapter::{GatewayEvent, MeshEventAdapter};
use crate::bridge::{BridgeStatus, MqttBridge};
use crate::config::{GatewayConfig, MqttConfig};
use crate::error::{GatewayError, Result};
use crate::interface::MeshDriver;
use crate::registry::DeviceRegistry;
use crate::scenes::SceneStore;
use crate::scheduler::SceneScheduler;
use crate::topic::{node_segment, payload_from_json, BroadcastTarget, InboundCommand};
use crate::transport::BusConnector;

/// Message of every successful API call
pub const API_SUCCESS: &str = "Success zwave api call";

/// Capacity of the observer event channel
const EVENT_CAPACITY: usize = 1024;

/// Outcome of a named operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResult {
    /// Whether the call succeeded
    pub success: bool,
    /// Human readable outcome
    pub message: String,
    /// Returned data, absent on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Json>,
}

impl ApiResult {
    fn ok(result: Json) -> Self {
        Self {
            success: true,
            message: API_SUCCESS.to_string(),
            result: Some(result),
        }
    }

    fn failed(err: &GatewayError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            result: None,
        }
    }
}

/// Gateway status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayStatus {
    /// Bus connectivity
    pub mqtt: BridgeStatus,
    /// Whether the mesh driver is connected
    pub driver_connected: bool,
    /// Home id of the current driver session
    pub home_id: Option<u32>,
    /// Known nodes
    pub nodes: usize,
    /// Stored scenes
    pub scenes: usize,
}

/// Commands that can be sent to the gateway
#[derive(Debug)]
pub enum GatewayCommand {
    /// Invoke a named operation
    CallApi {
        /// Operation name
        api: String,
        /// Positional arguments
        args: Vec<Json>,
        /// Reply channel
        reply: oneshot::Sender<ApiResult>,
    },
    /// Write a single value
    WriteValue {
        /// Target value
        value_id: ValueId,
        /// Payload
        value: ValuePayload,
        /// Reply channel
        reply: oneshot::Sender<Result<()>>,
    },
    /// Write a value on every node of a device template
    WriteBroadcast {
        /// Template
        device: DeviceKey,
        /// Value inside each node
        key: ValueKey,
        /// Payload
        value: ValuePayload,
        /// Reply channel, receives the number of written nodes
        reply: oneshot::Sender<Result<usize>>,
    },
    /// Get gateway status
    GetStatus(oneshot::Sender<GatewayStatus>),
    /// Get all scenes
    GetScenes(oneshot::Sender<Vec<Scene>>),
    /// Restart the bus session with a new configuration
    UpdateMqtt {
        /// New configuration
        config: MqttConfig,
        /// Reply channel
        reply: oneshot::Sender<Result<()>>,
    },
    /// Shutdown the gateway
    Shutdown,
}

/// Handle for controlling the Gateway
#[derive(Clone)]
pub struct GatewayHandle {
    command_tx: mpsc::Sender<GatewayCommand>,
    events_tx: broadcast::Sender<GatewayEvent>,
}

impl GatewayHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> GatewayCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(build(tx))
            .await
            .map_err(|_| GatewayError::ChannelClosed)?;
        rx.await.map_err(|_| GatewayError::ChannelClosed)
    }

    /// Invoke a named operation
    pub async fn call_api(&self, api: impl Into<String>, args: Vec<Json>) -> Result<ApiResult> {
        let api = api.into();
        self.request(|reply| GatewayCommand::CallApi { api, args, reply })
            .await
    }

    /// Write a single value
    pub async fn write_value(&self, value_id: ValueId, value: impl Into<ValuePayload>) -> Result<()> {
        let value = value.into();
        self.request(|reply| GatewayCommand::WriteValue {
            value_id,
            value,
            reply,
        })
        .await?
    }

    /// Write a value on every node of a device template
    pub async fn write_broadcast(
        &self,
        device: DeviceKey,
        key: ValueKey,
        value: impl Into<ValuePayload>,
    ) -> Result<usize> {
        let value = value.into();
        self.request(|reply| GatewayCommand::WriteBroadcast {
            device,
            key,
            value,
            reply,
        })
        .await?
    }

    /// Get gateway status
    pub async fn status(&self) -> Result<GatewayStatus> {
        self.request(GatewayCommand::GetStatus).await
    }

    /// Get all scenes
    pub async fn scenes(&self) -> Result<Vec<Scene>> {
        self.request(GatewayCommand::GetScenes).await
    }

    /// Restart the bus session with a new configuration
    pub async fn update_mqtt(&self, config: MqttConfig) -> Result<()> {
        self.request(|reply| GatewayCommand::UpdateMqtt { config, reply })
            .await?
    }

    /// Follow normalized gateway events
    pub fn subscribe_events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events_tx.subscribe()
    }

    /// Shutdown the gateway
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(GatewayCommand::Shutdown)
            .await
            .map_err(|_| GatewayError::ChannelClosed)
    }
}

/// Main gateway service connecting the mesh driver to the message bus
pub struct Gateway<D: MeshDriver> {
    /// Mesh driver connection
    driver: D,
    /// Bus session
    bridge: MqttBridge,
    /// Node and value cache
    registry: DeviceRegistry,
    /// Driver notification adapter
    adapter: MeshEventAdapter,
    /// Stored scenes
    scenes: SceneStore,
    /// Scene timers
    scheduler: SceneScheduler,
    /// Writes of fired scene timers
    scheduled_rx: mpsc::Receiver<MeshCommand>,
    /// Command receiver
    command_rx: mpsc::Receiver<GatewayCommand>,
    /// Observer events
    events_tx: broadcast::Sender<GatewayEvent>,
    /// Values whose write topic was subscribed in this driver session
    subscribed: HashSet<ValueId>,
}

impl<D: MeshDriver + 'static> Gateway<D> {
    /// Create a gateway, loading stored scenes
    pub async fn new(
        config: &GatewayConfig,
        driver: D,
        connector: Arc<dyn BusConnector>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<(Self, GatewayHandle)> {
        let scenes = SceneStore::load(store, config.storage.scenes_key.clone()).await?;
        let (scheduler, scheduled_rx) = SceneScheduler::channel();

        let (command_tx, command_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let handle = GatewayHandle {
            command_tx,
            events_tx: events_tx.clone(),
        };

        let gateway = Self {
            driver,
            bridge: MqttBridge::new(config.mqtt.clone(), connector),
            registry: DeviceRegistry::new(),
            adapter: MeshEventAdapter::new(config.zwave.poll_interval),
            scenes,
            scheduler,
            scheduled_rx,
            command_rx,
            events_tx,
            subscribed: HashSet::new(),
        };

        Ok((gateway, handle))
    }

    /// Run the gateway service
    ///
    /// This method runs the main event loop until a shutdown is requested,
    /// then publishes the offline status, closes the bus session, disconnects
    /// the driver and flushes pending scene writes.
    pub async fn run(mut self) -> Result<()> {
        info!(driver = self.driver.name(), "Starting Z-Wave gateway");

        if let Err(e) = self.bridge.start().await {
            warn!("MQTT session not started: {}", e);
        }

        match self.driver.connect().await {
            Ok(()) => info!(driver = self.driver.name(), "Connected to mesh driver"),
            Err(e) => {
                error!("Failed to connect to mesh driver: {}", e);
                self.emit(GatewayEvent::DriverFailed);
            }
        }

        // Main event loop
        loop {
            tokio::select! {
                // Handle mesh driver notifications
                event = self.driver.next_event() => {
                    match event {
                        Some(event) => self.on_mesh_event(event).await,
                        None => {
                            warn!("Mesh driver event stream ended");
                            self.emit(GatewayEvent::DriverFailed);
                        }
                    }
                }

                // Handle bus notifications
                Some(event) = self.bridge.recv() => {
                    if let Some(command) = self.bridge.handle(event).await {
                        self.on_inbound(command).await;
                    }
                }

                // Handle fired scene timers
                Some(command) = self.scheduled_rx.recv() => {
                    if let Err(e) = self.driver.send(command).await {
                        warn!("Scene write failed: {}", e);
                    }
                }

                // Handle commands
                Some(cmd) = self.command_rx.recv() => {
                    if !self.on_command(cmd).await {
                        info!("Gateway shutdown requested");
                        break;
                    }
                }
            }
        }

        self.bridge.publish_status(false).await;
        self.bridge.close().await;
        if let Err(e) = self.driver.disconnect().await {
            warn!("Error disconnecting from mesh driver: {}", e);
        }
        self.scenes.flush().await;

        info!("Z-Wave gateway stopped");
        Ok(())
    }

    fn emit(&self, event: GatewayEvent) {
        // no observers is fine
        let _ = self.events_tx.send(event);
    }

    // ========================================================================
    // Mesh → bus
    // ========================================================================

    async fn on_mesh_event(&mut self, event: MeshEvent) {
        let reaction = self.adapter.handle(&mut self.registry, event);

        for command in reaction.commands {
            if let Err(e) = self.driver.send(command).await {
                warn!("Driver command failed: {}", e);
            }
        }

        for event in reaction.events {
            self.on_gateway_event(&event).await;
            self.emit(event);
        }
    }

    async fn on_gateway_event(&mut self, event: &GatewayEvent) {
        match event {
            GatewayEvent::DriverReady { .. } => {
                self.subscribed.clear();
            }
            GatewayEvent::DriverFailed => {
                error!("Mesh driver failed");
            }
            GatewayEvent::ValueChanged { value, .. } => {
                self.publish_value(value).await;
            }
            GatewayEvent::NodeStatus { node_id, ready, .. } => {
                if let Some(node) = self.registry.node(*node_id) {
                    let name = node_segment(node);
                    self.bridge.publish_device_status(&name, *ready).await;
                }
            }
            _ => {}
        }
    }

    async fn publish_value(&mut self, value: &Value) {
        let Some(node) = self.registry.node(value.node_id) else {
            return;
        };
        let topic = self.bridge.router().value_topic(node, &value.key());
        trace!(topic = %topic, value = ?value.value, "Publishing value");

        self.bridge.publish(&topic, &value.value.to_json()).await;

        if value.is_writable() && self.subscribed.insert(value.id()) {
            self.bridge.subscribe(&topic).await;
        }
    }

    /// Queue write subscriptions for every writable value of the ready nodes
    async fn resubscribe_values(&mut self) {
        self.subscribed.clear();

        let router = self.bridge.router();
        let topics: Vec<(ValueId, String)> = self
            .registry
            .nodes()
            .filter(|node| node.ready)
            .flat_map(|node| {
                node.values
                    .values()
                    .filter(|value| value.is_writable())
                    .map(move |value| (value.id(), router.value_topic(node, &value.key())))
            })
            .collect();

        debug!(count = topics.len(), "Resubscribing value write topics");
        for (value_id, topic) in topics {
            self.subscribed.insert(value_id);
            self.bridge.subscribe(&topic).await;
        }
    }

    // ========================================================================
    // Bus → mesh
    // ========================================================================

    async fn on_inbound(&mut self, command: InboundCommand) {
        match command {
            InboundCommand::Write { path, value } => {
                let outcome = match (path.resolve(&self.registry), payload_from_json(&value)) {
                    (Ok(value_id), Some(payload)) => self.write_value(value_id, payload).await,
                    (Err(e), _) => Err(e),
                    (Ok(value_id), None) => Err(GatewayError::invalid_args(
                        "writeValue",
                        format!("unsupported payload for {value_id}: {value}"),
                    )),
                };
                if let Err(e) = outcome {
                    debug!("Write request dropped: {}", e);
                }
            }

            InboundCommand::Broadcast {
                feedback_topic,
                target: BroadcastTarget { device, key },
                value,
            } => {
                let Some(payload) = payload_from_json(&value) else {
                    debug!(topic = %feedback_topic, "Unsupported broadcast payload");
                    return;
                };
                match self.write_broadcast(device, key, payload).await {
                    Ok(count) => {
                        debug!(device_id = %device, nodes = count, "Broadcast written");
                        self.bridge.publish(&feedback_topic, &value).await;
                    }
                    Err(e) => debug!(device_id = %device, "Broadcast dropped: {}", e),
                }
            }

            InboundCommand::Api {
                reply_topic,
                api,
                args,
            } => {
                let args = match args {
                    Json::Array(args) => args,
                    other => vec![other],
                };
                let result = self.call_api(&api, args).await;
                match serde_json::to_value(&result) {
                    Ok(doc) => self.bridge.publish(&reply_topic, &doc).await,
                    Err(e) => warn!(api = %api, "Failed to encode api result: {}", e),
                }
            }
        }
    }

    async fn write_value(&mut self, value_id: ValueId, value: ValuePayload) -> Result<()> {
        self.registry.resolve(&value_id)?;
        debug!(value_id = %value_id, ?value, "Writing value");
        self.driver
            .send(MeshCommand::SetValue { value_id, value })
            .await
    }

    async fn write_broadcast(
        &mut self,
        device: DeviceKey,
        key: ValueKey,
        value: ValuePayload,
    ) -> Result<usize> {
        let template = self
            .registry
            .device(&device)
            .ok_or_else(|| GatewayError::DeviceNotFound(device.to_string()))?;
        if !template.has_value(&key) {
            return Err(GatewayError::ValueNotFound(format!("{device}/{key}")));
        }
        if !self.driver.is_connected() {
            return Err(GatewayError::DriverNotConnected);
        }

        let targets: Vec<ValueId> = self
            .registry
            .nodes_with_device(&device)
            .map(|node| key.on_node(node.node_id))
            .collect();

        for value_id in &targets {
            self.driver
                .send(MeshCommand::SetValue {
                    value_id: *value_id,
                    value: value.clone(),
                })
                .await?;
        }
        Ok(targets.len())
    }

    // ========================================================================
    // Named operations
    // ========================================================================

    async fn call_api(&mut self, api: &str, args: Vec<Json>) -> ApiResult {
        let outcome = if self.driver.is_connected() {
            self.dispatch_api(api, args).await
        } else {
            Err(GatewayError::DriverNotConnected)
        };

        match outcome {
            Ok(result) => {
                debug!(api, "{}", API_SUCCESS);
                ApiResult::ok(result)
            }
            Err(e) => {
                debug!(api, code = e.error_code(), "Api call failed: {}", e);
                ApiResult::failed(&e)
            }
        }
    }

    async fn dispatch_api(&mut self, api: &str, args: Vec<Json>) -> Result<Json> {
        match api {
            "createScene" => {
                let label = match args.first() {
                    Some(Json::String(label)) => label.clone(),
                    Some(other) => other.to_string(),
                    None => return Err(GatewayError::invalid_args(api, "missing label")),
                };
                Ok(json!(self.scenes.create(label)))
            }
            "removeScene" => {
                self.scenes.remove(scene_id_arg(api, &args)?)?;
                Ok(json!(true))
            }
            "setScenes" => {
                let doc = args
                    .into_iter()
                    .next()
                    .ok_or_else(|| GatewayError::invalid_args(api, "missing scenes"))?;
                let scenes: Vec<Scene> = serde_json::from_value(doc.clone())
                    .map_err(|e| GatewayError::invalid_args(api, e.to_string()))?;
                self.scenes.set_scenes(scenes);
                Ok(doc)
            }
            "getScenes" => Ok(serde_json::to_value(self.scenes.scenes())?),
            "sceneGetValues" => {
                let values = self.scenes.values(scene_id_arg(api, &args)?)?;
                Ok(serde_json::to_value(values)?)
            }
            "addSceneValue" => {
                let scene_id = scene_id_arg(api, &args)?;
                let (target, value, timeout) = scene_value_args(api, &args[1..])?;
                self.scenes
                    .upsert_value(&self.registry, scene_id, target, value, timeout)?;
                Ok(json!(true))
            }
            "removeSceneValue" => {
                let scene_id = scene_id_arg(api, &args)?;
                let target = scene_target_args(api, &args[1..])?;
                self.scenes.remove_value(scene_id, target)?;
                Ok(json!(true))
            }
            "activateScene" => {
                let scheduled = self
                    .scheduler
                    .activate(&self.scenes, scene_id_arg(api, &args)?)?;
                Ok(json!(scheduled))
            }
            _ => self.driver.call(api, args).await,
        }
    }

    // ========================================================================
    // Handle requests
    // ========================================================================

    /// Returns false when the loop should stop
    async fn on_command(&mut self, cmd: GatewayCommand) -> bool {
        match cmd {
            GatewayCommand::CallApi { api, args, reply } => {
                let result = self.call_api(&api, args).await;
                let _ = reply.send(result);
            }
            GatewayCommand::WriteValue {
                value_id,
                value,
                reply,
            } => {
                let result = self.write_value(value_id, value).await;
                let _ = reply.send(result);
            }
            GatewayCommand::WriteBroadcast {
                device,
                key,
                value,
                reply,
            } => {
                let result = self.write_broadcast(device, key, value).await;
                let _ = reply.send(result);
            }
            GatewayCommand::GetStatus(reply) => {
                let _ = reply.send(self.status());
            }
            GatewayCommand::GetScenes(reply) => {
                let _ = reply.send(self.scenes.scenes().to_vec());
            }
            GatewayCommand::UpdateMqtt { config, reply } => {
                let result = self.bridge.update(config).await;
                // the new session starts with an empty queue, possibly under a new prefix
                self.resubscribe_values().await;
                let _ = reply.send(result);
            }
            GatewayCommand::Shutdown => return false,
        }
        true
    }

    fn status(&self) -> GatewayStatus {
        GatewayStatus {
            mqtt: self.bridge.status(),
            driver_connected: self.driver.is_connected(),
            home_id: self.adapter.home_id(),
            nodes: self.registry.len(),
            scenes: self.scenes.scenes().len(),
        }
    }
}

// ============================================================================
// Argument parsing
// ============================================================================

fn u64_arg(value: &Json) -> Option<u64> {
    match value {
        Json::Number(n) => n.as_u64(),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scene_id_arg(api: &str, args: &[Json]) -> Result<u32> {
    args.first()
        .and_then(u64_arg)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| GatewayError::invalid_args(api, "missing or invalid scene id"))
}

fn value_id_from_object(value: &Json) -> Option<ValueId> {
    if let Some(id) = value.get("value_id").and_then(Json::as_str) {
        return id.parse().ok();
    }
    let field = |name: &str| value.get(name).and_then(u64_arg);
    Some(ValueId::new(
        u8::try_from(field("node_id")?).ok()?,
        u8::try_from(field("class_id")?).ok()?,
        u8::try_from(field("instance")?).ok()?,
        u16::try_from(field("index")?).ok()?,
    ))
}

fn value_id_from_parts(parts: &[Json]) -> Option<ValueId> {
    let [node_id, class_id, instance, index] = parts else {
        return None;
    };
    Some(ValueId::new(
        u8::try_from(u64_arg(node_id)?).ok()?,
        u8::try_from(u64_arg(class_id)?).ok()?,
        u8::try_from(u64_arg(instance)?).ok()?,
        u16::try_from(u64_arg(index)?).ok()?,
    ))
}

/// Scene delay in seconds; missing or null means none
fn delay_arg(api: &str, value: Option<&Json>) -> Result<f64> {
    let delay = match value {
        None | Some(Json::Null) => return Ok(0.0),
        Some(Json::Number(n)) => n.as_f64(),
        Some(Json::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    delay.filter(|d| d.is_finite() && *d >= 0.0).ok_or_else(|| {
        let shown = value.map(Json::to_string).unwrap_or_default();
        GatewayError::invalid_args(api, format!("invalid timeout {shown}"))
    })
}

/// `[{valueId}, value, timeout?]` or `[node, class, instance, index, value, timeout?]`
fn scene_value_args(api: &str, args: &[Json]) -> Result<(ValueId, ValuePayload, f64)> {
    let missing = || GatewayError::invalid_args(api, "no value id found in parameters");

    let (target, rest) = match args.first() {
        Some(obj @ Json::Object(_)) if args.len() >= 2 => {
            (value_id_from_object(obj).ok_or_else(missing)?, &args[1..])
        }
        _ if args.len() >= 5 => (value_id_from_parts(&args[..4]).ok_or_else(missing)?, &args[4..]),
        _ => return Err(missing()),
    };

    let value = payload_from_json(&rest[0])
        .ok_or_else(|| GatewayError::invalid_args(api, format!("unsupported value {}", rest[0])))?;
    let timeout = delay_arg(api, rest.get(1))?;

    Ok((target, value, timeout))
}

/// `[{valueId}]` or `[node, class, instance, index]`
fn scene_target_args(api: &str, args: &[Json]) -> Result<ValueId> {
    let target = match args {
        [obj] => value_id_from_object(obj),
        parts @ [_, _, _, _] => value_id_from_parts(parts),
        _ => None,
    };
    target.ok_or_else(|| GatewayError::invalid_args(api, "no value id found in parameters"))
}
