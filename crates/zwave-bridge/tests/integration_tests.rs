//! Integration tests for the Z-Wave to MQTT gateway
//!
//! These tests run the full gateway loop against the mock driver and mock
//! bus and verify:
//! - Mesh state publishing and write subscriptions
//! - Inbound writes, broadcasts and api calls
//! - Scene management and activation through the api
//! - Session handling (replay, update, shutdown)

use serde_json::{json, Value as Json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use zwave_bridge::{
    BusEvent, Gateway, GatewayConfig, GatewayEvent, GatewayHandle, MockBusConnector, MockDriver,
    MockDriverHandle, MqttConfig,
};
use zwave_core::{MeshCommand, MeshEvent, NodeInfo, Value, ValueId, ValuePayload};
use zwave_state::{DocumentStore, MemoryStore};

const STATUS_TOPIC: &str = "zwave/_CLIENTS/ZWAVE_GATEWAY-zwave/status";
const API_BASE: &str = "zwave/_CLIENTS/ZWAVE_GATEWAY-zwave/api";

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    handle: GatewayHandle,
    mesh: MockDriverHandle,
    bus: MockBusConnector,
    docs: Arc<dyn DocumentStore>,
    events: broadcast::Receiver<GatewayEvent>,
    task: JoinHandle<zwave_bridge::Result<()>>,
}

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn start_with(driver: MockDriver, mesh: MockDriverHandle, connect_bus: bool) -> Harness {
    let bus = MockBusConnector::new();
    let docs: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let (gateway, handle) = Gateway::new(
        &GatewayConfig::default(),
        driver,
        Arc::new(bus.clone()),
        Arc::clone(&docs),
    )
    .await
    .unwrap();

    let events = handle.subscribe_events();
    let task = tokio::spawn(gateway.run());

    eventually("bus session", || bus.connects() == 1).await;
    if connect_bus {
        bus.emit(BusEvent::Connected).await;
        eventually("online status", || !bus.published_to(STATUS_TOPIC).is_empty()).await;
    }

    Harness {
        handle,
        mesh,
        bus,
        docs,
        events,
        task,
    }
}

async fn start() -> Harness {
    let (driver, mesh) = MockDriver::new();
    let h = start_with(driver, mesh, true).await;
    eventually("driver connect", || h.mesh.is_connected()).await;
    h
}

fn switch_info(name: &str) -> NodeInfo {
    NodeInfo {
        manufacturer: "AEON Labs".into(),
        manufacturer_id: 0x86,
        product: "Smart Switch 6".into(),
        product_type: 3,
        product_id: 96,
        name: name.into(),
        ..Default::default()
    }
}

fn switch_value(node_id: u8, on: bool) -> Value {
    Value::new(ValueId::new(node_id, 37, 1, 0), on).with_label("Switch")
}

impl Harness {
    async fn wait_event(&mut self, what: &str, pred: impl Fn(&GatewayEvent) -> bool) -> GatewayEvent {
        let deadline = Duration::from_secs(2);
        tokio::time::timeout(deadline, async {
            loop {
                match self.events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("event stream closed: {e}"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
    }

    async fn add_switch(&mut self, node_id: u8, name: &str) {
        self.mesh.emit(MeshEvent::NodeAdded { node_id }).await;
        self.mesh
            .emit(MeshEvent::ValueAdded {
                value: switch_value(node_id, false),
            })
            .await;
        self.mesh
            .emit(MeshEvent::NodeReady {
                node_id,
                info: switch_info(name),
            })
            .await;
        self.wait_event("node status", |e| {
            matches!(e, GatewayEvent::NodeStatus { node_id: id, .. } if *id == node_id)
        })
        .await;
    }

    async fn api(&self, api: &str, args: Vec<Json>) -> zwave_bridge::ApiResult {
        self.handle.call_api(api, args).await.unwrap()
    }

    async fn stop(self) -> (MockBusConnector, MockDriverHandle, Arc<dyn DocumentStore>) {
        self.handle.shutdown().await.unwrap();
        self.task.await.unwrap().unwrap();
        (self.bus, self.mesh, self.docs)
    }
}

fn set_value(node_id: u8, value: impl Into<ValuePayload>) -> MeshCommand {
    MeshCommand::SetValue {
        value_id: ValueId::new(node_id, 37, 1, 0),
        value: value.into(),
    }
}

// ============================================================================
// Mesh → bus
// ============================================================================

#[tokio::test]
async fn test_node_ready_publishes_state_and_subscribes() {
    let mut h = start().await;
    h.add_switch(2, "").await;

    assert_eq!(h.bus.published_to("zwave/nodeID_2/37/1/0"), vec![json!(false)]);
    assert!(h
        .bus
        .subscriptions()
        .contains(&"zwave/nodeID_2/37/1/0/set".to_string()));

    let status = h
        .bus
        .published_to("zwave/_CLIENTS/ZWAVE_GATEWAY-zwave/$devices/nodeID_2/status");
    assert_eq!(status.len(), 1);
    assert_eq!(status[0]["value"], json!(true));

    assert!(h.mesh.commands().contains(&MeshCommand::EnablePoll {
        value_id: ValueId::new(2, 37, 1, 0),
        intensity: zwave_bridge::POLL_INTENSITY,
    }));

    h.stop().await;
}

#[tokio::test]
async fn test_named_node_topics() {
    let mut h = start().await;
    h.add_switch(4, "Hall Lamp").await;

    assert_eq!(h.bus.published_to("zwave/Hall_Lamp/37/1/0"), vec![json!(false)]);

    h.mesh
        .emit(MeshEvent::ValueChanged {
            value: switch_value(4, true),
        })
        .await;
    h.wait_event("value change", |e| matches!(e, GatewayEvent::ValueChanged { .. }))
        .await;
    assert_eq!(
        h.bus.published_to("zwave/Hall_Lamp/37/1/0"),
        vec![json!(false), json!(true)]
    );

    // one subscription per value per session
    let subs = h.bus.subscriptions();
    assert_eq!(subs.iter().filter(|t| t.as_str() == "zwave/Hall_Lamp/37/1/0/set").count(), 1);

    h.stop().await;
}

#[tokio::test]
async fn test_unready_node_changes_not_published() {
    let mut h = start().await;
    h.mesh.emit(MeshEvent::NodeAdded { node_id: 6 }).await;
    h.mesh
        .emit(MeshEvent::ValueAdded {
            value: switch_value(6, false),
        })
        .await;
    h.mesh
        .emit(MeshEvent::ValueChanged {
            value: switch_value(6, true),
        })
        .await;
    h.mesh.emit(MeshEvent::ScanComplete).await;
    h.wait_event("scan complete", |e| matches!(e, GatewayEvent::ScanComplete { .. }))
        .await;

    assert!(h.bus.published_to("zwave/nodeID_6/37/1/0").is_empty());
    assert!(h
        .mesh
        .commands()
        .iter()
        .any(|c| matches!(c, MeshCommand::SetPollInterval { interval_ms: 60_000 })));

    h.stop().await;
}

#[tokio::test]
async fn test_subscriptions_replayed_on_connect() {
    let (driver, mesh) = MockDriver::new();
    let mut h = start_with(driver, mesh, false).await;
    eventually("driver connect", || h.mesh.is_connected()).await;

    h.add_switch(2, "").await;
    assert!(h.bus.subscriptions().is_empty());

    h.bus.emit(BusEvent::Connected).await;
    eventually("replay", || h.bus.subscriptions().len() == 3).await;
    assert_eq!(
        h.bus.subscriptions(),
        vec![
            "zwave/nodeID_2/37/1/0/set".to_string(),
            "zwave/_CLIENTS/ZWAVE_GATEWAY-zwave/broadcast/#".to_string(),
            "zwave/_CLIENTS/ZWAVE_GATEWAY-zwave/api/#".to_string(),
        ]
    );

    h.stop().await;
}

#[tokio::test]
async fn test_driver_ready_starts_fresh_session() {
    let mut h = start().await;
    h.add_switch(2, "").await;

    h.mesh.emit(MeshEvent::DriverReady { home_id: 0xC0FFEE }).await;
    h.wait_event("driver ready", |e| matches!(e, GatewayEvent::DriverReady { .. }))
        .await;

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.nodes, 0);
    assert_eq!(status.home_id, Some(0xC0FFEE));

    h.add_switch(2, "").await;
    let subs = h.bus.subscriptions();
    assert_eq!(subs.iter().filter(|t| t.as_str() == "zwave/nodeID_2/37/1/0/set").count(), 2);

    h.stop().await;
}

// ============================================================================
// Bus → mesh
// ============================================================================

#[tokio::test]
async fn test_inbound_write_reaches_driver() {
    let mut h = start().await;
    h.add_switch(2, "").await;
    h.mesh.clear();

    h.bus.message("zwave/nodeID_2/37/1/0/set", "true").await;
    eventually("write", || !h.mesh.commands().is_empty()).await;
    assert_eq!(h.mesh.commands(), vec![set_value(2, true)]);

    // unknown node is dropped
    h.bus.message("zwave/nodeID_9/37/1/0/set", "true").await;
    h.handle.write_value(ValueId::new(2, 37, 1, 0), false).await.unwrap();
    assert_eq!(h.mesh.commands(), vec![set_value(2, true), set_value(2, false)]);

    h.stop().await;
}

#[tokio::test]
async fn test_broadcast_writes_every_node_and_echoes() {
    let mut h = start().await;
    h.add_switch(2, "").await;
    h.add_switch(3, "").await;
    h.mesh.clear();

    let topic = "zwave/_CLIENTS/ZWAVE_GATEWAY-zwave/broadcast/134-96-3/37/1/0";
    h.bus.message(&format!("{topic}/set"), "1").await;

    eventually("echo", || !h.bus.published_to(topic).is_empty()).await;
    assert_eq!(h.bus.published_to(topic), vec![json!(1)]);

    let commands = h.mesh.commands();
    assert_eq!(commands.len(), 2);
    assert!(commands.contains(&set_value(2, 1)));
    assert!(commands.contains(&set_value(3, 1)));

    // unknown template
    let err = h
        .handle
        .write_broadcast("1-2-3".parse().unwrap(), "37-1-0".parse().unwrap(), true)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    h.stop().await;
}

#[tokio::test]
async fn test_api_over_mqtt() {
    let h = start().await;
    h.mesh.set_result("getNodes", json!([1, 2]));

    h.bus.message(&format!("{API_BASE}/getNodes/set"), "[]").await;
    let reply_topic = format!("{API_BASE}/getNodes");
    eventually("api reply", || !h.bus.published_to(&reply_topic).is_empty()).await;

    assert_eq!(
        h.bus.published_to(&reply_topic)[0],
        json!({"success": true, "message": "Success zwave api call", "result": [1, 2]})
    );
    assert_eq!(h.mesh.calls(), vec![("getNodes".to_string(), vec![])]);

    // single value payload becomes a one element argument list
    h.bus.message(&format!("{API_BASE}/createScene/set"), "Evening").await;
    let reply_topic = format!("{API_BASE}/createScene");
    eventually("create reply", || !h.bus.published_to(&reply_topic).is_empty()).await;
    assert_eq!(h.bus.published_to(&reply_topic)[0]["result"], json!(1));

    h.stop().await;
}

// ============================================================================
// Scenes
// ============================================================================

#[tokio::test]
async fn test_scene_lifecycle() {
    let mut h = start().await;
    h.add_switch(2, "").await;
    h.add_switch(3, "").await;
    h.mesh.clear();

    let created = h.api("createScene", vec![json!("Evening")]).await;
    assert!(created.success);
    let scene_id = created.result.unwrap();

    let added = h
        .api(
            "addSceneValue",
            vec![scene_id.clone(), json!(2), json!(37), json!(1), json!(0), json!(true)],
        )
        .await;
    assert!(added.success, "{}", added.message);

    let added = h
        .api(
            "addSceneValue",
            vec![
                scene_id.clone(),
                json!({"node_id": 3, "class_id": 37, "instance": 1, "index": 0}),
                json!(false),
                json!(1),
            ],
        )
        .await;
    assert!(added.success, "{}", added.message);

    let missing = h
        .api(
            "addSceneValue",
            vec![scene_id.clone(), json!(9), json!(37), json!(1), json!(0), json!(true)],
        )
        .await;
    assert!(!missing.success);

    let values = h.api("sceneGetValues", vec![scene_id.clone()]).await;
    assert_eq!(values.result.unwrap().as_array().unwrap().len(), 2);

    let activated = h.api("activateScene", vec![scene_id.clone()]).await;
    assert_eq!(activated.result, Some(json!(2)));

    eventually("scene writes", || h.mesh.commands().len() == 2).await;
    assert_eq!(h.mesh.commands(), vec![set_value(2, true), set_value(3, false)]);

    let removed = h
        .api(
            "removeSceneValue",
            vec![scene_id.clone(), json!(3), json!(37), json!(1), json!(0)],
        )
        .await;
    assert!(removed.success);

    let scenes = h.handle.scenes().await.unwrap();
    assert_eq!(scenes.len(), 1);
    assert_eq!(scenes[0].label, "Evening");
    assert_eq!(scenes[0].values.len(), 1);

    let (_, _, docs) = h.stop().await;
    let stored = docs.get("scenes").await.unwrap().unwrap();
    assert_eq!(stored[0]["sceneid"], json!(1));
    assert_eq!(stored[0]["values"][0]["value_id"], json!("2-37-1-0"));
}

#[tokio::test]
async fn test_scene_delay_arguments() {
    let mut h = start().await;
    h.add_switch(2, "").await;

    let scene_id = h.api("createScene", vec![json!("Fade")]).await.result.unwrap();
    let write = |delay: Json| {
        vec![scene_id.clone(), json!(2), json!(37), json!(1), json!(0), json!(true), delay]
    };

    let added = h.api("addSceneValue", write(json!(1.5))).await;
    assert!(added.success, "{}", added.message);
    assert_eq!(h.handle.scenes().await.unwrap()[0].values[0].timeout, 1.5);

    let rejected = h.api("addSceneValue", write(json!(-3))).await;
    assert!(!rejected.success);
    let rejected = h.api("addSceneValue", write(json!("later"))).await;
    assert!(!rejected.success);
    assert_eq!(h.handle.scenes().await.unwrap()[0].values[0].timeout, 1.5);

    h.stop().await;
}

#[tokio::test]
async fn test_unknown_scene_errors() {
    let h = start().await;

    let result = h.api("removeScene", vec![json!(42)]).await;
    assert!(!result.success);
    assert_eq!(result.message, "Scene not found: 42");

    let result = h.api("activateScene", vec![json!(42)]).await;
    assert!(!result.success);

    let result = h.api("removeSceneValue", vec![json!(42), json!(2)]).await;
    assert!(!result.success);

    h.stop().await;
}

#[tokio::test]
async fn test_set_and_get_scenes() {
    let h = start().await;
    let doc = json!([
        {"sceneid": 5, "label": "Away", "values": []},
        {"sceneid": 7, "label": "Home", "values": []},
    ]);

    let result = h.api("setScenes", vec![doc.clone()]).await;
    assert!(result.success);
    assert_eq!(result.result, Some(doc.clone()));

    let result = h.api("getScenes", vec![]).await;
    assert_eq!(result.result, Some(doc));

    let created = h.api("createScene", vec![json!("Night")]).await;
    assert_eq!(created.result, Some(json!(8)));

    h.stop().await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_api_requires_connected_driver() {
    let (driver, mesh) = MockDriver::new();
    let h = start_with(driver.failing(), mesh, true).await;

    let result = h.api("getNodes", vec![]).await;
    assert!(!result.success);
    assert_eq!(result.message, "Zwave client not connected");
    assert!(result.result.is_none());

    let status = h.handle.status().await.unwrap();
    assert!(!status.driver_connected);
    assert!(status.mqtt.connected);

    h.stop().await;
}

#[tokio::test]
async fn test_update_mqtt_restarts_session() {
    let h = start().await;

    let config = MqttConfig {
        name: "attic".into(),
        ..Default::default()
    };
    h.handle.update_mqtt(config).await.unwrap();

    assert_eq!(h.bus.connects(), 2);
    assert_eq!(h.bus.disconnects(), 1);
    assert_eq!(h.bus.client_ids()[1], "ZWAVE_GATEWAY-attic");

    let status = h.handle.status().await.unwrap();
    assert!(!status.mqtt.connected);
    assert_eq!(status.mqtt.config.name, "attic");

    h.stop().await;
}

#[tokio::test]
async fn test_update_mqtt_resubscribes_value_topics() {
    let mut h = start().await;
    h.add_switch(2, "").await;
    h.mesh.clear();

    let config = MqttConfig {
        prefix: "home".into(),
        ..Default::default()
    };
    h.handle.update_mqtt(config).await.unwrap();
    h.bus.clear();

    h.bus.emit(BusEvent::Connected).await;
    eventually("write subscription", || {
        h.bus
            .subscriptions()
            .contains(&"home/nodeID_2/37/1/0/set".to_string())
    })
    .await;
    assert_eq!(h.bus.subscriptions()[0], "home/nodeID_2/37/1/0/set");

    // later changes do not subscribe twice
    h.mesh
        .emit(MeshEvent::ValueChanged {
            value: switch_value(2, true),
        })
        .await;
    h.wait_event("value change", |e| matches!(e, GatewayEvent::ValueChanged { .. }))
        .await;
    assert_eq!(h.bus.published_to("home/nodeID_2/37/1/0"), vec![json!(true)]);
    let subs = h.bus.subscriptions();
    assert_eq!(subs.iter().filter(|t| t.as_str() == "home/nodeID_2/37/1/0/set").count(), 1);

    h.bus.message("home/nodeID_2/37/1/0/set", "false").await;
    eventually("write", || !h.mesh.commands().is_empty()).await;
    assert_eq!(h.mesh.commands(), vec![set_value(2, false)]);

    h.stop().await;
}

#[tokio::test]
async fn test_shutdown_publishes_offline_status() {
    let h = start().await;
    let (bus, mesh, _) = h.stop().await;

    let status = bus.published_to(STATUS_TOPIC);
    assert_eq!(status.len(), 2);
    assert_eq!(status[0]["value"], json!(true));
    assert_eq!(status[1]["value"], json!(false));
    assert_eq!(bus.disconnects(), 1);
    assert!(!mesh.is_connected());
}
