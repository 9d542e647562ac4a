//! Topic protocol between the gateway and the message bus
//!
//! This module provides the mapping between domain state and bus topics:
//!
//! - **TopicRouter**: builds status, value and action topics under the root
//!   prefix and decodes inbound `/set` topics into [`InboundCommand`]s
//! - **sanitize_name**: turns user supplied names into topic-safe segments
//! - **decode_payload**: the single policy for reading inbound payloads
//!
//! # Topic grammar
//!
//! ```text
//! <prefix>/_CLIENTS/<clientId>/status                          gateway status
//! <prefix>/_CLIENTS/<clientId>/$devices/<name>/status          device status
//! <prefix>/<node>/<class>/<instance>/<index>[/set]             value / write
//! <prefix>/_CLIENTS/<clientId>/broadcast/<m-p-t>/<c>/<i>/<x>/set
//! <prefix>/_CLIENTS/<clientId>/api/<operation>/set
//! ```

use serde_json::Value as Json;
use tracing::trace;

use zwave_core::{DeviceKey, Node, ValueId, ValueKey, ValuePayload};

use crate::config::{
    MqttConfig, ACTIONS, CLIENTS_PREFIX, DEVICES_PREFIX, NAME_PREFIX, SET_SUFFIX,
};
use crate::error::{GatewayError, Result};
use crate::registry::DeviceRegistry;

/// Node segment prefix used when a node has no name
pub const NODE_ID_PREFIX: &str = "nodeID_";

const RESERVED: &[char] = &[
    '+', '*', '#', '\\', '.', '\'', '`', '!', '?', '^', '=', '(', ')', ',', '"', '%', '[', ']',
    ':', ';', '{', '}',
];

/// Make a name safe for use as a topic segment
///
/// Whitespace becomes `_`, reserved characters are removed.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if RESERVED.contains(&c) {
                None
            } else {
                Some(c)
            }
        })
        .collect()
}

/// Decode an inbound payload
///
/// Numeric text becomes a number, otherwise valid JSON is parsed, otherwise
/// the raw text is kept as a string.
pub fn decode_payload(payload: &[u8]) -> Json {
    let text = String::from_utf8_lossy(payload);
    let trimmed = text.trim();

    if let Ok(n) = trimmed.parse::<i64>() {
        return Json::from(n);
    }
    if let Some(n) = trimmed
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        return Json::Number(n);
    }

    serde_json::from_str(trimmed).unwrap_or_else(|_| Json::String(text.into_owned()))
}

/// Encode a status payload `{value, time}`
pub fn encode_status(value: bool) -> Vec<u8> {
    let body = serde_json::json!({
        "value": value,
        "time": chrono::Utc::now().timestamp_millis(),
    });
    body.to_string().into_bytes()
}

/// Convert a decoded payload into something writable
pub fn payload_from_json(value: &Json) -> Option<ValuePayload> {
    match value {
        Json::Bool(b) => Some(ValuePayload::Bool(*b)),
        Json::Number(n) => Some(ValuePayload::Number(n.clone())),
        Json::String(s) => Some(ValuePayload::Text(s.clone())),
        _ => None,
    }
}

/// How a value topic names its node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    /// `nodeID_<id>` segment
    Id(u8),
    /// Sanitized `[<location>-]<name>` segment
    Name(String),
}

/// Logical value path decoded from a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuePath {
    /// Node reference
    pub node: NodeRef,
    /// Value address inside the node
    pub key: ValueKey,
}

impl ValuePath {
    /// Resolve the path to a registered value
    pub fn resolve(&self, registry: &DeviceRegistry) -> Result<ValueId> {
        let node = match &self.node {
            NodeRef::Id(id) => registry.node(*id),
            NodeRef::Name(segment) => registry
                .nodes()
                .find(|n| node_segment(n) == *segment)
                .or_else(|| registry.find_node_by_name(segment)),
        }
        .ok_or_else(|| match &self.node {
            NodeRef::Id(id) => GatewayError::NodeNotFound(id.to_string()),
            NodeRef::Name(name) => GatewayError::NodeNotFound(name.clone()),
        })?;

        let id = self.key.on_node(node.node_id);
        registry.resolve(&id)?;
        Ok(id)
    }
}

/// Target of a broadcast write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastTarget {
    /// Device template the write applies to
    pub device: DeviceKey,
    /// Value address inside each node of the template
    pub key: ValueKey,
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    /// Write a single value
    Write {
        /// Target path
        path: ValuePath,
        /// Decoded payload
        value: Json,
    },
    /// Write to every node of a device template
    Broadcast {
        /// Topic, relative to the prefix, to echo the payload on
        feedback_topic: String,
        /// Target template and value
        target: BroadcastTarget,
        /// Decoded payload
        value: Json,
    },
    /// Invoke a named operation
    Api {
        /// Topic, relative to the prefix, to publish the result on
        reply_topic: String,
        /// Operation name
        api: String,
        /// Decoded payload
        args: Json,
    },
}

/// Segment naming a node in value topics
pub fn node_segment(node: &Node) -> String {
    if node.name.is_empty() {
        return format!("{NODE_ID_PREFIX}{}", node.node_id);
    }
    let name = sanitize_name(&node.name);
    if node.loc.is_empty() {
        name
    } else {
        format!("{}-{}", sanitize_name(&node.loc), name)
    }
}

/// Builds and parses gateway topics
#[derive(Debug, Clone)]
pub struct TopicRouter {
    prefix: String,
    client_id: String,
}

impl TopicRouter {
    /// Create a router for a prefix and gateway name
    pub fn new(prefix: impl Into<String>, name: &str) -> Self {
        Self {
            prefix: prefix.into(),
            client_id: sanitize_name(&format!("{NAME_PREFIX}{name}")),
        }
    }

    /// Create from MQTT configuration
    pub fn from_config(config: &MqttConfig) -> Self {
        Self::new(config.prefix.clone(), &config.name)
    }

    /// Root prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Bus client identifier
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Prepend the root prefix to a relative topic
    pub fn full(&self, relative: &str) -> String {
        format!("{}/{}", self.prefix, relative)
    }

    /// Write subscription for a relative topic
    pub fn set_topic(&self, relative: &str) -> String {
        format!("{}/{}/{}", self.prefix, relative, SET_SUFFIX)
    }

    fn client_base(&self) -> String {
        format!("{}/{}/{}", self.prefix, CLIENTS_PREFIX, self.client_id)
    }

    /// Gateway status topic
    pub fn status_topic(&self) -> String {
        format!("{}/status", self.client_base())
    }

    /// Status topic of a tracked device
    pub fn device_status_topic(&self, name: &str) -> String {
        format!(
            "{}/{}/{}/status",
            self.client_base(),
            DEVICES_PREFIX,
            sanitize_name(name)
        )
    }

    /// Wildcard subscriptions for the action topics
    pub fn action_subscriptions(&self) -> Vec<String> {
        ACTIONS
            .iter()
            .map(|action| format!("{}/{}/#", self.client_base(), action))
            .collect()
    }

    /// Relative value topic for a node's value
    pub fn value_topic(&self, node: &Node, key: &ValueKey) -> String {
        format!(
            "{}/{}/{}/{}",
            node_segment(node),
            key.class_id,
            key.instance,
            key.index
        )
    }

    /// Relative broadcast topic for a template value
    pub fn broadcast_topic(&self, device: &DeviceKey, key: &ValueKey) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}/{}",
            CLIENTS_PREFIX,
            self.client_id,
            ACTIONS[0],
            device,
            key.class_id,
            key.instance,
            key.index
        )
    }

    /// Relative api topic for an operation
    pub fn api_topic(&self, api: &str) -> String {
        format!("{}/{}/{}/{}", CLIENTS_PREFIX, self.client_id, ACTIONS[1], api)
    }

    /// Decode an inbound message
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<InboundCommand> {
        let invalid = || GatewayError::InvalidTopic(topic.to_string());

        let relative = topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(invalid)?;

        let mut parts: Vec<&str> = relative.split('/').collect();
        if parts.pop() != Some(SET_SUFFIX) {
            return Err(invalid());
        }

        let value = decode_payload(payload);
        trace!(topic, payload = %value, "Decoded inbound payload");

        if parts.first() == Some(&CLIENTS_PREFIX) {
            if parts.len() < 3 {
                return Err(invalid());
            }
            let path = parts.join("/");
            return match parts[2] {
                action if action == ACTIONS[0] => {
                    let target = parse_broadcast_target(&parts[3..]).ok_or_else(invalid)?;
                    Ok(InboundCommand::Broadcast {
                        feedback_topic: path,
                        target,
                        value,
                    })
                }
                action if action == ACTIONS[1] => {
                    let api = parts.get(3).filter(|a| !a.is_empty()).ok_or_else(invalid)?;
                    Ok(InboundCommand::Api {
                        api: api.to_string(),
                        reply_topic: path,
                        args: value,
                    })
                }
                _ => Err(invalid()),
            };
        }

        let path = parse_value_path(&parts).ok_or_else(invalid)?;
        Ok(InboundCommand::Write { path, value })
    }
}

fn parse_key(parts: &[&str]) -> Option<ValueKey> {
    match parts {
        [class_id, instance, index] => Some(ValueKey::new(
            class_id.parse().ok()?,
            instance.parse().ok()?,
            index.parse().ok()?,
        )),
        _ => None,
    }
}

fn parse_value_path(parts: &[&str]) -> Option<ValuePath> {
    let (segment, key) = parts.split_first()?;
    if segment.is_empty() {
        return None;
    }
    let key = parse_key(key)?;
    let node = match segment
        .strip_prefix(NODE_ID_PREFIX)
        .and_then(|id| id.parse().ok())
    {
        Some(id) => NodeRef::Id(id),
        None => NodeRef::Name(segment.to_string()),
    };
    Some(ValuePath { node, key })
}

fn parse_broadcast_target(parts: &[&str]) -> Option<BroadcastTarget> {
    let (device, key) = parts.split_first()?;
    Some(BroadcastTarget {
        device: device.parse().ok()?,
        key: parse_key(key)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use zwave_core::{NodeInfo, Value};

    fn router() -> TopicRouter {
        TopicRouter::new("zwave", "main")
    }

    fn named_registry() -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        registry.add_node(2);
        registry.add_node(3);
        for id in [2, 3] {
            registry
                .add_value(id, Value::new(ValueId::new(id, 38, 1, 0), 0))
                .unwrap();
        }
        let info = NodeInfo {
            name: "Kitchen Light #1 (Main)".into(),
            loc: "Ground floor".into(),
            ..Default::default()
        };
        registry.mark_node_ready(3, &info).unwrap();
        registry
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Kitchen Light #1 (Main)"), "Kitchen_Light_1_Main");
        assert_eq!(sanitize_name("a+b*c.d'e`f!g?h^i=j,k\"l%m[n]o:p;q{r}s\\t"), "abcdefghijklmnopqrst");
        assert_eq!(sanitize_name("tab\there"), "tab_here");
    }

    #[test]
    fn test_client_id_and_status_topics() {
        let router = TopicRouter::new("zwave", "my gateway");
        assert_eq!(router.client_id(), "ZWAVE_GATEWAY-my_gateway");
        assert_eq!(
            router.status_topic(),
            "zwave/_CLIENTS/ZWAVE_GATEWAY-my_gateway/status"
        );
        assert_eq!(
            router.device_status_topic("Front Door"),
            "zwave/_CLIENTS/ZWAVE_GATEWAY-my_gateway/$devices/Front_Door/status"
        );
    }

    #[test]
    fn test_action_subscriptions() {
        assert_eq!(
            router().action_subscriptions(),
            vec![
                "zwave/_CLIENTS/ZWAVE_GATEWAY-main/broadcast/#".to_string(),
                "zwave/_CLIENTS/ZWAVE_GATEWAY-main/api/#".to_string(),
            ]
        );
    }

    #[test]
    fn test_value_topic_segments() {
        let registry = named_registry();
        let router = router();
        let key = ValueKey::new(38, 1, 0);

        assert_eq!(
            router.value_topic(registry.node(2).unwrap(), &key),
            "nodeID_2/38/1/0"
        );
        assert_eq!(
            router.value_topic(registry.node(3).unwrap(), &key),
            "Ground_floor-Kitchen_Light_1_Main/38/1/0"
        );
        assert_eq!(
            router.set_topic("nodeID_2/38/1/0"),
            "zwave/nodeID_2/38/1/0/set"
        );
    }

    #[test]
    fn test_write_topic_roundtrip() {
        let registry = named_registry();
        let router = router();

        for node_id in [2u8, 3] {
            let id = ValueId::new(node_id, 38, 1, 0);
            let node = registry.node(node_id).unwrap();
            let topic = router.set_topic(&router.value_topic(node, &id.key()));

            match router.decode(&topic, b"99").unwrap() {
                InboundCommand::Write { path, value } => {
                    assert_eq!(path.resolve(&registry).unwrap(), id);
                    assert_eq!(value, json!(99));
                }
                other => panic!("unexpected command: {other:?}"),
            }
        }
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = named_registry();
        let path = ValuePath {
            node: NodeRef::Name("Nowhere".into()),
            key: ValueKey::new(38, 1, 0),
        };
        assert!(matches!(
            path.resolve(&registry),
            Err(GatewayError::NodeNotFound(_))
        ));

        let path = ValuePath {
            node: NodeRef::Id(2),
            key: ValueKey::new(37, 1, 0),
        };
        assert!(matches!(
            path.resolve(&registry),
            Err(GatewayError::ValueNotFound(_))
        ));
    }

    #[test]
    fn test_decode_broadcast() {
        let router = router();
        let topic = "zwave/_CLIENTS/ZWAVE_GATEWAY-main/broadcast/134-96-3/37/0/0/set";

        match router.decode(topic, b"true").unwrap() {
            InboundCommand::Broadcast {
                feedback_topic,
                target,
                value,
            } => {
                assert_eq!(
                    feedback_topic,
                    "_CLIENTS/ZWAVE_GATEWAY-main/broadcast/134-96-3/37/0/0"
                );
                assert_eq!(target.device, DeviceKey::new(134, 96, 3));
                assert_eq!(target.key, ValueKey::new(37, 0, 0));
                assert_eq!(value, json!(true));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let rebuilt = router.broadcast_topic(&DeviceKey::new(134, 96, 3), &ValueKey::new(37, 0, 0));
        assert_eq!(router.set_topic(&rebuilt), topic);
    }

    #[test]
    fn test_decode_api() {
        let router = router();
        let topic = "zwave/_CLIENTS/ZWAVE_GATEWAY-main/api/createScene/set";

        match router.decode(topic, br#"["Evening"]"#).unwrap() {
            InboundCommand::Api {
                reply_topic,
                api,
                args,
            } => {
                assert_eq!(reply_topic, "_CLIENTS/ZWAVE_GATEWAY-main/api/createScene");
                assert_eq!(api, "createScene");
                assert_eq!(args, json!(["Evening"]));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(router.set_topic(&router.api_topic("createScene")), topic);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let router = router();
        let rejected = [
            "other/nodeID_2/38/1/0/set",
            "zwave/nodeID_2/38/1/0",
            "zwave/_CLIENTS/set",
            "zwave/_CLIENTS/ZWAVE_GATEWAY-main/set",
            "zwave/_CLIENTS/ZWAVE_GATEWAY-main/unknown/set",
            "zwave/_CLIENTS/ZWAVE_GATEWAY-main/api/set",
            "zwave/_CLIENTS/ZWAVE_GATEWAY-main/broadcast/x/37/0/0/set",
            "zwave/nodeID_2/38/1/set",
            "zwave/nodeID_2/38/a/0/set",
        ];
        for topic in rejected {
            assert!(
                matches!(router.decode(topic, b"1"), Err(GatewayError::InvalidTopic(_))),
                "{topic} should be rejected"
            );
        }
    }

    #[test]
    fn test_decode_payload_policy() {
        assert_eq!(decode_payload(b"42"), json!(42));
        assert_eq!(decode_payload(b"-3.5"), json!(-3.5));
        assert_eq!(decode_payload(b"true"), json!(true));
        assert_eq!(decode_payload(br#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(decode_payload(b"Heat"), json!("Heat"));
        assert_eq!(decode_payload(b""), json!(""));
        assert_eq!(decode_payload(b"NaN"), json!("NaN"));
    }

    #[test]
    fn test_encode_status() {
        let body: Json = serde_json::from_slice(&encode_status(true)).unwrap();
        assert_eq!(body["value"], json!(true));
        assert!(body["time"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_payload_from_json() {
        assert_eq!(payload_from_json(&json!(true)), Some(ValuePayload::Bool(true)));
        assert_eq!(payload_from_json(&json!("Heat")), Some(ValuePayload::from("Heat")));
        assert_eq!(payload_from_json(&json!([1])), None);
        assert_eq!(payload_from_json(&Json::Null), None);
    }
}
