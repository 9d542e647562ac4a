//! Mesh nodes and their lifecycle state

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::device::DeviceKey;
use crate::error::{CoreError, Result};
use crate::value::{Value, ValueKey};

/// Reachability of a node
///
/// Nodes start as [`NodeStatus::Dead`] until the driver reports them ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Not responding
    #[default]
    Dead,
    /// Battery device asleep
    Sleep,
    /// Battery device awake
    Awake,
    /// Reachable
    Alive,
}

impl NodeStatus {
    /// Map a driver notification code to a status change
    ///
    /// Codes outside `3..=6` are not status notifications.
    pub fn from_notification(code: u8) -> Option<Self> {
        match code {
            3 => Some(NodeStatus::Awake),
            4 => Some(NodeStatus::Sleep),
            5 => Some(NodeStatus::Dead),
            6 => Some(NodeStatus::Alive),
            _ => None,
        }
    }

    /// A node is considered ready in every status but `Dead`
    pub fn is_ready(&self) -> bool {
        *self != NodeStatus::Dead
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Dead => write!(f, "Dead"),
            NodeStatus::Sleep => write!(f, "Sleep"),
            NodeStatus::Awake => write!(f, "Awake"),
            NodeStatus::Alive => write!(f, "Alive"),
        }
    }
}

/// Association group reported by the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    /// Group label
    pub label: String,
    /// Group index
    pub index: u8,
}

/// Metadata reported when a node becomes ready
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Manufacturer name
    #[serde(default)]
    pub manufacturer: String,
    /// Manufacturer id
    #[serde(default, deserialize_with = "numeric_id")]
    pub manufacturer_id: u32,
    /// Product name
    #[serde(default)]
    pub product: String,
    /// Product type id
    #[serde(default, deserialize_with = "numeric_id")]
    pub product_type: u32,
    /// Product id
    #[serde(default, deserialize_with = "numeric_id")]
    pub product_id: u32,
    /// Node type description
    #[serde(default, rename = "type")]
    pub node_type: String,
    /// User assigned name
    #[serde(default)]
    pub name: String,
    /// User assigned location
    #[serde(default)]
    pub loc: String,
}

/// Parse a manufacturer or product identifier
///
/// Drivers report these as hex text (`"0x0086"`) or plain decimal text.
pub fn parse_numeric_id(text: &str) -> Result<u32> {
    let text = text.trim();
    let parsed = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| CoreError::InvalidNumericId(text.to_string()))
}

fn numeric_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) if s.is_empty() => Ok(0),
        Raw::Text(s) => parse_numeric_id(&s).map_err(serde::de::Error::custom),
    }
}

/// A node of the mesh and its cached values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node id, unique per mesh session
    pub node_id: u8,
    /// Device template id, assigned once the node is ready
    pub device_id: Option<DeviceKey>,
    /// Manufacturer name
    pub manufacturer: String,
    /// Manufacturer id
    pub manufacturer_id: u32,
    /// Product name
    pub product: String,
    /// Product type id
    pub product_type: u32,
    /// Product id
    pub product_id: u32,
    /// Node type description
    pub node_type: String,
    /// User assigned name
    pub name: String,
    /// User assigned location
    pub loc: String,
    /// Values keyed by their node-local address
    pub values: BTreeMap<ValueKey, Value>,
    /// Association groups
    pub groups: Vec<NodeGroup>,
    /// Whether the node finished its interview
    pub ready: bool,
    /// Reachability
    pub status: NodeStatus,
}

impl Node {
    /// Create an empty, not ready node
    pub fn new(node_id: u8) -> Self {
        Self {
            node_id,
            device_id: None,
            manufacturer: String::new(),
            manufacturer_id: 0,
            product: String::new(),
            product_type: 0,
            product_id: 0,
            node_type: String::new(),
            name: String::new(),
            loc: String::new(),
            values: BTreeMap::new(),
            groups: Vec::new(),
            ready: false,
            status: NodeStatus::Dead,
        }
    }

    /// Merge the metadata reported at ready time
    pub fn apply_info(&mut self, info: &NodeInfo) {
        self.manufacturer = info.manufacturer.clone();
        self.manufacturer_id = info.manufacturer_id;
        self.product = info.product.clone();
        self.product_type = info.product_type;
        self.product_id = info.product_id;
        self.node_type = info.node_type.clone();
        self.name = info.name.clone();
        self.loc = info.loc.clone();
    }

    /// Template key derived from the manufacturer/product identifiers
    pub fn device_key(&self) -> DeviceKey {
        DeviceKey::new(self.manufacturer_id, self.product_id, self.product_type)
    }

    /// Look up a value by its node-local key
    pub fn value(&self, key: &ValueKey) -> Option<&Value> {
        self.values.get(key)
    }

    /// Set the status and derive readiness from it
    pub fn set_status(&mut self, status: NodeStatus) {
        self.status = status;
        self.ready = status.is_ready();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_notification() {
        assert_eq!(NodeStatus::from_notification(3), Some(NodeStatus::Awake));
        assert_eq!(NodeStatus::from_notification(4), Some(NodeStatus::Sleep));
        assert_eq!(NodeStatus::from_notification(5), Some(NodeStatus::Dead));
        assert_eq!(NodeStatus::from_notification(6), Some(NodeStatus::Alive));
        assert_eq!(NodeStatus::from_notification(0), None);
        assert_eq!(NodeStatus::from_notification(7), None);
    }

    #[test]
    fn test_new_node_is_dead() {
        let node = Node::new(4);
        assert_eq!(node.status, NodeStatus::Dead);
        assert!(!node.ready);
        assert!(node.device_id.is_none());
    }

    #[test]
    fn test_set_status_derives_ready() {
        let mut node = Node::new(4);
        node.set_status(NodeStatus::Sleep);
        assert!(node.ready);
        node.set_status(NodeStatus::Dead);
        assert!(!node.ready);
    }

    #[test]
    fn test_parse_numeric_id() {
        assert_eq!(parse_numeric_id("0x0086").unwrap(), 0x86);
        assert_eq!(parse_numeric_id("134").unwrap(), 134);
        assert!(parse_numeric_id("0xZZ").is_err());
    }

    #[test]
    fn test_node_info_accepts_mixed_id_forms() {
        let info: NodeInfo = serde_json::from_value(serde_json::json!({
            "manufacturer": "AEON Labs",
            "manufacturer_id": "0x0086",
            "product": "Smart Switch 6",
            "product_type": 3,
            "product_id": "96",
        }))
        .unwrap();

        assert_eq!(info.manufacturer_id, 0x86);
        assert_eq!(info.product_type, 3);
        assert_eq!(info.product_id, 96);
    }

    #[test]
    fn test_apply_info_and_device_key() {
        let mut node = Node::new(2);
        node.apply_info(&NodeInfo {
            manufacturer: "AEON Labs".into(),
            manufacturer_id: 134,
            product: "Smart Switch 6".into(),
            product_type: 3,
            product_id: 96,
            name: "Lamp".into(),
            ..Default::default()
        });

        assert_eq!(node.name, "Lamp");
        assert_eq!(node.device_key().to_string(), "134-96-3");
    }
}
