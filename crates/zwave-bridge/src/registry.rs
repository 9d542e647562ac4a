//! In-memory cache of the mesh
//!
//! The [`DeviceRegistry`] is the single source of truth for which nodes and
//! values currently exist. It performs no I/O and emits nothing; callers turn
//! its return values into events.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

use zwave_core::{
    Device, DeviceKey, Node, NodeGroup, NodeInfo, NodeStatus, Value, ValueId, ValueKey,
    ValuePayload,
};

use crate::error::{GatewayError, Result};

/// Outcome of a value change
#[derive(Debug, Clone, PartialEq)]
pub struct ValueUpdate {
    /// Whether the owning node is ready, i.e. the change should be emitted
    pub node_ready: bool,
    /// Payload before the change, `None` for a first report
    pub previous: Option<ValuePayload>,
}

/// Outcome of a node becoming ready
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReady {
    /// Template key assigned to the node
    pub device_id: DeviceKey,
    /// Whether this node created the template
    pub created_device: bool,
}

/// Cache of nodes, values and deduplicated device templates
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    nodes: BTreeMap<u8, Node>,
    devices: HashMap<DeviceKey, Device>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a discovered node in `Dead` state, replacing any previous entry
    pub fn add_node(&mut self, node_id: u8) {
        if self.nodes.insert(node_id, Node::new(node_id)).is_some() {
            debug!(node_id, "Replaced existing node entry");
        } else {
            trace!(node_id, "Added node");
        }
    }

    /// Insert or overwrite a value of an existing node
    pub fn add_value(&mut self, node_id: u8, value: Value) -> Result<()> {
        let node = self.node_mut(node_id)?;
        node.values.insert(value.key(), value);
        Ok(())
    }

    /// Apply a value change, reporting whether it should be emitted
    pub fn update_value(&mut self, value: Value) -> Result<ValueUpdate> {
        let node = self.node_mut(value.node_id)?;
        let previous = node
            .values
            .insert(value.key(), value)
            .map(|old| old.value);
        Ok(ValueUpdate {
            node_ready: node.ready,
            previous,
        })
    }

    /// Remove a value
    pub fn remove_value(&mut self, node_id: u8, key: &ValueKey) -> Result<Value> {
        let node = self.node_mut(node_id)?;
        node.values
            .remove(key)
            .ok_or_else(|| GatewayError::ValueNotFound(key.on_node(node_id).to_string()))
    }

    /// Mark a node ready, assign its template and capture the template if new
    pub fn mark_node_ready(&mut self, node_id: u8, info: &NodeInfo) -> Result<NodeReady> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| GatewayError::NodeNotFound(node_id.to_string()))?;

        node.apply_info(info);
        node.ready = true;
        node.status = NodeStatus::Alive;
        let device_id = node.device_key();
        node.device_id = Some(device_id);

        let created_device = match self.devices.entry(device_id) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                let device = Device::from_node(node);
                debug!(node_id, device_id = %device_id, name = %device.name, "Captured device template");
                slot.insert(device);
                true
            }
        };

        Ok(NodeReady {
            device_id,
            created_device,
        })
    }

    /// Update a node's status; readiness follows the status
    pub fn set_node_status(&mut self, node_id: u8, status: NodeStatus) -> Result<()> {
        self.node_mut(node_id)?.set_status(status);
        Ok(())
    }

    /// Replace a node's association groups
    pub fn set_groups(&mut self, node_id: u8, groups: Vec<NodeGroup>) -> Result<()> {
        self.node_mut(node_id)?.groups = groups;
        Ok(())
    }

    /// Look up a node
    pub fn node(&self, node_id: u8) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Iterate over nodes in id order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Look up a value
    pub fn value(&self, id: &ValueId) -> Option<&Value> {
        self.nodes.get(&id.node_id)?.value(&id.key())
    }

    /// Look up a value, failing with the missing piece
    pub fn resolve(&self, id: &ValueId) -> Result<&Value> {
        let node = self
            .nodes
            .get(&id.node_id)
            .ok_or_else(|| GatewayError::NodeNotFound(id.node_id.to_string()))?;
        node.value(&id.key())
            .ok_or_else(|| GatewayError::ValueNotFound(id.to_string()))
    }

    /// Find a node by its user assigned name
    pub fn find_node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.values().find(|n| !n.name.is_empty() && n.name == name)
    }

    /// Look up a device template
    pub fn device(&self, key: &DeviceKey) -> Option<&Device> {
        self.devices.get(key)
    }

    /// Iterate over device templates
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Nodes built from the given template
    pub fn nodes_with_device(&self, key: &DeviceKey) -> impl Iterator<Item = &Node> + '_ {
        let key = *key;
        self.nodes
            .values()
            .filter(move |n| n.device_id == Some(key))
    }

    /// Drop every node and template, for a fresh driver session
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.devices.clear();
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is known
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node_mut(&mut self, node_id: u8) -> Result<&mut Node> {
        self.nodes
            .get_mut(&node_id)
            .ok_or_else(|| GatewayError::NodeNotFound(node_id.to_string()))
    }
}
