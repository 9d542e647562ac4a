//! Mesh driver vocabulary
//!
//! [`MeshEvent`] is what a driver reports, [`MeshCommand`] is what the gateway
//! asks it to do. Both have a JSON form tagged by `event` / `command` so they
//! can travel over a line-oriented driver connection unchanged.

use serde::{Deserialize, Serialize};

use crate::node::{NodeGroup, NodeInfo};
use crate::value::{Value, ValueId, ValueKey, ValuePayload};

/// Notifications reported by the mesh driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MeshEvent {
    /// Driver attached to the controller
    DriverReady {
        /// Network home id
        home_id: u32,
    },
    /// Driver could not attach to the controller
    DriverFailed,
    /// A node was discovered
    NodeAdded {
        /// Node id
        node_id: u8,
    },
    /// A node finished its interview
    NodeReady {
        /// Node id
        node_id: u8,
        /// Reported metadata
        info: NodeInfo,
    },
    /// Basic set received from a node
    NodeEvent {
        /// Node id
        node_id: u8,
        /// Event data
        data: serde_json::Value,
    },
    /// A node activated one of its own scenes
    SceneEvent {
        /// Node id
        node_id: u8,
        /// Node scene id
        scene_id: u32,
    },
    /// A value was discovered
    ValueAdded {
        /// Value and metadata
        value: Value,
    },
    /// A value changed
    ValueChanged {
        /// Value and metadata
        value: Value,
    },
    /// A value disappeared
    ValueRemoved {
        /// Node id
        node_id: u8,
        /// Value address
        key: ValueKey,
    },
    /// Node level notification
    Notification {
        /// Node id
        node_id: u8,
        /// Notification code
        code: u8,
    },
    /// Association groups of a node
    NodeGroups {
        /// Node id
        node_id: u8,
        /// Groups
        groups: Vec<NodeGroup>,
    },
    /// Initial network scan finished
    ScanComplete,
    /// Progress of a controller command (inclusion, exclusion, ...)
    ControllerCommand {
        /// Node the command applies to
        node_id: u8,
        /// Controller state code
        state: u8,
        /// Controller error code
        error: u8,
        /// Driver supplied help text
        #[serde(default)]
        help: String,
    },
}

impl MeshEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            MeshEvent::DriverReady { .. } => "driver_ready",
            MeshEvent::DriverFailed => "driver_failed",
            MeshEvent::NodeAdded { .. } => "node_added",
            MeshEvent::NodeReady { .. } => "node_ready",
            MeshEvent::NodeEvent { .. } => "node_event",
            MeshEvent::SceneEvent { .. } => "scene_event",
            MeshEvent::ValueAdded { .. } => "value_added",
            MeshEvent::ValueChanged { .. } => "value_changed",
            MeshEvent::ValueRemoved { .. } => "value_removed",
            MeshEvent::Notification { .. } => "notification",
            MeshEvent::NodeGroups { .. } => "node_groups",
            MeshEvent::ScanComplete => "scan_complete",
            MeshEvent::ControllerCommand { .. } => "controller_command",
        }
    }
}

/// Commands sent to the mesh driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MeshCommand {
    /// Write a value
    SetValue {
        /// Target value
        value_id: ValueId,
        /// Payload to write
        value: ValuePayload,
    },
    /// Enable polling of a value
    EnablePoll {
        /// Target value
        value_id: ValueId,
        /// Poll intensity
        intensity: u8,
    },
    /// Set the interval between poll rounds
    SetPollInterval {
        /// Interval in milliseconds
        interval_ms: u64,
    },
}
