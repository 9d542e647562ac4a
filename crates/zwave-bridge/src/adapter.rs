//! Mesh driver event adapter
//!
//! The [`MeshEventAdapter`] applies raw driver notifications to the
//! [`DeviceRegistry`] and turns them into normalized [`GatewayEvent`]s, plus
//! any follow-up commands the driver should receive (polling setup).
//!
//! Notifications about unknown nodes are logged and dropped; the driver may
//! report values before the node itself after a restart.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use zwave_core::{
    DeviceKey, MeshCommand, MeshEvent, NodeStatus, Value, ValueId, ValuePayload, POLLED_CLASSES,
};

use crate::registry::DeviceRegistry;

/// Intensity used when enabling polling of a value
pub const POLL_INTENSITY: u8 = 1;

/// Normalized domain events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Driver attached; the registry was reset for a fresh session
    DriverReady {
        /// Network home id
        home_id: u32,
    },
    /// Driver failed to attach
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
        /// Template the node belongs to
        device_id: DeviceKey,
        /// Whether the node created the template
        created_device: bool,
    },
    /// A value of a ready node changed
    ValueChanged {
        /// Current value with metadata
        value: Value,
        /// Payload before the change
        previous: Option<ValuePayload>,
    },
    /// A value disappeared
    ValueRemoved {
        /// Removed value
        value_id: ValueId,
    },
    /// A node's reachability changed
    NodeStatus {
        /// Node id
        node_id: u8,
        /// User assigned name
        name: String,
        /// New status
        status: NodeStatus,
        /// Readiness derived from the status
        ready: bool,
    },
    /// Association groups of a node changed
    NodeGroups {
        /// Node id
        node_id: u8,
    },
    /// Initial scan finished
    ScanComplete {
        /// Number of known nodes
        nodes: usize,
    },
}

impl GatewayEvent {
    fn node_status(registry: &DeviceRegistry, node_id: u8) -> Option<Self> {
        registry.node(node_id).map(|node| GatewayEvent::NodeStatus {
            node_id,
            name: node.name.clone(),
            status: node.status,
            ready: node.ready,
        })
    }
}

/// What the gateway should do after a driver notification
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reaction {
    /// Events to publish
    pub events: Vec<GatewayEvent>,
    /// Commands to send back to the driver
    pub commands: Vec<MeshCommand>,
}

impl Reaction {
    fn event(event: GatewayEvent) -> Self {
        Self {
            events: vec![event],
            commands: Vec::new(),
        }
    }

    /// Whether nothing needs to happen
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.commands.is_empty()
    }
}

/// Applies driver notifications to the registry
#[derive(Debug, Clone)]
pub struct MeshEventAdapter {
    poll_interval: Duration,
    home_id: Option<u32>,
}

impl MeshEventAdapter {
    /// Create an adapter that configures the given poll interval after scans
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            home_id: None,
        }
    }

    /// Home id of the current session
    pub fn home_id(&self) -> Option<u32> {
        self.home_id
    }

    /// Apply one driver notification
    pub fn handle(&mut self, registry: &mut DeviceRegistry, event: MeshEvent) -> Reaction {
        trace!(kind = event.kind(), "Mesh event");

        match event {
            MeshEvent::DriverReady { home_id } => {
                info!(home_id = %format!("0x{home_id:x}"), "Driver ready, scanning network");
                self.home_id = Some(home_id);
                registry.clear();
                Reaction::event(GatewayEvent::DriverReady { home_id })
            }

            MeshEvent::DriverFailed => {
                warn!("Driver failed");
                Reaction::event(GatewayEvent::DriverFailed)
            }

            MeshEvent::NodeAdded { node_id } => {
                debug!(node_id, "Node added");
                registry.add_node(node_id);
                Reaction::event(GatewayEvent::NodeAdded { node_id })
            }

            MeshEvent::NodeReady { node_id, info } => {
                let ready = match registry.mark_node_ready(node_id, &info) {
                    Ok(ready) => ready,
                    Err(e) => {
                        warn!(node_id, "Node ready for unknown node: {}", e);
                        return Reaction::default();
                    }
                };
                info!(node_id, device_id = %ready.device_id, product = %info.product, "Node ready");

                let mut reaction = Reaction::default();
                let Some(node) = registry.node(node_id) else {
                    return reaction;
                };

                for value in node.values.values() {
                    if POLLED_CLASSES.contains(&value.class_id) {
                        reaction.commands.push(MeshCommand::EnablePoll {
                            value_id: value.id(),
                            intensity: POLL_INTENSITY,
                        });
                    }
                }

                reaction.events.push(GatewayEvent::NodeReady {
                    node_id,
                    device_id: ready.device_id,
                    created_device: ready.created_device,
                });
                reaction
                    .events
                    .extend(node.values.values().map(|value| GatewayEvent::ValueChanged {
                        value: value.clone(),
                        previous: None,
                    }));
                reaction
                    .events
                    .extend(GatewayEvent::node_status(registry, node_id));
                reaction
            }

            MeshEvent::NodeEvent { node_id, data } => {
                debug!(node_id, data = %data, "Node event");
                Reaction::default()
            }

            MeshEvent::SceneEvent { node_id, scene_id } => {
                debug!(node_id, scene_id, "Scene event");
                Reaction::default()
            }

            MeshEvent::ValueAdded { value } => {
                let node_id = value.node_id;
                trace!(node_id, value_id = %value.id(), "Value added");
                if let Err(e) = registry.add_value(node_id, value) {
                    warn!(node_id, "Value added to unknown node: {}", e);
                }
                Reaction::default()
            }

            MeshEvent::ValueChanged { value } => {
                let node_id = value.node_id;
                match registry.update_value(value.clone()) {
                    Ok(update) if update.node_ready => {
                        debug!(
                            node_id,
                            value_id = %value.id(),
                            label = %value.label,
                            "Value changed: {:?} -> {:?}",
                            update.previous,
                            value.value
                        );
                        Reaction::event(GatewayEvent::ValueChanged {
                            value,
                            previous: update.previous,
                        })
                    }
                    Ok(_) => Reaction::default(),
                    Err(e) => {
                        warn!(node_id, "Value changed on unknown node: {}", e);
                        Reaction::default()
                    }
                }
            }

            MeshEvent::ValueRemoved { node_id, key } => match registry.remove_value(node_id, &key) {
                Ok(_) => Reaction::event(GatewayEvent::ValueRemoved {
                    value_id: key.on_node(node_id),
                }),
                Err(e) => {
                    warn!(node_id, "Value removed: {}", e);
                    Reaction::default()
                }
            },

            MeshEvent::Notification { node_id, code } => {
                let Some(status) = NodeStatus::from_notification(code) else {
                    debug!(node_id, code, "Notification");
                    return Reaction::default();
                };
                if let Err(e) = registry.set_node_status(node_id, status) {
                    warn!(node_id, "Status notification for unknown node: {}", e);
                    return Reaction::default();
                }
                debug!(node_id, status = %status, "Node status changed");
                let mut reaction = Reaction::default();
                reaction
                    .events
                    .extend(GatewayEvent::node_status(registry, node_id));
                reaction
            }

            MeshEvent::NodeGroups { node_id, groups } => {
                match registry.set_groups(node_id, groups) {
                    Ok(()) => Reaction::event(GatewayEvent::NodeGroups { node_id }),
                    Err(e) => {
                        warn!(node_id, "Groups for unknown node: {}", e);
                        Reaction::default()
                    }
                }
            }

            MeshEvent::ScanComplete => {
                info!(nodes = registry.len(), "Network scan complete");
                Reaction {
                    events: vec![GatewayEvent::ScanComplete {
                        nodes: registry.len(),
                    }],
                    commands: vec![MeshCommand::SetPollInterval {
                        interval_ms: self.poll_interval.as_millis() as u64,
                    }],
                }
            }

            MeshEvent::ControllerCommand {
                node_id,
                state,
                error,
                help,
            } => {
                debug!(node_id, state, error, help = %help, "Controller command");
                Reaction::default()
            }
        }
    }
}
