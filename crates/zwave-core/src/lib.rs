//! Domain model for the Z-Wave to MQTT gateway
//!
//! This crate holds the plain data types shared by the rest of the workspace:
//!
//! - [`Node`], [`Value`] and their addressing ([`ValueKey`], [`ValueId`])
//! - deduplicated [`Device`] templates
//! - [`Scene`]s, stored lists of value writes
//! - the mesh driver vocabulary ([`MeshEvent`], [`MeshCommand`])
//!
//! Nothing here performs I/O.

#![warn(missing_docs)]

pub mod device;
pub mod error;
pub mod event;
pub mod node;
pub mod scene;
pub mod value;

pub use device::{Device, DeviceKey, DeviceValue};
pub use error::{CoreError, Result};
pub use event::{MeshCommand, MeshEvent};
pub use node::{parse_numeric_id, Node, NodeGroup, NodeInfo, NodeStatus};
pub use scene::{Scene, SceneValue};
pub use value::{Value, ValueGenre, ValueId, ValueKey, ValueKind, ValuePayload};

/// Command classes whose values are polled once a node is ready
///
/// Binary switch, multilevel switch, binary sensor, multilevel sensor and
/// multi instance.
pub const POLLED_CLASSES: [u8; 5] = [0x25, 0x26, 0x30, 0x31, 0x60];
