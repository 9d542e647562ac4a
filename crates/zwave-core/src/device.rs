//! Deduplicated device templates
//!
//! Every node built from the same manufacturer/product/type triple shares one
//! [`Device`] describing the shape of its values. The first node of a kind to
//! become ready defines the template; later nodes never change it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::node::Node;
use crate::value::{Value, ValueGenre, ValueKey, ValueKind, ValuePayload};

/// Template identity: `(manufacturer_id, product_id, product_type)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    /// Manufacturer id
    pub manufacturer_id: u32,
    /// Product id
    pub product_id: u32,
    /// Product type id
    pub product_type: u32,
}

impl DeviceKey {
    /// Create a new key
    pub const fn new(manufacturer_id: u32, product_id: u32, product_type: u32) -> Self {
        Self {
            manufacturer_id,
            product_id,
            product_type,
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.manufacturer_id, self.product_id, self.product_type
        )
    }
}

impl FromStr for DeviceKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidDeviceId(s.to_string());
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }

        Ok(Self {
            manufacturer_id: parts[0].parse().map_err(|_| invalid())?,
            product_id: parts[1].parse().map_err(|_| invalid())?,
            product_type: parts[2].parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for DeviceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Value shape inside a template, without node specific fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceValue {
    /// Composite `class-instance-index` identifier
    pub value_id: ValueKey,
    /// Label
    pub label: String,
    /// Units
    pub units: String,
    /// Help text
    pub help: String,
    /// Genre
    pub genre: ValueGenre,
    /// Data type
    #[serde(rename = "type")]
    pub kind: ValueKind,
    /// Read-only flag
    pub read_only: bool,
    /// Write-only flag
    pub write_only: bool,
    /// Lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Allowed list labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Payload observed when the template was captured
    pub value: ValuePayload,
}

impl From<&Value> for DeviceValue {
    fn from(value: &Value) -> Self {
        Self {
            value_id: value.key(),
            label: value.label.clone(),
            units: value.units.clone(),
            help: value.help.clone(),
            genre: value.genre,
            kind: value.kind,
            read_only: value.read_only,
            write_only: value.write_only,
            min: value.min,
            max: value.max,
            options: value.options.clone(),
            value: value.value.clone(),
        }
    }
}

/// A device template shared by every node of the same kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Template identity
    pub key: DeviceKey,
    /// Display name, `"<product> (<manufacturer>)"`
    pub name: String,
    /// Value shapes
    pub values: Vec<DeviceValue>,
}

impl Device {
    /// Capture a template from a node's current values
    pub fn from_node(node: &Node) -> Self {
        Self {
            key: node.device_key(),
            name: format!("{} ({})", node.product, node.manufacturer),
            values: node.values.values().map(DeviceValue::from).collect(),
        }
    }

    /// Whether the template contains a value at `key`
    pub fn has_value(&self, key: &ValueKey) -> bool {
        self.values.iter().any(|v| v.value_id == *key)
    }
}
