//! Values exposed by mesh nodes
//!
//! A value is addressed inside its node by a [`ValueKey`]
//! (`command class`, `instance`, `index`) and globally by a [`ValueId`]
//! which adds the owning node. Both have a dash separated text form that is
//! used as cache key, scene identifier and topic segment.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Address of a value inside a node: `(class_id, instance, index)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueKey {
    /// Command class the value belongs to (e.g. `0x25` binary switch)
    pub class_id: u8,
    /// Endpoint instance
    pub instance: u8,
    /// Index of the value inside the command class
    pub index: u16,
}

impl ValueKey {
    /// Create a new key
    pub const fn new(class_id: u8, instance: u8, index: u16) -> Self {
        Self {
            class_id,
            instance,
            index,
        }
    }

    /// Attach this key to a node
    pub const fn on_node(self, node_id: u8) -> ValueId {
        ValueId {
            node_id,
            class_id: self.class_id,
            instance: self.instance,
            index: self.index,
        }
    }
}

impl fmt::Display for ValueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.class_id, self.instance, self.index)
    }
}

impl FromStr for ValueKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidValueId(s.to_string());
        let mut parts = s.split('-');
        let (Some(class_id), Some(instance), Some(index), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        Ok(Self {
            class_id: class_id.parse().map_err(|_| invalid())?,
            instance: instance.parse().map_err(|_| invalid())?,
            index: index.parse().map_err(|_| invalid())?,
        })
    }
}

// Keys are serialized in their text form so they can key JSON objects.
impl Serialize for ValueKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ValueKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Global address of a value: owning node plus [`ValueKey`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId {
    /// Owning node
    pub node_id: u8,
    /// Command class
    pub class_id: u8,
    /// Endpoint instance
    pub instance: u8,
    /// Index inside the command class
    pub index: u16,
}

impl ValueId {
    /// Create a new value id
    pub const fn new(node_id: u8, class_id: u8, instance: u8, index: u16) -> Self {
        Self {
            node_id,
            class_id,
            instance,
            index,
        }
    }

    /// The node-local part of the id
    pub const fn key(&self) -> ValueKey {
        ValueKey::new(self.class_id, self.instance, self.index)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.node_id, self.key())
    }
}

impl FromStr for ValueId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let (node, key) = s
            .split_once('-')
            .ok_or_else(|| CoreError::InvalidValueId(s.to_string()))?;
        let node_id = node
            .parse()
            .map_err(|_| CoreError::InvalidValueId(s.to_string()))?;
        let key: ValueKey = key
            .parse()
            .map_err(|_| CoreError::InvalidValueId(s.to_string()))?;
        Ok(key.on_node(node_id))
    }
}

/// Current payload of a value
///
/// List (enum) values travel as their selected label in [`ValuePayload::Text`];
/// the allowed labels are kept in [`Value::options`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValuePayload {
    /// Boolean value (switches, binary sensors)
    Bool(bool),
    /// Numeric value, integral or decimal
    Number(serde_json::Number),
    /// Text or selected list item
    Text(String),
}

impl ValuePayload {
    /// Convert to a JSON value for publishing
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ValuePayload::Bool(b) => serde_json::Value::Bool(*b),
            ValuePayload::Number(n) => serde_json::Value::Number(n.clone()),
            ValuePayload::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Numeric view of the payload, if any
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ValuePayload::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

impl Default for ValuePayload {
    fn default() -> Self {
        ValuePayload::Text(String::new())
    }
}

impl From<bool> for ValuePayload {
    fn from(b: bool) -> Self {
        ValuePayload::Bool(b)
    }
}

impl From<i64> for ValuePayload {
    fn from(n: i64) -> Self {
        ValuePayload::Number(n.into())
    }
}

impl From<&str> for ValuePayload {
    fn from(s: &str) -> Self {
        ValuePayload::Text(s.to_string())
    }
}

/// Value genre as reported by the driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueGenre {
    /// Values a user normally interacts with
    #[default]
    User,
    /// Internal values
    System,
    /// Device configuration parameters
    Config,
    /// Basic command class mirror
    Basic,
}

/// Data type of a value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// true/false
    Bool,
    /// 8 bit unsigned
    Byte,
    /// 16 bit signed
    Short,
    /// 32 bit signed
    Int,
    /// Decimal number
    Decimal,
    /// One label out of [`Value::options`]
    List,
    /// Free text
    #[default]
    String,
    /// Write-only trigger
    Button,
    /// Raw bytes rendered as text
    Raw,
    /// Climate schedule
    Schedule,
}

/// A value reported by the mesh driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    /// Owning node
    pub node_id: u8,
    /// Command class
    pub class_id: u8,
    /// Endpoint instance
    pub instance: u8,
    /// Index inside the command class
    pub index: u16,
    /// Human readable label
    #[serde(default)]
    pub label: String,
    /// Measurement units
    #[serde(default)]
    pub units: String,
    /// Help text
    #[serde(default)]
    pub help: String,
    /// Genre
    #[serde(default)]
    pub genre: ValueGenre,
    /// Data type
    #[serde(default, rename = "type")]
    pub kind: ValueKind,
    /// Value cannot be written
    #[serde(default)]
    pub read_only: bool,
    /// Value cannot be read back
    #[serde(default)]
    pub write_only: bool,
    /// Lower bound for numeric values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound for numeric values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Allowed labels for list values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Current payload
    #[serde(default)]
    pub value: ValuePayload,
}

impl Value {
    /// Create a value with default metadata
    pub fn new(id: ValueId, value: impl Into<ValuePayload>) -> Self {
        Self {
            node_id: id.node_id,
            class_id: id.class_id,
            instance: id.instance,
            index: id.index,
            label: String::new(),
            units: String::new(),
            help: String::new(),
            genre: ValueGenre::default(),
            kind: ValueKind::default(),
            read_only: false,
            write_only: false,
            min: None,
            max: None,
            options: Vec::new(),
            value: value.into(),
        }
    }

    /// Set the label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the data type
    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = kind;
        self
    }

    /// Mark the value read-only
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Node-local key
    pub const fn key(&self) -> ValueKey {
        ValueKey::new(self.class_id, self.instance, self.index)
    }

    /// Global id
    pub const fn id(&self) -> ValueId {
        ValueId::new(self.node_id, self.class_id, self.instance, self.index)
    }

    /// Whether the bus may write this value
    pub fn is_writable(&self) -> bool {
        !self.read_only
    }
}
