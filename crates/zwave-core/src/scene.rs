//! Scenes: stored macros of value writes

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::value::{Value, ValueId, ValuePayload};

/// A write inside a scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneValue {
    /// Composite `node-class-instance-index` identifier
    pub value_id: String,
    /// Target node
    pub node_id: u8,
    /// Command class
    pub class_id: u8,
    /// Endpoint instance
    pub instance: u8,
    /// Index inside the command class
    pub index: u16,
    /// Label of the target when the write was stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Value to write
    pub value: ValuePayload,
    /// Delay before the write, in seconds; fractions allowed
    #[serde(default)]
    pub timeout: f64,
}

impl SceneValue {
    /// Build a scene entry for a registered value
    pub fn new(target: &Value, value: ValuePayload, timeout: f64) -> Self {
        let id = target.id();
        Self {
            value_id: id.to_string(),
            node_id: id.node_id,
            class_id: id.class_id,
            instance: id.instance,
            index: id.index,
            label: (!target.label.is_empty()).then(|| target.label.clone()),
            value,
            timeout,
        }
    }

    /// Value this entry writes to
    pub fn target(&self) -> ValueId {
        ValueId::new(self.node_id, self.class_id, self.instance, self.index)
    }

    /// Delay before the write
    ///
    /// Negative or non-finite stored delays count as no delay.
    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::ZERO)
    }
}

/// A named, ordered list of writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Scene id
    #[serde(rename = "sceneid")]
    pub id: u32,
    /// Label
    pub label: String,
    /// Writes, in insertion order
    #[serde(default)]
    pub values: Vec<SceneValue>,
}

impl Scene {
    /// Create an empty scene
    pub fn new(id: u32, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            values: Vec::new(),
        }
    }

    /// Insert or replace the entry for the same target
    pub fn upsert(&mut self, entry: SceneValue) {
        match self
            .values
            .iter_mut()
            .find(|v| v.value_id == entry.value_id)
        {
            Some(existing) => *existing = entry,
            None => self.values.push(entry),
        }
    }

    /// Remove the entry with the given identifier, returning whether one existed
    pub fn remove(&mut self, value_id: &str) -> bool {
        let before = self.values.len();
        self.values.retain(|v| v.value_id != value_id);
        self.values.len() != before
    }
}
