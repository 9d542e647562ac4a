//! Scene collection management
//!
//! The [`SceneStore`] owns the scene collection in memory and mirrors it to
//! the document store after every mutation. A single writer task persists
//! snapshots in order and skips any snapshot superseded before it could be
//! written. Failures are logged and never roll back the in-memory change.

use serde_json::Value as Json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use zwave_core::{Scene, SceneValue, ValueId, ValuePayload};
use zwave_state::DocumentStore;

use crate::error::{GatewayError, Result};
use crate::registry::DeviceRegistry;

/// CRUD over the persisted scene collection
pub struct SceneStore {
    scenes: Vec<Scene>,
    key: String,
    /// Latest snapshot with its revision
    snapshots: watch::Sender<(u64, Json)>,
    /// Last revision the writer finished
    written: watch::Receiver<u64>,
    revision: u64,
}

impl std::fmt::Debug for SceneStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneStore")
            .field("scenes", &self.scenes.len())
            .field("key", &self.key)
            .field("revision", &self.revision)
            .finish()
    }
}

impl SceneStore {
    /// Load the collection stored under `key`, empty when missing
    ///
    /// Spawns the writer task, so this must run inside a tokio runtime.
    pub async fn load(store: Arc<dyn DocumentStore>, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let scenes: Vec<Scene> = store.get_as(&key).await?.unwrap_or_default();
        info!(count = scenes.len(), key = %key, "Loaded scenes");

        let (snapshots, pending) = watch::channel((0, Json::Null));
        let (done, written) = watch::channel(0);
        tokio::spawn(write_snapshots(store, key.clone(), pending, done));

        Ok(Self {
            scenes,
            key,
            snapshots,
            written,
            revision: 0,
        })
    }

    /// All scenes in insertion order
    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    /// Look up a scene
    pub fn scene(&self, id: u32) -> Result<&Scene> {
        self.scenes
            .iter()
            .find(|s| s.id == id)
            .ok_or(GatewayError::SceneNotFound(id))
    }

    fn scene_mut(&mut self, id: u32) -> Result<&mut Scene> {
        self.scenes
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(GatewayError::SceneNotFound(id))
    }

    /// Writes of a scene
    pub fn values(&self, id: u32) -> Result<&[SceneValue]> {
        self.scene(id).map(|s| s.values.as_slice())
    }

    /// Create an empty scene with id `max + 1`, returning the id
    pub fn create(&mut self, label: impl Into<String>) -> u32 {
        let id = self.scenes.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        let scene = Scene::new(id, label);
        debug!(scene_id = id, label = %scene.label, "Created scene");
        self.scenes.push(scene);
        self.persist();
        id
    }

    /// Delete a scene
    pub fn remove(&mut self, id: u32) -> Result<()> {
        let index = self
            .scenes
            .iter()
            .position(|s| s.id == id)
            .ok_or(GatewayError::SceneNotFound(id))?;
        self.scenes.remove(index);
        debug!(scene_id = id, "Removed scene");
        self.persist();
        Ok(())
    }

    /// Replace the whole collection
    pub fn set_scenes(&mut self, scenes: Vec<Scene>) {
        debug!(count = scenes.len(), "Replaced scenes");
        self.scenes = scenes;
        self.persist();
    }

    /// Insert or update the write to `target` inside a scene
    ///
    /// The target must exist in the registry.
    pub fn upsert_value(
        &mut self,
        registry: &DeviceRegistry,
        scene_id: u32,
        target: ValueId,
        value: ValuePayload,
        timeout: f64,
    ) -> Result<()> {
        // scene first, so an unknown scene wins over an unknown value
        self.scene(scene_id)?;
        let entry = SceneValue::new(registry.resolve(&target)?, value, timeout);

        self.scene_mut(scene_id)?.upsert(entry);
        debug!(scene_id, value_id = %target, "Stored scene value");
        self.persist();
        Ok(())
    }

    /// Remove the write to `target` from a scene
    ///
    /// Matches on the identifier alone, so writes to values that no longer
    /// exist can still be removed.
    pub fn remove_value(&mut self, scene_id: u32, target: ValueId) -> Result<()> {
        let scene = self.scene_mut(scene_id)?;
        if !scene.remove(&target.to_string()) {
            return Err(GatewayError::ValueNotFound(target.to_string()));
        }
        debug!(scene_id, value_id = %target, "Removed scene value");
        self.persist();
        Ok(())
    }

    /// Wait until the writer stored the latest snapshot
    pub async fn flush(&mut self) {
        let revision = self.revision;
        while *self.written.borrow() < revision {
            if self.written.changed().await.is_err() {
                warn!(key = %self.key, "Scene writer stopped before flushing");
                return;
            }
        }
    }

    fn persist(&mut self) {
        let doc = match serde_json::to_value(&self.scenes) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to encode scenes: {}", e);
                return;
            }
        };
        self.revision += 1;
        self.snapshots.send_replace((self.revision, doc));
    }
}

async fn write_snapshots(
    store: Arc<dyn DocumentStore>,
    key: String,
    mut pending: watch::Receiver<(u64, Json)>,
    done: watch::Sender<u64>,
) {
    while pending.changed().await.is_ok() {
        let (revision, doc) = pending.borrow_and_update().clone();
        if let Err(e) = store.put(&key, &doc).await {
            warn!(key = %key, revision, "Failed to persist scenes: {}", e);
        }
        done.send_replace(revision);
    }
    debug!(key = %key, "Scene writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use zwave_core::Value;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use zwave_state::{JsonFileStore, MemoryStore};

    /// Store whose writes take a while
    #[derive(Default)]
    struct SlowStore {
        inner: MemoryStore,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for SlowStore {
        async fn get(&self, key: &str) -> zwave_state::Result<Option<Json>> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, doc: &Json) -> zwave_state::Result<()> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, doc).await
        }

        async fn delete(&self, key: &str) -> zwave_state::Result<bool> {
            self.inner.delete(key).await
        }

        async fn keys(&self) -> zwave_state::Result<Vec<String>> {
            self.inner.keys().await
        }
    }

    fn registry() -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        registry.add_node(5);
        registry
            .add_value(5, Value::new(ValueId::new(5, 38, 1, 0), 0).with_label("Level"))
            .unwrap();
        registry
    }

    async fn empty_store() -> (SceneStore, Arc<dyn DocumentStore>) {
        let docs: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let scenes = SceneStore::load(Arc::clone(&docs), "scenes").await.unwrap();
        (scenes, docs)
    }

    #[tokio::test]
    async fn test_create_uses_max_plus_one() {
        let docs: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        docs.put(
            "scenes",
            &json!([
                {"sceneid": 3, "label": "b", "values": []},
                {"sceneid": 1, "label": "a", "values": []},
            ]),
        )
        .await
        .unwrap();

        let mut scenes = SceneStore::load(docs, "scenes").await.unwrap();
        assert_eq!(scenes.create("c"), 4);
    }

    #[tokio::test]
    async fn test_create_starts_at_one() {
        let (mut scenes, _) = empty_store().await;
        assert_eq!(scenes.create("first"), 1);
        assert_eq!(scenes.create("second"), 2);
    }

    #[tokio::test]
    async fn test_remove_unknown_scene() {
        let (mut scenes, _) = empty_store().await;
        assert!(matches!(scenes.remove(7), Err(GatewayError::SceneNotFound(7))));
        assert!(matches!(scenes.values(7), Err(GatewayError::SceneNotFound(7))));
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_entry() {
        let registry = registry();
        let (mut scenes, _) = empty_store().await;
        let id = scenes.create("Evening");
        let target = ValueId::new(5, 38, 1, 0);

        scenes
            .upsert_value(&registry, id, target, ValuePayload::from(10), 0.0)
            .unwrap();
        scenes
            .upsert_value(&registry, id, target, ValuePayload::from(80), 3.0)
            .unwrap();

        let values = scenes.values(id).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, ValuePayload::from(80));
        assert_eq!(values[0].timeout, 3.0);
        assert_eq!(values[0].label.as_deref(), Some("Level"));
    }

    #[tokio::test]
    async fn test_upsert_requires_registered_value() {
        let registry = registry();
        let (mut scenes, _) = empty_store().await;
        let id = scenes.create("Evening");

        let err = scenes
            .upsert_value(&registry, id, ValueId::new(9, 38, 1, 0), true.into(), 0.0)
            .unwrap_err();
        assert!(matches!(err, GatewayError::NodeNotFound(_)));

        let err = scenes
            .upsert_value(&registry, id, ValueId::new(5, 37, 1, 0), true.into(), 0.0)
            .unwrap_err();
        assert!(matches!(err, GatewayError::ValueNotFound(_)));

        let err = scenes
            .upsert_value(&registry, 99, ValueId::new(9, 38, 1, 0), true.into(), 0.0)
            .unwrap_err();
        assert!(matches!(err, GatewayError::SceneNotFound(99)));
    }

    #[tokio::test]
    async fn test_remove_value_without_registry() {
        let mut registry = registry();
        let (mut scenes, _) = empty_store().await;
        let id = scenes.create("Evening");
        let target = ValueId::new(5, 38, 1, 0);
        scenes
            .upsert_value(&registry, id, target, ValuePayload::from(10), 0.0)
            .unwrap();

        // node disappears from the mesh
        registry.clear();

        scenes.remove_value(id, target).unwrap();
        assert!(scenes.values(id).unwrap().is_empty());
        assert!(matches!(
            scenes.remove_value(id, target),
            Err(GatewayError::ValueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_persisted_document_roundtrip() {
        let registry = registry();
        let (mut scenes, docs) = empty_store().await;
        let id = scenes.create("Evening");
        scenes
            .upsert_value(&registry, id, ValueId::new(5, 38, 1, 0), ValuePayload::from(40), 2.0)
            .unwrap();
        scenes.create("Night");
        scenes.flush().await;

        let reloaded = SceneStore::load(docs, "scenes").await.unwrap();
        assert_eq!(reloaded.scenes(), scenes.scenes());

        let doc = reloaded.scene(id).unwrap();
        assert_eq!(doc.values[0].value_id, "5-38-1-0");
    }

    #[tokio::test]
    async fn test_set_scenes_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let docs: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
        let mut scenes = SceneStore::load(Arc::clone(&docs), "scenes").await.unwrap();

        scenes.set_scenes(vec![Scene::new(10, "Imported")]);
        scenes.flush().await;

        let raw = docs.get("scenes").await.unwrap().unwrap();
        assert_eq!(raw, json!([{"sceneid": 10, "label": "Imported", "values": []}]));
        assert_eq!(scenes.create("Next"), 11);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_writer_keeps_latest_snapshot() {
        let slow = Arc::new(SlowStore::default());
        let docs: Arc<dyn DocumentStore> = slow.clone();
        let mut scenes = SceneStore::load(Arc::clone(&docs), "scenes").await.unwrap();

        for i in 0..20 {
            scenes.create(format!("scene {i}"));
        }
        scenes.flush().await;

        let stored: Vec<Scene> = docs.get_as("scenes").await.unwrap().unwrap();
        assert_eq!(stored, scenes.scenes());
        // superseded snapshots are skipped
        assert!(slow.puts.load(Ordering::SeqCst) < 20);

        scenes.remove(1).unwrap();
        scenes.flush().await;
        let stored: Vec<Scene> = docs.get_as("scenes").await.unwrap().unwrap();
        assert_eq!(stored.len(), 19);
        assert_eq!(stored[0].id, 2);
    }

    #[tokio::test]
    async fn test_flush_without_changes() {
        let (mut scenes, docs) = empty_store().await;
        scenes.flush().await;
        assert!(docs.get("scenes").await.unwrap().is_none());
    }
}
