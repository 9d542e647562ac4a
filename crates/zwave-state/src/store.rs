//! Document store implementations
//!
//! A document is one JSON value stored under a short key. The gateway keeps
//! its whole scene collection in a single document and rewrites it on every
//! change.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use crate::error::{Result, StateError};

const EXTENSION: &str = "json";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Key/value store of JSON documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document, `None` when it does not exist
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a document, replacing any previous version
    async fn put(&self, key: &str, doc: &Value) -> Result<()>;

    /// Delete a document, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List stored keys
    async fn keys(&self) -> Result<Vec<String>>;
}

impl dyn DocumentStore {
    /// Read and decode a document
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(doc) => serde_json::from_value(doc)
                .map(Some)
                .map_err(|e| StateError::Deserialization {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Encode and write a document
    pub async fn put_as<T: Serialize>(&self, key: &str, doc: &T) -> Result<()> {
        let value = serde_json::to_value(doc)?;
        self.put(key, &value).await
    }
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StateError::InvalidKey(key.to_string()))
    }
}

/// Store keeping each document in `<dir>/<key>.json`
///
/// Writes go to a temporary file in the same directory that is then renamed
/// over the target, so readers never see a partial document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StateError::io(&dir, e))?;
        debug!(dir = %dir.display(), "Opened JSON document store");
        Ok(Self { dir })
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.{EXTENSION}")))
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(&path, e)),
        };

        let doc = serde_json::from_slice(&bytes).map_err(|e| StateError::Deserialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        trace!(key, bytes = bytes.len(), "Read document");
        Ok(Some(doc))
    }

    async fn put(&self, key: &str, doc: &Value) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(
            ".{key}.tmp-{}-{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let content = serde_json::to_vec_pretty(doc)?;

        tokio::fs::write(&tmp, &content)
            .await
            .map_err(|e| StateError::io(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StateError::io(&path, e));
        }

        trace!(key, bytes = content.len(), "Wrote document");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StateError::io(&path, e)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StateError::io(&self.dir, e))?;

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StateError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory store, used by tests and ephemeral setups
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        validate_key(key)?;
        Ok(self.docs.read().get(key).cloned())
    }

    async fn put(&self, key: &str, doc: &Value) -> Result<()> {
        validate_key(key)?;
        self.docs.write().insert(key.to_string(), doc.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.docs.write().remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.docs.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        id: u32,
        label: String,
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("store")).await.unwrap();

        assert!(store.get("scenes").await.unwrap().is_none());

        store.put("scenes", &json!([{"sceneid": 1}])).await.unwrap();
        let doc = store.get("scenes").await.unwrap().unwrap();
        assert_eq!(doc, json!([{"sceneid": 1}]));
        assert!(dir.path().join("store/scenes.json").exists());
    }

    #[tokio::test]
    async fn test_file_store_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        store.put("scenes", &json!([])).await.unwrap();
        store.put("scenes", &json!([1, 2])).await.unwrap();

        assert_eq!(store.get("scenes").await.unwrap(), Some(json!([1, 2])));
        assert_eq!(store.keys().await.unwrap(), vec!["scenes".to_string()]);
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_file_store_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        store.put("a", &json!(1)).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        let err = store.put("../escape", &json!(1)).await.unwrap_err();
        assert!(matches!(err, StateError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_file_store_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scenes.json"), b"{not json").unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        let err = store.get("scenes").await.unwrap_err();
        assert!(matches!(err, StateError::Deserialization { .. }));
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let docs = vec![Doc {
            id: 1,
            label: "Evening".into(),
        }];

        store.put_as("scenes", &docs).await.unwrap();
        let back: Vec<Doc> = store.get_as("scenes").await.unwrap().unwrap();
        assert_eq!(back, docs);

        let missing: Option<Vec<Doc>> = store.get_as("other").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_typed_helper_shape_mismatch() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        store.put("scenes", &json!({"unexpected": true})).await.unwrap();

        let err = store.get_as::<Vec<Doc>>("scenes").await.unwrap_err();
        assert!(matches!(err, StateError::Deserialization { .. }));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.put("b", &json!(2)).await.unwrap();
        store.put("a", &json!(1)).await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.keys().await.unwrap(), vec!["a", "b"]);
        assert!(store.delete("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }
}
