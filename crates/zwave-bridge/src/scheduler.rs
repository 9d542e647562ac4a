//! Scene activation
//!
//! Activating a scene schedules every write independently: a write with a
//! zero timeout goes out immediately, others after their delay. Timers are
//! not cancellable and do not survive a restart.

use tokio::sync::mpsc;
use tracing::{debug, trace};

use zwave_core::MeshCommand;

use crate::error::Result;
use crate::scenes::SceneStore;

/// Turns scene activations into delayed value writes
#[derive(Debug, Clone)]
pub struct SceneScheduler {
    tx: mpsc::Sender<MeshCommand>,
}

impl SceneScheduler {
    /// Create a scheduler delivering writes to `tx`
    pub fn new(tx: mpsc::Sender<MeshCommand>) -> Self {
        Self { tx }
    }

    /// Create a scheduler together with the receiving end of its writes
    pub fn channel() -> (Self, mpsc::Receiver<MeshCommand>) {
        let (tx, rx) = mpsc::channel(256);
        (Self::new(tx), rx)
    }

    /// Schedule every write of a scene, returning how many were scheduled
    pub fn activate(&self, scenes: &SceneStore, scene_id: u32) -> Result<usize> {
        let values = scenes.values(scene_id)?;
        debug!(scene_id, writes = values.len(), "Activating scene");

        for entry in values {
            let tx = self.tx.clone();
            let delay = entry.delay();
            let command = MeshCommand::SetValue {
                value_id: entry.target(),
                value: entry.value.clone(),
            };

            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(command).await.is_err() {
                    trace!(scene_id, "Scene write dropped, gateway stopped");
                }
            });
        }

        Ok(values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use zwave_core::{Value, ValueId, ValuePayload};
    use zwave_state::{DocumentStore, MemoryStore};

    use crate::error::GatewayError;
    use crate::registry::DeviceRegistry;

    async fn scene_with_delays() -> (SceneStore, u32) {
        let mut registry = DeviceRegistry::new();
        registry.add_node(4);
        for index in 0..2 {
            registry
                .add_value(4, Value::new(ValueId::new(4, 38, 1, index), 0))
                .unwrap();
        }

        let docs: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut scenes = SceneStore::load(docs, "scenes").await.unwrap();
        let id = scenes.create("Fade");
        scenes
            .upsert_value(&registry, id, ValueId::new(4, 38, 1, 0), ValuePayload::from(99), 0.0)
            .unwrap();
        scenes
            .upsert_value(&registry, id, ValueId::new(4, 38, 1, 1), ValuePayload::from(20), 5.0)
            .unwrap();
        (scenes, id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_and_delayed_writes() {
        let (scenes, id) = scene_with_delays().await;
        let (scheduler, mut rx) = SceneScheduler::channel();

        assert_eq!(scheduler.activate(&scenes, id).unwrap(), 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            MeshCommand::SetValue {
                value_id: ValueId::new(4, 38, 1, 0),
                value: ValuePayload::from(99),
            }
        );

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        let start = tokio::time::Instant::now();
        let second = rx.recv().await.unwrap();
        assert!(start.elapsed() <= Duration::from_secs(1));
        assert!(matches!(
            second,
            MeshCommand::SetValue { value_id, .. } if value_id == ValueId::new(4, 38, 1, 1)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_delay() {
        let mut registry = DeviceRegistry::new();
        registry.add_node(4);
        registry
            .add_value(4, Value::new(ValueId::new(4, 37, 1, 0), false))
            .unwrap();

        let docs: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut scenes = SceneStore::load(docs, "scenes").await.unwrap();
        let id = scenes.create("Porch");
        scenes
            .upsert_value(&registry, id, ValueId::new(4, 37, 1, 0), true.into(), 1.5)
            .unwrap();

        let (scheduler, mut rx) = SceneScheduler::channel();
        scheduler.activate(&scenes, id).unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        let start = tokio::time::Instant::now();
        rx.recv().await.unwrap();
        assert!(start.elapsed() <= Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_unknown_scene() {
        let docs: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let scenes = SceneStore::load(docs, "scenes").await.unwrap();
        let (scheduler, _rx) = SceneScheduler::channel();

        let err = scheduler.activate(&scenes, 3).unwrap_err();
        assert!(matches!(err, GatewayError::SceneNotFound(3)));
    }

    #[tokio::test]
    async fn test_empty_scene_schedules_nothing() {
        let docs: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut scenes = SceneStore::load(docs, "scenes").await.unwrap();
        let id = scenes.create("Empty");
        let (scheduler, _rx) = SceneScheduler::channel();

        assert_eq!(scheduler.activate(&scenes, id).unwrap(), 0);
    }
}
