//! Slice Metadata Mirror
//!
//! Server-side, filtered and continuously updated copy of slice metadata:
//! only slices whose volume is owned by this node. `Open` resolves a slice's
//! layout from the mirror instead of a network round trip to the metadata
//! store on every call.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use slipstream_core::{Slice, SliceKey, VolumeId};
use slipstream_metadata::{SliceEvent, SliceRegistry};

pub struct SliceMirror {
    slices: RwLock<HashMap<SliceKey, Slice>>,
    local_volumes: HashSet<VolumeId>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SliceMirror {
    /// Seed the mirror from the registry and start applying its change feed.
    pub async fn start(
        registry: Arc<dyn SliceRegistry>,
        local_volumes: impl IntoIterator<Item = VolumeId>,
    ) -> slipstream_metadata::Result<Arc<Self>> {
        let local_volumes: HashSet<VolumeId> = local_volumes.into_iter().collect();

        // Subscribe before the snapshot so no change falls in between.
        let mut feed = registry.watch();
        let snapshot = registry.list().await?;

        let slices: HashMap<SliceKey, Slice> = snapshot
            .into_iter()
            .filter(|s| local_volumes.contains(&s.key.volume_id))
            .map(|s| (s.key.clone(), s))
            .collect();

        info!(slices = slices.len(), "seeded slice metadata mirror");

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let mirror = Arc::new(Self {
            slices: RwLock::new(slices),
            local_volumes,
            stop_tx,
            task: Mutex::new(None),
        });

        let task = {
            let mirror = mirror.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = stop_rx.changed() => return,
                        event = feed.recv() => match event {
                            Ok(event) => mirror.apply(event),
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                warn!(dropped = n, "slice metadata feed lagged");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                        },
                    }
                }
            })
        };
        *mirror.task.lock().expect("mirror task lock poisoned") = Some(task);

        Ok(mirror)
    }

    fn apply(&self, event: SliceEvent) {
        let mut slices = self.slices.write().expect("mirror slices lock poisoned");
        match event {
            SliceEvent::Put(slice) => {
                if self.local_volumes.contains(&slice.key.volume_id) {
                    slices.insert(slice.key.clone(), slice);
                }
            }
            SliceEvent::Delete(key) => {
                slices.remove(&key);
            }
        }
    }

    /// Layout of one locally-hosted slice.
    pub fn get(&self, key: &SliceKey) -> Option<Slice> {
        self.slices
            .read()
            .expect("mirror slices lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.slices.read().expect("mirror slices lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop applying the change feed.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let task = self.task.lock().expect("mirror task lock poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use slipstream_core::{Compression, FileType, LocalSlice, SliceId, SyncConfig};
    use slipstream_metadata::MemoryRegistry;
    use std::time::Duration;

    fn slice(volume: &str, hour: u32) -> Slice {
        let at = Utc.with_ymd_and_hms(2000, 1, 1, hour, 0, 0).unwrap();
        let key = SliceKey {
            source_id: "src".into(),
            sink_id: "sink".into(),
            file_id: SliceId(at),
            volume_id: volume.into(),
            slice_id: SliceId(at),
        };
        Slice {
            local: LocalSlice::for_key(&key, Compression::None, SyncConfig::default()),
            key,
            file_type: FileType::Csv,
            columns: vec![],
        }
    }

    #[tokio::test]
    async fn mirror_filters_to_local_volumes() {
        let registry = Arc::new(MemoryRegistry::new());
        let local = slice("local-vol", 1);
        let foreign = slice("other-vol", 2);
        registry.put(local.clone());
        registry.put(foreign.clone());

        let mirror = SliceMirror::start(
            registry.clone(),
            [VolumeId("local-vol".to_string())],
        )
        .await
        .unwrap();

        assert_eq!(mirror.len(), 1);
        assert!(mirror.get(&local.key).is_some());
        assert!(mirror.get(&foreign.key).is_none());

        mirror.stop().await;
    }

    #[tokio::test]
    async fn mirror_follows_the_feed() {
        let registry = Arc::new(MemoryRegistry::new());
        let mirror = SliceMirror::start(
            registry.clone(),
            [VolumeId("local-vol".to_string())],
        )
        .await
        .unwrap();

        let s = slice("local-vol", 1);
        registry.put(s.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mirror.get(&s.key).is_some());

        registry.delete(&s.key);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mirror.get(&s.key).is_none());

        // After stop the feed no longer applies.
        mirror.stop().await;
        registry.put(s.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mirror.get(&s.key).is_none());
    }
}
