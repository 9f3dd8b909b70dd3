//! Slice Registry
//!
//! Read-only, continuously updated view of slice metadata: which slices
//! exist and what local-storage layout each one declares. The remote-write
//! server keeps a filtered mirror of this view so `Open` never needs a
//! round trip to the metadata store.
//!
//! The registry trait is the seam to the external metadata store; the
//! in-memory implementation backs tests and single-node deployments, and
//! its broadcast feed is the change feed consumers subscribe to.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::broadcast;

use slipstream_core::{Slice, SliceKey};

use crate::error::{Error, Result};

/// One change in the slice view.
#[derive(Debug, Clone)]
pub enum SliceEvent {
    Put(Slice),
    Delete(SliceKey),
}

#[async_trait]
pub trait SliceRegistry: Send + Sync {
    /// Current layout of one slice.
    async fn get(&self, key: &SliceKey) -> Result<Slice>;

    /// Snapshot of every registered slice.
    async fn list(&self) -> Result<Vec<Slice>>;

    /// Change feed; starts at the moment of subscription, pair with `list`
    /// for a consistent view.
    fn watch(&self) -> broadcast::Receiver<SliceEvent>;
}

/// In-memory registry with a broadcast change feed.
pub struct MemoryRegistry {
    slices: RwLock<HashMap<SliceKey, Slice>>,
    feed: broadcast::Sender<SliceEvent>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(1024);
        Self {
            slices: RwLock::new(HashMap::new()),
            feed,
        }
    }

    pub fn put(&self, slice: Slice) {
        self.slices
            .write()
            .expect("registry lock poisoned")
            .insert(slice.key.clone(), slice.clone());
        let _ = self.feed.send(SliceEvent::Put(slice));
    }

    pub fn delete(&self, key: &SliceKey) {
        let removed = self
            .slices
            .write()
            .expect("registry lock poisoned")
            .remove(key);
        if removed.is_some() {
            let _ = self.feed.send(SliceEvent::Delete(key.clone()));
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SliceRegistry for MemoryRegistry {
    async fn get(&self, key: &SliceKey) -> Result<Slice> {
        self.slices
            .read()
            .expect("registry lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| Error::SliceNotFound(key.path()))
    }

    async fn list(&self) -> Result<Vec<Slice>> {
        let mut slices: Vec<Slice> = self
            .slices
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect();
        slices.sort_by_key(|s| s.key.path());
        Ok(slices)
    }

    fn watch(&self) -> broadcast::Receiver<SliceEvent> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use slipstream_core::{Compression, FileType, LocalSlice, SliceId, SyncConfig};

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
    async fn put_get_delete() {
        let registry = MemoryRegistry::new();
        let s = slice("vol-1", 1);

        registry.put(s.clone());
        assert_eq!(registry.get(&s.key).await.unwrap(), s);
        assert_eq!(registry.list().await.unwrap().len(), 1);

        registry.delete(&s.key);
        assert!(registry.get(&s.key).await.is_err());
    }

    #[tokio::test]
    async fn watch_receives_changes() {
        let registry = MemoryRegistry::new();
        let mut feed = registry.watch();

        let s = slice("vol-1", 1);
        registry.put(s.clone());
        registry.delete(&s.key);

        match feed.recv().await.unwrap() {
            SliceEvent::Put(got) => assert_eq!(got.key, s.key),
            other => panic!("unexpected event: {other:?}"),
        }
        match feed.recv().await.unwrap() {
            SliceEvent::Delete(key) => assert_eq!(key, s.key),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
