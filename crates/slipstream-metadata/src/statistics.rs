//! Statistics Registry
//!
//! Per-slice statistics snapshots, keyed by the slice key path so that all
//! records under an object - a source, a sink, a file - share a key prefix.
//! Slice writers push snapshots of their counters/meters here; the L1/L2
//! cache consumes the change feed.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Aggregatable statistics of one slice (or a merge of many).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsValue {
    /// Number of slices merged into this value.
    pub slices_count: u64,
    pub first_record_at: Option<DateTime<Utc>>,
    pub last_record_at: Option<DateTime<Utc>>,
    pub records_count: u64,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
}

impl Add for StatsValue {
    type Output = StatsValue;

    fn add(mut self, rhs: StatsValue) -> StatsValue {
        self += rhs;
        self
    }
}

impl AddAssign for StatsValue {
    fn add_assign(&mut self, rhs: StatsValue) {
        self.slices_count += rhs.slices_count;
        self.records_count += rhs.records_count;
        self.uncompressed_size += rhs.uncompressed_size;
        self.compressed_size += rhs.compressed_size;
        self.first_record_at = match (self.first_record_at, rhs.first_record_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_record_at = match (self.last_record_at, rhs.last_record_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// One change in the statistics view.
#[derive(Debug, Clone)]
pub enum StatsEvent {
    Put { key: String, value: StatsValue },
    Delete { key: String },
}

/// In-memory statistics store with a broadcast change feed. The durable
/// store behind it is an external collaborator; the core only needs put,
/// prefix scans and the feed.
pub struct StatsRegistry {
    records: RwLock<BTreeMap<String, StatsValue>>,
    feed: broadcast::Sender<StatsEvent>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(1024);
        Self {
            records: RwLock::new(BTreeMap::new()),
            feed,
        }
    }

    /// Replace the snapshot of one slice.
    pub fn put(&self, key: impl Into<String>, value: StatsValue) {
        let key = key.into();
        self.records
            .write()
            .expect("statistics lock poisoned")
            .insert(key.clone(), value);
        let _ = self.feed.send(StatsEvent::Put { key, value });
    }

    pub fn delete(&self, key: &str) {
        let removed = self
            .records
            .write()
            .expect("statistics lock poisoned")
            .remove(key);
        if removed.is_some() {
            let _ = self.feed.send(StatsEvent::Delete {
                key: key.to_string(),
            });
        }
    }

    pub fn get(&self, key: &str) -> Option<StatsValue> {
        self.records
            .read()
            .expect("statistics lock poisoned")
            .get(key)
            .copied()
    }

    /// Snapshot of every record, in key order.
    pub fn list(&self) -> Vec<(String, StatsValue)> {
        self.records
            .read()
            .expect("statistics lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn watch(&self) -> broadcast::Receiver<StatsEvent> {
        self.feed.subscribe()
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
