//! Statistics Front Cache (L1/L2)
//!
//! Two tiers above the raw per-slice statistics:
//!
//! - **L1** - a live in-memory mirror of every persisted statistics record,
//!   fed by the registry change feed. Aggregation walks all records under a
//!   key prefix and sums them - O(live slices under the prefix), recomputed
//!   on every query. A small CPU cost buys always-fresh results.
//! - **L2** - an optional memo of L1's aggregate per prefix. Entries are
//!   computed lazily on first miss and the whole cache is invalidated on a
//!   fixed interval. The first entry cached after an invalidation records
//!   the originating L1 revision, so staleness bounds are observable.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::statistics::{StatsEvent, StatsRegistry, StatsValue};

/// Live mirror of all statistics records, revision-stamped.
pub struct L1Cache {
    records: RwLock<BTreeMap<String, StatsValue>>,
    /// Bumped on every applied change; lets L2 stamp its entries.
    revision: AtomicU64,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl L1Cache {
    /// Seed the mirror from the registry and start consuming its feed.
    pub fn start(registry: &Arc<StatsRegistry>) -> Arc<Self> {
        // Subscribe before the snapshot so no change can fall between them.
        let mut feed = registry.watch();
        let snapshot: BTreeMap<String, StatsValue> = registry.list().into_iter().collect();

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let cache = Arc::new(Self {
            records: RwLock::new(snapshot),
            revision: AtomicU64::new(1),
            stop_tx,
            task: Mutex::new(None),
        });

        let task = {
            let cache = cache.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = stop_rx.changed() => return,
                        event = feed.recv() => match event {
                            Ok(event) => cache.apply(event),
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                warn!(dropped = n, "statistics feed lagged");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                        },
                    }
                }
            })
        };
        *cache.task.lock().expect("l1 task lock poisoned") = Some(task);

        cache
    }

    fn apply(&self, event: StatsEvent) {
        {
            let mut records = self.records.write().expect("l1 records lock poisoned");
            match event {
                StatsEvent::Put { key, value } => {
                    records.insert(key, value);
                }
                StatsEvent::Delete { key } => {
                    records.remove(&key);
                }
            }
        }
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    /// Mirror revision; every applied change bumps it.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Sum every record under the key prefix. Recomputed on each call.
    pub fn aggregate(&self, prefix: &str) -> StatsValue {
        let records = self.records.read().expect("l1 records lock poisoned");
        let mut sum = StatsValue::default();
        for (_, value) in records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            sum += *value;
        }
        sum
    }

    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let task = self.task.lock().expect("l1 task lock poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Aggregate memoized by L2, stamped with the L1 revision it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedAggregate {
    pub value: StatsValue,
    pub l1_revision: u64,
}

/// Lazy per-prefix memo over L1, invalidated wholesale on a fixed interval.
pub struct L2Cache {
    l1: Arc<L1Cache>,
    entries: RwLock<HashMap<String, CachedAggregate>>,
    /// Count of wholesale invalidations, observable for staleness bounds.
    invalidations: AtomicU64,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl L2Cache {
    pub fn start(l1: Arc<L1Cache>, invalidation_interval: Duration) -> Arc<Self> {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let cache = Arc::new(Self {
            l1,
            entries: RwLock::new(HashMap::new()),
            invalidations: AtomicU64::new(0),
            stop_tx,
            task: Mutex::new(None),
        });

        let task = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(invalidation_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = stop_rx.changed() => return,
                        _ = ticker.tick() => cache.invalidate(),
                    }
                }
            })
        };
        *cache.task.lock().expect("l2 task lock poisoned") = Some(task);

        cache
    }

    /// Aggregate for the prefix: the memoized value when present, otherwise
    /// computed from L1 and cached with the originating L1 revision.
    pub fn aggregate(&self, prefix: &str) -> CachedAggregate {
        if let Some(entry) = self
            .entries
            .read()
            .expect("l2 entries lock poisoned")
            .get(prefix)
        {
            return *entry;
        }

        let entry = CachedAggregate {
            l1_revision: self.l1.revision(),
            value: self.l1.aggregate(prefix),
        };
        self.entries
            .write()
            .expect("l2 entries lock poisoned")
            .insert(prefix.to_string(), entry);
        entry
    }

    /// Drop every memoized aggregate.
    pub fn invalidate(&self) {
        self.entries
            .write()
            .expect("l2 entries lock poisoned")
            .clear();
        self.invalidations.fetch_add(1, Ordering::AcqRel);
        debug!("invalidated L2 statistics cache");
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Acquire)
    }

    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let task = self.task.lock().expect("l2 task lock poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
