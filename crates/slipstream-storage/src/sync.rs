//! Disk-Sync Engine
//!
//! Translates per-write acceptance into a scheduled durability guarantee.
//!
//! ```text
//! writes ──▶ counters/meters ──▶ [check loop, every check_interval]
//!                                      │ any trigger met?
//!                                      ▼
//!                               trigger_sync ──▶ one cycle in flight
//!                                      │              │
//!                               swap notifier    chain.flush / chain.sync
//!                                      │              │
//!                               waiters of the   outcome resolves the
//!                               next cycle       swapped notifier
//! ```
//!
//! Rules the rest of the system relies on:
//!
//! - At most one sync cycle runs at a time. Triggers during a running cycle
//!   neither start a second cycle nor get lost - they observe the running
//!   cycle's outcome.
//! - Writes accepted while a cycle runs are covered by the *next* cycle.
//! - Cycles with nothing to sync are skipped entirely, no I/O.
//! - With `wait = false`, writers get no-op notifiers and sync errors are
//!   only logged; they still reach anyone holding the cycle notifier (the
//!   final cycle run by `stop`).

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tokio::sync::watch;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use slipstream_core::{SyncConfig, SyncMode};

use crate::chain::WriteChain;
use crate::error::{Error, Result};
use crate::notify::{new_pair, Notifier, NotifierHandle};

/// Live counters the engine evaluates its triggers against. Implemented by
/// the slice writer over the counters/meters already sitting in the chain.
pub trait SyncStats: Send + Sync {
    /// Count of accepted write operations.
    fn accepted_writes(&self) -> u64;
    /// Bytes written, measured before the compression stage.
    fn uncompressed_size(&self) -> u64;
    /// Bytes written, measured after the compression stage.
    fn compressed_size(&self) -> u64;
}

pub struct Syncer {
    config: SyncConfig,
    chain: Arc<WriteChain>,
    stats: Arc<dyn SyncStats>,
    enabled: bool,

    // Snapshots taken at the start of the last cycle.
    accepted_snapshot: AtomicU64,
    bytes_snapshot: AtomicU64,
    last_sync_at: Mutex<Instant>,

    /// Exclusivity of sync cycles; the owned guard lives for the cycle.
    cycle_lock: Arc<tokio::sync::Mutex<()>>,
    /// Pair resolved by the *next* cycle; writers pick up its notifier.
    current: RwLock<(NotifierHandle, Notifier)>,
    /// Notifier of the cycle currently (or most recently) in flight.
    last_started: Mutex<Notifier>,

    stopped: AtomicBool,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Syncer {
    /// Create the engine and start its check loop.
    ///
    /// Panics when the config is invalid - a zero trigger with an enabled
    /// mode is a programming/config mistake, not a runtime condition.
    pub fn new(config: SyncConfig, chain: Arc<WriteChain>, stats: Arc<dyn SyncStats>) -> Arc<Self> {
        if let Err(err) = config.validate() {
            panic!("invalid sync config: {err}");
        }

        let enabled = config.mode != SyncMode::Disabled;
        let (stop_tx, stop_rx) = watch::channel(false);

        let syncer = Arc::new(Self {
            enabled,
            chain,
            stats,
            accepted_snapshot: AtomicU64::new(0),
            bytes_snapshot: AtomicU64::new(0),
            last_sync_at: Mutex::new(Instant::now()),
            cycle_lock: Arc::new(tokio::sync::Mutex::new(())),
            current: RwLock::new(new_pair()),
            last_started: Mutex::new(Notifier::noop()),
            stopped: AtomicBool::new(false),
            stop_tx,
            task: Mutex::new(None),
            config,
        });

        if enabled {
            info!(
                mode = %syncer.config.mode,
                count_trigger = syncer.config.count_trigger,
                bytes_trigger = syncer.config.bytes_trigger,
                interval_trigger_ms = syncer.config.interval_trigger.as_millis() as u64,
                check_interval_ms = syncer.config.check_interval.as_millis() as u64,
                "sync is enabled"
            );
            let task = Self::spawn_check_loop(&syncer, stop_rx);
            *syncer.task.lock().expect("syncer task lock poisoned") = Some(task);
        } else {
            info!("sync is disabled");
        }

        syncer
    }

    /// Notifier for the cycle that will cover writes accepted now.
    /// A no-op notifier when syncing or waiting is disabled, and after stop -
    /// a write racing the final cycle must not wait on a notifier no cycle
    /// will ever resolve (the closing chain flushes its bytes anyway).
    pub fn notifier(&self) -> Notifier {
        if !self.enabled || !self.config.wait || self.stopped.load(Ordering::Acquire) {
            return Notifier::noop();
        }
        self.current
            .read()
            .expect("syncer notifier lock poisoned")
            .1
            .clone()
    }

    /// Initiate a sync cycle, bypassing the check loop.
    ///
    /// With `force = true` the call waits for a running cycle to finish and
    /// then starts a new one. With `force = false` a running cycle coalesces
    /// the trigger: its own notifier is returned and no new cycle starts.
    /// Neither variant waits for the cycle to complete - use the returned
    /// notifier for that.
    pub async fn trigger_sync(self: &Arc<Self>, force: bool) -> Notifier {
        if !self.enabled {
            return Notifier::noop();
        }

        let guard = if force {
            self.cycle_lock.clone().lock_owned().await
        } else {
            match self.cycle_lock.clone().try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    return self
                        .last_started
                        .lock()
                        .expect("syncer last-started lock poisoned")
                        .clone();
                }
            }
        };

        self.start_cycle(guard)
    }

    /// Stop the engine: run one final forced cycle covering the un-synced
    /// tail, then refuse further operations. The second call returns an
    /// "already stopped" error.
    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        debug!("stopping syncer");

        if self.stopped.swap(true, Ordering::AcqRel) {
            return Err(Error::SyncerAlreadyStopped);
        }
        let _ = self.stop_tx.send(true);

        // The last sync.
        let notifier = self.trigger_sync(true).await;
        let result = notifier.wait().await;

        let task = self.task.lock().expect("syncer task lock poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }

        debug!("syncer stopped");
        result
    }

    fn spawn_check_loop(syncer: &Arc<Self>, mut stop_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let syncer = syncer.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(syncer.config.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    _ = ticker.tick() => {
                        if syncer.check_conditions() {
                            let _ = syncer.trigger_sync(false).await;
                        }
                    }
                }
            }
        })
    }

    fn check_conditions(&self) -> bool {
        let count = self
            .stats
            .accepted_writes()
            .saturating_sub(self.accepted_snapshot.load(Ordering::Acquire));
        if count == 0 {
            return false;
        }
        if count >= self.config.count_trigger {
            return true;
        }

        let bytes = self
            .stats
            .uncompressed_size()
            .saturating_sub(self.bytes_snapshot.load(Ordering::Acquire));
        if bytes >= self.config.bytes_trigger {
            return true;
        }

        let last_sync_at = *self
            .last_sync_at
            .lock()
            .expect("syncer last-sync lock poisoned");
        last_sync_at.elapsed() >= self.config.interval_trigger
    }

    /// Start one cycle; the caller already holds the cycle lock and hands the
    /// owned guard over to the cycle task.
    fn start_cycle(self: &Arc<Self>, guard: OwnedMutexGuard<()>) -> Notifier {
        // Writes counted before this point belong to this cycle.
        let accepted = self.stats.accepted_writes();
        let pending = accepted.saturating_sub(self.accepted_snapshot.swap(accepted, Ordering::AcqRel));
        self.bytes_snapshot
            .store(self.stats.uncompressed_size(), Ordering::Release);
        *self
            .last_sync_at
            .lock()
            .expect("syncer last-sync lock poisoned") = Instant::now();

        // Swap the notifier: old writes observe this cycle, new writes the next.
        let (handle, notifier) = {
            let mut current = self.current.write().expect("syncer notifier lock poisoned");
            mem::replace(&mut *current, new_pair())
        };
        *self
            .last_started
            .lock()
            .expect("syncer last-started lock poisoned") = notifier.clone();

        if pending == 0 {
            debug!("nothing to sync");
            handle.finish(Ok(()));
            drop(guard);
            return notifier;
        }

        let chain = self.chain.clone();
        let mode = self.config.mode;
        tokio::spawn(async move {
            debug!(mode = %mode, pending, "starting sync");

            let result = tokio::task::spawn_blocking(move || match mode {
                SyncMode::Disk => chain.sync(),
                SyncMode::Cache => chain.flush(),
                SyncMode::Disabled => Ok(()),
            })
            .await;

            let outcome = match result {
                Ok(Ok(())) => {
                    debug!(mode = %mode, "sync done");
                    Ok(())
                }
                Ok(Err(err)) => {
                    error!(mode = %mode, "sync failed: {err}");
                    Err(err.to_string())
                }
                Err(err) => {
                    error!(mode = %mode, "sync task failed: {err}");
                    Err(err.to_string())
                }
            };

            // Release the cycle lock before waking waiters.
            drop(guard);
            handle.finish(outcome);
        });

        notifier
    }
}
