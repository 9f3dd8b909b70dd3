//! Record Counters
//!
//! [`Counter`] accumulates a monotonically increasing count together with the
//! timestamps of the first and last counted record. [`CounterWithBackup`]
//! additionally persists the value to a small backup file on a periodic
//! background task and on close, so a node restart does not lose statistics
//! already durable on disk.
//!
//! Backup file format: `{count},{first},{last}` with RFC 3339 millisecond
//! timestamps, e.g. `5,2001-01-01T00:00:00.000Z,2002-01-01T00:00:00.000Z`.
//! After a crash, the loaded value is the last successfully flushed backup,
//! never a higher value.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

use crate::error::{Error, Result};

pub(crate) fn format_utc(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// In-memory record counter with first/last timestamps.
#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicU64,
    // (first, last); updated only while counting, read by accessors.
    times: Mutex<Option<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(
        count: u64,
        first_at: Option<DateTime<Utc>>,
        last_at: Option<DateTime<Utc>>,
    ) -> Self {
        let times = match (first_at, last_at) {
            (Some(first), Some(last)) => Some((first, last)),
            _ => None,
        };
        Self {
            count: AtomicU64::new(count),
            times: Mutex::new(times),
        }
    }

    /// Add `n` records observed at `at`. Adding zero records is a no-op and
    /// does not touch the timestamps.
    pub fn add(&self, at: DateTime<Utc>, n: u64) {
        if n == 0 {
            return;
        }
        self.count.fetch_add(n, Ordering::AcqRel);

        let mut times = self.times.lock().expect("counter times lock poisoned");
        match &mut *times {
            Some((first, last)) => {
                if at < *first {
                    *first = at;
                }
                if at > *last {
                    *last = at;
                }
            }
            None => *times = Some((at, at)),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn first_at(&self) -> Option<DateTime<Utc>> {
        self.times
            .lock()
            .expect("counter times lock poisoned")
            .map(|(first, _)| first)
    }

    pub fn last_at(&self) -> Option<DateTime<Utc>> {
        self.times
            .lock()
            .expect("counter times lock poisoned")
            .map(|(_, last)| last)
    }
}

/// Counter whose value is periodically persisted to a backup file.
///
/// The backup file has its own lock: counters are never shared between
/// writers, so there is no coarser lock to contend with.
pub struct CounterWithBackup {
    counter: Arc<Counter>,
    backup: Arc<Backup>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for CounterWithBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterWithBackup").finish_non_exhaustive()
    }
}

struct Backup {
    file: Mutex<std::fs::File>,
}

impl Backup {
    fn sync(&self, content: String) -> Result<()> {
        let mut file = self.file.lock().expect("backup file lock poisoned");
        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(content.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }
}

impl CounterWithBackup {
    /// Open the backup file, load the last flushed value and start the
    /// periodic backup task.
    pub fn open(path: impl AsRef<Path>, interval: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let counter = Arc::new(parse_backup(&path, content.trim())?);

        let backup = Arc::new(Backup {
            file: Mutex::new(file),
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_backup_loop(interval, stop_rx, {
            let counter = counter.clone();
            let backup = backup.clone();
            move || sync_counter_backup(&counter, &backup)
        });

        Ok(Self {
            counter,
            backup,
            stop_tx,
            task: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn add(&self, at: DateTime<Utc>, n: u64) {
        self.counter.add(at, n);
    }

    pub fn count(&self) -> u64 {
        self.counter.count()
    }

    pub fn first_at(&self) -> Option<DateTime<Utc>> {
        self.counter.first_at()
    }

    pub fn last_at(&self) -> Option<DateTime<Utc>> {
        self.counter.last_at()
    }

    /// Force an immediate backup flush.
    pub fn sync_backup(&self) -> Result<()> {
        sync_counter_backup(&self.counter, &self.backup)
    }

    /// Stop the backup task and flush the final value. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let _ = self.stop_tx.send(true);
        let task = self.task.lock().expect("counter task lock poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let counter = self.counter.clone();
        let backup = self.backup.clone();
        tokio::task::spawn_blocking(move || sync_counter_backup(&counter, &backup))
            .await
            .map_err(|e| Error::Sync(e.to_string()))?
    }
}

fn sync_counter_backup(counter: &Counter, backup: &Backup) -> Result<()> {
    let content = match (counter.first_at(), counter.last_at()) {
        (Some(first), Some(last)) => {
            format!(
                "{},{},{}",
                counter.count(),
                format_utc(first),
                format_utc(last)
            )
        }
        _ => String::new(),
    };
    backup.sync(content)
}

fn parse_backup(path: &Path, content: &str) -> Result<Counter> {
    if content.is_empty() {
        return Ok(Counter::new());
    }

    let corrupted = |reason: &str| Error::CorruptedBackup {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut parts = content.splitn(3, ',');
    let count: u64 = parts
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| corrupted("invalid count"))?;
    let first = parts
        .next()
        .and_then(parse_utc)
        .ok_or_else(|| corrupted("invalid first timestamp"))?;
    let last = parts
        .next()
        .and_then(parse_utc)
        .ok_or_else(|| corrupted("invalid last timestamp"))?;

    Ok(Counter::with_initial(count, Some(first), Some(last)))
}

/// Periodic flush loop shared by counter and meter backups.
pub(crate) fn spawn_backup_loop<F>(
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
    flush: F,
) -> JoinHandle<()>
where
    F: Fn() -> Result<()> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let flush = Arc::new(flush);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => return,
                _ = ticker.tick() => {
                    let flush = flush.clone();
                    let result = tokio::task::spawn_blocking(move || flush()).await;
                    match result {
                        Ok(Err(err)) => error!("cannot sync backup: {err}"),
                        Err(err) => error!("backup task panicked: {err}"),
                        Ok(Ok(())) => {}
                    }
                }
            }
        }
    })
}
