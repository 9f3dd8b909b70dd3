//! Slice Writer
//!
//! The user-facing per-slice API. One writer binds together:
//!
//! - a [`WriteChain`] assembled for the slice's layout
//!   (`format → [input buffer] → [uncompressed meter] → [compression] →
//!   compressed meter → [file buffer] → file`),
//! - a [`Syncer`] evaluating the slice's sync policy against the live
//!   counters/meters,
//! - a format encoder turning record values into bytes,
//! - the counters with on-disk backups that survive a node restart.
//!
//! `write_record` serializes the record through the chain in call order and
//! then - per the sync policy's wait contract - either blocks on the cycle
//! notifier or returns immediately. `close` is the only terminal transition;
//! writes after it fail with a closed error.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};
use tracing::debug;

use slipstream_core::{Slice, SliceKey, SyncMode};

use crate::buffer::LimitBuffer;
use crate::chain::{ChainFile, WriteChain};
use crate::compress::Lz4Stage;
use crate::config::WriterConfig;
use crate::count::{Counter, CounterWithBackup};
use crate::error::{Error, MultiError, Result};
use crate::events::Events;
use crate::format::{new_encoder, FormatEncoder};
use crate::meter::MeterWithBackup;
use crate::sync::{SyncStats, Syncer};

/// Backup file of the completed-writes counter, inside the slice directory.
pub const COMPLETED_COUNT_FILE: &str = "completed_count";
/// Backup file of the compressed byte size.
pub const COMPRESSED_SIZE_FILE: &str = "compressed_size";
/// Backup file of the uncompressed byte size.
pub const UNCOMPRESSED_SIZE_FILE: &str = "uncompressed_size";

/// Cheaply cloneable handle to one open slice writer.
#[derive(Clone)]
pub struct SliceWriter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SliceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceWriter").finish_non_exhaustive()
    }
}

struct Inner {
    slice: Slice,
    dir_path: PathBuf,
    file_path: PathBuf,

    chain: Arc<WriteChain>,
    syncer: Arc<Syncer>,
    encoder: Arc<dyn FormatEncoder>,
    format_permits: Arc<Semaphore>,

    /// Read side held by in-flight writes; close takes the write side to
    /// wait for them.
    write_gate: RwLock<()>,
    closed: AtomicBool,

    accepted: Arc<Counter>,
    completed: CounterWithBackup,
    compressed: MeterWithBackup,
    /// Present only when compression is enabled; otherwise compressed and
    /// uncompressed sizes are the same meter.
    uncompressed: Option<MeterWithBackup>,

    events: Arc<Events<SliceWriter>>,
}

struct SliceStats {
    accepted: Arc<Counter>,
    uncompressed: Arc<AtomicU64>,
    compressed: Arc<AtomicU64>,
}

impl SyncStats for SliceStats {
    fn accepted_writes(&self) -> u64 {
        self.accepted.count()
    }

    fn uncompressed_size(&self) -> u64 {
        self.uncompressed.load(Ordering::Acquire)
    }

    fn compressed_size(&self) -> u64 {
        self.compressed.load(Ordering::Acquire)
    }
}

impl SliceWriter {
    /// Assemble a writer for `slice` over an already-opened data file.
    /// Dispatches the open event; listeners failing aborts the open and the
    /// partially-built resources are released.
    pub(crate) async fn open(
        cfg: &WriterConfig,
        slice: Slice,
        file: Box<dyn ChainFile>,
        dir_path: &Path,
        file_path: &Path,
        volume_events: &Arc<Events<SliceWriter>>,
    ) -> Result<Self> {
        let interval = cfg.stats_sync_interval;

        // Accepted counter is purely in-memory; completed survives restarts.
        let accepted = Arc::new(Counter::new());
        let completed = CounterWithBackup::open(dir_path.join(COMPLETED_COUNT_FILE), interval)?;

        let mut chain = WriteChain::new(file);

        // Buffer directly ahead of the file.
        if cfg.file_buffer > 0 {
            let capacity = cfg.file_buffer;
            chain.prepend_writer(|inner| Ok(LimitBuffer::new(inner, capacity)))?;
        }

        // Compressed size is measured after the compression stage.
        let compressed = match MeterWithBackup::open(dir_path.join(COMPRESSED_SIZE_FILE), interval)
        {
            Ok(meter) => meter,
            Err(err) => {
                let _ = completed.close().await;
                let _ = chain.close();
                return Err(err);
            }
        };
        chain.prepend_writer(|inner| Ok(compressed.stage(inner, "compressed-size-meter")))?;

        // Compression, with its own input buffer and the uncompressed meter
        // ahead of it. Without compression both sizes are the same meter.
        let uncompressed = if slice.local.compression.is_enabled() {
            chain.prepend_writer(|inner| Ok(Lz4Stage::new(inner)))?;
            if cfg.input_buffer > 0 {
                let capacity = cfg.input_buffer;
                chain.prepend_writer(|inner| Ok(LimitBuffer::new(inner, capacity)))?;
            }
            match MeterWithBackup::open(dir_path.join(UNCOMPRESSED_SIZE_FILE), interval) {
                Ok(meter) => {
                    chain.prepend_writer(|inner| Ok(meter.stage(inner, "uncompressed-size-meter")))?;
                    Some(meter)
                }
                Err(err) => {
                    let _ = completed.close().await;
                    let _ = compressed.close().await;
                    let _ = chain.close();
                    return Err(err);
                }
            }
        } else {
            None
        };

        let encoder = match new_encoder(&slice) {
            Ok(encoder) => encoder,
            Err(err) => {
                let _ = completed.close().await;
                let _ = compressed.close().await;
                if let Some(meter) = &uncompressed {
                    let _ = meter.close().await;
                }
                let _ = chain.close();
                return Err(err);
            }
        };

        let chain = Arc::new(chain);
        let stats: Arc<dyn SyncStats> = Arc::new(SliceStats {
            accepted: accepted.clone(),
            uncompressed: uncompressed
                .as_ref()
                .unwrap_or(&compressed)
                .size_cell(),
            compressed: compressed.size_cell(),
        });
        let syncer = Syncer::new(slice.local.sync.clone(), chain.clone(), stats);

        let writer = SliceWriter {
            inner: Arc::new(Inner {
                format_permits: Arc::new(Semaphore::new(cfg.effective_format_concurrency())),
                events: volume_events.child(),
                dir_path: dir_path.to_path_buf(),
                file_path: file_path.to_path_buf(),
                slice,
                chain,
                syncer,
                encoder,
                write_gate: RwLock::new(()),
                closed: AtomicBool::new(false),
                accepted,
                completed,
                compressed,
                uncompressed,
            }),
        };

        if let Err(err) = writer.inner.events.dispatch_on_open(&writer) {
            let _ = writer.close().await;
            return Err(err);
        }

        debug!(slice = %writer.key(), "opened slice writer");
        Ok(writer)
    }

    /// Serialize one record through the chain and honor the sync contract:
    /// block for durability when the slice's policy says `wait`, return
    /// immediately otherwise.
    pub async fn write_record(&self, at: DateTime<Utc>, values: &[Value]) -> Result<()> {
        let _gate = self.inner.write_gate.read().await;

        if self.is_closed() {
            return Err(Error::WriterClosed);
        }

        let columns = self.inner.slice.columns.len();
        if values.len() != columns {
            return Err(slipstream_core::Error::InvalidColumnCount {
                expected: columns,
                given: values.len(),
            }
            .into());
        }

        // Row formatting runs concurrently across writes, bounded by the
        // semaphore; only the chain write below is serialized.
        let row = {
            let _permit = self
                .inner
                .format_permits
                .acquire()
                .await
                .map_err(|_| Error::WriterClosed)?;
            let mut row = Vec::with_capacity(128);
            self.inner.encoder.encode_record(values, &mut row)?;
            row
        };

        self.inner.chain.write_all(&row)?;

        let notifier = self.inner.syncer.notifier();
        self.inner.accepted.add(at, 1);

        // Wait for the covering sync cycle and surface its error, if any.
        notifier.wait().await?;

        self.inner.completed.add(at, 1);
        Ok(())
    }

    /// Raw byte entry point used by the remote-write protocol: bytes are
    /// already formatted on the source node, each call counts as one write
    /// operation.
    pub async fn write_bytes(&self, at: DateTime<Utc>, data: &[u8]) -> Result<usize> {
        let _gate = self.inner.write_gate.read().await;

        if self.is_closed() {
            return Err(Error::WriterClosed);
        }

        self.inner.chain.write_all(data)?;

        let notifier = self.inner.syncer.notifier();
        self.inner.accepted.add(at, 1);
        notifier.wait().await?;

        self.inner.completed.add(at, 1);
        Ok(data.len())
    }

    /// Force a sync cycle and wait for it.
    pub async fn sync(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::WriterClosed);
        }

        if self.inner.slice.local.sync.mode == SyncMode::Disabled {
            let chain = self.inner.chain.clone();
            return tokio::task::spawn_blocking(move || chain.sync())
                .await
                .map_err(|e| Error::Sync(e.to_string()))?;
        }

        self.inner.syncer.trigger_sync(true).await.wait().await
    }

    /// Close the writer: final sync, chain teardown, counter backups, close
    /// events. Every failing step is collected; the second call returns an
    /// "already closed" error.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::WriterAlreadyClosed);
        }

        debug!(slice = %self.key(), "closing slice writer");
        let mut errs = MultiError::new();

        // Stop the syncer; it runs the last sync covering the un-synced tail.
        errs.push_result(self.inner.syncer.stop().await);

        // Close the chain: stages, final sync, file.
        let chain = self.inner.chain.clone();
        match tokio::task::spawn_blocking(move || chain.close()).await {
            Ok(result) => errs.push_result(result),
            Err(err) => errs.push(Error::Sync(err.to_string())),
        }

        // Wait for writes that were already past the closed check.
        drop(self.inner.write_gate.write().await);

        // Persist the final counter/meter values.
        errs.push_result(self.inner.completed.close().await);
        errs.push_result(self.inner.compressed.close().await);
        if let Some(meter) = &self.inner.uncompressed {
            errs.push_result(meter.close().await);
        }

        // Dispatch close events with the accumulated error, outermost scope
        // first; their failures join the aggregate.
        let close_error = errs.into_result().err();
        let dispatch_result = self
            .inner
            .events
            .dispatch_on_close(self, close_error.as_ref());

        let mut errs = MultiError::new();
        if let Some(err) = close_error {
            errs.push(err);
        }
        errs.push_result(dispatch_result);

        debug!(slice = %self.key(), "closed slice writer");
        errs.into_result()
    }

    pub fn key(&self) -> &SliceKey {
        &self.inner.slice.key
    }

    pub fn slice(&self) -> &Slice {
        &self.inner.slice
    }

    /// Writer-scope events; volume close callbacks hook in here.
    pub fn events(&self) -> &Arc<Events<SliceWriter>> {
        &self.inner.events
    }

    /// Absolute path of the slice directory (data file plus backups).
    pub fn dir_path(&self) -> &Path {
        &self.inner.dir_path
    }

    /// Absolute path of the slice data file.
    pub fn file_path(&self) -> &Path {
        &self.inner.file_path
    }

    /// Count of accepted write operations.
    pub fn accepted_writes(&self) -> u64 {
        self.inner.accepted.count()
    }

    /// Count of successfully written and synced operations.
    pub fn completed_writes(&self) -> u64 {
        self.inner.completed.count()
    }

    pub fn first_record_at(&self) -> Option<DateTime<Utc>> {
        self.inner.completed.first_at()
    }

    pub fn last_record_at(&self) -> Option<DateTime<Utc>> {
        self.inner.completed.last_at()
    }

    /// Bytes written to the file, measured after the compression stage.
    pub fn compressed_size(&self) -> u64 {
        self.inner.compressed.size()
    }

    /// Bytes written, measured before the compression stage.
    pub fn uncompressed_size(&self) -> u64 {
        self.inner
            .uncompressed
            .as_ref()
            .unwrap_or(&self.inner.compressed)
            .size()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
