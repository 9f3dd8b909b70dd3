//! Byte-Size Meters
//!
//! A meter is a pass-through chain stage that counts the bytes flowing
//! through it. One meter sits after the compression stage (compressed size)
//! and one before it (uncompressed size); when compression is disabled the
//! two sizes are the same and only one meter is installed.
//!
//! [`MeterWithBackup`] persists the running size to a backup file - just the
//! integer, nothing else - on the same periodic schedule as the counters.

use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::chain::{Link, Stage};
use crate::count::spawn_backup_loop;
use crate::error::{Error, Result};

/// Chain stage counting bytes written through it.
pub struct MeterStage {
    inner: Link,
    size: Arc<AtomicU64>,
    name: &'static str,
}

impl Write for MeterStage {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.size.fetch_add(n as u64, Ordering::AcqRel);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stage for MeterStage {
    fn name(&self) -> &'static str {
        self.name
    }
}

/// Byte meter persisted to a backup file; produces the chain stage that does
/// the actual measuring.
pub struct MeterWithBackup {
    size: Arc<AtomicU64>,
    backup: Arc<SizeBackup>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MeterWithBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeterWithBackup").finish_non_exhaustive()
    }
}

struct SizeBackup {
    file: Mutex<std::fs::File>,
}

impl SizeBackup {
    fn sync(&self, size: u64) -> Result<()> {
        use std::io::{Seek, SeekFrom};
        let mut file = self.file.lock().expect("meter backup lock poisoned");
        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(size.to_string().as_bytes())?;
        file.sync_data()?;
        Ok(())
    }
}

impl MeterWithBackup {
    /// Open the backup file, load the last flushed size and start the
    /// periodic backup task.
    pub fn open(path: impl AsRef<Path>, interval: Duration) -> Result<Self> {
        use std::io::Read;

        let path = path.as_ref().to_path_buf();
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let initial = match content.trim() {
            "" => 0,
            value => value.parse::<u64>().map_err(|_| Error::CorruptedBackup {
                path: path.clone(),
                reason: "invalid size".to_string(),
            })?,
        };

        let size = Arc::new(AtomicU64::new(initial));
        let backup = Arc::new(SizeBackup {
            file: Mutex::new(file),
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_backup_loop(interval, stop_rx, {
            let size = size.clone();
            let backup = backup.clone();
            move || backup.sync(size.load(Ordering::Acquire))
        });

        Ok(Self {
            size,
            backup,
            stop_tx,
            task: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        })
    }

    /// Chain stage sharing this meter's size.
    pub fn stage(&self, inner: Link, name: &'static str) -> MeterStage {
        MeterStage {
            inner,
            size: self.size.clone(),
            name,
        }
    }

    /// Shared size cell, for trigger evaluation.
    pub fn size_cell(&self) -> Arc<AtomicU64> {
        self.size.clone()
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn sync_backup(&self) -> Result<()> {
        self.backup.sync(self.size())
    }

    /// Stop the backup task and flush the final size. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let _ = self.stop_tx.send(true);
        let task = self.task.lock().expect("meter task lock poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let size = self.size.load(Ordering::Acquire);
        let backup = self.backup.clone();
        tokio::task::spawn_blocking(move || backup.sync(size))
            .await
            .map_err(|e| Error::Sync(e.to_string()))?
    }
}
