//! Writer and Volume Configuration

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::alloc::{Allocator, DefaultAllocator};
use crate::chain::ChainFile;

/// Node-level writer configuration, shared by every slice writer the node
/// opens. Per-slice knobs (sync policy, compression, allocation) travel with
/// the slice itself.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Buffer directly ahead of the file, in bytes. Zero disables it.
    pub file_buffer: usize,

    /// Buffer ahead of the compression stage, in bytes. Zero disables it.
    pub input_buffer: usize,

    /// How often counter/meter backups are flushed to disk.
    pub stats_sync_interval: Duration,

    /// Bound on concurrent row formatting. Zero means the CPU core count.
    pub format_concurrency: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            file_buffer: 1024 * 1024,
            input_buffer: 1024 * 1024,
            stats_sync_interval: Duration::from_secs(1),
            format_concurrency: 0,
        }
    }
}

impl WriterConfig {
    pub fn effective_format_concurrency(&self) -> usize {
        if self.format_concurrency > 0 {
            return self.format_concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Opens the slice data file. Tests substitute an opener returning in-memory
/// files; production appends to a real file on the volume.
pub trait FileOpener: Send + Sync {
    fn open(&self, path: &Path) -> io::Result<Box<dyn ChainFile>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFileOpener;

impl FileOpener for DefaultFileOpener {
    fn open(&self, path: &Path) -> io::Result<Box<dyn ChainFile>> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Box::new(file))
    }
}

#[derive(Clone)]
pub struct VolumeConfig {
    pub writer: WriterConfig,

    /// How often the drain marker is re-checked.
    pub drain_poll_interval: Duration,

    pub file_opener: Arc<dyn FileOpener>,

    pub allocator: Arc<dyn Allocator>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            drain_poll_interval: Duration::from_secs(1),
            file_opener: Arc::new(DefaultFileOpener),
            allocator: Arc::new(DefaultAllocator),
        }
    }
}
