//! Volume
//!
//! A volume is a local directory with exclusive-write ownership, hosting
//! zero or more slice writers. Opening a volume claims the directory:
//!
//! 1. the path must exist;
//! 2. a present drain marker refuses the open - the volume is being emptied;
//! 3. the volume ID is read from the ID file, or generated and persisted on
//!    first use;
//! 4. the lock file is taken with `flock` - failure means another process
//!    already writes here;
//! 5. a watcher keeps the drain flag live without re-opening the volume.
//!
//! The volume enforces one live writer per slice key, owns the set of open
//! writers, and closes them all concurrently on shutdown before releasing
//! and removing the lock file.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use slipstream_core::{Slice, SliceKey, VolumeId};

use crate::config::VolumeConfig;
use crate::error::{Error, MultiError, Result};
use crate::events::Events;
use crate::lock::FileLock;
use crate::writer::SliceWriter;

/// File holding the generated volume ID.
pub const ID_FILE: &str = "volume-id";
/// Lock file ensuring a single writing process per volume.
pub const LOCK_FILE: &str = "writer.lock";
/// Marker file blocking new writers on the volume.
pub const DRAIN_FILE: &str = "drain";

/// Location and labeling of a volume directory: `{path}/{kind}/{label}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub path: PathBuf,
    pub kind: String,
    pub label: String,
}

pub struct Volume {
    id: VolumeId,
    spec: VolumeSpec,
    config: VolumeConfig,
    events: Arc<Events<SliceWriter>>,

    lock: Mutex<Option<FileLock>>,

    drained: Arc<AtomicBool>,
    drain_stop: watch::Sender<bool>,
    drain_task: Mutex<Option<JoinHandle<()>>>,

    closed: AtomicBool,

    /// `None` marks a reservation: a writer being created. The entry keeps
    /// duplicate opens out without holding the lock across creation.
    writers: Mutex<HashMap<SliceKey, Option<SliceWriter>>>,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Volume {
    /// Open the volume directory for writing.
    pub async fn open(
        spec: VolumeSpec,
        config: VolumeConfig,
        node_events: &Arc<Events<SliceWriter>>,
    ) -> Result<Arc<Self>> {
        info!(path = %spec.path.display(), "opening volume");

        let meta = tokio::fs::metadata(&spec.path).await?;
        if !meta.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("volume path \"{}\" is not a directory", spec.path.display()),
            )));
        }

        let drain_path = spec.path.join(DRAIN_FILE);
        if tokio::fs::try_exists(&drain_path).await.unwrap_or(false) {
            return Err(Error::VolumeDrained(spec.path.clone()));
        }

        let id = read_or_create_volume_id(&spec.path).await?;

        let lock = FileLock::try_lock(spec.path.join(LOCK_FILE))?;

        let (drain_stop, drain_stop_rx) = watch::channel(false);
        let drained = Arc::new(AtomicBool::new(false));
        let drain_task = spawn_drain_watcher(
            drain_path,
            drained.clone(),
            config.drain_poll_interval,
            drain_stop_rx,
        );

        let volume = Arc::new(Self {
            events: node_events.child(),
            lock: Mutex::new(Some(lock)),
            drained,
            drain_stop,
            drain_task: Mutex::new(Some(drain_task)),
            closed: AtomicBool::new(false),
            writers: Mutex::new(HashMap::new()),
            config,
            spec,
            id,
        });

        info!(
            volume_id = %volume.id,
            path = %volume.spec.path.display(),
            kind = %volume.spec.kind,
            label = %volume.spec.label,
            "opened volume"
        );

        Ok(volume)
    }

    pub fn id(&self) -> &VolumeId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.spec.path
    }

    pub fn kind(&self) -> &str {
        &self.spec.kind
    }

    pub fn label(&self) -> &str {
        &self.spec.label
    }

    /// Volume-scope events; listeners here observe every writer on this
    /// volume.
    pub fn events(&self) -> &Arc<Events<SliceWriter>> {
        &self.events
    }

    /// Live view of the drain marker, kept fresh by the watcher.
    pub fn drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    /// Open a writer for `slice`. Rejects a closing volume and duplicate
    /// writers for the same slice key; creates the slice directory and data
    /// file, pre-allocating configured disk space on first creation.
    pub async fn open_writer(self: &Arc<Self>, slice: &Slice) -> Result<SliceWriter> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::VolumeClosed(self.id.to_string()));
        }

        let key = slice.key.clone();

        // Reserve the key first so a concurrent open fails fast; the
        // reservation is dropped again if creation fails.
        {
            let mut writers = self.writers.lock().expect("volume writers lock poisoned");
            match writers.entry(key.clone()) {
                Entry::Occupied(_) => {
                    let err = Error::WriterAlreadyExists;
                    error!(slice = %key, "{err}");
                    return Err(err);
                }
                Entry::Vacant(entry) => {
                    entry.insert(None);
                }
            }
        }

        match self.create_writer(slice).await {
            Ok(writer) => {
                {
                    let mut writers = self.writers.lock().expect("volume writers lock poisoned");
                    writers.insert(key.clone(), Some(writer.clone()));
                }

                // Deregister the writer when it closes, whoever closes it.
                let volume = Arc::downgrade(self);
                let callback_key = key;
                writer.events().on_close(move |_, _| {
                    if let Some(volume) = volume.upgrade() {
                        volume.remove_writer(&callback_key);
                    }
                    Ok(())
                });

                Ok(writer)
            }
            Err(err) => {
                self.remove_writer(&key);
                Err(err)
            }
        }
    }

    async fn create_writer(self: &Arc<Self>, slice: &Slice) -> Result<SliceWriter> {
        let dir_path = self.spec.path.join(&slice.local.dir);
        tokio::fs::create_dir_all(&dir_path).await?;

        let file_path = dir_path.join(&slice.local.filename);
        let existed = tokio::fs::try_exists(&file_path).await.unwrap_or(false);

        let file = self.config.file_opener.open(&file_path)?;

        // Best-effort reservation on first creation; failure is logged, the
        // writer proceeds without it.
        if !existed && slice.local.allocate_space > 0 {
            match self
                .config
                .allocator
                .allocate(file.as_ref(), slice.local.allocate_space)
            {
                Ok(true) => {
                    debug!(
                        slice = %slice.key,
                        bytes = slice.local.allocate_space,
                        "pre-allocated disk space"
                    );
                }
                Ok(false) => {
                    debug!(slice = %slice.key, "disk space pre-allocation is not supported");
                }
                Err(err) => {
                    error!(slice = %slice.key, "cannot pre-allocate disk space: {err}");
                }
            }
        }

        SliceWriter::open(
            &self.config.writer,
            slice.clone(),
            file,
            &dir_path,
            &file_path,
            &self.events,
        )
        .await
    }

    /// Open writers, sorted by slice key for deterministic shutdown.
    pub fn writers(&self) -> Vec<SliceWriter> {
        let writers = self.writers.lock().expect("volume writers lock poisoned");
        let mut out: Vec<SliceWriter> = writers.values().flatten().cloned().collect();
        out.sort_by_key(|w| w.key().path());
        out
    }

    /// Close the volume: stop accepting writers, close every open writer
    /// concurrently, then release and remove the lock file. Per-writer close
    /// errors are aggregated and never leak the lock.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::VolumeAlreadyClosed(self.id.to_string()));
        }

        info!(volume_id = %self.id, "closing volume");
        let mut errs = MultiError::new();

        // Stop the drain watcher.
        let _ = self.drain_stop.send(true);
        let task = self
            .drain_task
            .lock()
            .expect("volume drain task lock poisoned")
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }

        // Close all writers concurrently.
        let writers = self.writers();
        let results = futures::future::join_all(writers.into_iter().map(|writer| async move {
            let key = writer.key().clone();
            (key, writer.close().await)
        }))
        .await;

        for (key, result) in results {
            if let Err(err) = result {
                errs.push(Error::CloseWriter {
                    slice: key.path(),
                    source: Box::new(err),
                });
            }
        }

        // Release the lock last, whatever happened above.
        let lock = self.lock.lock().expect("volume lock poisoned").take();
        if let Some(lock) = lock {
            errs.push_result(lock.unlock_and_remove());
        }

        info!(volume_id = %self.id, "closed volume");
        errs.into_result()
    }

    fn remove_writer(&self, key: &SliceKey) {
        let mut writers = self.writers.lock().expect("volume writers lock poisoned");
        writers.remove(key);
    }
}

/// Read the volume ID file, or generate and persist a new ID if the file
/// does not exist yet.
async fn read_or_create_volume_id(path: &Path) -> Result<VolumeId> {
    let id_path = path.join(ID_FILE);

    match tokio::fs::read(&id_path).await {
        Ok(content) => {
            let id = String::from_utf8_lossy(&content).trim().to_string();
            Ok(VolumeId(id))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let id = uuid::Uuid::new_v4().simple().to_string();
            create_volume_id_file(&id_path, id.as_bytes()).map_err(|source| {
                Error::VolumeIdFile {
                    path: id_path.clone(),
                    source,
                }
            })?;
            info!(volume_id = %id, "generated volume ID");
            Ok(VolumeId(id))
        }
        Err(source) => Err(Error::VolumeIdFile {
            path: id_path,
            source,
        }),
    }
}

/// Exclusive creation with explicit write/sync/close error discrimination:
/// readers wait for this file, so a torn write must surface.
fn create_volume_id_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;

    let write_result = file.write_all(content);
    let sync_result = file.sync_all();
    drop(file);

    write_result?;
    sync_result
}

fn spawn_drain_watcher(
    drain_path: PathBuf,
    drained: Arc<AtomicBool>,
    poll_interval: std::time::Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop_rx.changed() => return,
                _ = ticker.tick() => {
                    let present = tokio::fs::try_exists(&drain_path).await.unwrap_or(false);
                    let previous = drained.swap(present, Ordering::AcqRel);
                    if present != previous {
                        info!(drained = present, "drain marker changed");
                    }
                }
            }
        }
    })
}
