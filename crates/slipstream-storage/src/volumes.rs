//! Volumes Collection
//!
//! Detects and opens every volume under `{volumes_path}/{kind}/{label}` and
//! owns them for the lifetime of the node. Node-level writer events are
//! registered here and inherited by every volume and writer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use slipstream_core::VolumeId;

use crate::config::VolumeConfig;
use crate::error::{Error, MultiError, Result};
use crate::events::Events;
use crate::volume::{Volume, VolumeSpec};
use crate::writer::SliceWriter;

pub struct Volumes {
    volumes: HashMap<VolumeId, Arc<Volume>>,
    events: Arc<Events<SliceWriter>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Volumes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volumes").finish_non_exhaustive()
    }
}

impl Volumes {
    /// Detect and open all volumes under `path`. At least one volume must be
    /// found; a failure to open any volume closes the already-opened ones.
    pub async fn open(path: impl AsRef<Path>, config: VolumeConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let events = Events::new();

        let specs = detect_specs(&path).await?;
        if specs.is_empty() {
            return Err(Error::NoVolumeFound(path));
        }

        info!(count = specs.len(), path = %path.display(), "opening volumes");

        let mut volumes: HashMap<VolumeId, Arc<Volume>> = HashMap::new();
        let opened = futures::future::join_all(
            specs
                .into_iter()
                .map(|spec| Volume::open(spec, config.clone(), &events)),
        )
        .await;

        let mut failure: Option<Error> = None;
        for result in opened {
            match result {
                Ok(volume) => {
                    if volumes.contains_key(volume.id()) {
                        failure = Some(Error::DuplicateVolumeId(volume.id().to_string()));
                        let _ = volume.close().await;
                        continue;
                    }
                    volumes.insert(volume.id().clone(), volume);
                }
                Err(err) => failure = Some(err),
            }
        }

        if let Some(err) = failure {
            for volume in volumes.into_values() {
                let _ = volume.close().await;
            }
            return Err(err);
        }

        info!(count = volumes.len(), "opened volumes");
        Ok(Self {
            volumes,
            events,
            closed: AtomicBool::new(false),
        })
    }

    /// Node-scope events, inherited by every volume and writer.
    pub fn events(&self) -> &Arc<Events<SliceWriter>> {
        &self.events
    }

    pub fn volume(&self, id: &VolumeId) -> Result<Arc<Volume>> {
        self.volumes
            .get(id)
            .cloned()
            .ok_or_else(|| Error::VolumeNotFound(id.to_string()))
    }

    pub fn all(&self) -> Vec<Arc<Volume>> {
        let mut out: Vec<Arc<Volume>> = self.volumes.values().cloned().collect();
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }

    pub fn ids(&self) -> Vec<VolumeId> {
        self.all().into_iter().map(|v| v.id().clone()).collect()
    }

    /// Close every volume concurrently, aggregating their errors.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::VolumeAlreadyClosed("volumes collection".to_string()));
        }

        info!("closing volumes");
        let mut errs = MultiError::new();

        let results =
            futures::future::join_all(self.all().into_iter().map(|v| async move { v.close().await }))
                .await;
        for result in results {
            errs.push_result(result);
        }

        info!("closed volumes");
        errs.into_result()
    }
}

/// Volumes live at `{path}/{kind}/{label}`; every directory two levels deep
/// is a volume.
async fn detect_specs(path: &Path) -> Result<Vec<VolumeSpec>> {
    let mut specs = Vec::new();

    let mut kinds = tokio::fs::read_dir(path).await?;
    while let Some(kind_entry) = kinds.next_entry().await? {
        if !kind_entry.file_type().await?.is_dir() {
            continue;
        }
        let kind = kind_entry.file_name().to_string_lossy().to_string();

        let mut labels = tokio::fs::read_dir(kind_entry.path()).await?;
        while let Some(label_entry) = labels.next_entry().await? {
            if !label_entry.file_type().await?.is_dir() {
                continue;
            }
            specs.push(VolumeSpec {
                path: label_entry.path(),
                kind: kind.clone(),
                label: label_entry.file_name().to_string_lossy().to_string(),
            });
        }
    }

    specs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(specs)
}
