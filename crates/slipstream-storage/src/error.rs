//! Storage Error Types
//!
//! Two propagation styles live side by side, by design:
//!
//! - **Write-path errors short-circuit.** The first failure wins and the
//!   record is not elaborated further.
//! - **Close-path errors aggregate.** Closing touches many independent
//!   sub-resources (syncer, chain stages, counter backups, listeners); the
//!   caller gets every failure from one close call, collected in
//!   [`MultiError`].

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A chain stage failed during flush/close; carries which stage it was.
    #[error("cannot {op} \"{stage}\": {source}")]
    Stage {
        op: &'static str,
        stage: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot sync file: {0}")]
    FileSync(#[source] io::Error),

    #[error("cannot close file: {0}")]
    FileClose(#[source] io::Error),

    #[error("chain is already closed")]
    ChainAlreadyClosed,

    #[error("writer is closed")]
    WriterClosed,

    #[error("writer is already closed")]
    WriterAlreadyClosed,

    #[error("syncer is already stopped")]
    SyncerAlreadyStopped,

    #[error("sync failed: {0}")]
    Sync(String),

    #[error("disk writer already exists")]
    WriterAlreadyExists,

    #[error("volume \"{0}\" is closed")]
    VolumeClosed(String),

    #[error("volume \"{0}\" is already closed")]
    VolumeAlreadyClosed(String),

    #[error("volume is drained \"{0}\", writing is prohibited")]
    VolumeDrained(PathBuf),

    #[error("cannot acquire writer lock \"{path}\": {reason}")]
    VolumeLock { path: PathBuf, reason: String },

    #[error("cannot open volume ID file \"{path}\": {source}")]
    VolumeIdFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no volume found in \"{0}\"")]
    NoVolumeFound(PathBuf),

    #[error("volume with ID \"{0}\" not found")]
    VolumeNotFound(String),

    #[error("duplicate volume ID \"{0}\"")]
    DuplicateVolumeId(String),

    #[error("cannot close writer for slice \"{slice}\": {source}")]
    CloseWriter {
        slice: String,
        #[source]
        source: Box<Error>,
    },

    #[error("counter backup \"{path}\" is corrupted: {reason}")]
    CorruptedBackup { path: PathBuf, reason: String },

    #[error(transparent)]
    Core(#[from] slipstream_core::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Multiple(MultiError),
}

/// Collects every error from a multi-step operation instead of stopping at
/// the first one. `into_result` unwraps a single collected error so callers
/// only see [`Error::Multiple`] when there really was more than one failure.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<Error>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: Error) {
        self.errors.push(err);
    }

    pub fn push_result<T>(&mut self, result: Result<T>) {
        if let Err(err) = result {
            self.errors.push(err);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Multiple(self)),
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_multi_error_is_ok() {
        assert!(MultiError::new().into_result().is_ok());
    }

    #[test]
    fn single_error_is_unwrapped() {
        let mut errs = MultiError::new();
        errs.push(Error::WriterClosed);
        let err = errs.into_result().unwrap_err();
        assert_eq!(err.to_string(), "writer is closed");
    }

    #[test]
    fn multiple_errors_are_joined() {
        let mut errs = MultiError::new();
        errs.push(Error::WriterClosed);
        errs.push(Error::SyncerAlreadyStopped);
        let err = errs.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "writer is closed; syncer is already stopped"
        );
    }
}
