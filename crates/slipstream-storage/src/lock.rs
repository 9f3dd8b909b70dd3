//! Volume Lock File
//!
//! Exclusive-writer lock backed by `flock(2)`. Only one process may open a
//! volume for writing; a second locker fails immediately instead of
//! blocking. The lock file is removed from disk when the volume closes.

use std::path::{Path, PathBuf};

use crate::error::{Error, MultiError, Result};

pub struct FileLock {
    file: std::fs::File,
    path: PathBuf,
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileLock {
    /// Create/open the lock file and take the exclusive lock, failing
    /// immediately if another process holds it.
    pub fn try_lock(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|err| Error::VolumeLock {
                path: path.clone(),
                reason: err.to_string(),
            })?;

        Self::flock(&file, &path)?;

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn flock(file: &std::fs::File, path: &Path) -> Result<()> {
        use std::os::unix::io::AsRawFd;

        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            let reason = if err.kind() == std::io::ErrorKind::WouldBlock {
                "already locked".to_string()
            } else {
                err.to_string()
            };
            return Err(Error::VolumeLock {
                path: path.to_path_buf(),
                reason,
            });
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn flock(_file: &std::fs::File, _path: &Path) -> Result<()> {
        Ok(())
    }

    /// Release the lock and remove the lock file from disk.
    pub fn unlock_and_remove(self) -> Result<()> {
        let mut errs = MultiError::new();

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let ret = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
            if ret != 0 {
                errs.push(Error::VolumeLock {
                    path: self.path.clone(),
                    reason: std::io::Error::last_os_error().to_string(),
                });
            }
        }

        if let Err(err) = std::fs::remove_file(&self.path) {
            errs.push(Error::VolumeLock {
                path: self.path.clone(),
                reason: format!("cannot remove lock file: {err}"),
            });
        }

        errs.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_on_the_same_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("writer.lock");

        let lock = FileLock::try_lock(&path).unwrap();
        let err = FileLock::try_lock(&path).unwrap_err();
        assert!(err.to_string().contains("already locked"), "{err}");

        lock.unlock_and_remove().unwrap();
        assert!(!path.exists());

        // Free again after release.
        let lock = FileLock::try_lock(&path).unwrap();
        lock.unlock_and_remove().unwrap();
    }
}
