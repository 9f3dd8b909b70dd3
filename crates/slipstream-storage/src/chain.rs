//! Write Chain
//!
//! A chain of byte-transforming stages at the end of which is a file:
//!
//! ```text
//! write ─▶ [stage 1] ─▶ [stage 2] ─▶ … ─▶ [file]
//!           newest                        terminal
//! ```
//!
//! Stages are added with [`WriteChain::prepend_writer`]: the factory receives
//! a [`Link`] to the current chain head and returns the new outermost stage.
//! Every stage is registered as a flusher and as a closer in prepend order,
//! so flush and close both run newest-outermost-first; a stage without its
//! own finalization inherits flush-as-close from the [`Stage`] trait default.
//!
//! Operations:
//! - `write`/`write_all` - route bytes through the whole chain to the file.
//! - `flush` - flush every stage's internal buffers (to the OS disk cache).
//! - `sync` - `flush`, then an OS-level file sync; both are attempted even if
//!   one fails and the errors are aggregated.
//! - `close` - close every stage, then a final sync, then close the file;
//!   all three phases run unconditionally, errors aggregated. A second close
//!   returns an error instead of double-releasing the file.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use crate::error::{Error, MultiError, Result};

/// One stage in the chain. A stage owns a [`Link`] to the next stage and
/// transforms bytes on the way through.
///
/// `close` defaults to `flush`: a stage with internal buffers but no trailer
/// of its own still empties itself before the file is closed.
pub trait Stage: Write + Send {
    /// Stage name used in error and log messages.
    fn name(&self) -> &'static str;

    /// Flush internal buffers into the next writer.
    fn flush_stage(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Finalize the stage, writing any trailer into the next writer.
    fn close_stage(&mut self) -> io::Result<()> {
        self.flush_stage()
    }
}

/// The terminal file of a chain. `std::fs::File` is the production
/// implementation; tests substitute their own to observe written bytes and
/// inject sync/close failures.
pub trait ChainFile: Write + Send {
    fn sync_all(&mut self) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Raw file descriptor, when the file is backed by one.
    fn raw_fd(&self) -> Option<i32> {
        None
    }
}

impl ChainFile for std::fs::File {
    fn sync_all(&mut self) -> io::Result<()> {
        std::fs::File::sync_all(self)
    }

    fn raw_fd(&self) -> Option<i32> {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            Some(self.as_raw_fd())
        }
        #[cfg(not(unix))]
        {
            None
        }
    }
}

type SharedStage = Arc<Mutex<dyn Stage>>;

/// Cloneable writing handle to a point in the chain. Each stage holds a link
/// to the next stage; the chain holds a link to the head. Writes lock only
/// the linked stage, outermost to innermost, so flush/close can walk stages
/// one at a time without stalling the write path.
#[derive(Clone)]
pub struct Link {
    target: SharedStage,
}

impl Link {
    fn new(target: SharedStage) -> Self {
        Self { target }
    }
}

impl Write for Link {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.target.lock().expect("chain stage lock poisoned").write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Stage flushing is orchestrated by the chain, not by io::Write.
        Ok(())
    }
}

/// Terminal stage wrapping the file; closed at most once.
struct FileStage {
    file: Option<Box<dyn ChainFile>>,
}

impl FileStage {
    fn file_mut(&mut self) -> io::Result<&mut Box<dyn ChainFile>> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "file is closed"))
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file_mut()?.sync_all()
    }

    fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => file.close(),
            None => Ok(()),
        }
    }
}

impl Write for FileStage {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stage for FileStage {
    fn name(&self) -> &'static str {
        "file"
    }
}

struct Registered {
    name: &'static str,
    stage: SharedStage,
}

pub struct WriteChain {
    head: Link,
    file: Arc<Mutex<FileStage>>,
    /// Stages in flush/close order: newest-outermost first.
    stages: Vec<Registered>,
    closed: Mutex<bool>,
}

impl WriteChain {
    pub fn new(file: Box<dyn ChainFile>) -> Self {
        let file = Arc::new(Mutex::new(FileStage { file: Some(file) }));
        let shared: SharedStage = file.clone();
        let head = Link::new(shared);
        Self {
            head,
            file,
            stages: Vec::new(),
            closed: Mutex::new(false),
        }
    }

    /// Wrap the current chain head with a new stage. The stage is registered
    /// as the newest flusher and closer.
    pub fn prepend_writer<S, F>(&mut self, factory: F) -> Result<()>
    where
        S: Stage + 'static,
        F: FnOnce(Link) -> Result<S>,
    {
        let stage = factory(self.head.clone())?;
        let name = stage.name();
        let stage: SharedStage = Arc::new(Mutex::new(stage));
        self.stages.insert(
            0,
            Registered {
                name,
                stage: stage.clone(),
            },
        );
        self.head = Link::new(stage);
        Ok(())
    }

    /// Write through the whole chain to the file.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.head.clone().write(buf)
    }

    pub fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.head.clone().write_all(buf)
    }

    /// Flush data from every stage's internal buffers, newest first.
    /// All stages are attempted; errors are aggregated.
    pub fn flush(&self) -> Result<()> {
        debug!("flushing writers");
        let mut errs = MultiError::new();

        for registered in &self.stages {
            let mut stage = registered.stage.lock().expect("chain stage lock poisoned");
            if let Err(source) = stage.flush_stage() {
                let err = Error::Stage {
                    op: "flush",
                    stage: registered.name.to_string(),
                    source,
                };
                error!("{err}");
                errs.push(err);
            }
        }

        errs.into_result()
    }

    /// Flush all stages and then sync the file to disk. Both steps are
    /// attempted even if one fails.
    pub fn sync(&self) -> Result<()> {
        debug!("syncing file");
        let mut errs = MultiError::new();

        errs.push_result(self.flush());
        errs.push_result(self.sync_file());

        errs.into_result()
    }

    /// Close every stage, then sync and close the file. All phases run
    /// unconditionally; errors are aggregated. The second call returns
    /// [`Error::ChainAlreadyClosed`].
    pub fn close(&self) -> Result<()> {
        let mut closed = self.closed.lock().expect("chain closed lock poisoned");
        if *closed {
            return Err(Error::ChainAlreadyClosed);
        }
        *closed = true;

        debug!("closing chain");
        let mut errs = MultiError::new();

        // Close all stages before the underlying file.
        for registered in &self.stages {
            let mut stage = registered.stage.lock().expect("chain stage lock poisoned");
            if let Err(source) = stage.close_stage() {
                let err = Error::Stage {
                    op: "close",
                    stage: registered.name.to_string(),
                    source,
                };
                error!("{err}");
                errs.push(err);
            }
        }

        // Force sync of in-memory data to disk.
        errs.push_result(self.sync_file());

        // Close the underlying file.
        {
            let mut file = self.file.lock().expect("chain file lock poisoned");
            if let Err(source) = file.close() {
                let err = Error::FileClose(source);
                error!("{err}");
                errs.push(err);
            }
        }

        debug!("chain closed");
        errs.into_result()
    }

    fn sync_file(&self) -> Result<()> {
        let mut file = self.file.lock().expect("chain file lock poisoned");
        file.sync().map_err(Error::FileSync)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::TestFile;
    use super::*;
    use std::sync::atomic::Ordering;

    /// Prefixes every write so stage ordering is visible in the output.
    struct TagStage {
        tag: &'static str,
        inner: Link,
        flushed: bool,
        fail_flush: Option<&'static str>,
    }

    impl Write for TagStage {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.inner.write_all(self.tag.as_bytes())?;
            self.inner.write_all(buf)?;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Stage for TagStage {
        fn name(&self) -> &'static str {
            "tag"
        }

        fn flush_stage(&mut self) -> io::Result<()> {
            if let Some(msg) = self.fail_flush {
                return Err(io::Error::other(msg));
            }
            self.flushed = true;
            Ok(())
        }
    }

    #[test]
    fn writes_flow_through_stages_to_file() {
        let (file, state) = TestFile::new();
        let mut chain = WriteChain::new(file);
        chain
            .prepend_writer(|inner| {
                Ok(TagStage {
                    tag: "b",
                    inner,
                    flushed: false,
                    fail_flush: None,
                })
            })
            .unwrap();
        chain
            .prepend_writer(|inner| {
                Ok(TagStage {
                    tag: "a",
                    inner,
                    flushed: false,
                    fail_flush: None,
                })
            })
            .unwrap();

        chain.write_all(b"x").unwrap();

        // Outermost stage ("a", added last) sees the bytes first.
        assert_eq!(state.written.lock().unwrap().as_slice(), b"bax");
    }

    #[test]
    fn sync_flushes_then_syncs_file() {
        let (file, state) = TestFile::new();
        let chain = WriteChain::new(file);
        chain.sync().unwrap();
        assert_eq!(state.syncs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_aggregates_flush_and_file_errors() {
        let (file, state) = TestFile::new();
        *state.fail_sync.lock().unwrap() = Some("disk gone".to_string());

        let mut chain = WriteChain::new(file);
        chain
            .prepend_writer(|inner| {
                Ok(TagStage {
                    tag: "",
                    inner,
                    flushed: false,
                    fail_flush: Some("buffer stuck"),
                })
            })
            .unwrap();

        let err = chain.sync().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("buffer stuck"), "{msg}");
        assert!(msg.contains("disk gone"), "{msg}");
    }

    #[test]
    fn close_runs_all_phases_and_aggregates_errors() {
        let (file, state) = TestFile::new();
        *state.fail_sync.lock().unwrap() = Some("sync failed".to_string());
        *state.fail_close.lock().unwrap() = Some("close failed".to_string());

        let mut chain = WriteChain::new(file);
        chain
            .prepend_writer(|inner| {
                Ok(TagStage {
                    tag: "",
                    inner,
                    flushed: false,
                    fail_flush: Some("flush failed"),
                })
            })
            .unwrap();

        let err = chain.close().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("flush failed"), "{msg}");
        assert!(msg.contains("sync failed"), "{msg}");
        assert!(msg.contains("close failed"), "{msg}");
    }

    #[test]
    fn second_close_errors_instead_of_double_release() {
        let (file, _state) = TestFile::new();
        let chain = WriteChain::new(file);
        chain.close().unwrap();
        let err = chain.close().unwrap_err();
        assert!(matches!(err, Error::ChainAlreadyClosed));
    }

    #[test]
    fn write_after_close_fails() {
        let (file, _state) = TestFile::new();
        let chain = WriteChain::new(file);
        chain.close().unwrap();
        assert!(chain.write_all(b"x").is_err());
    }
}
