//! Writer Lifecycle Events
//!
//! Open/close listeners can be registered at three scopes: per-writer,
//! per-volume and per-node. Scopes form an explicit tree - each child holds
//! an owning reference to its parent, never the reverse - and dispatch walks
//! the tree:
//!
//! - **open**: most-specific first (writer → volume → node), so the most
//!   local listeners see the resource first;
//! - **close**: most-general first (node → volume → writer), so outer-scope
//!   listeners observe inner resources while they are still alive.
//!
//! Listener errors do not stop dispatch; they are aggregated.

use std::sync::{Arc, Mutex};

use crate::error::{Error, MultiError, Result};

type OpenListener<W> = Box<dyn Fn(&W) -> Result<()> + Send + Sync>;
type CloseListener<W> = Box<dyn Fn(&W, Option<&Error>) -> Result<()> + Send + Sync>;

pub struct Events<W> {
    parent: Option<Arc<Events<W>>>,
    on_open: Mutex<Vec<OpenListener<W>>>,
    on_close: Mutex<Vec<CloseListener<W>>>,
}

impl<W> Events<W> {
    /// Root scope (node level).
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            on_open: Mutex::new(Vec::new()),
            on_close: Mutex::new(Vec::new()),
        })
    }

    /// New child scope chained to `self` (volume under node, writer under
    /// volume). Listeners added to the child never affect the parent.
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(self.clone()),
            on_open: Mutex::new(Vec::new()),
            on_close: Mutex::new(Vec::new()),
        })
    }

    pub fn on_open<F>(&self, listener: F)
    where
        F: Fn(&W) -> Result<()> + Send + Sync + 'static,
    {
        self.on_open
            .lock()
            .expect("events lock poisoned")
            .push(Box::new(listener));
    }

    pub fn on_close<F>(&self, listener: F)
    where
        F: Fn(&W, Option<&Error>) -> Result<()> + Send + Sync + 'static,
    {
        self.on_close
            .lock()
            .expect("events lock poisoned")
            .push(Box::new(listener));
    }

    /// Dispatch the open event: this scope first, then the parents.
    pub fn dispatch_on_open(&self, writer: &W) -> Result<()> {
        let mut errs = MultiError::new();
        self.collect_open(writer, &mut errs);
        errs.into_result()
    }

    /// Dispatch the close event: parents first, then this scope.
    pub fn dispatch_on_close(&self, writer: &W, close_error: Option<&Error>) -> Result<()> {
        let mut errs = MultiError::new();
        self.collect_close(writer, close_error, &mut errs);
        errs.into_result()
    }

    fn collect_open(&self, writer: &W, errs: &mut MultiError) {
        for listener in self.on_open.lock().expect("events lock poisoned").iter() {
            errs.push_result(listener(writer));
        }
        if let Some(parent) = &self.parent {
            parent.collect_open(writer, errs);
        }
    }

    fn collect_close(&self, writer: &W, close_error: Option<&Error>, errs: &mut MultiError) {
        if let Some(parent) = &self.parent {
            parent.collect_close(writer, close_error, errs);
        }
        for listener in self.on_close.lock().expect("events lock poisoned").iter() {
            errs.push_result(listener(writer, close_error));
        }
    }
}
