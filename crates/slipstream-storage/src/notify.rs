//! Sync Notifiers
//!
//! A [`Notifier`] is a one-shot signal tied to the sync cycle that was in
//! flight (or about to start) when a write was accepted. Every writer that
//! shares a cycle holds a clone of the same notifier and observes the same
//! outcome.
//!
//! Errors travel between tasks as plain strings and are mapped to
//! [`Error::Sync`] at the waiting edge. A no-op notifier, returned when
//! syncing or waiting is disabled, resolves immediately with `Ok`.

use tokio::sync::watch;

use crate::error::{Error, Result};

type Outcome = Option<std::result::Result<(), String>>;

/// Receiving side: clone freely, await the cycle outcome.
#[derive(Debug, Clone)]
pub struct Notifier {
    rx: Option<watch::Receiver<Outcome>>,
}

/// Resolving side: owned by the sync cycle, finished exactly once.
#[derive(Debug)]
pub struct NotifierHandle {
    tx: watch::Sender<Outcome>,
}

/// Create a connected handle/notifier pair for one sync cycle.
pub fn new_pair() -> (NotifierHandle, Notifier) {
    let (tx, rx) = watch::channel(None);
    (NotifierHandle { tx }, Notifier { rx: Some(rx) })
}

impl Notifier {
    /// A notifier that resolves immediately with `Ok`.
    pub fn noop() -> Self {
        Self { rx: None }
    }

    /// Wait for the cycle outcome. Resolves with the cycle's error, if any.
    pub async fn wait(&self) -> Result<()> {
        let Some(rx) = &self.rx else {
            return Ok(());
        };

        let mut rx = rx.clone();
        let outcome = loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                break outcome;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without finishing; take whatever was last set.
                break rx.borrow().clone().unwrap_or(Ok(()));
            }
        };

        outcome.map_err(Error::Sync)
    }
}

impl NotifierHandle {
    /// Resolve every waiting notifier with the cycle outcome.
    pub fn finish(self, outcome: std::result::Result<(), String>) {
        let _ = self.tx.send(Some(outcome));
    }
}
