//! Local file events and listener fan-out

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operation performed on a local file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    Create,
}

/// Emitted once per materialized file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFileEvent {
    pub operation: FileOperation,
    /// The authoritative file: the destination, or the staging file if
    /// finalization did not succeed
    pub file: PathBuf,
    pub timestamp: DateTime<Utc>,
}

impl LocalFileEvent {
    pub fn created(file: impl Into<PathBuf>) -> Self {
        Self {
            operation: FileOperation::Create,
            file: file.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives file events synchronously on the writing thread
pub trait FileEventListener: Send + Sync {
    fn on_event(&self, event: &LocalFileEvent) -> anyhow::Result<()>;

    /// Name used when logging listener failures
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> FileEventListener for F
where
    F: Fn(&LocalFileEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &LocalFileEvent) -> anyhow::Result<()> {
        self(event)
    }

    fn name(&self) -> &str {
        "closure"
    }
}

/// Listener that logs every event at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl FileEventListener for LoggingListener {
    fn on_event(&self, event: &LocalFileEvent) -> anyhow::Result<()> {
        tracing::info!(
            operation = ?event.operation,
            file = %event.file.display(),
            "Local file event"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Ordered set of listeners with per-listener failure isolation
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn FileEventListener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, listener: Arc<dyn FileEventListener>) {
        self.listeners.push(listener);
    }

    pub fn replace(&mut self, listeners: Vec<Arc<dyn FileEventListener>>) {
        self.listeners = listeners;
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver to every listener in registration order.
    ///
    /// Errors and panics are logged and never reach the caller.
    /// Returns the number of listeners that failed.
    pub fn notify(&self, event: &LocalFileEvent) -> usize {
        let mut failures = 0;
        for listener in &self.listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!(
                        listener = listener.name(),
                        file = %event.file.display(),
                        "Listener failed: {:#}",
                        e
                    );
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!(
                        listener = listener.name(),
                        file = %event.file.display(),
                        "Listener panicked"
                    );
                }
            }
        }
        failures
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.listeners.iter().map(|l| l.name()))
            .finish()
    }
}
