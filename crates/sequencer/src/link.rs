//! Device link abstraction and registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Handle to one dispatched command, returned by [`DeviceLink::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandHandle(pub u64);

/// Terminal outcome of waiting on a dispatched command.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    /// The device acknowledged completion
    Completed,
    /// No acknowledgement within the timeout
    TimedOut,
    /// The device reported a fault
    Error(String),
}

/// Error raised when a command cannot be dispatched at all.
#[derive(Debug, thiserror::Error)]
#[error("dispatch failed on link: {0}")]
pub struct LinkError(pub String);

/// One logical connection to a microcontroller.
///
/// Implementations are provided by the device layer; the sequencer only
/// needs named-command dispatch with asynchronous completion notification.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Issue a named command and return a handle to its completion.
    async fn dispatch(
        &self,
        command: &str,
        params: &serde_json::Value,
    ) -> std::result::Result<CommandHandle, LinkError>;

    /// Wait for a dispatched command, bounded by `timeout`.
    async fn wait(&self, handle: CommandHandle, timeout: Duration) -> LinkOutcome;
}

struct LinkEntry {
    link: Arc<dyn DeviceLink>,
    // One outstanding command per link, across all in-flight plans.
    gate: Arc<Mutex<()>>,
}

/// Process-wide collection of named device links.
///
/// Initialized once at startup and injected into the sequencer, so tests can
/// register fakes. Each link carries a gate enforcing the single-outstanding-
/// command rule even when multiple individuals' plans execute concurrently.
#[derive(Default)]
pub struct LinkRegistry {
    entries: HashMap<String, LinkEntry>,
}

impl LinkRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a link under a logical device name.
    pub fn register(&mut self, name: impl Into<String>, link: Arc<dyn DeviceLink>) {
        self.entries.insert(
            name.into(),
            LinkEntry { link, gate: Arc::new(Mutex::new(())) },
        );
    }

    /// Whether a link with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered link names.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub(crate) fn entry(&self, name: &str) -> Option<(Arc<dyn DeviceLink>, Arc<Mutex<()>>)> {
        self.entries
            .get(name)
            .map(|e| (Arc::clone(&e.link), Arc::clone(&e.gate)))
    }
}
