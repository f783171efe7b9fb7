//! Storage trait abstraction.

use async_trait::async_trait;
use synthq_core::Generation;

/// Error type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Append-only population history.
///
/// This trait allows different storage backends to be plugged in. The
/// scheduler only ever appends or replaces whole generation records.
#[async_trait]
pub trait PopulationStore: Send + Sync {
    /// Durably record a generation (create or replace its record).
    async fn save(&mut self, generation: &Generation) -> Result<()>;

    /// Load the generation with the highest index, if any exists.
    async fn load_latest(&self) -> Result<Option<Generation>>;

    /// Load a generation by index.
    async fn load(&self, index: u32) -> Result<Option<Generation>>;

    /// Load the full history, ascending by generation index.
    async fn history(&self) -> Result<Vec<Generation>>;
}
