//! Storage traits and error types
//!
//! This module defines the two durable seams the crawl engine writes to:
//! the repository sink and the progress store.

use crate::gateway::Item;
use crate::storage::CrawlCheckpoint;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable destination for crawled repositories
pub trait RepositorySink {
    /// Upserts a batch keyed by `Item::id`
    ///
    /// The batch is applied all-or-nothing. A repeated id overwrites the
    /// display name, popularity and last-seen timestamp.
    ///
    /// # Returns
    ///
    /// The number of items acknowledged
    fn upsert_batch(&mut self, items: &[Item]) -> StorageResult<usize>;
}

/// Durable record of crawl position
pub trait ProgressStore {
    /// Loads the last saved checkpoint, or an empty one if none exists
    fn load(&self) -> StorageResult<CrawlCheckpoint>;

    /// Atomically replaces the saved checkpoint
    fn save(&mut self, checkpoint: &CrawlCheckpoint) -> StorageResult<()>;

    /// Forgets any saved checkpoint
    fn reset(&mut self) -> StorageResult<()>;
}
