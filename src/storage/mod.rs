//! Storage module for persisting crawl data
//!
//! This module handles everything the crawler writes to disk:
//! - SQLite database initialization and schema management
//! - Idempotent repository upserts
//! - Run tracking
//! - The crawl checkpoint file used for resumption

mod progress;
mod schema;
mod sqlite;
mod traits;

pub use progress::{CrawlCheckpoint, FileProgressStore};
pub use sqlite::SqliteStorage;
pub use traits::{ProgressStore, RepositorySink, StorageError, StorageResult};

/// Represents a repository row in the database
#[derive(Debug, Clone)]
pub struct RepositoryRecord {
    pub repo_id: String,
    pub name_with_owner: String,
    pub stars: u64,
    pub first_seen: String,
    pub last_seen: String,
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub items_persisted: u64,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_db_strings() {
        assert_eq!(RunStatus::Interrupted.to_db_string(), "interrupted");
        assert_eq!(RunStatus::from_db_string("completed"), Some(RunStatus::Completed));
        assert_eq!(RunStatus::from_db_string("invalid"), None);
    }
}
