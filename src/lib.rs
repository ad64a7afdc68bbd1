//! star-sweep: an adaptive, resumable crawler for popularity-ranked search results
//!
//! This crate enumerates public repositories through a rate-limited search
//! API that serves at most a fixed number of results per query. It splits
//! dense star-count ranges until each fits under that ceiling, paginates
//! every range, upserts the results into SQLite and checkpoints after every
//! page so an interrupted crawl resumes where it stopped.

pub mod config;
pub mod crawler;
pub mod gateway;
pub mod output;
pub mod range;
pub mod rate;
pub mod storage;

use thiserror::Error;

/// Main error type for star-sweep operations
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Search gateway error: {0}")]
    Gateway(#[from] gateway::GatewayError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid range: {0}")]
    InvalidRange(#[from] range::RangeParseError),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Checkpoint does not match the configured plan: {0}")]
    PlanMismatch(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid plan range: {0}")]
    InvalidRange(#[from] range::RangeParseError),

    #[error("API token missing: environment variable {0} is not set")]
    MissingToken(String),
}

/// Result type alias for star-sweep operations
pub type Result<T> = std::result::Result<T, SweepError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlEngine, CrawlOutcome, CrawlReport};
pub use gateway::{Item, Page, SearchGateway};
pub use range::{Decision, RangePartitioner, SearchRange};
pub use rate::{RateBudget, RatePolicy, RateSnapshot};
pub use storage::{CrawlCheckpoint, ProgressStore, RepositorySink};
