//! Crawl checkpoint and its on-disk store
//!
//! The checkpoint is a single small JSON record. Every save goes to a temp
//! file in the same directory which is then renamed over the target, so a
//! crash mid-write leaves either the old or the new checkpoint, never a torn
//! one.

use crate::range::SearchRange;
use crate::storage::traits::{ProgressStore, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Durable crawl position
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCheckpoint {
    /// Range being paginated, if any
    #[serde(rename = "current_range")]
    pub active_range: Option<SearchRange>,

    /// Cursor after the last persisted page of `active_range`
    #[serde(rename = "after_cursor")]
    pub cursor: Option<String>,

    /// Items persisted across all runs of this crawl
    #[serde(rename = "total_saved")]
    pub total_persisted: u64,

    /// Set once every range of the plan has been crawled without a rejection
    #[serde(default)]
    pub finished: bool,

    /// Ranges rejected during the current pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SearchRange>,

    /// Ranges being retried in place of the configured plan
    ///
    /// Empty while the configured plan is being crawled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retrying: Vec<SearchRange>,
}

impl CrawlCheckpoint {
    #[cfg(test)]
    pub(crate) fn at_range(range: SearchRange, total_persisted: u64) -> Self {
        Self {
            active_range: Some(range),
            total_persisted,
            ..Self::default()
        }
    }

    /// Positions the checkpoint at the start of `range`
    pub fn begin(&mut self, range: SearchRange) {
        self.active_range = Some(range);
        self.cursor = None;
        self.finished = false;
    }

    /// Closes the current pass once its last range is done
    ///
    /// A clean pass marks the crawl finished. Otherwise the skipped ranges
    /// become the work of the next pass, which the next run picks up.
    pub fn complete_pass(&mut self) {
        self.active_range = None;
        self.cursor = None;
        self.retrying = std::mem::take(&mut self.skipped);
        self.finished = self.retrying.is_empty();
    }
}

/// Checkpoint store backed by a JSON file
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    path: PathBuf,
}

impl FileProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl ProgressStore for FileProgressStore {
    fn load(&self) -> StorageResult<CrawlCheckpoint> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(CrawlCheckpoint::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|e| {
            StorageError::Serialization(format!(
                "checkpoint {} is unreadable: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&mut self, checkpoint: &CrawlCheckpoint) -> StorageResult<()> {
        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let dir = self.directory();
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StorageError::Io(e.error))?;

        Ok(())
    }

    fn reset(&mut self) -> StorageResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
