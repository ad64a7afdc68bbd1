//! SQLite storage implementation
//!
//! This module provides the SQLite-backed repository sink and run log.

use crate::gateway::Item;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{RepositorySink, StorageError, StorageResult};
use crate::storage::{RepositoryRecord, RunRecord, RunStatus};
use crate::SweepError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(SweepError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, SweepError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, SweepError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    // ===== Run Management =====

    /// Creates a new crawl run and returns its ID
    pub fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Gets a run by ID
    pub fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status, items_persisted
                 FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    /// Gets the most recent runs, newest first
    pub fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, config_hash, status, items_persisted
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;

        let runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    /// Records the final status of a run
    pub fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        items_persisted: u64,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, items_persisted = ?3 WHERE id = ?4",
            params![status.to_db_string(), now, items_persisted as i64, run_id],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Repository Queries =====

    /// Gets a repository by its API id
    pub fn get_repository(&self, repo_id: &str) -> StorageResult<Option<RepositoryRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT repo_id, name_with_owner, stars, first_seen, last_seen
                 FROM repositories WHERE repo_id = ?1",
                params![repo_id],
                repository_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Counts stored repositories
    pub fn count_repositories(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Sums the stars of all stored repositories
    pub fn total_stars(&self) -> StorageResult<u64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(stars), 0) FROM repositories",
            [],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    /// Gets the most-starred repositories, highest first
    pub fn top_repositories(&self, limit: usize) -> StorageResult<Vec<RepositoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT repo_id, name_with_owner, stars, first_seen, last_seen
             FROM repositories ORDER BY stars DESC, repo_id ASC LIMIT ?1",
        )?;

        let records = stmt
            .query_map(params![limit as i64], repository_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }
}

impl RepositorySink for SqliteStorage {
    fn upsert_batch(&mut self, items: &[Item]) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO repositories (repo_id, name_with_owner, stars, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(repo_id) DO UPDATE SET
                     name_with_owner = excluded.name_with_owner,
                     stars = excluded.stars,
                     last_seen = excluded.last_seen",
            )?;

            for item in items {
                stmt.execute(params![
                    item.id,
                    item.display_name,
                    item.popularity as i64,
                    now
                ])?;
            }
        }

        tx.commit()?;
        Ok(items.len())
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Failed),
        items_persisted: row.get::<_, i64>(5)? as u64,
    })
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<RepositoryRecord> {
    Ok(RepositoryRecord {
        repo_id: row.get(0)?,
        name_with_owner: row.get(1)?,
        stars: row.get::<_, i64>(2)? as u64,
        first_seen: row.get(3)?,
        last_seen: row.get(4)?,
    })
}
