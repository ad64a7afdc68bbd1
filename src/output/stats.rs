//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! what a crawl has collected so far.

use crate::range::SearchRange;
use crate::storage::{CrawlCheckpoint, RepositoryRecord, RunRecord, SqliteStorage};
use crate::SweepError;

/// Repositories shown in the "top" listing
const TOP_LIMIT: usize = 10;

/// Runs shown in the run history
const RUN_LIMIT: usize = 5;

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct RepoStatistics {
    /// Distinct repositories stored
    pub total_repositories: u64,

    /// Sum of stars across stored repositories
    pub total_stars: u64,

    /// Most-starred repositories, highest first
    pub top_repositories: Vec<RepositoryRecord>,

    /// Latest runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The database to query
///
/// # Returns
///
/// * `Ok(RepoStatistics)` - Successfully loaded statistics
/// * `Err(SweepError)` - Failed to query statistics
pub fn load_statistics(storage: &SqliteStorage) -> Result<RepoStatistics, SweepError> {
    Ok(RepoStatistics {
        total_repositories: storage.count_repositories()?,
        total_stars: storage.total_stars()?,
        top_repositories: storage.top_repositories(TOP_LIMIT)?,
        recent_runs: storage.recent_runs(RUN_LIMIT)?,
    })
}

/// Renders statistics, plus the checkpoint if one is saved
pub fn format_statistics(stats: &RepoStatistics, checkpoint: Option<&CrawlCheckpoint>) -> String {
    let mut out = String::from("=== Crawl Statistics ===\n\n");

    out.push_str("Overview:\n");
    out.push_str(&format!("  Repositories stored: {}\n", stats.total_repositories));
    out.push_str(&format!("  Total stars: {}\n", stats.total_stars));
    let average = if stats.total_repositories > 0 {
        stats.total_stars as f64 / stats.total_repositories as f64
    } else {
        0.0
    };
    out.push_str(&format!("  Average stars: {:.1}\n\n", average));

    if let Some(checkpoint) = checkpoint {
        out.push_str("Checkpoint:\n");
        match (checkpoint.finished, checkpoint.active_range) {
            (true, _) => out.push_str("  Plan finished\n"),
            (false, Some(range)) => out.push_str(&format!("  Active range: {}\n", range)),
            (false, None) if !checkpoint.retrying.is_empty() => {
                out.push_str("  Pass over; skipped ranges retried on the next run\n")
            }
            (false, None) => out.push_str("  Not started\n"),
        }
        if !checkpoint.retrying.is_empty() {
            out.push_str(&format!("  Retrying: {}\n", join_ranges(&checkpoint.retrying)));
        }
        if !checkpoint.skipped.is_empty() {
            out.push_str(&format!(
                "  Skipped this pass: {}\n",
                join_ranges(&checkpoint.skipped)
            ));
        }
        if let Some(cursor) = &checkpoint.cursor {
            out.push_str(&format!("  Cursor: {}\n", cursor));
        }
        out.push_str(&format!(
            "  Persisted across runs: {}\n\n",
            checkpoint.total_persisted
        ));
    }

    if !stats.top_repositories.is_empty() {
        out.push_str(&format!("Top {} Repositories:\n", stats.top_repositories.len()));
        for repo in &stats.top_repositories {
            out.push_str(&format!("  {:>8}  {}\n", repo.stars, repo.name_with_owner));
        }
        out.push('\n');
    }

    if !stats.recent_runs.is_empty() {
        out.push_str("Recent Runs:\n");
        for run in &stats.recent_runs {
            out.push_str(&format!(
                "  #{} {} started {} ({} items)\n",
                run.id,
                run.status.to_db_string(),
                run.started_at,
                run.items_persisted
            ));
        }
    }

    out
}

fn join_ranges(ranges: &[SearchRange]) -> String {
    ranges
        .iter()
        .map(SearchRange::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &RepoStatistics, checkpoint: Option<&CrawlCheckpoint>) {
    print!("{}", format_statistics(stats, checkpoint));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Item;
    use crate::storage::{RepositorySink, RunStatus};

    fn seeded() -> SqliteStorage {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .upsert_batch(&[
                Item {
                    id: "R_1".to_string(),
                    display_name: "rust-lang/rust".to_string(),
                    popularity: 90,
                },
                Item {
                    id: "R_2".to_string(),
                    display_name: "tokio-rs/tokio".to_string(),
                    popularity: 30,
                },
            ])
            .unwrap();
        let run = storage.create_run("hash").unwrap();
        storage.finish_run(run, RunStatus::Completed, 2).unwrap();
        storage
    }

    #[test]
    fn test_load_statistics() {
        let stats = load_statistics(&seeded()).unwrap();

        assert_eq!(stats.total_repositories, 2);
        assert_eq!(stats.total_stars, 120);
        assert_eq!(stats.top_repositories[0].name_with_owner, "rust-lang/rust");
        assert_eq!(stats.recent_runs.len(), 1);
    }

    #[test]
    fn test_format_statistics() {
        let stats = load_statistics(&seeded()).unwrap();
        let checkpoint = CrawlCheckpoint {
            active_range: Some("100..999".parse().unwrap()),
            cursor: Some("abc".to_string()),
            total_persisted: 2,
            skipped: vec!["1..99".parse().unwrap()],
            ..CrawlCheckpoint::default()
        };

        let text = format_statistics(&stats, Some(&checkpoint));
        assert!(text.contains("Repositories stored: 2"));
        assert!(text.contains("Average stars: 60.0"));
        assert!(text.contains("Active range: 100..999"));
        assert!(text.contains("Cursor: abc"));
        assert!(text.contains("Skipped this pass: 1..99"));
        assert!(text.contains("rust-lang/rust"));
        assert!(text.contains("completed"));
    }

    #[test]
    fn test_format_open_retry_pass() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let stats = load_statistics(&storage).unwrap();
        let checkpoint = CrawlCheckpoint {
            total_persisted: 12,
            retrying: vec!["11..20".parse().unwrap(), "31..40".parse().unwrap()],
            ..CrawlCheckpoint::default()
        };

        let text = format_statistics(&stats, Some(&checkpoint));
        assert!(text.contains("Pass over"));
        assert!(text.contains("Retrying: 11..20, 31..40"));
        assert!(!text.contains("Not started"));
    }

    #[test]
    fn test_format_empty_database() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let stats = load_statistics(&storage).unwrap();

        let text = format_statistics(&stats, None);
        assert!(text.contains("Repositories stored: 0"));
        assert!(!text.contains("Checkpoint:"));
        assert!(!text.contains("Top"));
    }
}
