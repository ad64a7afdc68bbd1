//! Output module for crawl summaries
//!
//! This module handles:
//! - Summarizing a finished crawl for the terminal
//! - Reading statistics back out of the database

pub mod stats;

pub use stats::{format_statistics, load_statistics, print_statistics, RepoStatistics};

use crate::crawler::{CrawlOutcome, CrawlReport};

/// Renders the end-of-run summary
pub fn format_report(report: &CrawlReport) -> String {
    let outcome = match report.outcome {
        CrawlOutcome::TargetReached => "target reached",
        CrawlOutcome::PlanExhausted => "plan exhausted",
        CrawlOutcome::Interrupted => "interrupted",
    };

    let mut out = String::from("=== Crawl Summary ===\n\n");
    out.push_str(&format!("Outcome: {}\n", outcome));
    out.push_str(&format!("Persisted (all runs): {}\n", report.total_persisted));
    out.push_str(&format!("Persisted (this run): {}\n", report.persisted_this_run));
    out.push_str(&format!("Pages fetched: {}\n", report.pages_fetched));
    out.push_str(&format!("Range splits: {}\n", report.splits));

    if !report.truncated_ranges.is_empty() {
        out.push_str(&format!(
            "\nTruncated ranges ({}), results beyond the cap were unreachable:\n",
            report.truncated_ranges.len()
        ));
        for range in &report.truncated_ranges {
            out.push_str(&format!("  - {}\n", range));
        }
    }

    if !report.failed_ranges.is_empty() {
        out.push_str(&format!(
            "\nSkipped ranges ({}):\n",
            report.failed_ranges.len()
        ));
        for failure in &report.failed_ranges {
            out.push_str(&format!("  - {}: {}\n", failure.range, failure.reason));
        }
    }

    out
}

pub fn print_report(report: &CrawlReport) {
    print!("{}", format_report(report));
}
