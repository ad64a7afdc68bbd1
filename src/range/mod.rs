//! Search-space decomposition over the star count
//!
//! - `SearchRange`: an inclusive star window and its predicate text
//! - `RangePartitioner`: decides when a window is too dense and how to split it

mod partitioner;
mod search_range;

pub use partitioner::{Decision, RangePartitioner, DEFAULT_RESULT_CAP};
pub use search_range::{RangeParseError, SearchRange, STAR_QUALIFIER};

/// Parses an ordered plan of ranges, preserving order
pub fn parse_plan<S: AsRef<str>>(entries: &[S]) -> Result<Vec<SearchRange>, RangeParseError> {
    entries.iter().map(|entry| entry.as_ref().parse()).collect()
}

/// Returns the first pair of plan entries sharing a star value, if any
pub fn find_overlap(plan: &[SearchRange]) -> Option<(SearchRange, SearchRange)> {
    plan.iter().enumerate().find_map(|(i, a)| {
        plan[i + 1..]
            .iter()
            .find(|b| a.overlaps(b))
            .map(|b| (*a, *b))
    })
}
