//! Density decisions for search ranges
//!
//! The search API never serves more than `cap` results for one predicate.
//! A range whose match count reaches the cap is therefore undercounted and
//! has to be split until every window fits under the ceiling.

use crate::range::SearchRange;

/// Hard ceiling on results a single search predicate can return
pub const DEFAULT_RESULT_CAP: u64 = 1000;

/// Outcome of evaluating one fetched range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Every match is reachable by paginating this range
    Exhausted,

    /// The range is dense; replace it by these two halves, left first
    NeedsSplit([SearchRange; 2]),

    /// The range is dense but cannot be narrowed further. Only `reachable`
    /// of the matches will be served; the rest are lost.
    Truncated { reachable: u64 },
}

/// Decides whether a range must be split
///
/// Pure: the decision depends only on the range and the observed count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePartitioner {
    cap: u64,
}

impl Default for RangePartitioner {
    fn default() -> Self {
        Self::new(DEFAULT_RESULT_CAP)
    }
}

impl RangePartitioner {
    pub fn new(cap: u64) -> Self {
        Self { cap }
    }

    pub fn cap(&self) -> u64 {
        self.cap
    }

    /// Evaluates `range` given the match count the gateway reported for it
    ///
    /// Counts above the cap are treated as equal to it.
    pub fn evaluate(&self, range: &SearchRange, observed_count: u64) -> Decision {
        if observed_count < self.cap {
            return Decision::Exhausted;
        }

        match range.halves() {
            Some(children) => Decision::NeedsSplit(children),
            None => Decision::Truncated {
                reachable: self.cap,
            },
        }
    }
}
