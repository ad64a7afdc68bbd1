//! Depth-first work queue of search ranges
//!
//! Splits push their halves to the front, left half first, so the leaves of
//! a plan range are always visited in ascending star order. That ordering is
//! what lets a checkpoint naming one range rebuild the rest of the queue.

use crate::range::SearchRange;
use crate::storage::CrawlCheckpoint;
use crate::SweepError;
use std::collections::VecDeque;

/// Pending ranges, front first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkQueue {
    ranges: VecDeque<SearchRange>,
}

impl WorkQueue {
    /// Queue holding the whole plan in order
    pub fn from_plan(plan: &[SearchRange]) -> Self {
        Self {
            ranges: plan.iter().copied().collect(),
        }
    }

    /// Rebuilds the queue a checkpoint was taken from
    ///
    /// With checkpoint range `R` inside plan range `P`, everything in `P`
    /// below `R` is done and everything above it is pending. The result is
    /// `R`, then the rest of `P` above `R` as one range, then the plan
    /// ranges after `P`.
    ///
    /// While a retry pass is open the checkpoint's `retrying` list stands in
    /// for the configured plan.
    ///
    /// # Errors
    ///
    /// `SweepError::PlanMismatch` if no plan range contains `R`.
    pub fn resume(plan: &[SearchRange], checkpoint: &CrawlCheckpoint) -> Result<Self, SweepError> {
        if checkpoint.finished {
            return Ok(Self::default());
        }

        let plan: &[SearchRange] = if checkpoint.retrying.is_empty() {
            plan
        } else {
            &checkpoint.retrying
        };

        let Some(active) = checkpoint.active_range else {
            return Ok(Self::from_plan(plan));
        };

        let index = plan
            .iter()
            .position(|parent| parent.contains_range(&active))
            .ok_or_else(|| {
                SweepError::PlanMismatch(format!(
                    "range {} is not inside any plan range; start over with --fresh",
                    active
                ))
            })?;

        let mut ranges = VecDeque::with_capacity(plan.len() - index + 1);
        ranges.push_back(active);
        if let Some(rest) = plan[index].remainder_after(&active) {
            ranges.push_back(rest);
        }
        ranges.extend(plan[index + 1..].iter().copied());

        Ok(Self { ranges })
    }

    pub fn peek(&self) -> Option<&SearchRange> {
        self.ranges.front()
    }

    pub fn pop_next(&mut self) -> Option<SearchRange> {
        self.ranges.pop_front()
    }

    /// Puts the halves of a split range at the front, left half first
    pub fn push_split(&mut self, children: [SearchRange; 2]) {
        let [left, right] = children;
        self.ranges.push_front(right);
        self.ranges.push_front(left);
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SearchRange> {
        self.ranges.iter()
    }
}
