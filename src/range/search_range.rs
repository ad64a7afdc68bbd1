//! Star-count windows and their textual predicate form

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Qualifier the search API uses for the ranking attribute
pub const STAR_QUALIFIER: &str = "stars";

/// Errors produced when parsing a range from its textual form
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeParseError {
    #[error("Empty range")]
    Empty,

    #[error("Invalid bound '{0}'")]
    InvalidBound(String),

    #[error("Unrecognized range syntax '{0}'")]
    Syntax(String),

    #[error("Lower bound {low} exceeds upper bound {high}")]
    Inverted { low: u64, high: u64 },
}

/// An inclusive window over the star count
///
/// `high == None` means the window is open-ended upwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SearchRange {
    low: u64,
    high: Option<u64>,
}

impl SearchRange {
    /// Creates a bounded range `[low, high]`
    pub fn bounded(low: u64, high: u64) -> Result<Self, RangeParseError> {
        if low > high {
            return Err(RangeParseError::Inverted { low, high });
        }
        Ok(Self {
            low,
            high: Some(high),
        })
    }

    /// Creates an open-ended range `[low, *)`
    pub fn open(low: u64) -> Self {
        Self { low, high: None }
    }

    pub fn low(&self) -> u64 {
        self.low
    }

    pub fn high(&self) -> Option<u64> {
        self.high
    }

    /// Returns true if `other` lies entirely within this range
    pub fn contains_range(&self, other: &SearchRange) -> bool {
        if other.low < self.low {
            return false;
        }
        match (self.high, other.high) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(outer), Some(inner)) => inner <= outer,
        }
    }

    /// Returns true if the two windows share at least one star value
    pub fn overlaps(&self, other: &SearchRange) -> bool {
        let self_below_other = matches!(self.high, Some(high) if high < other.low);
        let other_below_self = matches!(other.high, Some(high) if high < self.low);
        !(self_below_other || other_below_self)
    }

    /// The part of `self` strictly above `inner`, if any
    ///
    /// `inner` must be contained in `self`.
    pub fn remainder_after(&self, inner: &SearchRange) -> Option<SearchRange> {
        let inner_high = inner.high?;
        let next_low = inner_high.checked_add(1)?;
        match self.high {
            None => Some(SearchRange::open(next_low)),
            Some(high) if next_low <= high => Some(SearchRange {
                low: next_low,
                high: Some(high),
            }),
            Some(_) => None,
        }
    }

    /// Midpoint split into `[low, mid]` and `[mid + 1, high]`
    ///
    /// Returns `None` for unbounded windows and windows spanning one step
    /// or less.
    pub fn halves(&self) -> Option<[SearchRange; 2]> {
        let high = self.high?;
        if high - self.low <= 1 {
            return None;
        }
        let mid = self.low + (high - self.low) / 2;
        Some([
            SearchRange {
                low: self.low,
                high: Some(mid),
            },
            SearchRange {
                low: mid + 1,
                high: Some(high),
            },
        ])
    }

    /// Search predicate for this window, e.g. `stars:100..999` or `stars:>=100000`
    pub fn predicate(&self) -> String {
        match self.high {
            Some(high) if high == self.low => format!("{}:{}", STAR_QUALIFIER, self.low),
            Some(high) => format!("{}:{}..{}", STAR_QUALIFIER, self.low, high),
            None => format!("{}:>={}", STAR_QUALIFIER, self.low),
        }
    }
}

impl fmt::Display for SearchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.high {
            Some(high) => write!(f, "{}..{}", self.low, high),
            None => write!(f, "{}..*", self.low),
        }
    }
}

fn parse_bound(text: &str) -> Result<u64, RangeParseError> {
    text.trim()
        .parse::<u64>()
        .map_err(|_| RangeParseError::InvalidBound(text.trim().to_string()))
}

impl FromStr for SearchRange {
    type Err = RangeParseError;

    /// Accepts `low..high`, `low..*`, `>=low`, `>low` and a bare `n`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let text = text
            .strip_prefix(STAR_QUALIFIER)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(text);

        if text.is_empty() {
            return Err(RangeParseError::Empty);
        }

        if let Some(rest) = text.strip_prefix(">=") {
            return Ok(SearchRange::open(parse_bound(rest)?));
        }

        if let Some(rest) = text.strip_prefix('>') {
            let low = parse_bound(rest)?
                .checked_add(1)
                .ok_or_else(|| RangeParseError::InvalidBound(rest.to_string()))?;
            return Ok(SearchRange::open(low));
        }

        if let Some((low, high)) = text.split_once("..") {
            let low = parse_bound(low)?;
            return match high.trim() {
                "*" => Ok(SearchRange::open(low)),
                high => SearchRange::bounded(low, parse_bound(high)?),
            };
        }

        if text.chars().all(|c| c.is_ascii_digit()) {
            let value = parse_bound(text)?;
            return SearchRange::bounded(value, value);
        }

        Err(RangeParseError::Syntax(text.to_string()))
    }
}

impl TryFrom<String> for SearchRange {
    type Error = RangeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SearchRange> for String {
    fn from(range: SearchRange) -> Self {
        range.to_string()
    }
}
