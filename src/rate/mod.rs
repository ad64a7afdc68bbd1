//! Rate budget tracking
//!
//! The search API grants a fixed number of calls per window and reports how
//! many are left with every response. `RateBudget` turns that report into a
//! pause before the next request.

mod budget;

pub use budget::{RateBudget, RatePolicy, RateSnapshot};
