//! Search gateway: one page of search results per call
//!
//! The crawl engine only talks to the search API through [`SearchGateway`].
//! [`GithubGateway`] is the production implementation; tests substitute
//! scripted gateways.

mod github;

pub use github::{
    build_http_client, interpret_response, parse_rate_headers, parse_retry_after,
    rate_after_refusal, GithubGateway,
};

use crate::rate::RateSnapshot;
use thiserror::Error;

/// One crawled repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Stable identifier assigned by the API
    pub id: String,

    /// `owner/name`
    pub display_name: String,

    /// Star count at the time of the sighting
    pub popularity: u64,
}

/// One page of search results
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page {
    /// Items in the order the API returned them
    pub items: Vec<Item>,

    /// Cursor to pass for the following page
    pub next_cursor: Option<String>,

    /// Whether another page follows this one
    pub has_more: bool,

    /// Total matches the API reports for the predicate
    pub total_count: u64,
}

/// Failures reported by a gateway call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Network failure, timeout or malformed response; worth retrying
    #[error("transport failure: {0}")]
    Transport(String),

    /// The API rejected the query; retrying will not help
    #[error("query rejected: {0}")]
    Query(String),

    /// The call was refused because the rate budget is spent
    #[error("rate limit exhausted: {0}")]
    RateExhausted(String),

    /// The credentials were refused; no call succeeds until they change
    #[error("access denied: {0}")]
    Unauthorized(String),
}

/// Result of one gateway call together with the rate data it carried
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub outcome: Result<Page, GatewayError>,
    pub rate: Option<RateSnapshot>,
}

impl GatewayResponse {
    pub fn new(outcome: Result<Page, GatewayError>, rate: Option<RateSnapshot>) -> Self {
        Self { outcome, rate }
    }
}

/// Source of paginated search results
#[allow(async_fn_in_trait)]
pub trait SearchGateway {
    /// Fetches the page of `predicate` that starts after `cursor`
    ///
    /// `cursor == None` requests the first page.
    async fn fetch_page(&self, predicate: &str, cursor: Option<&str>) -> GatewayResponse;
}
