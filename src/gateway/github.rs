//! GitHub GraphQL search gateway
//!
//! This module handles all HTTP traffic to the search API, including:
//! - Building the HTTP client
//! - Issuing the repository search query with a cursor
//! - Reading the rate limit headers of every response
//! - Classifying failures as transport, query, rate or access errors

use crate::config::Config;
use crate::gateway::{GatewayError, GatewayResponse, Item, Page, SearchGateway};
use crate::rate::RateSnapshot;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const SEARCH_QUERY: &str = r#"
query($q: String!, $first: Int!, $after: String) {
  search(query: $q, type: REPOSITORY, first: $first, after: $after) {
    repositoryCount
    pageInfo {
      endCursor
      hasNextPage
    }
    nodes {
      ... on Repository {
        id
        nameWithOwner
        stargazerCount
      }
    }
  }
}
"#;

const RATE_REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RATE_RESET_HEADER: &str = "x-ratelimit-reset";
const RETRY_AFTER_HEADER: &str = "retry-after";

/// Wait after a secondary limit that names no `Retry-After`
const SECONDARY_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Builds the HTTP client used for search calls
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("star-sweep/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Search gateway backed by the GitHub GraphQL API
pub struct GithubGateway {
    client: Client,
    endpoint: String,
    token: String,
    page_size: u32,
}

impl GithubGateway {
    pub fn new(endpoint: &str, token: String, page_size: u32) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client()?,
            endpoint: endpoint.to_string(),
            token,
            page_size,
        })
    }

    pub fn from_config(config: &Config, token: String) -> Result<Self, reqwest::Error> {
        Self::new(&config.github.endpoint, token, config.crawler.page_size)
    }
}

impl SearchGateway for GithubGateway {
    async fn fetch_page(&self, predicate: &str, cursor: Option<&str>) -> GatewayResponse {
        let body = json!({
            "query": SEARCH_QUERY,
            "variables": {
                "q": predicate,
                "first": self.page_size,
                "after": cursor,
            },
        });

        tracing::debug!("Searching '{}' after {:?}", predicate, cursor);

        let response = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return GatewayResponse::new(Err(classify_request_error(&e)), None),
        };

        let rate = parse_rate_headers(response.headers());
        let retry_after = parse_retry_after(response.headers());
        let status = response.status();

        let outcome = match response.text().await {
            Ok(text) => interpret_response(status, rate.as_ref(), retry_after, &text),
            Err(e) => Err(classify_request_error(&e)),
        };

        let rate = rate_after_refusal(&outcome, rate, retry_after, Utc::now());
        GatewayResponse::new(outcome, rate)
    }
}

fn classify_request_error(error: &reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Transport("request timeout".to_string())
    } else if error.is_connect() {
        GatewayError::Transport(format!("connection failed: {}", error))
    } else {
        GatewayError::Transport(error.to_string())
    }
}

/// Reads `X-RateLimit-Remaining` and `X-RateLimit-Reset` (epoch seconds)
///
/// Returns `None` when the remaining count is absent or unparsable.
pub fn parse_rate_headers(headers: &HeaderMap) -> Option<RateSnapshot> {
    let remaining = headers
        .get(RATE_REMAINING_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()?;

    let reset_at = headers
        .get(RATE_RESET_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    Some(RateSnapshot {
        remaining,
        reset_at,
    })
}

/// Reads `Retry-After` as a number of seconds
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Rate data to hand the budget after a call
///
/// A secondary limit refuses calls while the primary budget still has
/// room, so its headers would not stop the next call. The snapshot is
/// replaced by a spent budget that resets once `retry_after` (or a minute)
/// has passed.
pub fn rate_after_refusal(
    outcome: &Result<Page, GatewayError>,
    rate: Option<RateSnapshot>,
    retry_after: Option<Duration>,
    now: DateTime<Utc>,
) -> Option<RateSnapshot> {
    if !matches!(outcome, Err(GatewayError::RateExhausted(_))) {
        return rate;
    }
    let primary_spent = rate.as_ref().is_some_and(|r| r.remaining == 0);
    if primary_spent && retry_after.is_none() {
        return rate;
    }

    let wait = retry_after.unwrap_or(SECONDARY_LIMIT_WAIT);
    let wait = chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::seconds(60));
    Some(RateSnapshot {
        remaining: 0,
        reset_at: Some(now + wait),
    })
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<SearchData>,
    #[serde(default)]
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: Option<SearchConnection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchConnection {
    repository_count: u64,
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Option<RepositoryNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    end_cursor: Option<String>,
    has_next_page: bool,
}

// Non-repository nodes come back as `{}`, so every field is optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    id: Option<String>,
    name_with_owner: Option<String>,
    stargazer_count: Option<u64>,
}

impl From<SearchConnection> for Page {
    fn from(connection: SearchConnection) -> Self {
        let items = connection
            .nodes
            .into_iter()
            .flatten()
            .filter_map(|node| {
                Some(Item {
                    id: node.id?,
                    display_name: node.name_with_owner?,
                    popularity: node.stargazer_count.unwrap_or(0),
                })
            })
            .collect();

        Page {
            items,
            next_cursor: connection.page_info.end_cursor,
            has_more: connection.page_info.has_next_page,
            total_count: connection.repository_count,
        }
    }
}

/// Maps an HTTP status and body to a page or a classified failure
///
/// | Condition | Result |
/// |-----------|--------|
/// | 429 | RateExhausted |
/// | 403 with no budget left, a `Retry-After` or a rate limit message | RateExhausted |
/// | 401, any other 403 | Unauthorized |
/// | 5xx | Transport |
/// | other 4xx | Query |
/// | unparsable body, missing `data` | Transport |
/// | GraphQL error of type `RATE_LIMITED` | RateExhausted |
/// | other GraphQL errors | Query |
pub fn interpret_response(
    status: StatusCode,
    rate: Option<&RateSnapshot>,
    retry_after: Option<Duration>,
    body: &str,
) -> Result<Page, GatewayError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GatewayError::RateExhausted(format!("HTTP {}", status.as_u16())));
    }

    if status == StatusCode::FORBIDDEN {
        let budget_spent = rate.is_some_and(|r| r.remaining == 0);
        let limit_message = body.to_ascii_lowercase().contains("rate limit");
        if budget_spent || retry_after.is_some() || limit_message {
            return Err(GatewayError::RateExhausted(format!(
                "HTTP 403: {}",
                snippet(body)
            )));
        }
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(GatewayError::Unauthorized(format!(
            "HTTP {}: {}",
            status.as_u16(),
            snippet(body)
        )));
    }

    if status.is_server_error() {
        return Err(GatewayError::Transport(format!("HTTP {}", status.as_u16())));
    }

    if !status.is_success() {
        return Err(GatewayError::Query(format!(
            "HTTP {}: {}",
            status.as_u16(),
            snippet(body)
        )));
    }

    let parsed: GraphqlResponse = serde_json::from_str(body)
        .map_err(|e| GatewayError::Transport(format!("malformed response body: {}", e)))?;

    if let Some(errors) = parsed.errors.filter(|errors| !errors.is_empty()) {
        let message = errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");

        if errors.iter().any(|e| e.kind.as_deref() == Some("RATE_LIMITED")) {
            return Err(GatewayError::RateExhausted(message));
        }
        return Err(GatewayError::Query(message));
    }

    parsed
        .data
        .and_then(|data| data.search)
        .map(Page::from)
        .ok_or_else(|| GatewayError::Transport("response carried no search data".to_string()))
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}
