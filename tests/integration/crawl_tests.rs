//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the GraphQL search endpoint and
//! run the full crawl cycle against a real SQLite database and checkpoint
//! file.

use serde_json::{json, Value};
use star_sweep::config::{parse_config, Config};
use star_sweep::crawler::crawl;
use star_sweep::gateway::{GatewayError, GithubGateway, SearchGateway};
use star_sweep::storage::{FileProgressStore, ProgressStore, RunStatus, SqliteStorage};
use star_sweep::{CrawlCheckpoint, CrawlOutcome};
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers search queries from a fixed table of (query, cursor) pages
struct SearchIndex;

impl SearchIndex {
    fn lookup(query: &str, after: Option<&str>) -> Option<Value> {
        let page = match (query, after) {
            // Dense parent: must be split, its nodes must never be stored
            ("stars:1..200000", None) => search_page(1500, &["P_1", "P_2"], Some("p1")),
            ("stars:1..100000", None) => search_page(3, &["L_1", "L_2"], Some("c1")),
            ("stars:1..100000", Some("c1")) => search_page(3, &["L_3"], None),
            ("stars:100001..200000", None) => search_page(1, &["R_1"], None),
            _ => return None,
        };
        Some(page)
    }
}

impl Respond for SearchIndex {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let query = body["variables"]["q"].as_str().unwrap_or_default();
        let after = body["variables"]["after"].as_str();

        match Self::lookup(query, after) {
            Some(page) => ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "4999")
                .insert_header("x-ratelimit-reset", "4102444800")
                .set_body_json(page),
            None => ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{"type": "INVALID", "message": format!("no fixture for {}", query)}]
            })),
        }
    }
}

fn search_page(count: u64, ids: &[&str], cursor: Option<&str>) -> Value {
    let nodes: Vec<Value> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            json!({
                "id": id,
                "nameWithOwner": format!("owner/{}", id.to_lowercase()),
                "stargazerCount": 1000 + i as u64,
            })
        })
        .collect();

    json!({
        "data": {
            "search": {
                "repositoryCount": count,
                "pageInfo": {"endCursor": cursor, "hasNextPage": cursor.is_some()},
                "nodes": nodes,
            }
        }
    })
}

fn create_test_config(endpoint: &str, dir: &TempDir, target: u64) -> Config {
    let toml = format!(
        r#"
[crawler]
target-count = {target}
fallback-delay-ms = 0
safety-margin-secs = 0
max-retries = 2
retry-backoff-ms = 5

[github]
endpoint = "{endpoint}"

[output]
database-path = "{db}"
checkpoint-path = "{checkpoint}"

[plan]
ranges = ["1..200000"]
"#,
        target = target,
        endpoint = endpoint,
        db = dir.path().join("repos.db").display(),
        checkpoint = dir.path().join("progress_state.json").display(),
    );
    parse_config(&toml).expect("test config should be valid")
}

async fn start_search_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(SearchIndex)
        .mount(&server)
        .await;
    server
}

async fn requested_pages(server: &MockServer) -> Vec<(String, Option<String>)> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            (
                body["variables"]["q"].as_str().unwrap().to_string(),
                body["variables"]["after"].as_str().map(str::to_string),
            )
        })
        .collect()
}

fn checkpoint_of(config: &Config) -> CrawlCheckpoint {
    FileProgressStore::new(&config.output.checkpoint_path)
        .load()
        .unwrap()
}

#[tokio::test]
async fn test_full_crawl_splits_dense_range() {
    let server = start_search_server().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/graphql", server.uri()), &dir, 1000);

    let report = crawl(&config, "hash", "test-token".to_string(), false, CancellationToken::new())
        .await
        .expect("crawl should succeed");

    assert_eq!(report.outcome, CrawlOutcome::PlanExhausted);
    assert_eq!(report.total_persisted, 4);
    assert_eq!(report.splits, 1);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path)).unwrap();
    assert_eq!(storage.count_repositories().unwrap(), 4);
    assert!(storage.get_repository("P_1").unwrap().is_none());
    assert_eq!(
        storage.get_repository("L_3").unwrap().unwrap().name_with_owner,
        "owner/l_3"
    );

    let runs = storage.recent_runs(5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].items_persisted, 4);
    assert_eq!(runs[0].config_hash, "hash");

    let checkpoint = checkpoint_of(&config);
    assert!(checkpoint.finished);
    assert_eq!(checkpoint.total_persisted, 4);

    assert_eq!(
        requested_pages(&server).await,
        vec![
            ("stars:1..200000".to_string(), None),
            ("stars:1..100000".to_string(), None),
            ("stars:1..100000".to_string(), Some("c1".to_string())),
            ("stars:100001..200000".to_string(), None),
        ]
    );
}

#[tokio::test]
async fn test_finished_crawl_is_not_repeated_unless_fresh() {
    let server = start_search_server().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/graphql", server.uri()), &dir, 1000);

    crawl(&config, "hash", "t".to_string(), false, CancellationToken::new())
        .await
        .unwrap();
    let first_pass = requested_pages(&server).await.len();

    let again = crawl(&config, "hash", "t".to_string(), false, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.outcome, CrawlOutcome::PlanExhausted);
    assert_eq!(again.persisted_this_run, 0);
    assert_eq!(requested_pages(&server).await.len(), first_pass);

    let fresh = crawl(&config, "hash", "t".to_string(), true, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fresh.total_persisted, 4);
    assert_eq!(requested_pages(&server).await.len(), first_pass * 2);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path)).unwrap();
    assert_eq!(storage.count_repositories().unwrap(), 4);
    assert_eq!(storage.recent_runs(10).unwrap().len(), 3);
}

#[tokio::test]
async fn test_resumes_from_checkpoint_file() {
    let server = start_search_server().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/graphql", server.uri()), &dir, 1000);

    std::fs::write(
        &config.output.checkpoint_path,
        r#"{"current_range": "1..100000", "after_cursor": "c1", "total_saved": 2}"#,
    )
    .unwrap();

    let report = crawl(&config, "hash", "t".to_string(), false, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total_persisted, 4);
    assert_eq!(report.persisted_this_run, 2);
    assert_eq!(
        requested_pages(&server).await,
        vec![
            ("stars:1..100000".to_string(), Some("c1".to_string())),
            ("stars:100001..200000".to_string(), None),
        ]
    );
}

#[tokio::test]
async fn test_stops_at_target() {
    let server = start_search_server().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/graphql", server.uri()), &dir, 2);

    let report = crawl(&config, "hash", "t".to_string(), false, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, CrawlOutcome::TargetReached);
    assert_eq!(report.total_persisted, 2);

    let checkpoint = checkpoint_of(&config);
    assert_eq!(checkpoint.active_range, Some("1..100000".parse().unwrap()));
    assert_eq!(checkpoint.cursor.as_deref(), Some("c1"));
    assert!(!checkpoint.finished);
}

#[tokio::test]
async fn test_cancelled_before_start_records_interrupted_run() {
    let server = start_search_server().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/graphql", server.uri()), &dir, 1000);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = crawl(&config, "hash", "t".to_string(), false, cancel)
        .await
        .unwrap();

    assert_eq!(report.outcome, CrawlOutcome::Interrupted);
    assert!(requested_pages(&server).await.is_empty());

    let storage = SqliteStorage::new(Path::new(&config.output.database_path)).unwrap();
    assert_eq!(storage.recent_runs(1).unwrap()[0].status, RunStatus::Interrupted);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(SearchIndex)
        .with_priority(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/graphql", server.uri()), &dir, 1000);

    let report = crawl(&config, "hash", "t".to_string(), false, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.total_persisted, 4);
}

#[tokio::test]
async fn test_persistent_server_errors_fail_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/graphql", server.uri()), &dir, 1000);

    let result = crawl(&config, "hash", "t".to_string(), false, CancellationToken::new()).await;
    assert!(result.is_err());

    // max-retries = 2 means three attempts in total
    assert_eq!(requested_pages(&server).await.len(), 3);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path)).unwrap();
    assert_eq!(storage.recent_runs(1).unwrap()[0].status, RunStatus::Failed);
    assert_eq!(
        checkpoint_of(&config).active_range,
        Some("1..200000".parse().unwrap())
    );
}

#[tokio::test]
async fn test_rejected_credentials_fail_the_run_without_finishing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/graphql", server.uri()), &dir, 1000);

    let result = crawl(&config, "hash", "revoked".to_string(), false, CancellationToken::new()).await;
    assert!(result.is_err());
    assert_eq!(requested_pages(&server).await.len(), 1);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path)).unwrap();
    assert_eq!(storage.recent_runs(1).unwrap()[0].status, RunStatus::Failed);

    let saved = checkpoint_of(&config);
    assert!(!saved.finished);
    assert_eq!(saved.active_range, Some("1..200000".parse().unwrap()));
}

#[tokio::test]
async fn test_secondary_limit_pauses_then_continues() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "4000")
                .insert_header("retry-after", "0")
                .set_body_json(json!({"message": "You have exceeded a secondary rate limit."})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(SearchIndex)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/graphql", server.uri()), &dir, 1000);

    let report = crawl(&config, "hash", "t".to_string(), false, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, CrawlOutcome::PlanExhausted);
    assert!(report.failed_ranges.is_empty());
    assert_eq!(report.total_persisted, 4);
    assert!(checkpoint_of(&config).finished);
}

// ===== Gateway over HTTP =====

#[tokio::test]
async fn test_gateway_sends_query_and_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "variables": {"q": "stars:>=100000", "first": 50, "after": "xyz"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_page(
            2,
            &["A", "B"],
            None,
        )))
        .mount(&server)
        .await;

    let gateway =
        GithubGateway::new(&format!("{}/graphql", server.uri()), "secret".to_string(), 50).unwrap();
    let response = gateway.fetch_page("stars:>=100000", Some("xyz")).await;

    let page = response.outcome.unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total_count, 2);
    assert!(!page.has_more);
    assert!(response.rate.is_none());
}

#[tokio::test]
async fn test_gateway_reads_rate_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "42")
                .insert_header("x-ratelimit-reset", "1700000000")
                .set_body_json(search_page(0, &[], None)),
        )
        .mount(&server)
        .await;

    let gateway = GithubGateway::new(&server.uri(), "t".to_string(), 100).unwrap();
    let response = gateway.fetch_page("stars:1..10", None).await;

    let rate = response.rate.unwrap();
    assert_eq!(rate.remaining, 42);
    assert_eq!(rate.reset_at.unwrap().timestamp(), 1_700_000_000);
    assert!(response.outcome.unwrap().items.is_empty());
}

#[tokio::test]
async fn test_gateway_error_classification() {
    let cases = [
        (
            ResponseTemplate::new(429),
            "429",
        ),
        (
            ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "0"),
            "403-spent",
        ),
        (
            ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})),
            "401",
        ),
        (
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "4000")
                .set_body_json(json!({
                    "message": "You have exceeded a secondary rate limit. Please wait a few minutes before you try again."
                })),
            "403-secondary",
        ),
        (
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "4000")
                .insert_header("retry-after", "30"),
            "403-retry-after",
        ),
        (ResponseTemplate::new(500), "500"),
        (
            ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{"type": "RATE_LIMITED", "message": "API rate limit exceeded"}]
            })),
            "graphql-rate",
        ),
        (
            ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{"message": "Invalid search query"}]
            })),
            "graphql-query",
        ),
        (ResponseTemplate::new(200).set_body_string("<html>"), "garbage"),
    ];

    for (template, label) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(template)
            .mount(&server)
            .await;

        let gateway = GithubGateway::new(&server.uri(), "t".to_string(), 100).unwrap();
        let error = gateway
            .fetch_page("stars:1..10", None)
            .await
            .outcome
            .unwrap_err();

        let expected_kind = match label {
            "429" | "403-spent" | "403-secondary" | "403-retry-after" | "graphql-rate" => "rate",
            "401" => "unauthorized",
            "graphql-query" => "query",
            _ => "transport",
        };
        let kind = match error {
            GatewayError::RateExhausted(_) => "rate",
            GatewayError::Query(_) => "query",
            GatewayError::Transport(_) => "transport",
            GatewayError::Unauthorized(_) => "unauthorized",
        };
        assert_eq!(kind, expected_kind, "case {}", label);
    }
}

#[tokio::test]
async fn test_gateway_unreachable_is_transport_error() {
    let gateway = GithubGateway::new("http://127.0.0.1:1/graphql", "t".to_string(), 100).unwrap();
    let error = gateway.fetch_page("stars:1..10", None).await.outcome.unwrap_err();
    assert!(matches!(error, GatewayError::Transport(_)));
}
