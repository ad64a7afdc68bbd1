use crate::range::{parse_plan, RangeParseError, SearchRange};
use serde::Deserialize;

/// Main configuration structure for star-sweep
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub github: GithubConfig,
    pub output: OutputConfig,
    pub plan: PlanConfig,
}

impl Config {
    /// The plan as typed ranges, in crawl order
    pub fn plan_ranges(&self) -> Result<Vec<SearchRange>, RangeParseError> {
        parse_plan(&self.plan.ranges)
    }
}

/// Crawl engine behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Stop once this many repositories have been persisted
    pub target_count: u64,

    /// Most results the search API serves for one predicate
    #[serde(default = "default_result_cap")]
    pub result_cap: u64,

    /// Items requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Pause once the remaining call budget drops to this value
    #[serde(default = "default_safety_floor")]
    pub safety_floor: u32,

    /// Extra wait added after the budget reset time (seconds)
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,

    /// Delay between calls when the budget is unknown (milliseconds)
    #[serde(default = "default_fallback_delay_ms")]
    pub fallback_delay_ms: u64,

    /// Delay after every persisted page (milliseconds)
    #[serde(default)]
    pub page_delay_ms: u64,

    /// Retries for a failing fetch or write before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry backoff, doubled per attempt (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Search API connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GithubConfig {
    /// GraphQL endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Name of the environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token_env: default_token_env(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,

    /// Path to the JSON crawl checkpoint
    pub checkpoint_path: String,
}

/// Static range plan, crawled in order
#[derive(Debug, Clone, Deserialize)]
pub struct PlanConfig {
    /// Star ranges such as `"100000..*"` or `"100..999"`
    pub ranges: Vec<String>,
}

fn default_result_cap() -> u64 {
    crate::range::DEFAULT_RESULT_CAP
}

fn default_page_size() -> u32 {
    100
}

fn default_safety_floor() -> u32 {
    10
}

fn default_safety_margin_secs() -> u64 {
    10
}

fn default_fallback_delay_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_endpoint() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
