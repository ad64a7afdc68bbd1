use crate::config::types::{Config, CrawlerConfig, GithubConfig, OutputConfig, PlanConfig};
use crate::range::{find_overlap, parse_plan};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_github_config(&config.github)?;
    validate_output_config(&config.output)?;
    validate_plan(&config.plan)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.target_count < 1 {
        return Err(ConfigError::Validation(
            "target_count must be >= 1".to_string(),
        ));
    }

    if config.page_size < 1 || config.page_size > 100 {
        return Err(ConfigError::Validation(format!(
            "page_size must be between 1 and 100, got {}",
            config.page_size
        )));
    }

    if config.result_cap < u64::from(config.page_size) {
        return Err(ConfigError::Validation(format!(
            "result_cap ({}) must be >= page_size ({})",
            config.result_cap, config.page_size
        )));
    }

    if config.safety_floor > 5000 {
        return Err(ConfigError::Validation(format!(
            "safety_floor must be <= 5000, got {}",
            config.safety_floor
        )));
    }

    if config.max_retries < 1 || config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be between 1 and 10, got {}",
            config.max_retries
        )));
    }

    Ok(())
}

/// Validates the search API settings
fn validate_github_config(config: &GithubConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "Endpoint '{}' must use HTTP or HTTPS",
            config.endpoint
        )));
    }

    if config.token_env.trim().is_empty() {
        return Err(ConfigError::Validation(
            "token_env cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.checkpoint_path.is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the range plan: non-empty, parseable, pairwise disjoint
fn validate_plan(config: &PlanConfig) -> Result<(), ConfigError> {
    if config.ranges.is_empty() {
        return Err(ConfigError::Validation(
            "plan must list at least one range".to_string(),
        ));
    }

    let plan = parse_plan(&config.ranges)?;

    if let Some((a, b)) = find_overlap(&plan) {
        return Err(ConfigError::Validation(format!(
            "plan ranges {} and {} overlap; star bounds are inclusive",
            a, b
        )));
    }

    Ok(())
}
