use crate::config::types::{
    Config, OutputConfig, PacingConfig, PipelineConfig, SessionSettings, SourceConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_source_config(&config.source)?;
    validate_pacing_config(&config.pacing)?;
    validate_session_settings(&config.session)?;
    validate_pipeline_config(&config.pipeline)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates source connection settings
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.page_size < 1 || config.page_size > 50 {
        return Err(ConfigError::Validation(format!(
            "page_size must be between 1 and 50, got {}",
            config.page_size
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    for (name, hash) in [
        ("comments_query_hash", &config.comments_query_hash),
        ("timeline_query_hash", &config.timeline_query_hash),
    ] {
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::Validation(format!(
                "{} must be a non-empty hex string, got '{}'",
                name, hash
            )));
        }
    }

    if config.credential.is_none() && config.credential_env.trim().is_empty() {
        return Err(ConfigError::Validation(
            "credential_env cannot be empty when no credential is set".to_string(),
        ));
    }

    Ok(())
}

/// Validates pacing policy
fn validate_pacing_config(config: &PacingConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&config.jitter) {
        return Err(ConfigError::Validation(format!(
            "jitter must be between 0.0 and 1.0, got {}",
            config.jitter
        )));
    }

    if config.long_break_every_min < 1 {
        return Err(ConfigError::Validation(
            "long_break_every_min must be >= 1".to_string(),
        ));
    }

    if config.long_break_every_max <= config.long_break_every_min {
        return Err(ConfigError::Validation(format!(
            "long_break_every_max ({}) must be greater than long_break_every_min ({})",
            config.long_break_every_max, config.long_break_every_min
        )));
    }

    if config.backoff_tiers_minutes.is_empty() {
        return Err(ConfigError::Validation(
            "backoff_tiers_minutes must contain at least one tier".to_string(),
        ));
    }

    if config
        .backoff_tiers_minutes
        .windows(2)
        .any(|pair| pair[1] < pair[0])
    {
        return Err(ConfigError::Validation(format!(
            "backoff_tiers_minutes must be non-decreasing, got {:?}",
            config.backoff_tiers_minutes
        )));
    }

    if config.max_rate_limit_retries < 1 {
        return Err(ConfigError::Validation(
            "max_rate_limit_retries must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates session settings
fn validate_session_settings(config: &SessionSettings) -> Result<(), ConfigError> {
    if config.fetch_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "fetch_timeout_secs must be >= 1, got {}",
            config.fetch_timeout_secs
        )));
    }

    Ok(())
}

/// Validates pipeline limits
fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.max_urls < 1 {
        return Err(ConfigError::Validation(format!(
            "max_urls must be >= 1, got {}",
            config.max_urls
        )));
    }

    if config.max_comments < 1 {
        return Err(ConfigError::Validation(format!(
            "max_comments must be >= 1, got {}",
            config.max_comments
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.checkpoint_dir.trim().is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}
