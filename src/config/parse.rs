use super::types::*;
use crate::backend::MAX_STREAMS_PER_QUERY;
use crate::config::{expand_env_vars, ENV_VAR_PATTERN};
use crate::matcher::StreamPattern;
use crate::poller::TimeWindow;
use crate::time::{parse_end, parse_instant};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in '{}': {source}", .path.display())]
    YamlParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// A validated config, with the pieces the poller needs already built.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: Config,
    pub pattern: StreamPattern,
    pub window: TimeWindow,
}

/// Read, expand and parse a config file.
///
/// The result is not validated; command-line overrides are usually applied
/// first and [`validate_config`] run on the merged value.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let yaml_string = expand_env_vars(&raw);
    check_unexpanded_vars(&yaml_string)?;

    serde_yaml::from_str(&yaml_string).map_err(|source| ConfigError::YamlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Reject references to environment variables that are not set.
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let mut missing: Vec<&str> = ENV_VAR_PATTERN
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    missing.sort_unstable();
    missing.dedup();

    Err(ConfigError::Validation(format!(
        "environment variable(s) not set: {}\n\
         export them, or replace the $env{{...}} references with literal values",
        missing.join(", ")
    )))
}

/// Validate `config` and build the stream pattern and time window.
///
/// Relative and default times are resolved against `now`. All problems are
/// collected and reported together.
pub fn validate_config(config: Config, now: DateTime<Utc>) -> Result<ResolvedConfig, ConfigError> {
    let mut errors = Vec::new();

    if config.log_group.trim().is_empty() {
        errors.push("log_group is required".to_string());
    }

    let pattern = match StreamPattern::new(&config.stream_pattern) {
        Ok(pattern) => Some(pattern),
        Err(e) => {
            errors.push(format!("stream_pattern: {}", e));
            None
        }
    };

    if config
        .filter_pattern
        .as_deref()
        .is_some_and(|f| f.trim().is_empty())
    {
        errors.push("filter_pattern must not be blank when set".to_string());
    }

    let window = validate_window(&config, now, &mut errors);
    validate_poller(&config.poller, &mut errors);

    match (pattern, window) {
        (Some(pattern), Some(window)) if errors.is_empty() => Ok(ResolvedConfig {
            config,
            pattern,
            window,
        }),
        _ => Err(ConfigError::ValidationList(errors)),
    }
}

fn validate_window(config: &Config, now: DateTime<Utc>, errors: &mut Vec<String>) -> Option<TimeWindow> {
    let start = match config.start_time.as_deref() {
        None => Some(now),
        Some(raw) => match parse_instant(raw, now) {
            Ok(start) => Some(start),
            Err(e) => {
                errors.push(format!("start_time: {}", e));
                None
            }
        },
    };

    let end = match parse_end(config.end_time.as_deref(), now) {
        Ok(end) => Some(end),
        Err(e) => {
            errors.push(format!("end_time: {}", e));
            None
        }
    };

    let (start, end) = (start?, end?);
    match TimeWindow::new(
        start.timestamp_millis(),
        end.map(|e| e.timestamp_millis()),
    ) {
        Ok(window) => Some(window),
        Err(_) => {
            errors.push(format!(
                "start_time ({}) must not be after end_time ({})",
                start.to_rfc3339(),
                end.map(|e| e.to_rfc3339()).unwrap_or_default()
            ));
            None
        }
    }
}

fn validate_poller(poller: &PollerConfig, errors: &mut Vec<String>) {
    if poller.max_streams_per_query == 0 || poller.max_streams_per_query > MAX_STREAMS_PER_QUERY {
        errors.push(format!(
            "poller.max_streams_per_query must be between 1 and {}",
            MAX_STREAMS_PER_QUERY
        ));
    }

    if poller.max_concurrent_fetches == 0 {
        errors.push("poller.max_concurrent_fetches must be at least 1".to_string());
    }

    for (name, value) in [
        ("poll_interval", poller.poll_interval),
        ("retry_delay", poller.retry_delay),
        ("refresh_interval", poller.refresh_interval),
    ] {
        if value.is_zero() {
            errors.push(format!("poller.{} must be greater than zero", name));
        }
    }
}
