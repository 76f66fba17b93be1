use crate::backend::MAX_STREAMS_PER_QUERY;
use crate::sink::LineFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log_group: String,
    #[serde(default = "default_stream_pattern")]
    pub stream_pattern: String,
    #[serde(default)]
    pub filter_pattern: Option<String>,
    /// Defaults to now when absent.
    #[serde(default)]
    pub start_time: Option<String>,
    /// Absent or `open` tails indefinitely.
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub refresh_streams: bool,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_stream_pattern() -> String {
    "*".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_group: String::new(),
            stream_pattern: default_stream_pattern(),
            filter_pattern: None,
            start_time: None,
            end_time: None,
            refresh_streams: false,
            aws: AwsConfig::default(),
            poller: PollerConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub profile: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            profile: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,
    #[serde(with = "humantime_serde", default = "default_refresh_interval")]
    pub refresh_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_liveness_margin")]
    pub liveness_margin: Duration,
    #[serde(with = "humantime_serde", default = "default_discovery_lookback")]
    pub discovery_lookback: Duration,
    #[serde(default = "default_max_streams_per_query")]
    pub max_streams_per_query: usize,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default)]
    pub max_fetch_retries: Option<u32>,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_liveness_margin() -> Duration {
    Duration::from_secs(60)
}

fn default_discovery_lookback() -> Duration {
    Duration::from_secs(3 * 60 * 60)
}

fn default_max_streams_per_query() -> usize {
    MAX_STREAMS_PER_QUERY
}

fn default_max_concurrent_fetches() -> usize {
    4
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            retry_delay: default_retry_delay(),
            refresh_interval: default_refresh_interval(),
            liveness_margin: default_liveness_margin(),
            discovery_lookback: default_discovery_lookback(),
            max_streams_per_query: default_max_streams_per_query(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            max_fetch_retries: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Short lines when tailing, full lines for a historical range.
    #[default]
    Auto,
    Short,
    Full,
    Json,
}

impl OutputFormat {
    pub fn line_format(self, live: bool) -> LineFormat {
        match self {
            OutputFormat::Auto if live => LineFormat::Short,
            OutputFormat::Auto => LineFormat::Full,
            OutputFormat::Short => LineFormat::Short,
            OutputFormat::Full => LineFormat::Full,
            OutputFormat::Json => LineFormat::Json,
        }
    }
}
