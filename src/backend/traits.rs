use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Stream names accepted per event query by CloudWatch Logs.
pub const MAX_STREAMS_PER_QUERY: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("log group not found: {0}")]
    LogGroupNotFound(String),

    #[error("request throttled: {0}")]
    Throttled(String),
}

/// A log stream as reported by the stream listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCandidate {
    pub name: String,
    /// Epoch milliseconds of the newest event the backend has recorded, if any.
    pub last_event_time: Option<i64>,
}

impl StreamCandidate {
    pub fn new(name: impl Into<String>, last_event_time: Option<i64>) -> Self {
        Self {
            name: name.into(),
            last_event_time,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamPage {
    pub streams: Vec<StreamCandidate>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub stream_name: String,
    /// Epoch milliseconds assigned by the producer.
    pub timestamp: i64,
    /// Epoch milliseconds at which the backend accepted the event.
    pub ingestion_time: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl LogEvent {
    pub fn new(
        stream_name: impl Into<String>,
        timestamp: i64,
        ingestion_time: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            timestamp,
            ingestion_time,
            message: message.into(),
            event_id: None,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// Last `/`-separated segment of the stream name.
    pub fn stream_short_name(&self) -> &str {
        self.stream_name
            .rsplit('/')
            .next()
            .unwrap_or(&self.stream_name)
    }
}

/// One event query against a log group, restricted to a set of streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub log_group: String,
    pub stream_names: Vec<String>,
    /// Inclusive lower bound, epoch milliseconds.
    pub start_time: i64,
    /// Exclusive upper bound, epoch milliseconds.
    pub end_time: i64,
    pub filter_pattern: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub events: Vec<LogEvent>,
    pub next_token: Option<String>,
}

/// The paginated log service the tailer reads from.
///
/// Implementations return one page per call; callers drive pagination by
/// passing back the previous page's `next_token`.
#[async_trait]
pub trait LogBackend: Send + Sync {
    /// List streams of `log_group` ordered by last event time, newest first.
    async fn list_streams(
        &self,
        log_group: &str,
        next_token: Option<String>,
    ) -> Result<StreamPage, BackendError>;

    async fn filter_events(
        &self,
        query: &EventQuery,
        next_token: Option<String>,
    ) -> Result<EventPage, BackendError>;
}
