//! In-process [`LogBackend`] holding streams and events in memory.
//!
//! Behaves like the real service where the tailer cares: listings come back
//! newest first in fixed-size pages, event queries paginate, and events only
//! become visible once the clock passes their ingestion time. Transient
//! failures and boundary overlap can be injected to exercise recovery paths.

use super::traits::{
    BackendError, EventPage, EventQuery, LogBackend, LogEvent, StreamCandidate, StreamPage,
};
use crate::clock::Clock;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Default)]
struct MemoryState {
    streams: Vec<StreamCandidate>,
    events: Vec<LogEvent>,
    list_failures: usize,
    filter_failures: usize,
    boundary_slack: i64,
    queries: Vec<EventQuery>,
}

pub struct InMemoryBackend {
    log_group: String,
    page_size: usize,
    clock: Option<Arc<dyn Clock>>,
    state: Mutex<MemoryState>,
    list_calls: AtomicUsize,
    filter_calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new(log_group: impl Into<String>) -> Self {
        Self {
            log_group: log_group.into(),
            page_size: DEFAULT_PAGE_SIZE,
            clock: None,
            state: Mutex::new(MemoryState::default()),
            list_calls: AtomicUsize::new(0),
            filter_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Hide events whose ingestion time is later than the clock's "now".
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn add_stream(&self, stream: StreamCandidate) {
        let mut state = self.lock();
        state.streams.retain(|s| s.name != stream.name);
        state.streams.push(stream);
    }

    pub fn add_event(&self, event: LogEvent) {
        self.lock().events.push(event);
    }

    pub fn add_events(&self, events: impl IntoIterator<Item = LogEvent>) {
        self.lock().events.extend(events);
    }

    /// Fail the next `count` stream listing calls.
    pub fn fail_next_list(&self, count: usize) {
        self.lock().list_failures = count;
    }

    /// Fail the next `count` event queries.
    pub fn fail_next_filter(&self, count: usize) {
        self.lock().filter_failures = count;
    }

    /// Also return events up to `slack_ms` before a query's start time.
    pub fn set_boundary_slack(&self, slack_ms: i64) {
        self.lock().boundary_slack = slack_ms.max(0);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn filter_calls(&self) -> usize {
        self.filter_calls.load(Ordering::SeqCst)
    }

    /// Every event query received so far, in arrival order.
    pub fn queries(&self) -> Vec<EventQuery> {
        self.lock().queries.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn now(&self) -> Option<i64> {
        self.clock.as_ref().map(|c| c.now_millis())
    }
}

fn parse_token(token: Option<String>) -> Result<usize, BackendError> {
    match token {
        None => Ok(0),
        Some(t) => t.parse().map_err(|_| BackendError::Request {
            operation: "pagination",
            message: format!("invalid next token '{}'", t),
        }),
    }
}

fn page_token(offset: usize, page_len: usize, total: usize) -> Option<String> {
    let next = offset + page_len;
    (next < total).then(|| next.to_string())
}

#[async_trait]
impl LogBackend for InMemoryBackend {
    async fn list_streams(
        &self,
        log_group: &str,
        next_token_in: Option<String>,
    ) -> Result<StreamPage, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if log_group != self.log_group {
            return Err(BackendError::LogGroupNotFound(log_group.to_string()));
        }

        let mut state = self.lock();
        if state.list_failures > 0 {
            state.list_failures -= 1;
            return Err(BackendError::Request {
                operation: "DescribeLogStreams",
                message: "injected failure".to_string(),
            });
        }

        let mut streams = state.streams.clone();
        // Newest first; streams without events sort last.
        streams.sort_by(|a, b| b.last_event_time.cmp(&a.last_event_time));

        let offset = parse_token(next_token_in)?;
        let page: Vec<StreamCandidate> = streams
            .iter()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect();
        let next_token = page_token(offset, page.len(), streams.len());

        Ok(StreamPage {
            streams: page,
            next_token,
        })
    }

    async fn filter_events(
        &self,
        query: &EventQuery,
        next_token_in: Option<String>,
    ) -> Result<EventPage, BackendError> {
        self.filter_calls.fetch_add(1, Ordering::SeqCst);

        if query.log_group != self.log_group {
            return Err(BackendError::LogGroupNotFound(query.log_group.clone()));
        }

        let now = self.now();
        let mut state = self.lock();
        state.queries.push(query.clone());

        if state.filter_failures > 0 {
            state.filter_failures -= 1;
            return Err(BackendError::Request {
                operation: "FilterLogEvents",
                message: "injected failure".to_string(),
            });
        }

        let lower = query.start_time - state.boundary_slack;
        let mut matching: Vec<LogEvent> = state
            .events
            .iter()
            .filter(|e| query.stream_names.iter().any(|s| s == &e.stream_name))
            .filter(|e| e.timestamp >= lower && e.timestamp < query.end_time)
            .filter(|e| now.map_or(true, |now| e.ingestion_time <= now))
            .filter(|e| {
                query
                    .filter_pattern
                    .as_deref()
                    .map_or(true, |p| e.message.contains(p))
            })
            .cloned()
            .collect();
        matching.sort_by_key(|e| (e.timestamp, e.ingestion_time));

        let offset = parse_token(next_token_in)?;
        let page: Vec<LogEvent> = matching
            .iter()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect();
        let next_token = page_token(offset, page.len(), matching.len());

        Ok(EventPage {
            events: page,
            next_token,
        })
    }
}
