use crate::backend::{BackendError, LogBackend, StreamCandidate};
use crate::matcher::pattern::StreamPattern;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Slack subtracted from the window start before comparing against a
/// stream's last event time. The listing's "last event time" lags behind
/// ingestion, so a stream can look older than it is.
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(3 * 60 * 60);

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Time bounds for one discovery pass, epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryWindow {
    pub start: i64,
    /// Exclusive; `None` admits streams with any recent activity.
    pub end: Option<i64>,
}

impl DiscoveryWindow {
    pub fn new(start: i64, end: Option<i64>) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    /// Listed without a last event time; cannot be time-filtered.
    Untimed,
    /// Older than the lookback cutoff. Every later candidate is older still.
    Stale,
    /// Active inside the window.
    Active,
    /// Active after the window end.
    TooNew,
}

fn classify(candidate: &StreamCandidate, cutoff: i64, end: Option<i64>) -> Verdict {
    let Some(last_event) = candidate.last_event_time else {
        return Verdict::Untimed;
    };

    if last_event < cutoff {
        Verdict::Stale
    } else if end.map_or(true, |end| last_event < end) {
        Verdict::Active
    } else {
        Verdict::TooNew
    }
}

/// Sequential reader over the stream listing of one log group.
///
/// A failed page request is logged and repeated with the same token after
/// `retry_delay`, so `next_page` only returns `None` once the listing is
/// exhausted.
pub struct StreamPages<'a> {
    backend: &'a dyn LogBackend,
    log_group: &'a str,
    next_token: Option<String>,
    exhausted: bool,
    retry_delay: Duration,
}

impl<'a> StreamPages<'a> {
    pub fn new(backend: &'a dyn LogBackend, log_group: &'a str, retry_delay: Duration) -> Self {
        Self {
            backend,
            log_group,
            next_token: None,
            exhausted: false,
            retry_delay,
        }
    }

    pub async fn next_page(&mut self) -> Option<Vec<StreamCandidate>> {
        if self.exhausted {
            return None;
        }

        loop {
            match self
                .backend
                .list_streams(self.log_group, self.next_token.clone())
                .await
            {
                Ok(page) => {
                    self.exhausted = page.next_token.is_none();
                    self.next_token = page.next_token;
                    return Some(page.streams);
                }
                Err(e) => self.report_failure(&e).await,
            }
        }
    }

    async fn report_failure(&self, error: &BackendError) {
        warn!(
            log_group = %self.log_group,
            retry_in_ms = self.retry_delay.as_millis() as u64,
            error = %error,
            "Stream listing failed, retrying"
        );
        tokio::time::sleep(self.retry_delay).await;
    }
}

/// Computes the set of streams worth querying for a time window.
pub struct StreamMatcher {
    backend: Arc<dyn LogBackend>,
    log_group: String,
    pattern: StreamPattern,
    lookback: Duration,
    retry_delay: Duration,
}

impl StreamMatcher {
    pub fn new(
        backend: Arc<dyn LogBackend>,
        log_group: impl Into<String>,
        pattern: StreamPattern,
    ) -> Self {
        Self {
            backend,
            log_group: log_group.into(),
            pattern,
            lookback: DEFAULT_LOOKBACK,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn backend(&self) -> &Arc<dyn LogBackend> {
        &self.backend
    }

    pub fn log_group(&self) -> &str {
        &self.log_group
    }

    pub fn pattern(&self) -> &StreamPattern {
        &self.pattern
    }

    /// Run one discovery pass.
    ///
    /// Returns matching stream names in listing order (most recently active
    /// first), each name at most once. Scanning stops at the first stream
    /// whose last event predates `window.start - lookback`.
    pub async fn discover_streams(&self, window: DiscoveryWindow) -> Vec<String> {
        let cutoff = window.start - self.lookback.as_millis() as i64;
        let mut pages = StreamPages::new(self.backend.as_ref(), &self.log_group, self.retry_delay);
        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        let mut scanned = 0usize;
        let mut reached_cutoff = false;

        while !reached_cutoff {
            let Some(page) = pages.next_page().await else {
                break;
            };

            for candidate in page {
                scanned += 1;
                match classify(&candidate, cutoff, window.end) {
                    Verdict::Stale => {
                        reached_cutoff = true;
                        break;
                    }
                    Verdict::Active if self.pattern.is_match(&candidate.name) => {
                        if seen.insert(candidate.name.clone()) {
                            matched.push(candidate.name);
                        }
                    }
                    Verdict::Active | Verdict::Untimed | Verdict::TooNew => {}
                }
            }
        }

        debug!(
            log_group = %self.log_group,
            scanned = scanned,
            reached_cutoff = reached_cutoff,
            "Discovery pass finished"
        );
        info!(
            log_group = %self.log_group,
            pattern = %self.pattern.as_str(),
            streams = matched.len(),
            "Discovered log streams"
        );

        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EventPage, EventQuery, InMemoryBackend, StreamPage};
    use async_trait::async_trait;

    const HOUR: i64 = 60 * 60 * 1000;
    const T0: i64 = 1_700_000_000_000;

    fn matcher(backend: Arc<dyn LogBackend>, pattern: &str) -> StreamMatcher {
        StreamMatcher::new(backend, "group", StreamPattern::new(pattern).unwrap())
            .with_retry_delay(Duration::from_millis(10))
    }

    /// Serves a fixed list of listing pages, including duplicates.
    struct FixedPages {
        pages: Vec<Vec<StreamCandidate>>,
    }

    #[async_trait]
    impl LogBackend for FixedPages {
        async fn list_streams(
            &self,
            _log_group: &str,
            next_token: Option<String>,
        ) -> Result<StreamPage, BackendError> {
            let idx: usize = next_token.map(|t| t.parse().unwrap()).unwrap_or(0);
            Ok(StreamPage {
                streams: self.pages[idx].clone(),
                next_token: (idx + 1 < self.pages.len()).then(|| (idx + 1).to_string()),
            })
        }

        async fn filter_events(
            &self,
            _query: &EventQuery,
            _next_token: Option<String>,
        ) -> Result<EventPage, BackendError> {
            Ok(EventPage::default())
        }
    }

    #[test]
    fn test_classify() {
        let cutoff = T0 - 3 * HOUR;
        let end = Some(T0 + 24 * HOUR);

        let untimed = StreamCandidate::new("s", None);
        assert_eq!(classify(&untimed, cutoff, end), Verdict::Untimed);

        let stale = StreamCandidate::new("s", Some(cutoff - 1));
        assert_eq!(classify(&stale, cutoff, end), Verdict::Stale);

        let at_cutoff = StreamCandidate::new("s", Some(cutoff));
        assert_eq!(classify(&at_cutoff, cutoff, end), Verdict::Active);

        let at_end = StreamCandidate::new("s", Some(T0 + 24 * HOUR));
        assert_eq!(classify(&at_end, cutoff, end), Verdict::TooNew);
        assert_eq!(classify(&at_end, cutoff, None), Verdict::Active);
    }

    #[tokio::test]
    async fn test_discovery_filters_by_pattern() {
        let backend = Arc::new(InMemoryBackend::new("group"));
        backend.add_stream(StreamCandidate::new("app/bar-1", Some(T0 + HOUR)));
        backend.add_stream(StreamCandidate::new("app/baz", Some(T0 + HOUR)));

        let streams = matcher(backend, "bar")
            .discover_streams(DiscoveryWindow::new(T0, Some(T0 + 24 * HOUR)))
            .await;

        assert_eq!(streams, vec!["app/bar-1".to_string()]);
    }

    #[tokio::test]
    async fn test_discovery_keeps_recency_order_and_lookback() {
        let backend = Arc::new(InMemoryBackend::new("group"));
        backend.add_stream(StreamCandidate::new("a", Some(T0 + 2 * HOUR)));
        backend.add_stream(StreamCandidate::new("b", Some(T0 - 2 * HOUR)));
        backend.add_stream(StreamCandidate::new("c", Some(T0 + HOUR)));
        backend.add_stream(StreamCandidate::new("d", Some(T0 - 4 * HOUR)));
        backend.add_stream(StreamCandidate::new("silent", None));

        let streams = matcher(backend, "*")
            .discover_streams(DiscoveryWindow::new(T0, None))
            .await;

        assert_eq!(streams, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_discovery_stops_paging_at_cutoff() {
        let backend = Arc::new(InMemoryBackend::new("group").with_page_size(2));
        backend.add_stream(StreamCandidate::new("fresh-1", Some(T0 + 3)));
        backend.add_stream(StreamCandidate::new("fresh-2", Some(T0 + 2)));
        backend.add_stream(StreamCandidate::new("stale-1", Some(T0 - 5 * HOUR)));
        backend.add_stream(StreamCandidate::new("stale-2", Some(T0 - 6 * HOUR)));
        backend.add_stream(StreamCandidate::new("stale-3", Some(T0 - 7 * HOUR)));
        backend.add_stream(StreamCandidate::new("stale-4", Some(T0 - 8 * HOUR)));

        let streams = matcher(backend.clone(), "*")
            .discover_streams(DiscoveryWindow::new(T0, None))
            .await;

        assert_eq!(streams, vec!["fresh-1", "fresh-2"]);
        // Page 2 starts with a stale stream; page 3 is never requested.
        assert_eq!(backend.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_discovery_excludes_streams_active_after_window() {
        let backend = Arc::new(InMemoryBackend::new("group"));
        backend.add_stream(StreamCandidate::new("later", Some(T0 + 48 * HOUR)));
        backend.add_stream(StreamCandidate::new("inside", Some(T0 + HOUR)));

        let streams = matcher(backend, "*")
            .discover_streams(DiscoveryWindow::new(T0, Some(T0 + 24 * HOUR)))
            .await;

        assert_eq!(streams, vec!["inside"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_retries_failed_pages() {
        let backend = Arc::new(InMemoryBackend::new("group"));
        backend.add_stream(StreamCandidate::new("app", Some(T0)));
        backend.fail_next_list(3);

        let streams = matcher(backend.clone(), "*")
            .discover_streams(DiscoveryWindow::new(T0, None))
            .await;

        assert_eq!(streams, vec!["app"]);
        assert_eq!(backend.list_calls(), 4);
    }

    #[tokio::test]
    async fn test_discovery_dedups_names_within_pass() {
        let backend = Arc::new(FixedPages {
            pages: vec![
                vec![StreamCandidate::new("app/1", Some(T0 + 2))],
                vec![
                    StreamCandidate::new("app/1", Some(T0 + 1)),
                    StreamCandidate::new("app/2", Some(T0 + 1)),
                ],
            ],
        });

        let streams = matcher(backend, "app")
            .discover_streams(DiscoveryWindow::new(T0, None))
            .await;

        assert_eq!(streams, vec!["app/1", "app/2"]);
    }
}
