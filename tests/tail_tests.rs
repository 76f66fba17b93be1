/// End-to-end tests for the poller against the in-memory backend.
///
/// These tests drive complete runs including:
/// - Historical ranges across many streams
/// - Overlapping backend results at cycle boundaries
/// - Live tailing with late ingestion
/// - Rediscovery via periodic refresh and restart requests
use async_trait::async_trait;
use cwtail::backend::{InMemoryBackend, LogEvent, StreamCandidate};
use cwtail::clock::Clock;
use cwtail::matcher::{StreamMatcher, StreamPattern};
use cwtail::poller::{EventPoller, PollerSettings, Termination, TimeWindow};
use cwtail::sink::{EventSink, SinkError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;
    const MINUTE: i64 = 60_000;

    /// Wall clock that follows tokio's (paused) time.
    struct PausedClock {
        base: i64,
        origin: Instant,
    }

    impl PausedClock {
        fn starting_at(base: i64) -> Arc<Self> {
            Arc::new(Self {
                base,
                origin: Instant::now(),
            })
        }
    }

    impl Clock for PausedClock {
        fn now_millis(&self) -> i64 {
            self.base + self.origin.elapsed().as_millis() as i64
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        events: Vec<LogEvent>,
    }

    #[async_trait]
    impl EventSink for CollectingSink {
        async fn emit(&mut self, event: &LogEvent) -> Result<(), SinkError> {
            self.events.push(event.clone());
            Ok(())
        }
    }

    impl CollectingSink {
        fn messages(&self) -> Vec<&str> {
            self.events.iter().map(|e| e.message.as_str()).collect()
        }
    }

    fn settings() -> PollerSettings {
        PollerSettings {
            retry_delay: Duration::from_millis(100),
            ..PollerSettings::default()
        }
    }

    fn build_poller(
        backend: &Arc<InMemoryBackend>,
        pattern: &str,
        window: TimeWindow,
        settings: PollerSettings,
        clock: Arc<dyn Clock>,
    ) -> EventPoller {
        let matcher = StreamMatcher::new(
            backend.clone(),
            "group",
            StreamPattern::new(pattern).unwrap(),
        )
        .with_retry_delay(Duration::from_millis(100));
        EventPoller::new(matcher, window, settings).with_clock(clock)
    }

    fn cancel_after(shutdown: &CancellationToken, after: Duration) {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            shutdown.cancel();
        });
    }

    fn assert_non_decreasing(events: &[LogEvent]) {
        for pair in events.windows(2) {
            assert!(
                pair[0].timestamp <= pair[1].timestamp,
                "{} emitted before {}",
                pair[0].timestamp,
                pair[1].timestamp
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_historical_range_across_many_streams() {
        // Far enough in the future that the whole range is settled.
        let clock = PausedClock::starting_at(T0 + 60 * MINUTE);
        let backend = Arc::new(InMemoryBackend::new("group").with_page_size(25));

        for i in 0..150i64 {
            let name = format!("app/worker-{:03}", i);
            backend.add_stream(StreamCandidate::new(&name, Some(T0 + 5 * MINUTE)));
            // Reverse order so the emission order differs from stream order.
            let ts = T0 + (150 - i) * 1000;
            backend.add_event(LogEvent::new(&name, ts, ts + 5, format!("event-{}", i)));
        }

        let window = TimeWindow::new(T0, Some(T0 + 10 * MINUTE)).unwrap();
        let mut poller = build_poller(&backend, "worker", window, settings(), clock);
        let mut sink = CollectingSink::default();

        let summary = poller.run(&mut sink, CancellationToken::new()).await.unwrap();

        assert_eq!(summary.termination, Termination::RangeExhausted);
        assert_eq!(sink.events.len(), 150);
        assert_non_decreasing(&sink.events);
        assert_eq!(sink.events[0].message, "event-149");
        assert_eq!(summary.next_start, T0 + 150 * 1000 + 1);

        let queries = backend.queries();
        assert!(queries.iter().all(|q| q.stream_names.len() <= 100));
        assert!(queries
            .iter()
            .all(|q| q.start_time >= T0 && q.end_time <= T0 + 10 * MINUTE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_overlap_is_emitted_once() {
        // The first fetch is clamped to T0 + 5s by the liveness margin, the
        // second reaches the range end once five seconds have passed.
        let clock = PausedClock::starting_at(T0 + 5_000 + MINUTE);
        let backend = Arc::new(InMemoryBackend::new("group"));
        backend.set_boundary_slack(5_000);
        backend.add_stream(StreamCandidate::new("app", Some(T0 + 9_000)));
        backend.add_events(vec![
            LogEvent::new("app", T0 + 1_000, T0 + 1_000, "first"),
            LogEvent::new("app", T0 + 5_000, T0 + 5_000, "on-boundary"),
            LogEvent::new("app", T0 + 7_000, T0 + 7_000, "last"),
        ]);

        let window = TimeWindow::new(T0, Some(T0 + 10_000)).unwrap();
        let mut poller = build_poller(&backend, "*", window, settings(), clock);
        let mut sink = CollectingSink::default();

        let summary = poller.run(&mut sink, CancellationToken::new()).await.unwrap();

        assert_eq!(summary.termination, Termination::RangeExhausted);
        assert_eq!(sink.messages(), vec!["first", "on-boundary", "last"]);
        assert!(backend.queries().len() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_matching_streams_are_tailed() {
        let clock = PausedClock::starting_at(T0 + 60 * MINUTE);
        let backend = Arc::new(InMemoryBackend::new("group"));
        backend.add_stream(StreamCandidate::new("app/bar-1", Some(T0 + MINUTE)));
        backend.add_stream(StreamCandidate::new("app/baz", Some(T0 + MINUTE)));
        backend.add_events(vec![
            LogEvent::new("app/bar-1", T0 + 10, T0 + 10, "from bar"),
            LogEvent::new("app/baz", T0 + 20, T0 + 20, "from baz"),
        ]);

        let window = TimeWindow::new(T0, Some(T0 + 2 * MINUTE)).unwrap();
        let mut poller = build_poller(&backend, "bar", window, settings(), clock);
        let mut sink = CollectingSink::default();

        poller.run(&mut sink, CancellationToken::new()).await.unwrap();

        assert_eq!(poller.streams(), ["app/bar-1".to_string()]);
        assert_eq!(sink.messages(), vec!["from bar"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_tail_follows_ingestion_until_cancelled() {
        // Fetch windows start empty: the settled end equals the window start.
        let clock = PausedClock::starting_at(T0 + MINUTE);
        let backend = Arc::new(InMemoryBackend::new("group").with_clock(clock.clone()));
        backend.add_stream(StreamCandidate::new("app/web", Some(T0)));
        backend.add_events(vec![
            LogEvent::new("app/web", T0 + 1_000, T0 + 2_000, "one"),
            LogEvent::new("app/web", T0 + 8_000, T0 + 9_000, "two"),
            LogEvent::new("app/web", T0 + 21_000, T0 + 21_500, "three"),
        ]);

        let mut poller = build_poller(&backend, "web", TimeWindow::live(T0), settings(), clock.clone());
        let mut sink = CollectingSink::default();
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_secs(60));

        let summary = poller.run(&mut sink, shutdown).await.unwrap();

        assert_eq!(summary.termination, Termination::Cancelled);
        assert_eq!(sink.messages(), vec!["one", "two", "three"]);
        assert_non_decreasing(&sink.events);
        assert_eq!(summary.next_start, T0 + 21_001);
        assert_eq!(summary.discoveries, 1);

        // Every fetch stays a full margin behind the clock.
        let final_now = clock.now_millis();
        let queries = backend.queries();
        assert!(!queries.is_empty());
        assert!(queries.iter().all(|q| q.end_time <= final_now - MINUTE));
        for pair in queries.windows(2) {
            assert!(pair[0].start_time <= pair[1].start_time);
            assert!(pair[0].end_time <= pair[1].end_time);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_tail_waits_for_streams_to_appear() {
        let clock = PausedClock::starting_at(T0 + MINUTE);
        let backend = Arc::new(InMemoryBackend::new("group"));
        let mut poller_settings = settings();
        poller_settings.refresh_interval = Some(Duration::from_secs(20));

        let mut poller = build_poller(&backend, "*", TimeWindow::live(T0), poller_settings, clock);
        let mut sink = CollectingSink::default();
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_secs(30));

        let summary = poller.run(&mut sink, shutdown).await.unwrap();

        assert_eq!(summary.termination, Termination::Cancelled);
        assert!(sink.events.is_empty());
        assert!(summary.discoveries >= 2);
        assert_eq!(backend.filter_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_refresh_picks_up_new_streams() {
        let clock = PausedClock::starting_at(T0 + MINUTE);
        let backend = Arc::new(InMemoryBackend::new("group"));
        backend.add_stream(StreamCandidate::new("app/old", Some(T0)));

        let mut poller_settings = settings();
        poller_settings.refresh_interval = Some(Duration::from_secs(30));
        let mut poller = build_poller(&backend, "app", TimeWindow::live(T0), poller_settings, clock);

        let late = backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            late.add_stream(StreamCandidate::new("app/new", Some(T0 + 10_000)));
            late.add_event(LogEvent::new("app/new", T0 + 10_000, T0 + 10_000, "hello"));
        });

        let mut sink = CollectingSink::default();
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_secs(90));

        let summary = poller.run(&mut sink, shutdown).await.unwrap();

        assert_eq!(sink.messages(), vec!["hello"]);
        assert!(summary.discoveries >= 2);
        assert!(poller.streams().contains(&"app/new".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_refresh_new_streams_are_ignored() {
        let clock = PausedClock::starting_at(T0 + MINUTE);
        let backend = Arc::new(InMemoryBackend::new("group"));
        backend.add_stream(StreamCandidate::new("app/old", Some(T0)));
        let mut poller = build_poller(&backend, "app", TimeWindow::live(T0), settings(), clock);

        let late = backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            late.add_stream(StreamCandidate::new("app/new", Some(T0 + 10_000)));
            late.add_event(LogEvent::new("app/new", T0 + 10_000, T0 + 10_000, "hello"));
        });

        let mut sink = CollectingSink::default();
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_secs(90));

        let summary = poller.run(&mut sink, shutdown).await.unwrap();

        assert!(sink.events.is_empty());
        assert_eq!(summary.discoveries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_rediscovers_without_moving_watermark() {
        let clock = PausedClock::starting_at(T0 + MINUTE);
        let backend = Arc::new(InMemoryBackend::new("group"));
        backend.add_stream(StreamCandidate::new("app/old", Some(T0)));
        backend.add_event(LogEvent::new("app/old", T0 + 1_000, T0 + 1_000, "old"));

        let mut poller = build_poller(&backend, "app", TimeWindow::live(T0), settings(), clock);
        let restart = poller.restart_signal();

        let late = backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            late.add_stream(StreamCandidate::new("app/new", Some(T0 + 3_000)));
            late.add_event(LogEvent::new("app/new", T0 + 3_000, T0 + 3_000, "new"));
            tokio::time::sleep(Duration::from_secs(10)).await;
            restart.request();
        });

        let mut sink = CollectingSink::default();
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_secs(60));

        let summary = poller.run(&mut sink, shutdown).await.unwrap();

        // "new" predates the restart but is still after the watermark.
        assert_eq!(sink.messages(), vec!["old", "new"]);
        assert_eq!(summary.discoveries, 2);
        assert_eq!(summary.next_start, T0 + 3_001);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fetch_failures_lose_nothing() {
        let clock = PausedClock::starting_at(T0 + 60 * MINUTE);
        let backend = Arc::new(InMemoryBackend::new("group"));
        backend.add_stream(StreamCandidate::new("app", Some(T0 + MINUTE)));
        backend.add_events((0..5).map(|i| {
            LogEvent::new("app", T0 + i * 100, T0 + i * 100, format!("e{}", i))
        }));
        backend.fail_next_list(2);
        backend.fail_next_filter(3);

        let window = TimeWindow::new(T0, Some(T0 + 2 * MINUTE)).unwrap();
        let mut poller = build_poller(&backend, "*", window, settings(), clock);
        let mut sink = CollectingSink::default();

        let summary = poller.run(&mut sink, CancellationToken::new()).await.unwrap();

        assert_eq!(summary.termination, Termination::RangeExhausted);
        assert_eq!(sink.messages(), vec!["e0", "e1", "e2", "e3", "e4"]);
        assert_eq!(backend.list_calls(), 3);
    }

    fn slow_retry_settings() -> PollerSettings {
        PollerSettings {
            retry_delay: Duration::from_secs(5),
            ..PollerSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_honoured_while_fetches_fail() {
        let clock = PausedClock::starting_at(T0 + MINUTE);
        let backend = Arc::new(InMemoryBackend::new("group"));
        backend.add_stream(StreamCandidate::new("app/old", Some(T0)));
        backend.add_event(LogEvent::new("app/old", T0 + 1_000, T0 + 1_000, "old"));
        backend.fail_next_filter(4);

        let mut poller = build_poller(
            &backend,
            "app",
            TimeWindow::live(T0),
            slow_retry_settings(),
            clock,
        );
        let restart = poller.restart_signal();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            restart.request();
        });

        let mut sink = CollectingSink::default();
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_secs(40));

        let summary = poller.run(&mut sink, shutdown).await.unwrap();

        assert_eq!(summary.discoveries, 2);
        assert_eq!(sink.messages(), vec!["old"]);

        // Four failures and the first success all cover the same window.
        let queries = backend.queries();
        assert!(queries.len() >= 5);
        assert!(queries[..5]
            .iter()
            .all(|q| q.start_time == T0 && q.end_time == T0 + 5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_interval_honoured_while_fetches_fail() {
        let clock = PausedClock::starting_at(T0 + MINUTE);
        let backend = Arc::new(InMemoryBackend::new("group"));
        backend.add_stream(StreamCandidate::new("app/old", Some(T0)));
        backend.fail_next_filter(1_000);

        let mut poller_settings = slow_retry_settings();
        poller_settings.refresh_interval = Some(Duration::from_secs(20));
        let mut poller = build_poller(&backend, "app", TimeWindow::live(T0), poller_settings, clock);

        let mut sink = CollectingSink::default();
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_secs(60));

        let summary = poller.run(&mut sink, shutdown).await.unwrap();

        assert!(summary.discoveries >= 2);
        assert!(sink.events.is_empty());
        assert_eq!(summary.next_start, T0);

        let queries = backend.queries();
        assert!(!queries.is_empty());
        assert!(queries.iter().all(|q| q.end_time == T0 + 5_000));
    }
}
