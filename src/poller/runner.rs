use crate::backend::{LogBackend, LogEvent, MAX_STREAMS_PER_QUERY};
use crate::clock::{Clock, SystemClock};
use crate::config::types::Config;
use crate::matcher::{DiscoveryWindow, StreamMatcher};
use crate::poller::batch::prepare_batch;
use crate::poller::fetch::{fetch_cycle, FetchError, FetchLimits};
use crate::poller::restart::RestartSignal;
use crate::poller::window::{TimeWindow, Watermark};
use crate::sink::{EventSink, SinkError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("giving up after {attempts} failed fetch attempts: {source}")]
    FetchRetriesExhausted {
        attempts: u32,
        #[source]
        source: FetchError,
    },
}

/// Pacing and limits for the poll loop.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Wait after a cycle that produced no events.
    pub poll_interval: Duration,
    /// Wait before re-entering a failed fetch.
    pub retry_delay: Duration,
    /// Rediscover streams this often; `None` disables periodic refresh.
    pub refresh_interval: Option<Duration>,
    /// How far behind "now" a fetch window ends.
    pub liveness_margin: Duration,
    pub max_streams_per_query: usize,
    pub max_concurrent_fetches: usize,
    /// Consecutive fetch failures tolerated; `None` retries forever.
    pub max_fetch_retries: Option<u32>,
    /// Server-side filter expression applied to every query.
    pub filter_pattern: Option<String>,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            retry_delay: Duration::from_secs(5),
            refresh_interval: None,
            liveness_margin: Duration::from_secs(60),
            max_streams_per_query: MAX_STREAMS_PER_QUERY,
            max_concurrent_fetches: 4,
            max_fetch_retries: None,
            filter_pattern: None,
        }
    }
}

impl From<&Config> for PollerSettings {
    fn from(config: &Config) -> Self {
        let poller = &config.poller;
        Self {
            poll_interval: poller.poll_interval,
            retry_delay: poller.retry_delay,
            refresh_interval: config.refresh_streams.then_some(poller.refresh_interval),
            liveness_margin: poller.liveness_margin,
            max_streams_per_query: poller.max_streams_per_query,
            max_concurrent_fetches: poller.max_concurrent_fetches,
            max_fetch_retries: poller.max_fetch_retries,
            filter_pattern: config.filter_pattern.clone(),
        }
    }
}

impl PollerSettings {
    fn fetch_limits(&self) -> FetchLimits {
        FetchLimits {
            max_streams_per_query: self.max_streams_per_query,
            max_concurrent_fetches: self.max_concurrent_fetches,
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every event up to the window's end has been emitted.
    RangeExhausted,
    /// Historical window with no matching streams.
    NoStreams,
    /// The shutdown token fired.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub termination: Termination,
    pub cycles: u64,
    pub discoveries: u64,
    pub events_emitted: u64,
    pub next_start: i64,
}

#[derive(Debug)]
enum PollState {
    Discovering,
    Fetching,
    Advancing(Vec<LogEvent>),
    Sleeping,
    Terminated(Termination),
}

#[derive(Debug, Default)]
struct PollStats {
    cycles: u64,
    discoveries: u64,
    events_emitted: u64,
    consecutive_failures: u32,
}

impl PollStats {
    /// A failed cycle is being retried; its window must not move.
    fn retrying(&self) -> bool {
        self.consecutive_failures > 0
    }
}

/// Drives discovery and event fetching for one log group.
///
/// Owns the stream set and the watermark. Historical (closed) windows run
/// until the window is drained; live (open) windows run until cancelled.
pub struct EventPoller {
    matcher: StreamMatcher,
    backend: Arc<dyn LogBackend>,
    clock: Arc<dyn Clock>,
    settings: PollerSettings,
    window: TimeWindow,
    watermark: Watermark,
    streams: Vec<String>,
    restart: RestartSignal,
    last_discovery: Option<Instant>,
    stats: PollStats,
}

impl EventPoller {
    pub fn new(matcher: StreamMatcher, window: TimeWindow, settings: PollerSettings) -> Self {
        let backend = Arc::clone(matcher.backend());
        Self {
            matcher,
            backend,
            clock: Arc::new(SystemClock),
            settings,
            window,
            watermark: Watermark::new(window.start()),
            streams: Vec::new(),
            restart: RestartSignal::new(),
            last_discovery: None,
            stats: PollStats::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_restart_signal(mut self, restart: RestartSignal) -> Self {
        self.restart = restart;
        self
    }

    pub fn restart_signal(&self) -> RestartSignal {
        self.restart.clone()
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn streams(&self) -> &[String] {
        &self.streams
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Run the state machine until it terminates or `shutdown` fires.
    pub async fn run(
        &mut self,
        sink: &mut dyn EventSink,
        shutdown: CancellationToken,
    ) -> Result<PollSummary, PollerError> {
        info!(
            log_group = %self.matcher.log_group(),
            pattern = %self.matcher.pattern().as_str(),
            start = self.window.start(),
            end = ?self.window.end(),
            "Starting poller"
        );

        let mut state = PollState::Discovering;
        loop {
            if shutdown.is_cancelled() && !matches!(state, PollState::Terminated(_)) {
                state = PollState::Terminated(Termination::Cancelled);
            }

            state = match state {
                PollState::Discovering => self.discover(&shutdown).await,
                PollState::Fetching => self.fetch(&shutdown).await?,
                PollState::Advancing(events) => self.advance(events, sink).await?,
                PollState::Sleeping => self.sleep(&shutdown).await,
                PollState::Terminated(termination) => {
                    let summary = self.summary(termination);
                    info!(
                        termination = ?summary.termination,
                        cycles = summary.cycles,
                        events = summary.events_emitted,
                        "Poller stopped"
                    );
                    return Ok(summary);
                }
            };
        }
    }

    async fn discover(&mut self, shutdown: &CancellationToken) -> PollState {
        let window = DiscoveryWindow::new(self.watermark.next_start(), self.window.end());
        let Some(streams) = until_cancelled(shutdown, self.matcher.discover_streams(window)).await
        else {
            return PollState::Terminated(Termination::Cancelled);
        };

        self.streams = streams;
        self.last_discovery = Some(Instant::now());
        self.stats.discoveries += 1;

        if !self.streams.is_empty() {
            return PollState::Fetching;
        }

        if self.window.is_live() {
            warn!(
                log_group = %self.matcher.log_group(),
                "No log streams matched, waiting for new streams"
            );
            PollState::Sleeping
        } else {
            warn!(
                log_group = %self.matcher.log_group(),
                "No log streams matched the requested range"
            );
            PollState::Terminated(Termination::NoStreams)
        }
    }

    async fn fetch(&mut self, shutdown: &CancellationToken) -> Result<PollState, PollerError> {
        if !self.stats.retrying() {
            let end = self
                .window
                .effective_end(self.clock.now_millis(), self.settings.liveness_margin);
            self.watermark.extend_to(end);
        }

        if !self.watermark.has_range() {
            return Ok(PollState::Advancing(Vec::new()));
        }

        let fetched = until_cancelled(
            shutdown,
            fetch_cycle(
                &self.backend,
                self.matcher.log_group(),
                &self.streams,
                self.watermark.next_start(),
                self.watermark.current_end(),
                self.settings.filter_pattern.as_deref(),
                self.settings.fetch_limits(),
            ),
        )
        .await;

        match fetched {
            None => Ok(PollState::Terminated(Termination::Cancelled)),
            Some(Ok(events)) => {
                self.stats.consecutive_failures = 0;
                debug!(
                    start = self.watermark.next_start(),
                    end = self.watermark.current_end(),
                    streams = self.streams.len(),
                    events = events.len(),
                    "Fetch cycle complete"
                );
                Ok(PollState::Advancing(events))
            }
            Some(Err(e)) => {
                self.stats.consecutive_failures += 1;
                let attempts = self.stats.consecutive_failures;

                if self
                    .settings
                    .max_fetch_retries
                    .is_some_and(|max| attempts > max)
                {
                    error!(attempts = attempts, error = %e, "Fetch failed, retries exhausted");
                    return Err(PollerError::FetchRetriesExhausted {
                        attempts,
                        source: e,
                    });
                }

                warn!(
                    attempt = attempts,
                    retry_in_ms = self.settings.retry_delay.as_millis() as u64,
                    next_start = self.watermark.next_start(),
                    current_end = self.watermark.current_end(),
                    error = %e,
                    "Fetch cycle failed, retrying"
                );

                if until_cancelled(shutdown, tokio::time::sleep(self.settings.retry_delay))
                    .await
                    .is_none()
                {
                    return Ok(PollState::Terminated(Termination::Cancelled));
                }

                // The stream set may be what keeps failing.
                if self.discovery_due() {
                    Ok(PollState::Discovering)
                } else {
                    Ok(PollState::Fetching)
                }
            }
        }
    }

    async fn advance(
        &mut self,
        events: Vec<LogEvent>,
        sink: &mut dyn EventSink,
    ) -> Result<PollState, PollerError> {
        let batch = prepare_batch(events, &self.watermark);
        let max_timestamp = batch.last().map(|e| e.timestamp);

        for event in &batch {
            sink.emit(event).await?;
        }
        sink.flush().await?;

        self.watermark.advance(max_timestamp);
        self.stats.cycles += 1;
        self.stats.events_emitted += batch.len() as u64;

        if let Some(end) = self.window.end() {
            if self.watermark.current_end() >= end {
                return Ok(PollState::Terminated(Termination::RangeExhausted));
            }
        }

        if self.discovery_due() {
            Ok(PollState::Discovering)
        } else if batch.is_empty() {
            Ok(PollState::Sleeping)
        } else {
            Ok(PollState::Fetching)
        }
    }

    async fn sleep(&mut self, shutdown: &CancellationToken) -> PollState {
        if until_cancelled(shutdown, tokio::time::sleep(self.settings.poll_interval))
            .await
            .is_none()
        {
            return PollState::Terminated(Termination::Cancelled);
        }

        if self.discovery_due() {
            PollState::Discovering
        } else {
            PollState::Fetching
        }
    }

    /// Whether the next cycle should rediscover streams first.
    fn discovery_due(&mut self) -> bool {
        if self.restart.take() {
            info!("Restart requested, rediscovering streams");
            self.last_discovery = None;
        }

        match (self.last_discovery, self.settings.refresh_interval) {
            (None, _) => true,
            (Some(last), Some(interval)) => last.elapsed() >= interval,
            (Some(_), None) => false,
        }
    }

    fn summary(&self, termination: Termination) -> PollSummary {
        PollSummary {
            termination,
            cycles: self.stats.cycles,
            discoveries: self.stats.discoveries,
            events_emitted: self.stats.events_emitted,
            next_start: self.watermark.next_start(),
        }
    }
}

async fn until_cancelled<F: Future>(shutdown: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        output = future => Some(output),
        _ = shutdown.cancelled() => None,
    }
}
