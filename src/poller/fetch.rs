use crate::backend::{BackendError, EventQuery, LogBackend, LogEvent, MAX_STREAMS_PER_QUERY};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("chunk {chunk} failed: {source}")]
    Backend {
        chunk: usize,
        #[source]
        source: BackendError,
    },

    #[error("fetch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    /// Stream names per query.
    pub max_streams_per_query: usize,
    /// Chunk tasks allowed to talk to the backend at once.
    pub max_concurrent_fetches: usize,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_streams_per_query: MAX_STREAMS_PER_QUERY,
            max_concurrent_fetches: 4,
        }
    }
}

/// Messages sent from chunk tasks back to the cycle.
#[derive(Debug)]
enum ChunkMessage {
    Page { chunk: usize, events: Vec<LogEvent> },
    Done { chunk: usize, pages: usize },
    Failed { chunk: usize, error: BackendError },
}

/// Fetch every event in `[start, end)` for `streams`.
///
/// Streams are split into chunks of at most `max_streams_per_query` names and
/// each chunk is paginated to exhaustion in its own task. Returns only after
/// every task has finished. If any page fails the whole cycle fails and the
/// remaining tasks are aborted; nothing fetched so far is returned.
pub async fn fetch_cycle(
    backend: &Arc<dyn LogBackend>,
    log_group: &str,
    streams: &[String],
    start: i64,
    end: i64,
    filter_pattern: Option<&str>,
    limits: FetchLimits,
) -> Result<Vec<LogEvent>, FetchError> {
    if streams.is_empty() || start >= end {
        return Ok(Vec::new());
    }

    let chunk_size = limits.max_streams_per_query.clamp(1, MAX_STREAMS_PER_QUERY);
    let permits = Arc::new(Semaphore::new(limits.max_concurrent_fetches.max(1)));
    let (tx, mut rx) = mpsc::channel::<ChunkMessage>(64);

    let mut handles = Vec::new();
    for (chunk, names) in streams.chunks(chunk_size).enumerate() {
        let query = EventQuery {
            log_group: log_group.to_string(),
            stream_names: names.to_vec(),
            start_time: start,
            end_time: end,
            filter_pattern: filter_pattern.map(str::to_string),
        };
        let backend = Arc::clone(backend);
        let permits = Arc::clone(&permits);
        let tx = tx.clone();

        handles.push(tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };

            let mut next_token = None;
            let mut pages = 0usize;
            loop {
                match backend.filter_events(&query, next_token.take()).await {
                    Ok(page) => {
                        pages += 1;
                        if !page.events.is_empty()
                            && tx
                                .send(ChunkMessage::Page {
                                    chunk,
                                    events: page.events,
                                })
                                .await
                                .is_err()
                        {
                            return; // Cycle gave up
                        }
                        match page.next_token {
                            Some(token) => next_token = Some(token),
                            None => break,
                        }
                    }
                    Err(error) => {
                        let _ = tx.send(ChunkMessage::Failed { chunk, error }).await;
                        return;
                    }
                }
            }

            let _ = tx.send(ChunkMessage::Done { chunk, pages }).await;
        }));
    }
    drop(tx);

    let mut events = Vec::new();
    let mut failure = None;

    while let Some(message) = rx.recv().await {
        match message {
            ChunkMessage::Page {
                chunk,
                events: page,
            } => {
                trace!(chunk = chunk, events = page.len(), "Received event page");
                events.extend(page);
            }
            ChunkMessage::Done { chunk, pages } => {
                debug!(chunk = chunk, pages = pages, "Chunk fetched");
            }
            ChunkMessage::Failed { chunk, error } => {
                warn!(
                    chunk = chunk,
                    log_group = %log_group,
                    error = %error,
                    "Chunk fetch failed"
                );
                if failure.is_none() {
                    for handle in &handles {
                        handle.abort();
                    }
                    failure = Some(FetchError::Backend {
                        chunk,
                        source: error,
                    });
                }
            }
        }
    }

    for handle in handles {
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() && failure.is_some() => {}
            Err(e) => return Err(FetchError::Join(e)),
        }
    }

    match failure {
        Some(error) => Err(error),
        None => Ok(events),
    }
}
