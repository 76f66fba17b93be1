use crate::backend::LogEvent;
use crate::poller::window::Watermark;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EventKey {
    Id {
        stream: String,
        id: String,
    },
    Content {
        stream: String,
        timestamp: i64,
        message: String,
    },
}

impl EventKey {
    fn of(event: &LogEvent) -> Self {
        match &event.event_id {
            Some(id) => EventKey::Id {
                stream: event.stream_name.clone(),
                id: id.clone(),
            },
            None => EventKey::Content {
                stream: event.stream_name.clone(),
                timestamp: event.timestamp,
                message: event.message.clone(),
            },
        }
    }
}

/// Turn one cycle's raw fetch results into the emission order.
///
/// Drops events outside the watermark's range (backends may return a little
/// overlap at the edges) and repeats of the same event, then sorts by
/// timestamp with ties going to the earlier ingestion time. Remaining ties
/// keep fetch order.
pub fn prepare_batch(events: Vec<LogEvent>, watermark: &Watermark) -> Vec<LogEvent> {
    let mut seen = HashSet::with_capacity(events.len());
    let mut batch: Vec<LogEvent> = events
        .into_iter()
        .filter(|e| watermark.contains(e.timestamp))
        .filter(|e| seen.insert(EventKey::of(e)))
        .collect();

    batch.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.ingestion_time.cmp(&b.ingestion_time))
            .then_with(|| a.stream_name.cmp(&b.stream_name))
    });
    batch
}
