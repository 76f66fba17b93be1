use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("window start {start} is after its end {end}")]
    Inverted { start: i64, end: i64 },
}

/// Requested time range in epoch milliseconds.
///
/// A closed window is a historical query; an open one tails forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: i64,
    end: Option<i64>,
}

impl TimeWindow {
    pub fn new(start: i64, end: Option<i64>) -> Result<Self, WindowError> {
        if let Some(end) = end {
            if start > end {
                return Err(WindowError::Inverted { start, end });
            }
        }
        Ok(Self { start, end })
    }

    pub fn live(start: i64) -> Self {
        Self { start, end: None }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> Option<i64> {
        self.end
    }

    pub fn is_live(&self) -> bool {
        self.end.is_none()
    }

    /// Upper bound for a fetch issued at `now`.
    ///
    /// Stays `liveness_margin` behind `now` so the backend is never asked
    /// about instants it may still be ingesting, and never passes a closed
    /// window's end.
    pub fn effective_end(&self, now: i64, liveness_margin: Duration) -> i64 {
        let settled = now - liveness_margin.as_millis() as i64;
        match self.end {
            Some(end) => end.min(settled),
            None => settled,
        }
    }
}

/// Fetch position of the poller.
///
/// Every fetch covers `[next_start, current_end)`. Both bounds only move
/// forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    next_start: i64,
    current_end: i64,
}

impl Watermark {
    pub fn new(start: i64) -> Self {
        Self {
            next_start: start,
            current_end: start,
        }
    }

    pub fn next_start(&self) -> i64 {
        self.next_start
    }

    pub fn current_end(&self) -> i64 {
        self.current_end
    }

    pub fn extend_to(&mut self, end: i64) {
        self.current_end = self.current_end.max(end);
    }

    pub fn has_range(&self) -> bool {
        self.next_start < self.current_end
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.next_start <= timestamp && timestamp < self.current_end
    }

    /// Move past the newest emitted timestamp. `None` (an empty cycle)
    /// leaves the watermark where it was.
    pub fn advance(&mut self, max_timestamp: Option<i64>) {
        if let Some(max) = max_timestamp {
            self.next_start = self.next_start.max(max + 1);
        }
    }
}
