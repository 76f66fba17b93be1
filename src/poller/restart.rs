use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Operator request to rediscover streams on the next scheduling decision.
///
/// Cloned handles share one flag. Requests do not interrupt a running fetch
/// and repeated requests before the poller looks collapse into one.
#[derive(Debug, Clone, Default)]
pub struct RestartSignal {
    requested: Arc<AtomicBool>,
}

impl RestartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Consume a pending request.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}
