pub mod batch;
pub mod fetch;
pub mod restart;
pub mod runner;
pub mod window;

pub use fetch::{fetch_cycle, FetchError, FetchLimits};
pub use restart::RestartSignal;
pub use runner::{EventPoller, PollSummary, PollerError, PollerSettings, Termination};
pub use window::{TimeWindow, Watermark, WindowError};
