pub mod cloudwatch;
pub mod memory;
pub mod traits;

pub use cloudwatch::CloudWatchBackend;
pub use memory::InMemoryBackend;
pub use traits::{
    BackendError, EventPage, EventQuery, LogBackend, LogEvent, StreamCandidate, StreamPage,
    MAX_STREAMS_PER_QUERY,
};
