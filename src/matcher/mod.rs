pub mod discovery;
pub mod pattern;

pub use discovery::{DiscoveryWindow, StreamMatcher, StreamPages, DEFAULT_LOOKBACK};
pub use pattern::{PatternError, StreamPattern};
