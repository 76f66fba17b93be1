pub mod backend;
pub mod cli;
pub mod clock;
pub mod config;
pub mod matcher;
pub mod poller;
pub mod sink;
pub mod time;
