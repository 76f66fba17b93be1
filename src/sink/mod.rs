//! Destinations for emitted log events.

use crate::backend::LogEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event receiver closed")]
    Closed,
}

/// Receives events in emission order, each exactly once.
#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: &LogEvent) -> Result<(), SinkError>;

    /// Called after each completed cycle.
    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineFormat {
    /// `<stream short name>\t<message>`
    Short,
    /// `<timestamp>\t<stream>\t<message>`
    Full,
    /// One JSON object per line.
    Json,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    timestamp: String,
    ingestion_time: i64,
    stream: &'a str,
    message: &'a str,
}

fn trimmed_message(event: &LogEvent) -> &str {
    event.message.trim_end_matches(['\n', '\r'])
}

fn format_timestamp(event: &LogEvent) -> String {
    event
        .datetime()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| event.timestamp.to_string())
}

pub fn format_line(event: &LogEvent, format: LineFormat) -> Result<String, SinkError> {
    let line = match format {
        LineFormat::Short => format!("{}\t{}", event.stream_short_name(), trimmed_message(event)),
        LineFormat::Full => format!(
            "{}\t{}\t{}",
            format_timestamp(event),
            event.stream_name,
            trimmed_message(event)
        ),
        LineFormat::Json => serde_json::to_string(&JsonLine {
            timestamp: event
                .datetime()
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| event.timestamp.to_string()),
            ingestion_time: event.ingestion_time,
            stream: &event.stream_name,
            message: trimmed_message(event),
        })?,
    };
    Ok(line)
}

/// Writes one formatted line per event.
pub struct WriterSink<W> {
    writer: W,
    format: LineFormat,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W, format: LineFormat) -> Self {
        Self { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: Write + Send> EventSink for WriterSink<W> {
    async fn emit(&mut self, event: &LogEvent) -> Result<(), SinkError> {
        let line = format_line(event, self.format)?;
        writeln!(self.writer, "{}", line)?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Forwards events into a bounded channel.
pub struct ChannelSink {
    tx: mpsc::Sender<LogEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<LogEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer_size: usize) -> (Self, mpsc::Receiver<LogEvent>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&mut self, event: &LogEvent) -> Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| SinkError::Closed)
    }
}
