//! CloudWatch Logs implementation of [`LogBackend`].

use super::traits::{
    BackendError, EventPage, EventQuery, LogBackend, LogEvent, StreamCandidate, StreamPage,
};
use async_trait::async_trait;
use aws_sdk_cloudwatchlogs as cloudwatchlogs;
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudwatchlogs::types::OrderBy;

#[derive(Debug, Clone)]
pub struct CloudWatchBackend {
    client: cloudwatchlogs::Client,
}

impl CloudWatchBackend {
    pub fn new(client: cloudwatchlogs::Client) -> Self {
        Self { client }
    }

    pub fn from_sdk_config(config: &aws_config::SdkConfig) -> Self {
        Self::new(cloudwatchlogs::Client::new(config))
    }
}

#[async_trait]
impl LogBackend for CloudWatchBackend {
    async fn list_streams(
        &self,
        log_group: &str,
        next_token: Option<String>,
    ) -> Result<StreamPage, BackendError> {
        let response = self
            .client
            .describe_log_streams()
            .log_group_name(log_group)
            .order_by(OrderBy::LastEventTime)
            .descending(true)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| map_sdk_error("DescribeLogStreams", log_group, e))?;

        let streams = response
            .log_streams
            .unwrap_or_default()
            .into_iter()
            .filter_map(|stream| {
                let name = stream.log_stream_name?;
                Some(StreamCandidate::new(name, stream.last_event_timestamp))
            })
            .collect();

        Ok(StreamPage {
            streams,
            next_token: response.next_token,
        })
    }

    async fn filter_events(
        &self,
        query: &EventQuery,
        next_token: Option<String>,
    ) -> Result<EventPage, BackendError> {
        // FilterLogEvents treats end_time as inclusive.
        let response = self
            .client
            .filter_log_events()
            .log_group_name(&query.log_group)
            .set_log_stream_names(Some(query.stream_names.clone()))
            .start_time(query.start_time)
            .end_time(query.end_time - 1)
            .set_filter_pattern(query.filter_pattern.clone())
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| map_sdk_error("FilterLogEvents", &query.log_group, e))?;

        let events = response
            .events
            .unwrap_or_default()
            .into_iter()
            .filter_map(|event| {
                Some(LogEvent {
                    stream_name: event.log_stream_name?,
                    timestamp: event.timestamp?,
                    ingestion_time: event.ingestion_time.unwrap_or_default(),
                    message: event.message.unwrap_or_default(),
                    event_id: event.event_id,
                })
            })
            .collect();

        Ok(EventPage {
            events,
            next_token: response.next_token,
        })
    }
}

fn map_sdk_error<E, R>(operation: &'static str, log_group: &str, err: SdkError<E, R>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.code() {
        Some("ResourceNotFoundException") => BackendError::LogGroupNotFound(log_group.to_string()),
        Some("ThrottlingException") => {
            BackendError::Throttled(DisplayErrorContext(&err).to_string())
        }
        _ => BackendError::Request {
            operation,
            message: DisplayErrorContext(&err).to_string(),
        },
    }
}
