// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CloudWatch Logs backend.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudwatchlogs::error::DisplayErrorContext;
use aws_sdk_cloudwatchlogs::operation::put_log_events::PutLogEventsError;
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use aws_sdk_cloudwatchlogs::Client;
use tracing::debug;

use crate::client::{LogStreamClient, ResourceStatus};
use crate::errors::{ConflictKind, PutError, ServiceError};
use crate::record::{LogRecord, SequenceToken};

#[derive(Debug, Clone)]
pub struct CloudWatchLogsClient {
    client: Client,
}

impl CloudWatchLogsClient {
    /// Loads credentials and settings from the environment for `region`.
    pub async fn new(region: &str) -> Self {
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        debug!("Created CloudWatch Logs client for region {}", region);
        Self::from_client(Client::new(&shared_config))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn input_events(events: &[LogRecord]) -> Result<Vec<InputLogEvent>, PutError> {
    events
        .iter()
        .map(|record| {
            InputLogEvent::builder()
                .timestamp(record.timestamp_millis)
                .message(record.message.clone())
                .build()
                .map_err(|e| PutError::Transport(format!("invalid log event: {e}")))
        })
        .collect()
}

fn conflict(kind: ConflictKind, expected_token: Option<&str>) -> PutError {
    PutError::Conflict {
        kind,
        expected_token: expected_token.map(SequenceToken::from),
    }
}

#[async_trait]
impl LogStreamClient for CloudWatchLogsClient {
    async fn create_log_group(&self, group: &str) -> Result<ResourceStatus, ServiceError> {
        match self
            .client
            .create_log_group()
            .log_group_name(group)
            .send()
            .await
        {
            Ok(_) => Ok(ResourceStatus::Created),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|e| e.is_resource_already_exists_exception()) =>
            {
                Ok(ResourceStatus::AlreadyExists)
            }
            Err(e) => Err(ServiceError::Transport(
                DisplayErrorContext(&e).to_string(),
            )),
        }
    }

    async fn create_log_stream(
        &self,
        group: &str,
        stream: &str,
    ) -> Result<ResourceStatus, ServiceError> {
        match self
            .client
            .create_log_stream()
            .log_group_name(group)
            .log_stream_name(stream)
            .send()
            .await
        {
            Ok(_) => Ok(ResourceStatus::Created),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|e| e.is_resource_already_exists_exception()) =>
            {
                Ok(ResourceStatus::AlreadyExists)
            }
            Err(e) => Err(ServiceError::Transport(
                DisplayErrorContext(&e).to_string(),
            )),
        }
    }

    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogRecord],
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>, PutError> {
        let result = self
            .client
            .put_log_events()
            .log_group_name(group)
            .log_stream_name(stream)
            .set_log_events(Some(input_events(events)?))
            .set_sequence_token(token.map(|t| t.as_str().to_string()))
            .send()
            .await;

        match result {
            Ok(output) => Ok(output.next_sequence_token().map(SequenceToken::from)),
            Err(e) => Err(match e.as_service_error() {
                Some(PutLogEventsError::DataAlreadyAcceptedException(conflict_error)) => conflict(
                    ConflictKind::AlreadyAccepted,
                    conflict_error.expected_sequence_token(),
                ),
                Some(PutLogEventsError::InvalidSequenceTokenException(conflict_error)) => conflict(
                    ConflictKind::StaleToken,
                    conflict_error.expected_sequence_token(),
                ),
                _ => PutError::Transport(DisplayErrorContext(&e).to_string()),
            }),
        }
    }
}
