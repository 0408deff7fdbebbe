// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The remote log stream service as seen by the appender.

use std::fmt::Debug;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::{PutError, ServiceError};
use crate::record::{LogRecord, SequenceToken, StreamIdentity};

/// Outcome of an idempotent create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    Created,
    AlreadyExists,
}

/// Batched writes to an append-only, sequence-token ordered log stream.
#[async_trait]
pub trait LogStreamClient: Debug + Send + Sync {
    async fn create_log_group(&self, group: &str) -> Result<ResourceStatus, ServiceError>;

    async fn create_log_stream(
        &self,
        group: &str,
        stream: &str,
    ) -> Result<ResourceStatus, ServiceError>;

    /// Writes `events`, which are sorted by timestamp, under `token`.
    ///
    /// Returns the token the next write must carry.
    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogRecord],
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>, PutError>;
}

/// Creates the group and the stream unless they already exist.
pub async fn ensure_stream(
    client: &dyn LogStreamClient,
    identity: &StreamIdentity,
) -> Result<(), ServiceError> {
    match client.create_log_group(&identity.group_name).await? {
        ResourceStatus::Created => info!("Created log group {}", identity.group_name),
        ResourceStatus::AlreadyExists => {
            debug!("Log group {} already exists", identity.group_name)
        }
    }

    match client
        .create_log_stream(&identity.group_name, &identity.stream_name)
        .await?
    {
        ResourceStatus::Created => info!("Created log stream {}", identity),
        ResourceStatus::AlreadyExists => debug!("Log stream {} already exists", identity),
    }

    Ok(())
}
