// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use crate::record::SequenceToken;

/// Why a record was not accepted by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("no space available in queue before the timeout")]
    Full,
    #[error("queue is closed")]
    Closed,
}

/// The two conflict responses of a sequence-token ordered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The batch was already accepted under this token.
    AlreadyAccepted,
    /// The token is stale or otherwise invalid.
    StaleToken,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyAccepted => f.write_str("data already accepted"),
            Self::StaleToken => f.write_str("invalid sequence token"),
        }
    }
}

/// Failure of a put of a batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PutError {
    #[error("{kind} (expected sequence token: {expected_token:?})")]
    Conflict {
        kind: ConflictKind,
        expected_token: Option<SequenceToken>,
    },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failure of a call to the remote service other than a put.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("remote service error: {0}")]
    Transport(String),
}

/// Reasons the appender refuses to start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("log group name is not set for appender {0}")]
    MissingLogGroup(String),

    #[error("log stream name is not set for appender {0}")]
    MissingLogStream(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("appender {0} was stopped and cannot be restarted")]
    AlreadyStopped(String),

    #[error("no log stream client available: {0}")]
    ClientUnavailable(String),

    #[error("failed to prepare log stream: {0}")]
    Remote(#[from] ServiceError),
}
