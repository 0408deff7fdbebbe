// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Writes batches to the stream and tracks the sequence token through conflicts.
//!
//! The writer holds no token itself. The caller passes in the token it owns and gets back
//! the one to use next, so exactly one place ever holds it:
//!
//! ```text
//!   put(token) ── ok(next) ─────────────────────────────► Delivered(next)
//!        │
//!        ├── conflict(expected) ── put(expected) ── ok ─► Delivered(next)
//!        │                              └──── err ─────► Abandoned(expected or newer)
//!        └── transport error ──────────────────────────► Abandoned(token)
//! ```

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::batch::Batch;
use crate::client::LogStreamClient;
use crate::errors::PutError;
use crate::record::{SequenceToken, StreamIdentity};

/// Result of writing one batch, carrying the token the next write must use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Delivered {
        token: Option<SequenceToken>,
        /// True when the batch only went through on the conflict retry.
        retried: bool,
    },
    Abandoned {
        token: Option<SequenceToken>,
        error: PutError,
        retried: bool,
    },
}

impl WriteOutcome {
    pub fn token(&self) -> Option<&SequenceToken> {
        match self {
            Self::Delivered { token, .. } | Self::Abandoned { token, .. } => token.as_ref(),
        }
    }

    pub fn into_token(self) -> Option<SequenceToken> {
        match self {
            Self::Delivered { token, .. } | Self::Abandoned { token, .. } => token,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RemoteWriter {
    client: Arc<dyn LogStreamClient>,
    identity: StreamIdentity,
}

impl RemoteWriter {
    pub fn new(client: Arc<dyn LogStreamClient>, identity: StreamIdentity) -> Self {
        Self { client, identity }
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    /// Writes `batch` under `token`, retrying exactly once on a token conflict.
    ///
    /// A failed batch is reported and abandoned, never requeued.
    pub async fn write(&self, batch: &Batch, token: Option<SequenceToken>) -> WriteOutcome {
        let (kind, expected_token) = match self.put(batch, token.as_ref()).await {
            Ok(next) => {
                return WriteOutcome::Delivered {
                    token: next,
                    retried: false,
                }
            }
            Err(PutError::Conflict {
                kind,
                expected_token,
            }) => (kind, expected_token),
            Err(error) => {
                error!("Failed to handle {} events: {}", batch.len(), error);
                return WriteOutcome::Abandoned {
                    token,
                    error,
                    retried: false,
                };
            }
        };

        debug!(
            "Put to {} rejected ({}), retrying with expected sequence token {:?}",
            self.identity, kind, expected_token
        );

        match self.put(batch, expected_token.as_ref()).await {
            Ok(next) => WriteOutcome::Delivered {
                token: next,
                retried: true,
            },
            Err(error) => {
                let token = match &error {
                    PutError::Conflict { expected_token, .. } => expected_token.clone(),
                    PutError::Transport(_) => expected_token,
                };
                warn!(
                    "Failed to handle {} events after sequence token retry: {}",
                    batch.len(),
                    error
                );
                WriteOutcome::Abandoned {
                    token,
                    error,
                    retried: true,
                }
            }
        }
    }

    async fn put(
        &self,
        batch: &Batch,
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>, PutError> {
        self.client
            .put_log_events(
                &self.identity.group_name,
                &self.identity.stream_name,
                batch.records(),
                token,
            )
            .await
    }
}
