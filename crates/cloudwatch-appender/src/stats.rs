// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Appender status counters.
//!
//! Producers and the worker bump these lock-free; [`AppenderStats::snapshot`] gives a
//! consistent-enough view for status reporting.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::writer::WriteOutcome;

#[derive(Debug, Default)]
pub struct AppenderStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
    delivered_events: AtomicU64,
    delivered_batches: AtomicU64,
    abandoned_events: AtomicU64,
    abandoned_batches: AtomicU64,
    conflict_retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Records that made it into the queue.
    pub accepted: u64,
    /// Records rejected by a full or closed queue.
    pub dropped: u64,
    pub delivered_events: u64,
    pub delivered_batches: u64,
    pub abandoned_events: u64,
    pub abandoned_batches: u64,
    /// Batches that needed the sequence token retry, successful or not.
    pub conflict_retries: u64,
}

impl AppenderStats {
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, events: usize, outcome: &WriteOutcome) {
        let events = events as u64;
        let retried = match outcome {
            WriteOutcome::Delivered { retried, .. } => {
                self.delivered_events.fetch_add(events, Ordering::Relaxed);
                self.delivered_batches.fetch_add(1, Ordering::Relaxed);
                *retried
            }
            WriteOutcome::Abandoned { retried, .. } => {
                self.abandoned_events.fetch_add(events, Ordering::Relaxed);
                self.abandoned_batches.fetch_add(1, Ordering::Relaxed);
                *retried
            }
        };
        if retried {
            self.conflict_retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered_events: self.delivered_events.load(Ordering::Relaxed),
            delivered_batches: self.delivered_batches.load(Ordering::Relaxed),
            abandoned_events: self.abandoned_events.load(Ordering::Relaxed),
            abandoned_batches: self.abandoned_batches.load(Ordering::Relaxed),
            conflict_retries: self.conflict_retries.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ConflictKind, PutError};

    #[test]
    fn test_record_write_outcomes() {
        let stats = AppenderStats::default();
        stats.record_write(
            3,
            &WriteOutcome::Delivered {
                token: None,
                retried: false,
            },
        );
        stats.record_write(
            2,
            &WriteOutcome::Delivered {
                token: None,
                retried: true,
            },
        );
        stats.record_write(
            4,
            &WriteOutcome::Abandoned {
                token: None,
                error: PutError::Transport("down".to_string()),
                retried: false,
            },
        );

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.delivered_events, 5);
        assert_eq!(snapshot.delivered_batches, 2);
        assert_eq!(snapshot.abandoned_events, 4);
        assert_eq!(snapshot.abandoned_batches, 1);
        assert_eq!(snapshot.conflict_retries, 1);
    }

    #[test]
    fn test_abandoned_after_retry_counts_retry() {
        let stats = AppenderStats::default();
        stats.record_write(
            1,
            &WriteOutcome::Abandoned {
                token: None,
                error: PutError::Conflict {
                    kind: ConflictKind::StaleToken,
                    expected_token: None,
                },
                retried: true,
            },
        );
        assert_eq!(stats.snapshot().conflict_retries, 1);
    }
}
