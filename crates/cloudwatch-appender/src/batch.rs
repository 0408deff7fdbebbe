// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch assembly.
//!
//! A [`Batch`] is never empty and always sorted by timestamp, ties keeping the order in
//! which records left the queue. The [`BatchAssembler`] turns the queue into a stream of
//! such batches for the worker.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::constants::{MAX_BATCH_BYTES, MAX_BATCH_EVENTS};
use crate::queue::EventReceiver;
use crate::record::LogRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    records: Vec<LogRecord>,
}

impl Batch {
    /// Sorts `records` by timestamp. Returns `None` for an empty input.
    pub fn new(mut records: Vec<LogRecord>) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        // stable: equal timestamps stay in dequeue order
        records.sort_by_key(|record| record.timestamp_millis);
        Some(Self { records })
    }

    /// Splits drained records into ordered batches.
    ///
    /// The whole input is sorted first so consecutive batches are ordered against each
    /// other too. Each batch holds at most `max_size` records and respects the service
    /// payload limit. A record too large for any batch is truncated to fit on its own.
    pub fn partition(mut records: Vec<LogRecord>, max_size: usize) -> Vec<Batch> {
        records.sort_by_key(|record| record.timestamp_millis);

        let max_size = max_size.clamp(1, MAX_BATCH_EVENTS);
        let mut batches = Vec::new();
        let mut current: Vec<LogRecord> = Vec::new();
        let mut current_bytes = 0;

        for mut record in records {
            let original_len = record.message.len();
            if record.truncate_to_fit(MAX_BATCH_BYTES) {
                warn!(
                    "Truncated a {} byte event to {} bytes to fit the batch payload limit",
                    original_len,
                    record.message.len()
                );
            }
            let size = record.encoded_size();
            let over_bytes = !current.is_empty() && current_bytes + size > MAX_BATCH_BYTES;
            if current.len() == max_size || over_bytes {
                batches.push(Batch {
                    records: std::mem::take(&mut current),
                });
                current_bytes = 0;
            }
            current_bytes += size;
            current.push(record);
        }
        if !current.is_empty() {
            batches.push(Batch { records: current });
        }

        batches
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// A batch built by this module is never empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn encoded_size(&self) -> usize {
        self.records.iter().map(LogRecord::encoded_size).sum()
    }
}

/// Pulls size- or time-bounded batches out of the queue.
#[derive(Debug)]
pub struct BatchAssembler {
    receiver: EventReceiver,
    max_batch_size: usize,
    max_batch_wait: Duration,
}

impl BatchAssembler {
    pub fn new(receiver: EventReceiver, max_batch_size: usize, max_batch_wait: Duration) -> Self {
        Self {
            receiver,
            max_batch_size,
            max_batch_wait,
        }
    }

    /// Waits up to the batch wait for records and returns them as ordered batches.
    ///
    /// Usually one batch; more only when the drained records exceed the payload limit.
    /// Empty when nothing arrived.
    pub async fn next_batches(&mut self, cancel: &CancellationToken) -> Vec<Batch> {
        let records = self
            .receiver
            .drain_up_to(self.max_batch_size, self.max_batch_wait, cancel)
            .await;
        Batch::partition(records, self.max_batch_size)
    }

    /// Closes the queue and returns everything left in it, split into ordered batches.
    ///
    /// Producers still waiting for space fail instead of landing after the drain.
    pub fn drain_remaining(&mut self) -> Vec<Batch> {
        self.receiver.close();
        Batch::partition(self.receiver.drain_all(), self.max_batch_size)
    }

    pub fn is_exhausted(&self) -> bool {
        self.receiver.is_exhausted()
    }
}
