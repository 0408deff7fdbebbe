// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded ingestion queue between producers and the worker.
//!
//! The producer side ([`EventQueue`]) is cheap to clone and shared by every call site.
//! The consumer side ([`EventReceiver`]) is owned by the single worker task.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::errors::SubmitError;
use crate::record::LogRecord;

/// Creates a queue holding at most `capacity` records.
///
/// `capacity` must be greater than zero.
pub fn bounded(capacity: usize) -> (EventQueue, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        EventQueue { tx },
        EventReceiver { rx, closed: false },
    )
}

#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<LogRecord>,
}

impl EventQueue {
    /// Enqueues a record, waiting up to `wait_timeout` for space.
    pub async fn submit(
        &self,
        record: LogRecord,
        wait_timeout: Duration,
    ) -> Result<(), SubmitError> {
        self.tx
            .send_timeout(record, wait_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SubmitError::Full,
                SendTimeoutError::Closed(_) => SubmitError::Closed,
            })
    }

    /// Enqueues a record only if space is available right now.
    pub fn try_submit(&self, record: LogRecord) -> Result<(), SubmitError> {
        self.tx.try_send(record).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::Full,
            TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Approximate number of queued records.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<LogRecord>,
    closed: bool,
}

impl EventReceiver {
    /// Removes up to `max_count` records, waiting at most `max_wait` in total.
    ///
    /// Returns early once `max_count` records are collected, the queue is closed or
    /// `cancel` fires. An empty result means nothing arrived in time.
    pub async fn drain_up_to(
        &mut self,
        max_count: usize,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Vec<LogRecord> {
        let deadline = Instant::now() + max_wait;
        let mut records = Vec::new();

        while records.len() < max_count && !self.closed {
            let limit = max_count - records.len();
            let received = tokio::select! {
                received = self.rx.recv_many(&mut records, limit) => received,
                () = sleep_until(deadline) => break,
                () = cancel.cancelled() => break,
            };
            // recv_many only yields zero once every sender is gone and the buffer is empty
            if received == 0 {
                self.closed = true;
            }
        }

        records
    }

    /// Refuses further records, failing producers that are still waiting for space.
    ///
    /// Records already queued stay available to [`EventReceiver::drain_all`].
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Removes everything currently queued without waiting.
    pub fn drain_all(&mut self) -> Vec<LogRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.rx.try_recv() {
            records.push(record);
        }
        records
    }

    /// True once every producer handle is dropped and the queue ran dry.
    pub fn is_exhausted(&self) -> bool {
        self.closed
    }
}
