// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The single background task moving batches from the queue to the stream.
//!
//! The worker is the only owner of the sequence token. It runs until its cancellation
//! token fires or every producer is gone, then drains what is left in the queue and writes
//! it in batch-sized chunks before terminating.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::{Batch, BatchAssembler};
use crate::record::SequenceToken;
use crate::stats::AppenderStats;
use crate::writer::RemoteWriter;

#[derive(Debug)]
pub struct Worker {
    assembler: BatchAssembler,
    writer: RemoteWriter,
    token: Option<SequenceToken>,
    cancel: CancellationToken,
    stats: Arc<AppenderStats>,
}

impl Worker {
    pub fn new(assembler: BatchAssembler, writer: RemoteWriter, stats: Arc<AppenderStats>) -> Self {
        Self {
            assembler,
            writer,
            token: None,
            cancel: CancellationToken::new(),
            stats,
        }
    }

    /// Starts the worker on the current runtime.
    pub fn spawn(self) -> WorkerHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        WorkerHandle { cancel, task }
    }

    /// Runs until stopped, then drains. Returns the last known token.
    pub async fn run(mut self) -> Option<SequenceToken> {
        debug!("Worker started for {}", self.writer.identity());

        // an in-flight write always completes before the flag is observed
        while !self.cancel.is_cancelled() {
            let batches = self.assembler.next_batches(&self.cancel).await;
            for batch in batches {
                self.write(batch).await;
            }
            if self.assembler.is_exhausted() {
                break;
            }
        }

        let remaining = self.assembler.drain_remaining();
        if !remaining.is_empty() {
            debug!(
                "Worker draining {} events in {} batches",
                remaining.iter().map(Batch::len).sum::<usize>(),
                remaining.len()
            );
        }
        for batch in remaining {
            self.write(batch).await;
        }

        debug!("Worker for {} terminated", self.writer.identity());
        self.token
    }

    async fn write(&mut self, batch: Batch) {
        let outcome = self.writer.write(&batch, self.token.take()).await;
        self.stats.record_write(batch.len(), &outcome);
        self.token = outcome.into_token();
    }
}

#[derive(Debug)]
pub struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<Option<SequenceToken>>,
}

impl WorkerHandle {
    /// Asks the worker to finish its current write, drain the queue and exit.
    pub fn stop_gracefully(&self) {
        self.cancel.cancel();
    }

    /// Waits up to `max_wait` for the worker to terminate.
    ///
    /// Returns `false` on timeout, leaving the worker running.
    pub async fn join(&mut self, max_wait: Duration) -> bool {
        if self.task.is_finished() {
            return true;
        }
        match tokio::time::timeout(max_wait, &mut self.task).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Worker task ended abnormally: {}", e);
                true
            }
            Err(_) => false,
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ensure_stream;
    use crate::errors::{ConflictKind, PutError};
    use crate::memory::InMemoryLogService;
    use crate::queue::{self, EventQueue};
    use crate::record::{LogRecord, StreamIdentity};

    fn identity() -> StreamIdentity {
        StreamIdentity {
            group_name: "group".to_string(),
            stream_name: "stream".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    async fn worker(
        max_batch_size: usize,
        max_batch_wait: Duration,
    ) -> (Worker, EventQueue, InMemoryLogService, Arc<AppenderStats>) {
        let service = InMemoryLogService::new();
        ensure_stream(&service, &identity())
            .await
            .expect("ensure stream");
        let (queue, receiver) = queue::bounded(64);
        let stats = Arc::new(AppenderStats::default());
        let worker = Worker::new(
            BatchAssembler::new(receiver, max_batch_size, max_batch_wait),
            RemoteWriter::new(Arc::new(service.clone()), identity()),
            Arc::clone(&stats),
        );
        (worker, queue, service, stats)
    }

    fn stamps(records: &[LogRecord]) -> Vec<i64> {
        records.iter().map(|r| r.timestamp_millis).collect()
    }

    #[tokio::test]
    async fn test_worker_chains_tokens_across_batches() {
        let (worker, queue, service, _stats) = worker(2, Duration::from_millis(20)).await;
        for ts in 0..6 {
            queue.try_submit(LogRecord::new(ts, "m")).expect("submit");
        }
        drop(queue);

        let last = worker.run().await;

        let calls = service.put_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].token, None);
        for pair in calls.windows(2) {
            assert!(pair[1].token.is_some());
            assert_ne!(pair[0].token, pair[1].token);
        }
        assert_eq!(last, service.expected_token("group", "stream"));
        assert_eq!(stamps(&service.events("group", "stream")), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_stop_drains_queued_records() {
        let (worker, queue, service, stats) = worker(3, Duration::from_secs(30)).await;
        let mut handle = worker.spawn();

        for ts in [9, 4, 7, 1, 8, 2, 6] {
            queue.try_submit(LogRecord::new(ts, "m")).expect("submit");
        }
        handle.stop_gracefully();
        assert!(handle.join(Duration::from_secs(5)).await);

        let events = service.events("group", "stream");
        assert_eq!(events.len(), 7);
        assert!(service.put_calls().iter().all(|c| c.events.len() <= 3));
        assert_eq!(stats.snapshot().delivered_events, 7);
    }

    #[tokio::test]
    async fn test_worker_adopts_token_from_conflict_retry() {
        let (worker, queue, service, stats) = worker(1, Duration::from_millis(20)).await;
        service.fail_next_put(PutError::Conflict {
            kind: ConflictKind::AlreadyAccepted,
            expected_token: Some(SequenceToken::new("T2")),
        });
        service.script_put(Ok(Some(SequenceToken::new("T3"))));

        queue.try_submit(LogRecord::new(1, "first")).expect("submit");
        queue.try_submit(LogRecord::new(2, "second")).expect("submit");
        drop(queue);

        let _ = worker.run().await;

        let calls = service.put_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].token, Some(SequenceToken::new("T2")));
        assert_eq!(calls[2].token, Some(SequenceToken::new("T3")));
        assert_eq!(stats.snapshot().conflict_retries, 1);
        assert_eq!(stats.snapshot().delivered_batches, 2);
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_worker_running() {
        let (worker, queue, service, stats) = worker(1, Duration::from_millis(20)).await;
        service.fail_next_put(PutError::Transport("unavailable".to_string()));

        queue.try_submit(LogRecord::new(1, "lost")).expect("submit");
        queue.try_submit(LogRecord::new(2, "kept")).expect("submit");
        drop(queue);

        worker.run().await;

        let events = service.events("group", "stream");
        assert_eq!(events, vec![LogRecord::new(2, "kept")]);
        let calls = service.put_calls();
        assert_eq!(calls[0].token, calls[1].token);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.abandoned_events, 1);
        assert_eq!(snapshot.delivered_events, 1);
    }

    #[tokio::test]
    async fn test_join_times_out_on_slow_service() {
        let (worker, queue, service, _stats) = worker(1, Duration::from_millis(10)).await;
        service.set_put_delay(Duration::from_millis(300));
        for ts in 0..5 {
            queue.try_submit(LogRecord::new(ts, "m")).expect("submit");
        }

        let mut handle = worker.spawn();
        handle.stop_gracefully();
        assert!(!handle.join(Duration::from_millis(50)).await);
        handle.abort();
        assert!(handle.join(Duration::from_secs(1)).await);
    }
}
