// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Appender lifecycle.
//!
//! ```text
//!   Unstarted ── start ──► Started ── stop ──► Stopped
//!       │                                        ▲
//!       └── invalid settings: logged, stays ─────┘ (no restart)
//! ```
//!
//! Lifecycle calls are serialized by an internal lock, so a [`Appender`] can be shared
//! freely. Producing never fails loudly: a record that cannot be queued is counted,
//! reported with a warning and dropped.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, info, warn};

use crate::batch::BatchAssembler;
use crate::client::{ensure_stream, LogStreamClient};
use crate::config::AppenderConfig;
use crate::constants::DEFAULT_APPENDER_NAME;
use crate::errors::{StartError, SubmitError};
use crate::formatter::{EchoFormatter, Formatter, PatternFormatter};
use crate::queue::{self, EventQueue};
use crate::record::{LogEvent, LogRecord, StreamIdentity};
use crate::shutdown_hook::{ShutdownHook, ShutdownTrigger};
use crate::stats::{AppenderStats, StatsSnapshot};
use crate::worker::{Worker, WorkerHandle};
use crate::writer::RemoteWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppenderState {
    Unstarted,
    Started,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopOrigin {
    Caller,
    ShutdownHook,
}

pub struct AppenderBuilder {
    name: String,
    config: AppenderConfig,
    client: Option<Arc<dyn LogStreamClient>>,
    formatter: Option<Arc<dyn Formatter>>,
    shutdown_trigger: Option<ShutdownTrigger>,
}

impl AppenderBuilder {
    pub fn new(config: AppenderConfig) -> Self {
        Self {
            name: DEFAULT_APPENDER_NAME.to_string(),
            config,
            client: None,
            formatter: None,
            shutdown_trigger: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Uses `client` instead of building one for the configured region.
    pub fn client(mut self, client: Arc<dyn LogStreamClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Fires the shutdown hook on `trigger` instead of Ctrl-C / SIGTERM.
    pub fn shutdown_trigger<F>(mut self, trigger: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shutdown_trigger = Some(Box::pin(trigger));
        self
    }

    pub fn build(self) -> Appender {
        Appender {
            inner: Arc::new(Inner {
                name: self.name,
                config: self.config,
                formatter: self.formatter,
                stats: Arc::new(AppenderStats::default()),
                state: Mutex::new(AppenderState::Unstarted),
                producer: RwLock::new(None),
                lifecycle: tokio::sync::Mutex::new(Lifecycle {
                    client: self.client,
                    shutdown_trigger: self.shutdown_trigger,
                    worker: None,
                    hook: None,
                }),
            }),
        }
    }
}

#[derive(Clone)]
pub struct Appender {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    config: AppenderConfig,
    formatter: Option<Arc<dyn Formatter>>,
    stats: Arc<AppenderStats>,
    state: Mutex<AppenderState>,
    producer: RwLock<Option<Producer>>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

/// What producers need while the appender is started.
#[derive(Clone)]
struct Producer {
    queue: EventQueue,
    formatter: Arc<dyn Formatter>,
    runtime: Handle,
}

struct Lifecycle {
    client: Option<Arc<dyn LogStreamClient>>,
    shutdown_trigger: Option<ShutdownTrigger>,
    worker: Option<WorkerHandle>,
    hook: Option<ShutdownHook>,
}

impl fmt::Debug for Appender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Appender")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Appender {
    pub fn builder(config: AppenderConfig) -> AppenderBuilder {
        AppenderBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> AppenderState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Validates the settings, prepares the stream and starts the worker.
    ///
    /// Any failure is logged and leaves the appender unstarted; it never panics.
    /// Starting a started appender does nothing. A stopped appender cannot be restarted.
    /// A disabled appender stays unstarted.
    pub async fn start(&self) -> Result<(), StartError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        match self.state() {
            AppenderState::Started => return Ok(()),
            AppenderState::Stopped => {
                let e = StartError::AlreadyStopped(self.inner.name.clone());
                warn!("{}", e);
                return Err(e);
            }
            AppenderState::Unstarted => {}
        }

        if !self.inner.config.enabled {
            info!("Appender {} is disabled, not starting", self.inner.name);
            return Ok(());
        }

        match self.try_start(&mut lifecycle).await {
            Ok(identity) => {
                self.set_state(AppenderState::Started);
                info!("Appender {} started, writing to {}", self.inner.name, identity);
                Ok(())
            }
            Err(e) => {
                error!("Appender {} not started: {}", self.inner.name, e);
                Err(e)
            }
        }
    }

    async fn try_start(&self, lifecycle: &mut Lifecycle) -> Result<StreamIdentity, StartError> {
        let config = &self.inner.config;
        let identity = config.validate(&self.inner.name)?;
        let formatter = self.resolve_formatter();
        let client = self.resolve_client(lifecycle, &identity).await?;

        ensure_stream(client.as_ref(), &identity).await?;

        let (queue, receiver) = queue::bounded(config.queue_capacity);
        let worker = Worker::new(
            BatchAssembler::new(receiver, config.max_batch_size, config.max_batch_wait()),
            RemoteWriter::new(Arc::clone(&client), identity.clone()),
            Arc::clone(&self.inner.stats),
        );
        lifecycle.worker = Some(worker.spawn());
        lifecycle.client = Some(client);

        *self.producer_slot_mut() = Some(Producer {
            queue,
            formatter,
            runtime: Handle::current(),
        });

        if config.shutdown_hook {
            let appender = Arc::downgrade(&self.inner);
            let on_shutdown = move || async move {
                if let Some(inner) = appender.upgrade() {
                    Appender { inner }.shutdown(StopOrigin::ShutdownHook).await;
                }
            };
            lifecycle.hook = Some(match lifecycle.shutdown_trigger.take() {
                Some(trigger) => ShutdownHook::register(trigger, on_shutdown),
                None => ShutdownHook::on_termination(on_shutdown),
            });
        }

        Ok(identity)
    }

    fn resolve_formatter(&self) -> Arc<dyn Formatter> {
        if let Some(formatter) = &self.inner.formatter {
            return Arc::clone(formatter);
        }
        match self.inner.config.pattern.as_deref().map(str::trim) {
            Some(pattern) if !pattern.is_empty() => Arc::new(PatternFormatter::new(pattern)),
            _ => {
                warn!(
                    "No formatter configured for appender {}, using [LEVEL] message",
                    self.inner.name
                );
                Arc::new(EchoFormatter)
            }
        }
    }

    async fn resolve_client(
        &self,
        lifecycle: &mut Lifecycle,
        identity: &StreamIdentity,
    ) -> Result<Arc<dyn LogStreamClient>, StartError> {
        if let Some(client) = lifecycle.client.take() {
            return Ok(client);
        }

        #[cfg(feature = "cloudwatch")]
        {
            let client: Arc<dyn LogStreamClient> =
                Arc::new(crate::cloudwatch::CloudWatchLogsClient::new(&identity.region).await);
            Ok(client)
        }

        #[cfg(not(feature = "cloudwatch"))]
        {
            let _ = identity;
            Err(StartError::ClientUnavailable(
                "built without the cloudwatch feature".to_string(),
            ))
        }
    }

    /// Stops the worker, flushing what is queued within the configured flush time.
    ///
    /// Calling it again, or on an appender that never started, does nothing.
    pub async fn stop(&self) {
        self.shutdown(StopOrigin::Caller).await;
    }

    async fn shutdown(&self, origin: StopOrigin) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if self.state() != AppenderState::Started {
            return;
        }
        debug!("Stopping appender {} ({:?})", self.inner.name, origin);

        // new records are refused from here on
        let producer = self.producer_slot_mut().take();

        if let Some(mut worker) = lifecycle.worker.take() {
            worker.stop_gracefully();
            let max_flush_time = self.inner.config.max_flush_time();
            if !worker.join(max_flush_time).await {
                let pending = producer.as_ref().map_or(0, |p| p.queue.len());
                warn!(
                    "Appender {} did not flush within {:?}, approximately {} events may be discarded",
                    self.inner.name, max_flush_time, pending
                );
                worker.abort();
            }
        }

        match (lifecycle.hook.take(), origin) {
            (Some(hook), StopOrigin::Caller) => hook.unregister(),
            // dropping the handle detaches the hook task, which is the one running this
            (Some(_), StopOrigin::ShutdownHook) | (None, _) => {}
        }

        drop(producer);
        lifecycle.client = None;
        self.set_state(AppenderState::Stopped);
        info!("Appender {} stopped", self.inner.name);
    }

    /// Formats and queues `event`, waiting up to the submit timeout for space.
    ///
    /// Returns whether the record was accepted.
    pub async fn append(&self, event: &LogEvent) -> bool {
        let Some(producer) = self.producer() else {
            return self.reject_unstarted();
        };
        let record = LogRecord::new(event.timestamp_millis, producer.formatter.format(event));
        let result = producer
            .queue
            .submit(record, self.inner.config.submit_timeout())
            .await;
        self.account(result)
    }

    /// [`Appender::append`] for synchronous call sites.
    ///
    /// Waits up to the submit timeout for space, both off the runtime and on a
    /// multi-thread runtime worker. A current-thread runtime cannot block without
    /// stalling the worker, so there the record is only queued if space is available now.
    pub fn append_blocking(&self, event: &LogEvent) -> bool {
        let Some(producer) = self.producer() else {
            return self.reject_unstarted();
        };
        let record = LogRecord::new(event.timestamp_millis, producer.formatter.format(event));
        let submit_timeout = self.inner.config.submit_timeout();
        let result = match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| {
                    producer
                        .runtime
                        .block_on(producer.queue.submit(record, submit_timeout))
                })
            }
            Ok(_) => producer.queue.try_submit(record),
            Err(_) => producer
                .runtime
                .block_on(producer.queue.submit(record, submit_timeout)),
        };
        self.account(result)
    }

    /// Queues an already formatted record, waiting up to the submit timeout for space.
    pub async fn submit(&self, record: LogRecord) -> bool {
        let Some(producer) = self.producer() else {
            return self.reject_unstarted();
        };
        let result = producer
            .queue
            .submit(record, self.inner.config.submit_timeout())
            .await;
        self.account(result)
    }

    fn account(&self, result: Result<(), SubmitError>) -> bool {
        match result {
            Ok(()) => {
                self.inner.stats.record_accepted();
                true
            }
            Err(e) => {
                self.inner.stats.record_dropped();
                warn!(
                    "Appender {} dropped an event: {}. About {} events dropped so far",
                    self.inner.name,
                    e,
                    self.inner.stats.snapshot().dropped
                );
                false
            }
        }
    }

    fn reject_unstarted(&self) -> bool {
        self.inner.stats.record_dropped();
        false
    }

    fn producer(&self) -> Option<Producer> {
        self.inner
            .producer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn producer_slot_mut(&self) -> std::sync::RwLockWriteGuard<'_, Option<Producer>> {
        self.inner
            .producer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: AppenderState) {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// How long [`Appender::stop`] waits for the final flush.
    pub fn max_flush_time(&self) -> Duration {
        self.inner.config.max_flush_time()
    }
}
