// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Best-effort flush on process termination.
//!
//! A registered hook is a task waiting on a trigger that runs its callback once the
//! trigger fires. Listening for Ctrl-C or SIGTERM replaces the default handling of those
//! signals for the rest of the process, so the signal-driven hook ends the process itself
//! once the callback returns, exiting with the conventional `128 + signal` status.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub type ShutdownTrigger = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Signal hooks that still have a flush to run. The last one to finish exits.
static ARMED_TERMINATION_HOOKS: AtomicUsize = AtomicUsize::new(0);

/// A signal that asks the process to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Interrupt,
    Terminate,
}

impl Termination {
    /// Exit status of a process ended by this signal.
    pub fn exit_code(self) -> i32 {
        match self {
            Termination::Interrupt => 128 + 2,
            Termination::Terminate => 128 + 15,
        }
    }
}

#[derive(Debug)]
pub struct ShutdownHook {
    task: JoinHandle<()>,
    armed: Arc<AtomicBool>,
    exits_process: bool,
}

impl ShutdownHook {
    /// Runs `on_shutdown` once `trigger` resolves. The process keeps running afterwards.
    pub fn register<T, F, Fut>(trigger: T, on_shutdown: F) -> Self
    where
        T: Future<Output = ()> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let armed = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&armed);
        let task = tokio::spawn(async move {
            trigger.await;
            if flag.swap(false, Ordering::SeqCst) {
                debug!("Shutdown hook triggered");
                on_shutdown().await;
            }
        });
        Self {
            task,
            armed,
            exits_process: false,
        }
    }

    /// Runs `on_shutdown` on Ctrl-C or SIGTERM, then exits the process.
    ///
    /// Unregistering only disarms the callback: the signal still ends the process, once
    /// every other armed signal hook has flushed.
    pub fn on_termination<F, Fut>(on_shutdown: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        ARMED_TERMINATION_HOOKS.fetch_add(1, Ordering::SeqCst);
        let armed = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&armed);
        let task = tokio::spawn(async move {
            let Some(signal) = termination_signal().await else {
                return;
            };
            if flag.swap(false, Ordering::SeqCst) {
                debug!("Shutdown hook triggered by {:?}", signal);
                on_shutdown().await;
                if ARMED_TERMINATION_HOOKS.fetch_sub(1, Ordering::SeqCst) > 1 {
                    return;
                }
            } else if ARMED_TERMINATION_HOOKS.load(Ordering::SeqCst) > 0 {
                return;
            }
            info!(
                "Exiting with status {} after {:?}",
                signal.exit_code(),
                signal
            );
            std::process::exit(signal.exit_code());
        });
        Self {
            task,
            armed,
            exits_process: true,
        }
    }

    pub fn unregister(self) {
        let was_armed = self.armed.swap(false, Ordering::SeqCst);
        if !self.exits_process {
            self.task.abort();
        } else if was_armed {
            ARMED_TERMINATION_HOOKS.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Resolves on Ctrl-C or on SIGTERM.
///
/// Resolves to `None` if no signal can be listened for.
#[cfg(unix)]
pub async fn termination_signal() -> Option<Termination> {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => interrupted(result),
                _ = sigterm.recv() => {
                    debug!("Received SIGTERM");
                    Some(Termination::Terminate)
                }
            }
        }
        Err(e) => {
            error!("Failed to listen for SIGTERM: {}", e);
            interrupted(tokio::signal::ctrl_c().await)
        }
    }
}

/// Resolves on Ctrl-C, or to `None` if it cannot be listened for.
#[cfg(not(unix))]
pub async fn termination_signal() -> Option<Termination> {
    interrupted(tokio::signal::ctrl_c().await)
}

fn interrupted(result: std::io::Result<()>) -> Option<Termination> {
    match result {
        Ok(()) => {
            debug!("Received Ctrl-C");
            Some(Termination::Interrupt)
        }
        Err(e) => {
            error!("Failed to listen for Ctrl-C: {}", e);
            None
        }
    }
}
