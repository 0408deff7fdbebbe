// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Forwards every line read on stdin to a CloudWatch log stream.
//!
//! Configured through the `LOGGING_CLOUDWATCH_*` environment variables. Runs until stdin
//! is closed or a termination signal arrives, then flushes and exits.

use std::env;
use std::io::{self, BufRead};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use cloudwatch_appender::shutdown_hook::termination_signal;
use cloudwatch_appender::{Appender, AppenderConfig, LogRecord};

const LINE_BUFFER: usize = 1024;

/// Reads lines on a dedicated thread.
///
/// A blocking read cannot be cancelled, so it must not live on the runtime: dropping the
/// runtime would wait for the next line. The thread ends after EOF, a read error or once
/// the receiver is gone.
fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    let spawned = thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        error!("Failed to start the stdin reader: {}", e);
    }
    rx
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOGGING_CLOUDWATCH_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!(
        "h2=off,hyper=off,rustls=off,aws_config=warn,aws_smithy_runtime=warn,{}",
        log_level
    );

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let mut config = AppenderConfig::from_env();
    if !config.enabled {
        info!("CloudWatch forwarding is disabled, exiting");
        return;
    }
    // termination is handled below so the final flush happens before exit
    config.shutdown_hook = false;

    let appender = Appender::builder(config).build();
    if appender.start().await.is_err() {
        return;
    }

    let mut lines = spawn_line_reader(io::BufReader::new(io::stdin()));
    let terminate = termination_signal();
    tokio::pin!(terminate);
    let mut listening = true;
    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => {
                    appender.submit(LogRecord::now(line)).await;
                }
                Some(Err(e)) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
                None => {
                    debug!("stdin closed");
                    break;
                }
            },
            signal = &mut terminate, if listening => match signal {
                Some(signal) => {
                    info!("Received {:?}, flushing", signal);
                    break;
                }
                None => listening = false,
            },
        }
    }

    appender.stop().await;

    let stats = appender.stats();
    info!(
        "Forwarded {} events in {} batches ({} dropped, {} abandoned)",
        stats.delivered_events, stats.delivered_batches, stats.dropped, stats.abandoned_events
    );
}
