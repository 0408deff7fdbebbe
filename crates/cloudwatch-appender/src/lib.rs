// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous appender shipping log records to an append-only log stream.
//!
//! The stream service (CloudWatch Logs being the reference implementation) orders writes
//! through a rotating sequence token. The appender buffers records in a bounded queue, a
//! single background worker assembles them into timestamp-sorted batches and writes them,
//! recovering from token conflicts with exactly one retry.
//!
//! ```text
//!   producers ──► EventQueue ──► BatchAssembler ──► RemoteWriter ──► LogStreamClient
//!                 (bounded)       (size / time)      (token retry)
//!                                 └──────────── Worker ────────────┘
//! ```
//!
//! The [`appender::Appender`] owns the lifecycle: configuration validation, idempotent
//! creation of the group and stream, worker start and bounded graceful stop.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod appender;
pub mod batch;
pub mod client;
#[cfg(feature = "cloudwatch")]
pub mod cloudwatch;
pub mod config;
pub mod constants;
pub mod errors;
pub mod formatter;
pub mod layer;
pub mod memory;
pub mod queue;
pub mod record;
pub mod shutdown_hook;
pub mod stats;
pub mod worker;
pub mod writer;

pub use appender::{Appender, AppenderBuilder, AppenderState};
pub use config::AppenderConfig;
pub use layer::CloudWatchLayer;
pub use record::{LogEvent, LogRecord, SequenceToken, StreamIdentity};
