// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults and service limits.

use std::time::Duration;

/// Name given to an appender when none is configured.
pub const DEFAULT_APPENDER_NAME: &str = "CLOUDWATCH";

/// Region used when the configuration leaves it unset.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Maximum number of records written in one batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 512;

/// How long the worker keeps collecting records for a batch.
pub const DEFAULT_MAX_BATCH_WAIT: Duration = Duration::from_millis(1000);

/// Capacity of the ingestion queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8192;

/// Budget for the final drain when the appender stops.
pub const DEFAULT_MAX_FLUSH_TIME: Duration = Duration::from_millis(3000);

/// How long a producer waits for queue space before the record is dropped.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Maximum number of events the service accepts in a single put.
pub const MAX_BATCH_EVENTS: usize = 10_000;

/// Maximum payload of a single put, in bytes.
pub const MAX_BATCH_BYTES: usize = 1024 * 1024;

/// Bytes the service adds to each event when measuring a batch.
pub const EVENT_OVERHEAD_BYTES: usize = 26;
