// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Records, events and stream identifiers shared by the pipeline.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::Level;

use crate::constants::EVENT_OVERHEAD_BYTES;

/// A formatted log line ready to be shipped.
///
/// Records are immutable once created; the worker consumes and discards them after the
/// batch they belong to has been written or abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp_millis: i64,
    pub message: String,
}

impl LogRecord {
    pub fn new(timestamp_millis: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp_millis,
            message: message.into(),
        }
    }

    /// Creates a record stamped with the current wall-clock time.
    pub fn now(message: impl Into<String>) -> Self {
        Self::new(now_millis(), message)
    }

    /// Size the service accounts for this record inside a batch.
    pub fn encoded_size(&self) -> usize {
        self.message.len() + EVENT_OVERHEAD_BYTES
    }

    /// Cuts the message at a character boundary so that the encoded size is at most
    /// `max_encoded_size`. Returns whether anything was cut.
    pub fn truncate_to_fit(&mut self, max_encoded_size: usize) -> bool {
        if self.encoded_size() <= max_encoded_size {
            return false;
        }
        let mut end = max_encoded_size.saturating_sub(EVENT_OVERHEAD_BYTES);
        while !self.message.is_char_boundary(end) {
            end -= 1;
        }
        self.message.truncate(end);
        true
    }
}

/// An unformatted event handed over by a host logging framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub timestamp_millis: i64,
    pub level: Level,
    pub target: String,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: Level, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp_millis: now_millis(),
            level,
            target: target.into(),
            message: message.into(),
        }
    }
}

/// Opaque continuation token the stream requires on every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceToken(String);

impl SequenceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SequenceToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for SequenceToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Destination of the appender. Fixed for the appender's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamIdentity {
    pub group_name: String,
    pub stream_name: String,
    pub region: String,
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.group_name, self.stream_name, self.region)
    }
}

/// Milliseconds since the Unix epoch, saturating on clocks set before 1970.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
