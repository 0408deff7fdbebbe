// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` integration: ships the events of the host application through an
//! [`Appender`].

use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::appender::Appender;
use crate::record::LogEvent;

/// Targets whose events are never shipped. This crate's own diagnostics and those of the
/// HTTP and AWS stack it runs on would otherwise loop back into the stream.
const INTERNAL_TARGETS: &[&str] = &[
    "cloudwatch_appender",
    "aws_config",
    "aws_credential_types",
    "aws_runtime",
    "aws_sdk_cloudwatchlogs",
    "aws_smithy_runtime",
    "aws_smithy_http",
    "aws_sigv4",
    "h2",
    "hyper",
    "hyper_util",
    "rustls",
    "tokio",
    "tower",
];

#[derive(Debug, Clone)]
pub struct CloudWatchLayer {
    appender: Appender,
    max_level: Level,
}

impl CloudWatchLayer {
    pub fn new(appender: Appender) -> Self {
        Self {
            appender,
            max_level: Level::TRACE,
        }
    }

    /// Ships only events at `level` or more severe.
    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }
}

fn is_internal(target: &str) -> bool {
    INTERNAL_TARGETS.iter().any(|internal| {
        target
            .strip_prefix(internal)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

impl<S: Subscriber> Layer<S> for CloudWatchLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.max_level || is_internal(metadata.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let event = LogEvent::new(*metadata.level(), metadata.target(), visitor.finish());
        // drops are counted and reported by the appender itself
        let _ = self.appender.append_blocking(&event);
    }
}

/// Renders the `message` field followed by the other fields as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(mut self) -> String {
        if self.message.is_empty() {
            return self.fields;
        }
        if !self.fields.is_empty() {
            self.message.push(' ');
            self.message.push_str(&self.fields);
        }
        self.message
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={:?}", field.name(), value);
    }
}
