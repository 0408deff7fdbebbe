// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns a [`LogEvent`] into the message text of a record.

use std::fmt::Debug;

use crate::record::LogEvent;

pub trait Formatter: Debug + Send + Sync {
    fn format(&self, event: &LogEvent) -> String;
}

/// `[LEVEL] message`. Used when nothing else is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoFormatter;

impl Formatter for EchoFormatter {
    fn format(&self, event: &LogEvent) -> String {
        format!("[{}] {}", event.level, event.message)
    }
}

/// Substitutes `{timestamp}`, `{level}`, `{target}` and `{message}` in a pattern.
///
/// `{timestamp}` renders as milliseconds since the Unix epoch. Unknown placeholders are
/// kept as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternFormatter {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Timestamp,
    Level,
    Target,
    Message,
}

impl PatternFormatter {
    pub fn new(pattern: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = pattern;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open..];
            let Some(close) = after.find('}') else {
                literal.push_str(after);
                rest = "";
                break;
            };
            let placeholder = match &after[1..close] {
                "timestamp" => Some(Segment::Timestamp),
                "level" => Some(Segment::Level),
                "target" => Some(Segment::Target),
                "message" => Some(Segment::Message),
                _ => None,
            };
            match placeholder {
                Some(segment) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
                None => literal.push_str(&after[..=close]),
            }
            rest = &after[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self { segments }
    }
}

impl Formatter for PatternFormatter {
    fn format(&self, event: &LogEvent) -> String {
        let mut out = String::with_capacity(event.message.len() + 32);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Timestamp => out.push_str(&event.timestamp_millis.to_string()),
                Segment::Level => out.push_str(event.level.as_str()),
                Segment::Target => out.push_str(&event.target),
                Segment::Message => out.push_str(&event.message),
            }
        }
        out
    }
}
