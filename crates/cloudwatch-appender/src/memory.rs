// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process log stream service.
//!
//! Enforces the same sequence-token discipline as the real service: a put must carry the
//! token returned by the previous put on that stream, a replay of the last accepted batch
//! is answered with [`ConflictKind::AlreadyAccepted`] and any other mismatch with
//! [`ConflictKind::StaleToken`]. Every put is recorded, and responses or latency can be
//! scripted to exercise failure paths.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{LogStreamClient, ResourceStatus};
use crate::errors::{ConflictKind, PutError, ServiceError};
use crate::record::{LogRecord, SequenceToken};

/// A put as received by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutCall {
    pub group: String,
    pub stream: String,
    pub token: Option<SequenceToken>,
    pub events: Vec<LogRecord>,
}

#[derive(Debug, Default)]
struct StreamState {
    events: Vec<LogRecord>,
    next_token: Option<SequenceToken>,
    last_accepted: Option<(Option<SequenceToken>, Vec<LogRecord>)>,
}

impl StreamState {
    fn accept(
        &mut self,
        token: Option<&SequenceToken>,
        events: &[LogRecord],
        next: Option<SequenceToken>,
    ) {
        self.events.extend_from_slice(events);
        self.last_accepted = Some((token.cloned(), events.to_vec()));
        self.next_token = next;
    }
}

#[derive(Debug, Default)]
struct State {
    groups: HashMap<String, HashMap<String, StreamState>>,
    put_calls: Vec<PutCall>,
    scripted_puts: VecDeque<Result<Option<SequenceToken>, PutError>>,
    scripted_creates: VecDeque<ServiceError>,
    put_delay: Option<Duration>,
    issued_tokens: u64,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryLogService {
    state: Arc<Mutex<State>>,
}

impl InMemoryLogService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues the response of a future put, ahead of the token checks.
    ///
    /// A scripted success is applied to the stream as if the service had accepted it.
    pub fn script_put(&self, response: Result<Option<SequenceToken>, PutError>) {
        self.lock().scripted_puts.push_back(response);
    }

    pub fn fail_next_put(&self, error: PutError) {
        self.script_put(Err(error));
    }

    pub fn fail_next_create(&self, error: ServiceError) {
        self.lock().scripted_creates.push_back(error);
    }

    /// Delays every put, simulating a slow service.
    pub fn set_put_delay(&self, delay: Duration) {
        self.lock().put_delay = Some(delay);
    }

    /// Moves the stream's expected token, as another writer would.
    pub fn set_expected_token(&self, group: &str, stream: &str, token: Option<SequenceToken>) {
        let mut state = self.lock();
        let stream_state = state
            .groups
            .entry(group.to_string())
            .or_default()
            .entry(stream.to_string())
            .or_default();
        stream_state.next_token = token;
    }

    pub fn expected_token(&self, group: &str, stream: &str) -> Option<SequenceToken> {
        self.lock()
            .groups
            .get(group)
            .and_then(|streams| streams.get(stream))
            .and_then(|s| s.next_token.clone())
    }

    pub fn has_stream(&self, group: &str, stream: &str) -> bool {
        self.lock()
            .groups
            .get(group)
            .is_some_and(|streams| streams.contains_key(stream))
    }

    /// Events accepted on a stream, in write order.
    pub fn events(&self, group: &str, stream: &str) -> Vec<LogRecord> {
        self.lock()
            .groups
            .get(group)
            .and_then(|streams| streams.get(stream))
            .map(|s| s.events.clone())
            .unwrap_or_default()
    }

    pub fn put_calls(&self) -> Vec<PutCall> {
        self.lock().put_calls.clone()
    }

    fn next_scripted_create(&self) -> Option<ServiceError> {
        self.lock().scripted_creates.pop_front()
    }
}

#[async_trait]
impl LogStreamClient for InMemoryLogService {
    async fn create_log_group(&self, group: &str) -> Result<ResourceStatus, ServiceError> {
        if let Some(error) = self.next_scripted_create() {
            return Err(error);
        }
        let mut state = self.lock();
        if state.groups.contains_key(group) {
            return Ok(ResourceStatus::AlreadyExists);
        }
        state.groups.insert(group.to_string(), HashMap::new());
        Ok(ResourceStatus::Created)
    }

    async fn create_log_stream(
        &self,
        group: &str,
        stream: &str,
    ) -> Result<ResourceStatus, ServiceError> {
        if let Some(error) = self.next_scripted_create() {
            return Err(error);
        }
        let mut state = self.lock();
        let Some(streams) = state.groups.get_mut(group) else {
            return Err(ServiceError::Transport(format!(
                "log group {group} does not exist"
            )));
        };
        if streams.contains_key(stream) {
            return Ok(ResourceStatus::AlreadyExists);
        }
        streams.insert(stream.to_string(), StreamState::default());
        Ok(ResourceStatus::Created)
    }

    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogRecord],
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>, PutError> {
        let delay = self.lock().put_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.put_calls.push(PutCall {
            group: group.to_string(),
            stream: stream.to_string(),
            token: token.cloned(),
            events: events.to_vec(),
        });

        let State {
            groups,
            scripted_puts,
            issued_tokens,
            ..
        } = &mut *state;

        let stream_state = groups.get_mut(group).and_then(|s| s.get_mut(stream));

        if let Some(response) = scripted_puts.pop_front() {
            if let (Ok(next), Some(stream_state)) = (&response, stream_state) {
                stream_state.accept(token, events, next.clone());
            }
            return response;
        }

        let Some(stream_state) = stream_state else {
            return Err(PutError::Transport(format!(
                "log stream {group}/{stream} does not exist"
            )));
        };

        if token != stream_state.next_token.as_ref() {
            let kind = match &stream_state.last_accepted {
                Some((accepted_token, accepted_events))
                    if accepted_token.as_ref() == token && accepted_events == events =>
                {
                    ConflictKind::AlreadyAccepted
                }
                _ => ConflictKind::StaleToken,
            };
            return Err(PutError::Conflict {
                kind,
                expected_token: stream_state.next_token.clone(),
            });
        }

        *issued_tokens += 1;
        let next = SequenceToken::new(format!("{:020}", *issued_tokens));
        stream_state.accept(token, events, Some(next.clone()));
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service_with_stream() -> InMemoryLogService {
        let service = InMemoryLogService::new();
        service.create_log_group("g").await.expect("group");
        service.create_log_stream("g", "s").await.expect("stream");
        service
    }

    fn events(stamps: &[i64]) -> Vec<LogRecord> {
        stamps.iter().map(|ts| LogRecord::new(*ts, "m")).collect()
    }

    #[tokio::test]
    async fn test_create_reports_existing_resources() {
        let service = InMemoryLogService::new();
        assert_eq!(
            service.create_log_group("g").await,
            Ok(ResourceStatus::Created)
        );
        assert_eq!(
            service.create_log_group("g").await,
            Ok(ResourceStatus::AlreadyExists)
        );
        assert_eq!(
            service.create_log_stream("g", "s").await,
            Ok(ResourceStatus::Created)
        );
        assert_eq!(
            service.create_log_stream("g", "s").await,
            Ok(ResourceStatus::AlreadyExists)
        );
    }

    #[tokio::test]
    async fn test_create_stream_requires_group() {
        let service = InMemoryLogService::new();
        assert!(service.create_log_stream("missing", "s").await.is_err());
    }

    #[tokio::test]
    async fn test_put_chains_tokens() {
        let service = service_with_stream().await;

        let first = service
            .put_log_events("g", "s", &events(&[1]), None)
            .await
            .expect("first put");
        let second = service
            .put_log_events("g", "s", &events(&[2]), first.as_ref())
            .await
            .expect("second put");

        assert_ne!(first, second);
        assert_eq!(service.expected_token("g", "s"), second);
        assert_eq!(service.events("g", "s"), events(&[1, 2]));
    }

    #[tokio::test]
    async fn test_put_with_stale_token_conflicts() {
        let service = service_with_stream().await;
        let first = service
            .put_log_events("g", "s", &events(&[1]), None)
            .await
            .expect("first put");

        let result = service
            .put_log_events("g", "s", &events(&[2]), None)
            .await;
        assert_eq!(
            result,
            Err(PutError::Conflict {
                kind: ConflictKind::StaleToken,
                expected_token: first,
            })
        );
    }

    #[tokio::test]
    async fn test_replayed_batch_is_already_accepted() {
        let service = service_with_stream().await;
        let first = service
            .put_log_events("g", "s", &events(&[1]), None)
            .await
            .expect("first put");

        let result = service
            .put_log_events("g", "s", &events(&[1]), None)
            .await;
        assert_eq!(
            result,
            Err(PutError::Conflict {
                kind: ConflictKind::AlreadyAccepted,
                expected_token: first,
            })
        );
        assert_eq!(service.events("g", "s").len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_responses_take_precedence() {
        let service = service_with_stream().await;
        service.fail_next_put(PutError::Transport("boom".to_string()));
        service.script_put(Ok(Some(SequenceToken::new("T9"))));

        let failed = service
            .put_log_events("g", "s", &events(&[1]), None)
            .await;
        assert_eq!(failed, Err(PutError::Transport("boom".to_string())));

        let scripted = service
            .put_log_events("g", "s", &events(&[2]), None)
            .await;
        assert_eq!(scripted, Ok(Some(SequenceToken::new("T9"))));
        assert_eq!(
            service.expected_token("g", "s"),
            Some(SequenceToken::new("T9"))
        );
        assert_eq!(service.events("g", "s"), events(&[2]));
        assert_eq!(service.put_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_put_to_missing_stream_fails() {
        let service = InMemoryLogService::new();
        let result = service
            .put_log_events("g", "s", &events(&[1]), None)
            .await;
        assert!(matches!(result, Err(PutError::Transport(_))));
    }
}
