// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Appender settings, from a deserialized document or from `LOGGING_CLOUDWATCH_*`
//! environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::constants::{
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_BATCH_WAIT, DEFAULT_MAX_FLUSH_TIME,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_REGION, DEFAULT_SUBMIT_TIMEOUT, MAX_BATCH_EVENTS,
};
use crate::errors::StartError;
use crate::record::StreamIdentity;

const ENV_PREFIX: &str = "LOGGING_CLOUDWATCH_";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppenderConfig {
    /// Master switch. A disabled appender is never started.
    pub enabled: bool,
    pub log_group: String,
    pub log_stream: String,
    pub region: Option<String>,
    /// Handed to the pattern formatter when no formatter is supplied.
    pub pattern: Option<String>,
    pub max_batch_size: usize,
    pub max_batch_wait_ms: u64,
    pub queue_capacity: usize,
    pub max_flush_time_ms: u64,
    /// How long a producer waits for queue space before the record is dropped.
    pub submit_timeout_ms: u64,
    /// Whether to flush the appender on Ctrl-C or SIGTERM and then exit the process.
    ///
    /// Off by default: listening for those signals takes them over for the whole process.
    pub shutdown_hook: bool,
}

impl Default for AppenderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_group: String::new(),
            log_stream: String::new(),
            region: None,
            pattern: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_wait_ms: millis(DEFAULT_MAX_BATCH_WAIT),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_flush_time_ms: millis(DEFAULT_MAX_FLUSH_TIME),
            submit_timeout_ms: millis(DEFAULT_SUBMIT_TIMEOUT),
            shutdown_hook: false,
        }
    }
}

impl AppenderConfig {
    pub fn new(log_group: impl Into<String>, log_stream: impl Into<String>) -> Self {
        Self {
            log_group: log_group.into(),
            log_stream: log_stream.into(),
            ..Self::default()
        }
    }

    /// Reads every option from the environment, keeping the default for anything unset
    /// or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_parse("ENABLED").unwrap_or(defaults.enabled),
            log_group: env_string("LOG_GROUP").unwrap_or_default(),
            log_stream: env_string("LOG_STREAM").unwrap_or_default(),
            region: env_string("REGION"),
            pattern: env_string("PATTERN"),
            max_batch_size: env_parse("MAX_BATCH_SIZE").unwrap_or(defaults.max_batch_size),
            max_batch_wait_ms: env_parse("MAX_BATCH_WAIT_MS")
                .unwrap_or(defaults.max_batch_wait_ms),
            queue_capacity: env_parse("QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
            max_flush_time_ms: env_parse("MAX_FLUSH_TIME_MS")
                .unwrap_or(defaults.max_flush_time_ms),
            submit_timeout_ms: env_parse("SUBMIT_TIMEOUT_MS")
                .unwrap_or(defaults.submit_timeout_ms),
            shutdown_hook: env_parse("SHUTDOWN_HOOK").unwrap_or(defaults.shutdown_hook),
        }
    }

    /// Checks the settings and resolves the stream the appender writes to.
    ///
    /// A missing region falls back to `us-east-1` with a warning.
    pub fn validate(&self, appender_name: &str) -> Result<StreamIdentity, StartError> {
        let group_name = self.log_group.trim();
        if group_name.is_empty() {
            return Err(StartError::MissingLogGroup(appender_name.to_string()));
        }
        let stream_name = self.log_stream.trim();
        if stream_name.is_empty() {
            return Err(StartError::MissingLogStream(appender_name.to_string()));
        }

        if self.max_batch_size == 0 || self.max_batch_size > MAX_BATCH_EVENTS {
            return Err(StartError::InvalidSetting(format!(
                "maxBatchSize must be between 1 and {MAX_BATCH_EVENTS}, got {}",
                self.max_batch_size
            )));
        }
        if self.queue_capacity == 0 {
            return Err(StartError::InvalidSetting(
                "queueCapacity must be positive".to_string(),
            ));
        }
        if self.max_batch_wait_ms == 0 {
            return Err(StartError::InvalidSetting(
                "maxBatchWaitMs must be positive".to_string(),
            ));
        }
        if self.max_flush_time_ms == 0 {
            return Err(StartError::InvalidSetting(
                "maxFlushTimeMs must be positive".to_string(),
            ));
        }

        let region = match self.region.as_deref().map(str::trim) {
            Some(region) if !region.is_empty() => region.to_string(),
            _ => {
                warn!(
                    "No region set for appender {}, using {}",
                    appender_name, DEFAULT_REGION
                );
                DEFAULT_REGION.to_string()
            }
        };

        Ok(StreamIdentity {
            group_name: group_name.to_string(),
            stream_name: stream_name.to_string(),
            region,
        })
    }

    pub fn max_batch_wait(&self) -> Duration {
        Duration::from_millis(self.max_batch_wait_ms)
    }

    pub fn max_flush_time(&self) -> Duration {
        Duration::from_millis(self.max_flush_time_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn env_string(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|value| value.to_lowercase().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tracing_test::traced_test;

    const VARS: [&str; 11] = [
        "ENABLED",
        "LOG_GROUP",
        "LOG_STREAM",
        "REGION",
        "PATTERN",
        "MAX_BATCH_SIZE",
        "MAX_BATCH_WAIT_MS",
        "QUEUE_CAPACITY",
        "MAX_FLUSH_TIME_MS",
        "SUBMIT_TIMEOUT_MS",
        "SHUTDOWN_HOOK",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(format!("{ENV_PREFIX}{var}"));
        }
    }

    #[test]
    fn test_defaults() {
        let config = AppenderConfig::default();
        assert!(config.enabled);
        assert!(!config.shutdown_hook);
        assert_eq!(config.max_batch_size, 512);
        assert_eq!(config.max_batch_wait(), Duration::from_millis(1000));
        assert_eq!(config.queue_capacity, 8192);
        assert_eq!(config.max_flush_time(), Duration::from_millis(3000));
        assert_eq!(config.submit_timeout(), Duration::from_millis(3000));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_all_options() {
        clear_env();
        env::set_var("LOGGING_CLOUDWATCH_ENABLED", "FALSE");
        env::set_var("LOGGING_CLOUDWATCH_LOG_GROUP", "app-logs");
        env::set_var("LOGGING_CLOUDWATCH_LOG_STREAM", "instance-1");
        env::set_var("LOGGING_CLOUDWATCH_REGION", "eu-west-1");
        env::set_var("LOGGING_CLOUDWATCH_PATTERN", "{level} {message}");
        env::set_var("LOGGING_CLOUDWATCH_MAX_BATCH_SIZE", "100");
        env::set_var("LOGGING_CLOUDWATCH_MAX_BATCH_WAIT_MS", "250");
        env::set_var("LOGGING_CLOUDWATCH_QUEUE_CAPACITY", "1024");
        env::set_var("LOGGING_CLOUDWATCH_MAX_FLUSH_TIME_MS", "5000");
        env::set_var("LOGGING_CLOUDWATCH_SUBMIT_TIMEOUT_MS", "10");
        env::set_var("LOGGING_CLOUDWATCH_SHUTDOWN_HOOK", "true");

        let config = AppenderConfig::from_env();
        assert_eq!(
            config,
            AppenderConfig {
                enabled: false,
                log_group: "app-logs".to_string(),
                log_stream: "instance-1".to_string(),
                region: Some("eu-west-1".to_string()),
                pattern: Some("{level} {message}".to_string()),
                max_batch_size: 100,
                max_batch_wait_ms: 250,
                queue_capacity: 1024,
                max_flush_time_ms: 5000,
                submit_timeout_ms: 10,
                shutdown_hook: true,
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_falls_back_on_unparseable_numbers() {
        clear_env();
        env::set_var("LOGGING_CLOUDWATCH_MAX_BATCH_SIZE", "lots");
        env::set_var("LOGGING_CLOUDWATCH_QUEUE_CAPACITY", "-5");
        env::set_var("LOGGING_CLOUDWATCH_REGION", "   ");

        let config = AppenderConfig::from_env();
        assert_eq!(config.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.region, None);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_signal_handling_is_opt_in() {
        clear_env();
        env::set_var("LOGGING_CLOUDWATCH_LOG_GROUP", "app-logs");
        env::set_var("LOGGING_CLOUDWATCH_LOG_STREAM", "instance-1");

        assert!(!AppenderConfig::from_env().shutdown_hook);
        assert!(!AppenderConfig::new("app-logs", "instance-1").shutdown_hook);
        let config: AppenderConfig =
            serde_json::from_str(r#"{"logGroup": "g", "logStream": "s"}"#).expect("valid config");
        assert!(!config.shutdown_hook);
        clear_env();
    }

    #[test]
    fn test_deserialize_camel_case_with_defaults() {
        let config: AppenderConfig = serde_json::from_str(
            r#"{"logGroup": "g", "logStream": "s", "maxBatchSize": 64, "shutdownHook": true}"#,
        )
        .expect("valid config");
        assert_eq!(config.log_group, "g");
        assert_eq!(config.log_stream, "s");
        assert_eq!(config.max_batch_size, 64);
        assert!(config.shutdown_hook);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(config.enabled);
    }

    #[test]
    fn test_validate_requires_group_and_stream() {
        assert_eq!(
            AppenderConfig::new("", "s").validate("CW"),
            Err(StartError::MissingLogGroup("CW".to_string()))
        );
        assert_eq!(
            AppenderConfig::new("g", "  ").validate("CW"),
            Err(StartError::MissingLogStream("CW".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut config = AppenderConfig::new("g", "s");
        config.max_batch_size = MAX_BATCH_EVENTS + 1;
        assert!(matches!(
            config.validate("CW"),
            Err(StartError::InvalidSetting(_))
        ));

        let mut config = AppenderConfig::new("g", "s");
        config.queue_capacity = 0;
        assert!(matches!(
            config.validate("CW"),
            Err(StartError::InvalidSetting(_))
        ));

        let mut config = AppenderConfig::new("g", "s");
        config.max_flush_time_ms = 0;
        assert!(matches!(
            config.validate("CW"),
            Err(StartError::InvalidSetting(_))
        ));
    }

    #[test]
    #[traced_test]
    fn test_validate_defaults_region_with_warning() {
        let identity = AppenderConfig::new(" g ", "s")
            .validate("CW")
            .expect("valid");
        assert_eq!(identity.group_name, "g");
        assert_eq!(identity.region, DEFAULT_REGION);
        assert!(logs_contain("No region set for appender CW"));
    }

    #[test]
    fn test_validate_keeps_configured_region() {
        let mut config = AppenderConfig::new("g", "s");
        config.region = Some("ap-southeast-2".to_string());
        let identity = config.validate("CW").expect("valid");
        assert_eq!(identity.region, "ap-southeast-2");
    }
}
