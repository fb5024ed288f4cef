// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::str::FromStr;
use std::time::Duration;

use courier_protocol::DEFAULT_ATTEMPTS;

/// Courier node configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of this node, used for per-node queue names and logs
    pub node_name: String,
    /// Queue carrying calls for the services this node hosts
    pub call_queue: String,
    /// Queue this node receives responses on
    pub response_queue: String,
    /// Queue carrying deployment orchestration calls for this node
    pub system_queue: String,
    /// Execution attempts given to every new call
    pub max_attempts: u32,
    /// Fixed backoff between attempts
    pub retry_delay: Duration,
    /// Extra time a caller waits on top of the retry budget
    pub processing_allowance: Duration,
    /// How long a delivered response waits for its caller to take it
    pub handoff_timeout: Duration,
    /// Shared deadline for the termination sequence
    pub shutdown_deadline: Duration,
    /// Pause between draining requests and terminating
    pub drain_grace: Duration,
    /// How long "recently processed a tagged call" stays true after the last one
    pub tagged_activity_window: Duration,
    /// Concurrent messages per listener
    pub listener_concurrency: usize,
    /// Long-poll wait for a receive
    pub poll_wait: Duration,
    /// Start paused and wait for promotion instead of running immediately
    pub staged_rollout: bool,
    /// Error types never retried, on top of the built-in set
    pub immediate_failures: Vec<String>,
    /// Redis connection URL. `None` selects the in-memory transport.
    pub redis_url: Option<String>,
}

impl Config {
    /// Configuration with defaults for the given node name.
    pub fn for_node(node_name: impl Into<String>) -> Self {
        let node_name = node_name.into();
        Self {
            call_queue: "courier-calls".to_string(),
            response_queue: format!("{}-responses", node_name),
            system_queue: format!("{}-system", node_name),
            node_name,
            max_attempts: DEFAULT_ATTEMPTS,
            retry_delay: Duration::from_millis(2000),
            processing_allowance: Duration::from_millis(30_000),
            handoff_timeout: Duration::from_millis(1000),
            shutdown_deadline: Duration::from_millis(30_000),
            drain_grace: Duration::ZERO,
            tagged_activity_window: Duration::from_millis(60_000),
            listener_concurrency: 8,
            poll_wait: Duration::from_millis(1000),
            staged_rollout: false,
            immediate_failures: Vec::new(),
            redis_url: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `COURIER_NODE_NAME`: name of this node
    ///
    /// Optional (with defaults):
    /// - `COURIER_CALL_QUEUE` (default: `courier-calls`)
    /// - `COURIER_RESPONSE_QUEUE` (default: `<node>-responses`)
    /// - `COURIER_SYSTEM_QUEUE` (default: `<node>-system`)
    /// - `COURIER_MAX_ATTEMPTS` (default: 5)
    /// - `COURIER_RETRY_DELAY_MS` (default: 2000)
    /// - `COURIER_PROCESSING_ALLOWANCE_MS` (default: 30000)
    /// - `COURIER_HANDOFF_TIMEOUT_MS` (default: 1000)
    /// - `COURIER_SHUTDOWN_DEADLINE_MS` (default: 30000)
    /// - `COURIER_DRAIN_GRACE_MS` (default: 0)
    /// - `COURIER_TAGGED_ACTIVITY_WINDOW_MS` (default: 60000)
    /// - `COURIER_LISTENER_CONCURRENCY` (default: 8)
    /// - `COURIER_POLL_WAIT_MS` (default: 1000)
    /// - `COURIER_STAGED_ROLLOUT` (default: false)
    /// - `COURIER_IMMEDIATE_FAILURES`: comma separated error types (default: none)
    /// - `COURIER_REDIS_URL` (default: unset, in-memory transport)
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_name = std::env::var("COURIER_NODE_NAME")
            .map_err(|_| ConfigError::Missing("COURIER_NODE_NAME"))?;
        if node_name.trim().is_empty() {
            return Err(ConfigError::Invalid("COURIER_NODE_NAME", "must not be empty"));
        }

        let defaults = Self::for_node(node_name);

        let max_attempts: u32 = parse_var(
            "COURIER_MAX_ATTEMPTS",
            defaults.max_attempts,
            "must be a positive integer",
        )?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "COURIER_MAX_ATTEMPTS",
                "must be a positive integer",
            ));
        }

        let listener_concurrency: usize = parse_var(
            "COURIER_LISTENER_CONCURRENCY",
            defaults.listener_concurrency,
            "must be a positive integer",
        )?;
        if listener_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "COURIER_LISTENER_CONCURRENCY",
                "must be a positive integer",
            ));
        }

        let staged_rollout = match std::env::var("COURIER_STAGED_ROLLOUT") {
            Err(_) => defaults.staged_rollout,
            Ok(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::Invalid(
                        "COURIER_STAGED_ROLLOUT",
                        "must be true or false",
                    ));
                }
            },
        };

        let immediate_failures = std::env::var("COURIER_IMMEDIATE_FAILURES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            call_queue: std::env::var("COURIER_CALL_QUEUE").unwrap_or(defaults.call_queue),
            response_queue: std::env::var("COURIER_RESPONSE_QUEUE")
                .unwrap_or(defaults.response_queue),
            system_queue: std::env::var("COURIER_SYSTEM_QUEUE").unwrap_or(defaults.system_queue),
            max_attempts,
            retry_delay: parse_millis("COURIER_RETRY_DELAY_MS", defaults.retry_delay)?,
            processing_allowance: parse_millis(
                "COURIER_PROCESSING_ALLOWANCE_MS",
                defaults.processing_allowance,
            )?,
            handoff_timeout: parse_millis("COURIER_HANDOFF_TIMEOUT_MS", defaults.handoff_timeout)?,
            shutdown_deadline: parse_millis(
                "COURIER_SHUTDOWN_DEADLINE_MS",
                defaults.shutdown_deadline,
            )?,
            drain_grace: parse_millis("COURIER_DRAIN_GRACE_MS", defaults.drain_grace)?,
            tagged_activity_window: parse_millis(
                "COURIER_TAGGED_ACTIVITY_WINDOW_MS",
                defaults.tagged_activity_window,
            )?,
            listener_concurrency,
            poll_wait: parse_millis("COURIER_POLL_WAIT_MS", defaults.poll_wait)?,
            staged_rollout,
            immediate_failures,
            redis_url: std::env::var("COURIER_REDIS_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            node_name: defaults.node_name,
        };

        if config.checked_response_wait().is_none() {
            return Err(ConfigError::Invalid(
                "COURIER_RETRY_DELAY_MS",
                "retry delay times max attempts plus processing allowance is out of range",
            ));
        }
        Ok(config)
    }

    /// How long a synchronous caller waits for its response.
    ///
    /// Covers every attempt's backoff plus the time to process the last one.
    /// Saturates at `Duration::MAX` when the budget does not fit.
    pub fn response_wait(&self) -> Duration {
        self.checked_response_wait().unwrap_or(Duration::MAX)
    }

    /// The response wait, or `None` if it overflows a `Duration`.
    pub fn checked_response_wait(&self) -> Option<Duration> {
        self.retry_delay
            .checked_mul(self.max_attempts)?
            .checked_add(self.processing_allowance)
    }
}

fn parse_var<T: FromStr>(
    key: &'static str,
    default: T,
    message: &'static str,
) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::Invalid(key, message)),
        Err(_) => Ok(default),
    }
}

fn parse_millis(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| {
                ConfigError::Invalid(key, "must be a non-negative number of milliseconds")
            }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "COURIER_NODE_NAME",
        "COURIER_CALL_QUEUE",
        "COURIER_RESPONSE_QUEUE",
        "COURIER_SYSTEM_QUEUE",
        "COURIER_MAX_ATTEMPTS",
        "COURIER_RETRY_DELAY_MS",
        "COURIER_PROCESSING_ALLOWANCE_MS",
        "COURIER_HANDOFF_TIMEOUT_MS",
        "COURIER_SHUTDOWN_DEADLINE_MS",
        "COURIER_DRAIN_GRACE_MS",
        "COURIER_TAGGED_ACTIVITY_WINDOW_MS",
        "COURIER_LISTENER_CONCURRENCY",
        "COURIER_POLL_WAIT_MS",
        "COURIER_STAGED_ROLLOUT",
        "COURIER_IMMEDIATE_FAILURES",
        "COURIER_REDIS_URL",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        /// Start from a clean slate for every courier variable.
        fn clean() -> Self {
            let mut guard = Self::new();
            for key in ALL_VARS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("COURIER_NODE_NAME", "blue-1");

        let config = Config::from_env().unwrap();

        assert_eq!(config.node_name, "blue-1");
        assert_eq!(config.call_queue, "courier-calls");
        assert_eq!(config.response_queue, "blue-1-responses");
        assert_eq!(config.system_queue, "blue-1-system");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.handoff_timeout, Duration::from_secs(1));
        assert_eq!(config.shutdown_deadline, Duration::from_secs(30));
        assert_eq!(config.drain_grace, Duration::ZERO);
        assert_eq!(config.tagged_activity_window, Duration::from_secs(60));
        assert_eq!(config.listener_concurrency, 8);
        assert!(!config.staged_rollout);
        assert!(config.immediate_failures.is_empty());
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_response_wait_is_derived_from_retry_budget() {
        let config = Config::for_node("n");
        assert_eq!(config.response_wait(), Duration::from_secs(40));

        let mut config = Config::for_node("n");
        config.max_attempts = 3;
        config.retry_delay = Duration::from_millis(100);
        config.processing_allowance = Duration::from_millis(50);
        assert_eq!(config.response_wait(), Duration::from_millis(350));
    }

    #[test]
    fn test_response_wait_saturates_on_overflow() {
        let mut config = Config::for_node("n");
        config.retry_delay = Duration::from_millis(u64::MAX);
        config.max_attempts = u32::MAX;
        assert_eq!(config.checked_response_wait(), None);
        assert_eq!(config.response_wait(), Duration::MAX);

        config.max_attempts = 1;
        config.processing_allowance = Duration::MAX;
        assert_eq!(config.checked_response_wait(), None);
        assert_eq!(config.response_wait(), Duration::MAX);
    }

    #[test]
    fn test_config_rejects_overflowing_retry_budget() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("COURIER_NODE_NAME", "blue-1");
        guard.set("COURIER_MAX_ATTEMPTS", "4294967295");
        guard.set("COURIER_RETRY_DELAY_MS", "18446744073709551615");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("COURIER_RETRY_DELAY_MS", _)));
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("COURIER_NODE_NAME", "green-2");
        guard.set("COURIER_CALL_QUEUE", "orders-calls");
        guard.set("COURIER_RESPONSE_QUEUE", "green-2-replies");
        guard.set("COURIER_SYSTEM_QUEUE", "green-2-sys");
        guard.set("COURIER_MAX_ATTEMPTS", "3");
        guard.set("COURIER_RETRY_DELAY_MS", "250");
        guard.set("COURIER_STAGED_ROLLOUT", "true");
        guard.set("COURIER_IMMEDIATE_FAILURES", "QuotaExceeded, NotFound ,,");
        guard.set("COURIER_REDIS_URL", "redis://localhost:6379");

        let config = Config::from_env().unwrap();

        assert_eq!(config.call_queue, "orders-calls");
        assert_eq!(config.response_queue, "green-2-replies");
        assert_eq!(config.system_queue, "green-2-sys");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert!(config.staged_rollout);
        assert_eq!(config.immediate_failures, vec!["QuotaExceeded", "NotFound"]);
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
    }

    #[test]
    fn test_config_missing_node_name() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::clean();

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("COURIER_NODE_NAME")));
        assert!(err.to_string().contains("COURIER_NODE_NAME"));
    }

    #[test]
    fn test_config_rejects_zero_attempts() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("COURIER_NODE_NAME", "blue-1");
        guard.set("COURIER_MAX_ATTEMPTS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("COURIER_MAX_ATTEMPTS", _)));
    }

    #[test]
    fn test_config_invalid_millis() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("COURIER_NODE_NAME", "blue-1");
        guard.set("COURIER_RETRY_DELAY_MS", "-5");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("COURIER_RETRY_DELAY_MS", _)));
    }

    #[test]
    fn test_config_invalid_staged_rollout() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("COURIER_NODE_NAME", "blue-1");
        guard.set("COURIER_STAGED_ROLLOUT", "maybe");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("COURIER_STAGED_ROLLOUT", _)));
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::Missing("MY_VAR");
        assert_eq!(
            missing.to_string(),
            "missing required environment variable: MY_VAR"
        );

        let invalid = ConfigError::Invalid("MY_VAR", "must be a number");
        assert_eq!(
            invalid.to_string(),
            "invalid value for MY_VAR: must be a number"
        );
    }
}
