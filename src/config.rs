use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use crate::jobs::retry_policy::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub tracing: TracingConfig,
    pub database: DatabaseConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TracingConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub coalescing: CoalescingConfig,
    /// Upper bound on how long a graceful stop waits for in-flight jobs (default: 30)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
    #[serde(default)]
    pub workers: WorkersConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            recovery: RecoveryConfig::default(),
            coalescing: CoalescingConfig::default(),
            shutdown_grace_seconds: default_shutdown_grace(),
            workers: WorkersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Whether abandoned `processing` records are swept back into the queue
    #[serde(default = "default_recovery_enabled")]
    pub enabled: bool,
    /// Interval between sweeps in seconds (default: 300)
    #[serde(default = "default_recovery_interval")]
    pub interval_seconds: u64,
    /// A claim older than this is considered abandoned (default: 600)
    #[serde(default = "default_lease")]
    pub lease_seconds: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_recovery_enabled(),
            interval_seconds: default_recovery_interval(),
            lease_seconds: default_lease(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoalescingConfig {
    /// Quiet period a key needs before its latest payload runs (default: 2000)
    #[serde(default = "default_coalescing_delay")]
    pub delay_ms: u64,
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_coalescing_delay(),
        }
    }
}

/// Worker pools keyed by the action type they process
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkersConfig {
    #[serde(flatten)]
    pub workers: HashMap<String, WorkerQueueConfig>,
}

impl WorkersConfig {
    #[must_use]
    pub fn with_queue(mut self, action_type: impl Into<String>, config: WorkerQueueConfig) -> Self {
        self.workers.insert(action_type.into(), config);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerQueueConfig {
    /// Number of parallel workers; zero disables the queue
    pub count: u32,
    /// Attempts before a record becomes `error` (default: 5)
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    /// Optional execution timeout in milliseconds; unset means no timeout
    #[serde(default)]
    pub execution_timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Idle wait between claims on an empty queue (default: 1000)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Pause before restarting a worker after a storage error (default: 10000)
    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,
}

impl WorkerQueueConfig {
    #[must_use]
    pub fn with_count(count: u32) -> Self {
        Self {
            count,
            max_tries: default_max_tries(),
            execution_timeout_ms: None,
            retry: RetryPolicy::default(),
            poll_interval_ms: default_poll_interval(),
            restart_delay_ms: default_restart_delay(),
        }
    }
}

const fn default_shutdown_grace() -> u64 {
    30
}

const fn default_recovery_enabled() -> bool {
    true
}

const fn default_recovery_interval() -> u64 {
    300 // 5 minutes
}

const fn default_lease() -> u64 {
    600 // 10 minutes
}

const fn default_coalescing_delay() -> u64 {
    2000
}

const fn default_max_tries() -> u32 {
    5
}

const fn default_poll_interval() -> u64 {
    1000
}

const fn default_restart_delay() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_queue_defaults() {
        let config: WorkerQueueConfig = serde_json::from_str(r#"{"count": 2}"#).unwrap();

        assert_eq!(config.count, 2);
        assert_eq!(config.max_tries, 5);
        assert_eq!(config.execution_timeout_ms, None);
        assert_eq!(config.retry, RetryPolicy::Immediate);
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn test_jobs_config_flattens_queues() {
        let config: JobsConfig = serde_json::from_str(
            r#"{
                "recovery": {"lease_seconds": 60},
                "workers": {
                    "Thumbnail": {"count": 2, "max_tries": 3},
                    "Index": {"count": 1, "retry": {"type": "fixed", "delay_seconds": 5}}
                }
            }"#,
        )
        .unwrap();

        assert!(config.recovery.enabled);
        assert_eq!(config.recovery.lease_seconds, 60);
        assert_eq!(config.coalescing.delay_ms, 2000);
        assert_eq!(config.shutdown_grace_seconds, 30);
        assert_eq!(config.workers.workers["Thumbnail"].max_tries, 3);
        assert_eq!(
            config.workers.workers["Index"].retry,
            RetryPolicy::Fixed { delay_seconds: 5 }
        );
    }
}
