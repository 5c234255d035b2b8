//! Runtime configuration, read the way `DbConfig::from_env` does: an
//! environment variable per field, falling back to the documented default
//! rather than panicking on a malformed value.

use std::env;
use std::time::Duration;

/// Exponential-backoff retry policy handed to the queue adapter per job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2000,
        }
    }
}

/// Top-level queue manager configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueManagerConfig {
    pub queue_name: String,
    pub max_parallel_agents: u32,
    pub retry: RetryConfig,
    pub health_check_interval_ms: u64,
    pub health_check_timeout_ms: u64,
    pub fallback_dir: String,
    pub cascade_threshold: u32,
}

impl QueueManagerConfig {
    pub const DEFAULT_QUEUE_NAME: &'static str = "marketing-tasks";
    pub const DEFAULT_MAX_PARALLEL_AGENTS: u32 = 3;
    pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;
    pub const DEFAULT_HEALTH_CHECK_TIMEOUT_MS: u64 = 5_000;
    pub const DEFAULT_FALLBACK_DIR: &'static str = ".workspace/queue-fallback";
    pub const DEFAULT_CASCADE_THRESHOLD: u32 = 3;

    /// Build a config from explicit values, useful for tests and callers
    /// that already resolved their own settings.
    pub fn new(queue_name: impl Into<String>, fallback_dir: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            max_parallel_agents: Self::DEFAULT_MAX_PARALLEL_AGENTS,
            retry: RetryConfig::default(),
            health_check_interval_ms: Self::DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            health_check_timeout_ms: Self::DEFAULT_HEALTH_CHECK_TIMEOUT_MS,
            fallback_dir: fallback_dir.into(),
            cascade_threshold: Self::DEFAULT_CASCADE_THRESHOLD,
        }
    }

    /// Overlay the documented `QUEUE_*` environment variables onto the
    /// defaults. A present-but-unparseable numeric value falls back to its
    /// default and logs a warning rather than panicking at startup.
    pub fn from_env() -> Self {
        Self {
            queue_name: env::var("QUEUE_NAME").unwrap_or_else(|_| Self::DEFAULT_QUEUE_NAME.to_string()),
            max_parallel_agents: parse_env_or_default(
                "QUEUE_MAX_PARALLEL_AGENTS",
                Self::DEFAULT_MAX_PARALLEL_AGENTS,
            ),
            retry: RetryConfig {
                max_attempts: parse_env_or_default("QUEUE_RETRY_MAX_ATTEMPTS", RetryConfig::default().max_attempts),
                initial_delay_ms: parse_env_or_default(
                    "QUEUE_RETRY_INITIAL_DELAY_MS",
                    RetryConfig::default().initial_delay_ms,
                ),
            },
            health_check_interval_ms: parse_env_or_default(
                "QUEUE_HEALTH_CHECK_INTERVAL_MS",
                Self::DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            ),
            health_check_timeout_ms: parse_env_or_default(
                "QUEUE_HEALTH_CHECK_TIMEOUT_MS",
                Self::DEFAULT_HEALTH_CHECK_TIMEOUT_MS,
            ),
            fallback_dir: env::var("QUEUE_FALLBACK_DIR")
                .unwrap_or_else(|_| Self::DEFAULT_FALLBACK_DIR.to_string()),
            cascade_threshold: parse_env_or_default(
                "QUEUE_CASCADE_THRESHOLD",
                Self::DEFAULT_CASCADE_THRESHOLD,
            ),
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_QUEUE_NAME, Self::DEFAULT_FALLBACK_DIR)
    }
}

fn parse_env_or_default<T>(var: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match env::var(var) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(var, raw, "malformed environment value, using default");
            default
        }),
        Err(_) => default,
    }
}
