//! C6: abstraction over the broker's submit/inspect/retry surface.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::task::QueueJobData;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("queue adapter rejected job: {0}")]
    Rejected(String),
    #[error("queue adapter call failed: {0}")]
    Failed(String),
}

/// Exponential backoff configuration for broker-managed retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffOptions {
    pub exponential: bool,
    pub initial_delay_ms: u64,
}

/// `removeOnComplete`/`removeOnFail` retention policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionOptions {
    /// Number of completed jobs to retain for inspection.
    pub remove_on_complete_count: u32,
    /// Whether failed jobs are ever removed. `false` retains them
    /// indefinitely for dead-letter management.
    pub remove_on_fail: bool,
}

impl Default for RetentionOptions {
    fn default() -> Self {
        Self {
            remove_on_complete_count: 100,
            remove_on_fail: false,
        }
    }
}

/// Options passed to [`QueueAdapter::add`], per spec §4.4.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Numeric scheduling key from [`crate::priority`].
    pub priority: u32,
    /// Maximum retry attempts.
    pub attempts: u32,
    pub backoff: BackoffOptions,
    /// The broker-side job id; always `task.id`, enabling dedup on retries.
    pub job_id: String,
    pub retention: RetentionOptions,
}

/// A submitted job's broker-assigned handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
}

/// Queue depth by broker-side bucket. Any key may be absent if the broker
/// doesn't track that bucket.
pub type JobCounts = HashMap<String, u64>;

/// A job record as returned by [`QueueAdapter::get_job`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub data: QueueJobData,
    pub attempts_made: u32,
}

/// A read-only view over one job the broker holds as failed, with the
/// ability to retry it in place.
#[async_trait]
pub trait FailedJob: Send + Sync {
    fn task_id(&self) -> &str;
    fn skill(&self) -> &str;
    fn failed_at(&self) -> chrono::DateTime<chrono::Utc>;
    fn attempts_made(&self) -> u32;
    fn last_error(&self) -> &str;
    fn original_priority(&self) -> crate::task::Priority;

    /// Re-submit this job to the broker for another attempt.
    async fn retry(&self) -> Result<(), AdapterError>;
}

/// Submit/inspect/retry surface over the broker's queue.
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    async fn add(
        &self,
        name: &str,
        data: &QueueJobData,
        opts: JobOptions,
    ) -> Result<JobHandle, AdapterError>;

    async fn get_job_counts(&self) -> Result<JobCounts, AdapterError>;

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, AdapterError>;

    async fn get_failed(
        &self,
        start: Option<usize>,
        end: Option<usize>,
    ) -> Result<Vec<Box<dyn FailedJob>>, AdapterError>;

    async fn obliterate(&self) -> Result<(), AdapterError>;
    async fn close(&self) -> Result<(), AdapterError>;
    async fn pause(&self) -> Result<(), AdapterError>;
    async fn resume(&self) -> Result<(), AdapterError>;
}
