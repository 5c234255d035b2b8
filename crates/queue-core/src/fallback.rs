//! C4: filesystem-backed ordered store used when the broker is
//! unreachable. Drains FIFO-within-priority by encoding the numeric
//! scheduling key and an epoch-millisecond timestamp into each entry's
//! filename, then relying on lexicographic directory listing order.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::priority::task_priority_to_queue_priority;
use crate::task::QueueJobData;

#[derive(Debug, thiserror::Error)]
pub enum FallbackQueueError {
    #[error("failed to create fallback directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read fallback directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write fallback entry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One job pulled off the fallback queue during [`FallbackQueue::drain`].
#[derive(Debug, Clone, PartialEq)]
pub struct DrainedJob {
    pub data: QueueJobData,
}

/// Minimal shape an on-disk entry must parse as to be considered valid.
/// Mirrors [`QueueJobData`] but only the fields the spec requires for an
/// entry to be accepted; extra/missing optional fields don't invalidate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RequiredFields {
    #[serde(rename = "taskId")]
    task_id: Option<String>,
    skill: Option<String>,
    priority: Option<crate::task::Priority>,
}

/// Filesystem-backed ordered store, rooted at `dir`.
pub struct FallbackQueue {
    dir: PathBuf,
}

impl FallbackQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn ensure_dir(&self) -> Result<(), FallbackQueueError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| FallbackQueueError::CreateDir {
                path: self.dir.clone(),
                source,
            })
    }

    /// Append `data` as a new file. Filename is
    /// `{NNN}-{epochMs}-{taskId}.json`, where `NNN` is the zero-padded
    /// 3-digit numeric scheduling key — lexicographic sort on the
    /// directory listing then yields priority-ascending, then
    /// timestamp-ascending (FIFO-within-priority) order.
    pub async fn enqueue(&self, data: &QueueJobData) -> Result<PathBuf, FallbackQueueError> {
        self.ensure_dir().await?;
        let key = task_priority_to_queue_priority(data.priority);
        let epoch_ms = Utc::now().timestamp_millis();
        let filename = format!("{key:03}-{epoch_ms}-{}.json", sanitize(&data.task_id));
        let path = self.dir.join(filename);
        let body =
            serde_json::to_vec_pretty(data).expect("QueueJobData serialization cannot fail");
        fs::write(&path, body)
            .await
            .map_err(|source| FallbackQueueError::Write {
                path: path.clone(),
                source,
            })?;
        tracing::warn!(task_id = %data.task_id, path = %path.display(), "enqueued to fallback queue");
        Ok(path)
    }

    /// Count of `*.json` entries, without consuming any.
    pub async fn peek(&self) -> Result<usize, FallbackQueueError> {
        Ok(self.list_json_files().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, FallbackQueueError> {
        Ok(self.peek().await? == 0)
    }

    /// Read and unlink every parseable `*.json` entry, in
    /// priority-then-timestamp order. Entries missing `taskId`/`skill`/
    /// `priority`, or that fail to parse as JSON at all, are left on disk
    /// for manual inspection and skipped.
    pub async fn drain(&self) -> Result<Vec<DrainedJob>, FallbackQueueError> {
        self.ensure_dir().await?;
        let paths = self.list_json_files().await?;
        let mut drained = Vec::new();

        for path in paths {
            let bytes = match fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read fallback entry, leaving on disk");
                    continue;
                }
            };

            let required: Result<RequiredFields, _> = serde_json::from_slice(&bytes);
            let valid = matches!(
                &required,
                Ok(RequiredFields { task_id: Some(_), skill: Some(_), priority: Some(_) })
            );
            if !valid {
                tracing::warn!(path = %path.display(), "fallback entry missing required fields or unparseable, leaving on disk");
                continue;
            }

            let data: QueueJobData = match serde_json::from_slice(&bytes) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "fallback entry failed full deserialization, leaving on disk");
                    continue;
                }
            };

            if let Err(e) = fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to unlink drained fallback entry");
            }
            drained.push(DrainedJob { data });
        }

        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "drained fallback queue entries");
        }

        Ok(drained)
    }

    /// Directory listing of `*.json` files, lexicographically sorted.
    async fn list_json_files(&self) -> Result<Vec<PathBuf>, FallbackQueueError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|source| FallbackQueueError::ReadDir {
                path: self.dir.clone(),
                source,
            })?;
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| FallbackQueueError::ReadDir {
                path: self.dir.clone(),
                source,
            })?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// Strip path separators out of a task id before using it in a filename.
fn sanitize(task_id: &str) -> String {
    task_id.chars().map(|c| if c == '/' || c == '\\' { '_' } else { c }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;
    use tempfile::tempdir;
    use tokio::time::{sleep, Duration};

    fn job(task_id: &str, priority: Priority) -> QueueJobData {
        QueueJobData {
            task_id: task_id.to_string(),
            skill: "writer".to_string(),
            priority,
            goal_id: None,
            pipeline_id: None,
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn enqueue_creates_directory_on_first_use() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("nested").join("fallback");
        let queue = FallbackQueue::new(&sub);
        assert!(!sub.exists());
        queue.enqueue(&job("t1", Priority::P1)).await.unwrap();
        assert!(sub.exists());
    }

    #[tokio::test]
    async fn filename_uses_zero_padded_three_digit_priority_key() {
        let dir = tempdir().unwrap();
        let queue = FallbackQueue::new(dir.path());
        let path = queue.enqueue(&job("t1", Priority::P1)).await.unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("005-"), "expected 005- prefix, got {name}");
    }

    #[tokio::test]
    async fn peek_counts_without_consuming() {
        let dir = tempdir().unwrap();
        let queue = FallbackQueue::new(dir.path());
        queue.enqueue(&job("t1", Priority::P0)).await.unwrap();
        queue.enqueue(&job("t2", Priority::P0)).await.unwrap();
        assert_eq!(queue.peek().await.unwrap(), 2);
        assert_eq!(queue.peek().await.unwrap(), 2);
        assert!(!queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn drain_yields_priority_ascending_then_timestamp_ascending_order() {
        let dir = tempdir().unwrap();
        let queue = FallbackQueue::new(dir.path());

        queue.enqueue(&job("low-1", Priority::P3)).await.unwrap();
        sleep(Duration::from_millis(5)).await;
        queue.enqueue(&job("high-1", Priority::P0)).await.unwrap();
        sleep(Duration::from_millis(5)).await;
        queue.enqueue(&job("low-2", Priority::P3)).await.unwrap();

        let drained = queue.drain().await.unwrap();
        let ids: Vec<&str> = drained.iter().map(|d| d.data.task_id.as_str()).collect();
        assert_eq!(ids, vec!["high-1", "low-1", "low-2"]);
    }

    #[tokio::test]
    async fn drain_removes_successfully_read_files_and_directory_ends_up_empty() {
        let dir = tempdir().unwrap();
        let queue = FallbackQueue::new(dir.path());
        queue.enqueue(&job("t1", Priority::P2)).await.unwrap();
        queue.enqueue(&job("t2", Priority::P0)).await.unwrap();

        let drained = queue.drain().await.unwrap();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn drain_leaves_malformed_entries_on_disk_and_skips_them() {
        let dir = tempdir().unwrap();
        let queue = FallbackQueue::new(dir.path());
        queue.enqueue(&job("good", Priority::P1)).await.unwrap();

        let bad_path = dir.path().join("999-0-bad.json");
        tokio::fs::write(&bad_path, b"{\"skill\": \"writer\"}").await.unwrap();
        let unparseable_path = dir.path().join("999-1-unparseable.json");
        tokio::fs::write(&unparseable_path, b"not json at all").await.unwrap();

        let drained = queue.drain().await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].data.task_id, "good");

        assert!(bad_path.exists(), "malformed entry should be left for manual inspection");
        assert!(unparseable_path.exists(), "unparseable entry should be left for manual inspection");
        assert_eq!(queue.peek().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn drain_on_nonexistent_directory_is_empty_not_an_error() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("never-created");
        let queue = FallbackQueue::new(&sub);
        let drained = queue.drain().await.unwrap();
        assert!(drained.is_empty());
    }
}
