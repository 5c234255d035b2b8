//! Core data model: [`Priority`], [`Task`], [`NextDirective`], the broker
//! envelope [`QueueJobData`], and the post-execution [`RoutingAction`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Symbolic urgency class. Total order `P0 < P1 < P2 < P3`; lower is more
/// urgent. See [`crate::priority`] for the numeric scheduling-key mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        };
        f.write_str(s)
    }
}

/// Error returned when parsing an invalid [`Priority`] string.
#[derive(Debug, Clone)]
pub struct PriorityParseError(pub String);

impl fmt::Display for PriorityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid priority: {:?}", self.0)
    }
}

impl std::error::Error for PriorityParseError {}

impl FromStr for Priority {
    type Err = PriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P0" => Ok(Self::P0),
            "P1" => Ok(Self::P1),
            "P2" => Ok(Self::P2),
            "P3" => Ok(Self::P3),
            other => Err(PriorityParseError(other.to_owned())),
        }
    }
}

impl Priority {
    /// All priorities, most urgent first.
    pub const ALL: [Priority; 4] = [Priority::P0, Priority::P1, Priority::P2, Priority::P3];
}

/// Mutable lifecycle status of a [`Task`], owned by the workspace collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Deferred,
    Blocked,
    Completed,
    Approved,
    Failed,
    Revision,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Deferred => "deferred",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Approved => "approved",
            Self::Failed => "failed",
            Self::Revision => "revision",
        };
        f.write_str(s)
    }
}

/// The post-execution routing directive attached to a [`Task`].
///
/// Modeled as a tagged variant per the design notes: the [`crate::router`]
/// completion router is a closed `match` over this type, so the compiler
/// enforces exhaustiveness whenever a new branch is added here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NextDirective {
    /// Terminal: mark the task complete once it passes.
    Complete,
    /// Hand off to another skill/agent as a follow-up task.
    Agent { skill: String },
    /// Route through the director's review before deciding next steps.
    DirectorReview,
    /// Continue an existing pipeline, possibly advancing its owning goal.
    PipelineContinue { pipeline_id: String },
}

/// A file the executor should read before doing its work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInput {
    pub path: String,
    pub description: String,
}

/// Where the executor should write its artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskOutput {
    pub path: String,
}

/// A task as understood by the queue. Created by the planner outside this
/// crate and persisted to the workspace before admission; every field here
/// is read-only from the queue's point of view except `status` and
/// `revision_count`, which the queue (via the workspace) may update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub to: String,
    pub priority: Priority,
    pub goal_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub status: TaskStatus,
    pub revision_count: u32,
    pub next: NextDirective,
    pub output: TaskOutput,
    pub inputs: Vec<TaskInput>,
    pub goal: Option<String>,
    pub requirements: Option<String>,
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
}

impl Task {
    /// The cascade-accounting key for this task: its pipeline id, or the
    /// global sentinel when absent (see [`crate::failure::GLOBAL_KEY`]).
    pub fn failure_key(&self) -> String {
        self.pipeline_id
            .clone()
            .unwrap_or_else(|| crate::failure::GLOBAL_KEY.to_string())
    }
}

/// The envelope submitted to the broker. The full [`Task`] is always
/// re-read from the workspace at dispatch time, so retries observe the
/// task's current state; this is the minimal addressing/routing metadata
/// BullMQ-style brokers need up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueJobData {
    pub task_id: String,
    pub skill: String,
    pub priority: Priority,
    pub goal_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueJobData {
    pub fn from_task(task: &Task, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id.clone(),
            skill: task.to.clone(),
            priority: task.priority,
            goal_id: task.goal_id.clone(),
            pipeline_id: task.pipeline_id.clone(),
            enqueued_at,
        }
    }
}

/// The routing action produced by the [`crate::router`] completion router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingAction {
    EnqueueTasks { tasks: Vec<Task> },
    Complete { task_id: String },
    DeadLetter { task_id: String, reason: String },
    Deferred { task_id: String, reason: String },
}

/// A derived, read-only view over a job the broker is holding as failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task_id: String,
    pub skill: String,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: String,
    pub original_priority: Priority,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_total_order() {
        assert!(Priority::P0 < Priority::P1);
        assert!(Priority::P1 < Priority::P2);
        assert!(Priority::P2 < Priority::P3);
    }

    #[test]
    fn priority_round_trips_through_display_and_from_str() {
        for p in Priority::ALL {
            let s = p.to_string();
            assert_eq!(s.parse::<Priority>().unwrap(), p);
        }
    }

    #[test]
    fn priority_from_str_rejects_garbage() {
        assert!("P9".parse::<Priority>().is_err());
    }

    #[test]
    fn failure_key_uses_pipeline_id_when_present() {
        let task = sample_task(Some("pipe-a".to_string()));
        assert_eq!(task.failure_key(), "pipe-a");
    }

    #[test]
    fn failure_key_falls_back_to_global_sentinel() {
        let task = sample_task(None);
        assert_eq!(task.failure_key(), crate::failure::GLOBAL_KEY);
    }

    fn sample_task(pipeline_id: Option<String>) -> Task {
        Task {
            id: "t-1".to_string(),
            to: "writer".to_string(),
            priority: Priority::P2,
            goal_id: None,
            pipeline_id,
            status: TaskStatus::Pending,
            revision_count: 0,
            next: NextDirective::Complete,
            output: TaskOutput::default(),
            inputs: vec![],
            goal: None,
            requirements: None,
            tags: vec![],
            metadata: serde_json::Map::new(),
            created_at: None,
            deadline: None,
        }
    }
}
