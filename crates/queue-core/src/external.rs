//! The out-of-scope collaborators this crate only consumes through narrow
//! trait seams: workspace persistence, the agent executor, the
//! planner/reviewer ("director"), and the cost/budget snapshot source.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::budget::BudgetState;
use crate::task::{Task, TaskStatus};

/// Pulls a fresh [`BudgetState`] snapshot. Cost/budget accumulation and
/// threshold policy live entirely in the out-of-scope collaborator this
/// trait wraps; this crate only ever reads the snapshot shape.
#[async_trait]
pub trait BudgetSource: Send + Sync {
    async fn snapshot(&self) -> anyhow::Result<BudgetState>;
}

/// A learning/diary entry appended by the queue on notable events (a
/// follow-up enqueued, a pipeline paused, a task escalated). Best-effort:
/// failing to append one never aborts the hot path (spec §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub task_id: String,
    pub message: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Learning {
    pub fn new(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            message: message.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Persistence of tasks, outputs, and learnings. Only this interface is
/// consumed; the storage backend itself (files, a database, an object
/// store) is an out-of-scope collaborator.
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn read_task(&self, id: &str) -> anyhow::Result<Task>;
    async fn write_task(&self, task: &Task) -> anyhow::Result<()>;
    async fn update_task_status(&self, id: &str, status: TaskStatus) -> anyhow::Result<()>;
    async fn read_output(
        &self,
        squad: &str,
        skill: &str,
        id: &str,
    ) -> anyhow::Result<Option<String>>;
    async fn write_output(
        &self,
        squad: &str,
        skill: &str,
        id: &str,
        content: &str,
    ) -> anyhow::Result<()>;
    async fn append_learning(&self, entry: Learning) -> anyhow::Result<()>;
    async fn list_tasks(&self) -> anyhow::Result<Vec<Task>>;
    async fn list_reviews(&self, id: &str) -> anyhow::Result<Vec<ReviewRecord>>;
    async fn read_file(&self, path: &str) -> anyhow::Result<Option<String>>;
}

/// A stored review record, as returned by [`Workspace::list_reviews`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub task_id: String,
    pub verdict: String,
    pub findings: Vec<String>,
}

/// Token-usage and cost bookkeeping attached to one execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub model: Option<String>,
    pub model_tier: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub estimated_cost: f64,
    pub retry_count: u32,
}

/// Error code reserved for executor failures caused by budget exhaustion.
/// Never retried (spec §6).
pub const BUDGET_EXHAUSTED: &str = "BUDGET_EXHAUSTED";

/// Structured executor-side error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
}

/// Outcome of [`Executor::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: String,
    pub status: ExecutionStatus,
    pub content: Option<String>,
    pub output_path: Option<String>,
    pub metadata: ExecutionMetadata,
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    pub fn succeeded(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: ExecutionStatus::Completed,
            content: None,
            output_path: None,
            metadata: ExecutionMetadata::default(),
            error: None,
        }
    }

    pub fn failed(task_id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: ExecutionStatus::Failed,
            content: None,
            output_path: None,
            metadata: ExecutionMetadata::default(),
            error: Some(ExecutionError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// Runs a task to completion (or failure). The process/model invocation
/// itself is the out-of-scope agent executor; this crate only consumes
/// its input/output contract.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &Task, budget: &BudgetState) -> anyhow::Result<ExecutionResult>;
}

/// The director's verdict on a completed `director_review` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Revise,
    RejectReassign,
    EscalateHuman,
    PipelineNext,
    GoalComplete,
    GoalIterate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub verdict: String,
    pub findings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub review: ReviewVerdict,
    pub action: ReviewAction,
    pub next_tasks: Vec<Task>,
    pub escalation: Option<Escalation>,
    pub learning: Option<serde_json::Value>,
}

/// Outcome of asking the director to advance a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GoalAdvance {
    Complete,
    Tasks { tasks: Vec<Task> },
}

/// The planner/reviewer. Only its review-decision and goal-advance shapes
/// are consumed; planning/review logic itself is out of scope.
#[async_trait]
pub trait Director: Send + Sync {
    async fn review_completed_task(&self, task_id: &str) -> anyhow::Result<ReviewDecision>;
    async fn advance_goal(&self, goal_id: &str) -> anyhow::Result<GoalAdvance>;
}

/// Maps a skill name to the squad that owns it, for output-path
/// construction in [`crate::router`]. Falls back to `"foundation"` when a
/// skill has no registered squad.
#[derive(Debug, Clone)]
pub struct SquadLookup {
    map: std::collections::HashMap<String, String>,
    fallback: String,
}

impl SquadLookup {
    pub fn new(map: std::collections::HashMap<String, String>) -> Self {
        Self {
            map,
            fallback: "foundation".to_string(),
        }
    }

    pub fn squad_for(&self, skill: &str) -> &str {
        self.map.get(skill).map(String::as_str).unwrap_or(&self.fallback)
    }
}

impl Default for SquadLookup {
    fn default() -> Self {
        Self::new(std::collections::HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squad_lookup_falls_back_to_foundation() {
        let lookup = SquadLookup::default();
        assert_eq!(lookup.squad_for("unknown-skill"), "foundation");
    }

    #[test]
    fn squad_lookup_returns_mapped_squad() {
        let mut map = std::collections::HashMap::new();
        map.insert("copywriter".to_string(), "content".to_string());
        let lookup = SquadLookup::new(map);
        assert_eq!(lookup.squad_for("copywriter"), "content");
        assert_eq!(lookup.squad_for("other"), "foundation");
    }
}
