//! C8: the worker processor. This is the broker's per-job callback —
//! everything that runs between a worker picking a job off the queue and
//! the broker recording `completed`/`failed`.

use std::sync::Arc;

use crate::adapters::queue::AdapterError;
use crate::budget::{AdmissionDecision, BudgetGate};
use crate::events::EventSink;
use crate::external::{BudgetSource, Executor, ExecutionStatus, Workspace};
use crate::failure::{FailureTracker, PauseScope};
use crate::router::CompletionRouter;
use crate::task::{QueueJobData, RoutingAction};

/// Error returned by one pass of [`WorkerProcessor::process`]. The three
/// variants carry deliberately different cascade semantics (spec §7):
/// budget deferrals and cascade pauses never reach
/// [`FailureTracker::record_failure`] — only [`Self::TaskExecutionError`]
/// does, and it is the *only* call site in the crate that does, so a
/// pipeline's consecutive-failure count reflects actual execution
/// failures, never admission-control noise.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessorError {
    #[error("budget deferred task {task_id}: {reason}")]
    BudgetDeferralError { task_id: String, reason: String },

    #[error("pipeline {pipeline_id} paused after repeated failures, refusing task {task_id}")]
    CascadePauseError { task_id: String, pipeline_id: String },

    #[error("task {task_id} execution failed: {message}")]
    TaskExecutionError {
        task_id: String,
        code: Option<String>,
        message: String,
    },
}

impl ProcessorError {
    /// Whether this error should count toward a pipeline's cascade
    /// accounting. Only genuine execution failures do (spec §7); admission
    /// deferrals and an already-paused pipeline are not new failures.
    pub fn counts_toward_cascade(&self) -> bool {
        matches!(self, ProcessorError::TaskExecutionError { .. })
    }
}

/// Runs one job end to end: re-checks admission at dispatch time (the
/// budget may have moved since enqueue), checks whether the owning
/// pipeline is already cascade-paused, loads the current task, executes
/// it, and on success hands the result to the completion router.
pub struct WorkerProcessor {
    workspace: Arc<dyn Workspace>,
    executor: Arc<dyn Executor>,
    budget_source: Arc<dyn BudgetSource>,
    failures: Arc<FailureTracker>,
    events: Arc<dyn EventSink>,
    router: Arc<CompletionRouter>,
    budget_gate: BudgetGate,
}

impl WorkerProcessor {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        executor: Arc<dyn Executor>,
        budget_source: Arc<dyn BudgetSource>,
        failures: Arc<FailureTracker>,
        events: Arc<dyn EventSink>,
        router: Arc<CompletionRouter>,
    ) -> Self {
        Self {
            workspace,
            executor,
            budget_source,
            failures,
            events,
            router,
            budget_gate: BudgetGate::new(),
        }
    }

    pub async fn process(&self, job: &QueueJobData) -> Result<RoutingAction, ProcessorError> {
        let budget = self.budget_source.snapshot().await.map_err(|e| {
            ProcessorError::BudgetDeferralError {
                task_id: job.task_id.clone(),
                reason: format!("could not read budget snapshot: {e}"),
            }
        })?;

        // Both checks run against the job envelope, not the loaded task:
        // priority and pipeline_id are immutable from the queue's point of
        // view, so this is equivalent to checking the task but doesn't pay
        // for a task load (and crucially doesn't let a failed load shadow a
        // deferral/pause as a TaskExecutionError, which would wrongly count
        // toward the pipeline's cascade).
        if self.budget_gate.check_priority(job.priority, &budget) != AdmissionDecision::Allow {
            tracing::info!(task_id = %job.task_id, "dispatch-time budget recheck deferred task");
            return Err(ProcessorError::BudgetDeferralError {
                task_id: job.task_id.clone(),
                reason: "no longer admissible under the current budget".to_string(),
            });
        }

        let scope = match &job.pipeline_id {
            Some(pipeline_id) => PauseScope::Pipeline(pipeline_id),
            None => PauseScope::Global,
        };
        if self.failures.should_pause(scope) {
            tracing::warn!(task_id = %job.task_id, pipeline_id = ?job.pipeline_id, "refusing task, pipeline is cascade-paused");
            return Err(ProcessorError::CascadePauseError {
                task_id: job.task_id.clone(),
                pipeline_id: job
                    .pipeline_id
                    .clone()
                    .unwrap_or_else(|| crate::failure::GLOBAL_KEY.to_string()),
            });
        }

        let task = self.workspace.read_task(&job.task_id).await.map_err(|e| {
            ProcessorError::TaskExecutionError {
                task_id: job.task_id.clone(),
                code: None,
                message: format!("could not load task: {e}"),
            }
        })?;

        let result = self
            .executor
            .execute(&task, &budget)
            .await
            .map_err(|e| ProcessorError::TaskExecutionError {
                task_id: task.id.clone(),
                code: None,
                message: e.to_string(),
            })?;

        match result.status {
            ExecutionStatus::Completed => {
                self.failures.record_success(&task.failure_key());
                self.router
                    .route(&task, &result)
                    .await
                    .map_err(|e| ProcessorError::TaskExecutionError {
                        task_id: task.id.clone(),
                        code: None,
                        message: format!("routing failed: {e}"),
                    })
            }
            ExecutionStatus::Failed => {
                let error = result.error.clone().unwrap_or_else(|| crate::external::ExecutionError {
                    code: "UNKNOWN".to_string(),
                    message: "executor reported failure with no error detail".to_string(),
                });

                if error.code == crate::external::BUDGET_EXHAUSTED {
                    return Err(ProcessorError::BudgetDeferralError {
                        task_id: task.id.clone(),
                        reason: error.message,
                    });
                }

                let count =
                    self.failures
                        .record_failure(&task.id, task.pipeline_id.as_deref(), self.events.as_ref());
                tracing::warn!(task_id = %task.id, failure_count = count, code = %error.code, "task execution failed");
                Err(ProcessorError::TaskExecutionError {
                    task_id: task.id.clone(),
                    code: Some(error.code),
                    message: error.message,
                })
            }
        }
    }
}

/// Adapts a [`ProcessorError`] that reaches the broker's `failed` handler
/// into an [`AdapterError`], for adapters that need to report it back
/// through the queue's retry surface.
impl From<ProcessorError> for AdapterError {
    fn from(err: ProcessorError) -> Self {
        AdapterError::Failed(err.to_string())
    }
}
