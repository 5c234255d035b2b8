//! C10: the top-level orchestrator. Owns the broker/queue/worker adapters,
//! the failure tracker and fallback queue singletons, and the health-check
//! timer; wires worker events back into admission and routing.

use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::adapters::{
    AdapterError, BrokerConnection, JobOptions, QueueAdapter, WorkerAdapter, WorkerEvent,
};
use crate::adapters::queue::{BackoffOptions, RetentionOptions};
use crate::budget::{AdmissionDecision, BudgetGate};
use crate::config::QueueManagerConfig;
use crate::events::EventSink;
use crate::external::{BudgetSource, Learning, Workspace};
use crate::failure::{FailureTracker, PauseScope};
use crate::fallback::FallbackQueue;
use crate::health::{ComponentStatus, HealthMonitor, SystemHealth};
use crate::priority::task_priority_to_queue_priority;
use crate::processor::ProcessorError;
use crate::task::{DeadLetterEntry, QueueJobData, Task, TaskStatus};

/// Outcome of a single [`QueueManager::enqueue`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Deferred,
    Fallback,
}

impl std::fmt::Display for EnqueueOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Enqueued => "enqueued",
            Self::Deferred => "deferred",
            Self::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

struct RunningState {
    health_timer: Option<tokio::task::JoinHandle<()>>,
    worker_consumer: Option<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
}

pub struct QueueManager {
    config: QueueManagerConfig,
    broker: Arc<dyn BrokerConnection>,
    queue: Arc<dyn QueueAdapter>,
    worker: Arc<dyn WorkerAdapter>,
    workspace: Arc<dyn Workspace>,
    budget_source: Arc<dyn BudgetSource>,
    failures: Arc<FailureTracker>,
    fallback: FallbackQueue,
    events: Arc<dyn EventSink>,
    health_monitor: HealthMonitor,
    budget_gate: BudgetGate,
    batch_semaphore: Semaphore,
    state: Mutex<RunningState>,
}

impl QueueManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: QueueManagerConfig,
        broker: Arc<dyn BrokerConnection>,
        queue: Arc<dyn QueueAdapter>,
        worker: Arc<dyn WorkerAdapter>,
        workspace: Arc<dyn Workspace>,
        budget_source: Arc<dyn BudgetSource>,
        failures: Arc<FailureTracker>,
        events: Arc<dyn EventSink>,
        health_monitor: HealthMonitor,
    ) -> Self {
        let fallback = FallbackQueue::new(config.fallback_dir.clone());
        let max_parallel = config.max_parallel_agents.max(1) as usize;
        Self {
            config,
            broker,
            queue,
            worker,
            workspace,
            budget_source,
            failures,
            fallback,
            events,
            health_monitor,
            budget_gate: BudgetGate::new(),
            batch_semaphore: Semaphore::new(max_parallel),
            state: Mutex::new(RunningState {
                health_timer: None,
                worker_consumer: None,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Admit one task: check the budget, then submit to the queue adapter
    /// (falling back to the filesystem queue if that submission fails).
    pub async fn enqueue(&self, task: &Task) -> anyhow::Result<EnqueueOutcome> {
        let budget = self.budget_source.snapshot().await?;

        match self.budget_gate.check_and_emit(task, &budget, self.events.as_ref()) {
            AdmissionDecision::Block => {
                tracing::debug!(task_id = %task.id, priority = ?task.priority, "admission blocked task, budget exhausted");
                self.workspace.update_task_status(&task.id, TaskStatus::Blocked).await?;
                Ok(EnqueueOutcome::Deferred)
            }
            AdmissionDecision::Defer => {
                tracing::debug!(task_id = %task.id, priority = ?task.priority, "admission deferred task, priority not currently allowed");
                self.workspace.update_task_status(&task.id, TaskStatus::Deferred).await?;
                Ok(EnqueueOutcome::Deferred)
            }
            AdmissionDecision::Allow => {
                tracing::debug!(task_id = %task.id, priority = ?task.priority, "admission allowed task");
                let enqueued_at = chrono::Utc::now();
                let data = QueueJobData::from_task(task, enqueued_at);
                let opts = JobOptions {
                    priority: task_priority_to_queue_priority(task.priority),
                    attempts: self.config.retry.max_attempts,
                    backoff: BackoffOptions {
                        exponential: true,
                        initial_delay_ms: self.config.retry.initial_delay_ms,
                    },
                    job_id: task.id.clone(),
                    retention: RetentionOptions::default(),
                };

                match self.queue.add(&self.config.queue_name, &data, opts).await {
                    Ok(_) => Ok(EnqueueOutcome::Enqueued),
                    Err(e) => {
                        tracing::warn!(task_id = %task.id, error = %e, "queue adapter rejected job, falling back to disk");
                        self.fallback.enqueue(&data).await?;
                        Ok(EnqueueOutcome::Fallback)
                    }
                }
            }
        }
    }

    /// Admit a batch with bounded concurrency. Failures are collected
    /// rather than aborting the batch; each failure gets a best-effort
    /// learning recorded against its task id.
    pub async fn enqueue_batch(&self, tasks: &[Task]) -> Vec<anyhow::Result<EnqueueOutcome>> {
        let futures = tasks.iter().map(|task| async move {
            let _permit = self.batch_semaphore.acquire().await.expect("semaphore never closed");
            let outcome = self.enqueue(task).await;
            if let Err(e) = &outcome {
                let entry = Learning::new(task.id.clone(), format!("batch enqueue failed: {e}"));
                if let Err(log_err) = self.workspace.append_learning(entry).await {
                    tracing::warn!(task_id = %task.id, error = %log_err, "failed to record enqueue-failure learning");
                }
            }
            outcome
        });

        futures::future::join_all(futures).await
    }

    /// Idempotent start: spawns the health-check timer (replacing any
    /// prior one) and drains the fallback queue once.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if let Some(handle) = state.health_timer.take() {
            handle.abort();
        }
        if let Some(handle) = state.worker_consumer.take() {
            handle.abort();
        }
        state.cancel = CancellationToken::new();

        let manager = Arc::clone(self);
        let cancel = state.cancel.clone();
        let interval = self.config.health_check_interval();
        state.health_timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // `interval` fires its first tick immediately; consume it here
            // so the only drain racing the explicit one below is a real
            // timer tick, not this task's startup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = manager.drain_fallback_once().await {
                            tracing::warn!(error = %e, "fallback drain tick failed");
                        }
                    }
                }
            }
        }));

        let manager = Arc::clone(self);
        let cancel = state.cancel.clone();
        state.worker_consumer = Some(tokio::spawn(async move {
            let mut events = manager.worker.events();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.next() => {
                        match event {
                            Some(event) => manager.handle_worker_event(event).await,
                            None => break,
                        }
                    }
                }
            }
        }));

        drop(state);
        self.drain_fallback_once().await?;
        Ok(())
    }

    /// Idempotent stop: cancels the timer/consumer tasks and closes the
    /// worker then the queue. In-flight jobs are not interrupted.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.cancel.cancel();
        if let Some(handle) = state.health_timer.take() {
            let _ = handle.await;
        }
        if let Some(handle) = state.worker_consumer.take() {
            handle.abort();
        }
        drop(state);

        self.worker.close().await?;
        self.queue.close().await?;
        Ok(())
    }

    pub async fn pause(&self) -> anyhow::Result<()> {
        self.worker.pause().await?;
        self.queue.pause().await?;
        Ok(())
    }

    pub async fn resume(&self) -> anyhow::Result<()> {
        self.queue.resume().await?;
        self.worker.resume().await?;
        Ok(())
    }

    async fn handle_worker_event(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Completed { job, routing_action, .. } => {
                if let crate::task::RoutingAction::EnqueueTasks { tasks } = routing_action {
                    if !tasks.is_empty() {
                        let outcomes = self.enqueue_batch(&tasks).await;
                        for (task, outcome) in tasks.iter().zip(outcomes) {
                            if let Err(e) = outcome {
                                tracing::warn!(task_id = %task.id, error = %e, "failed to re-enqueue follow-up task");
                            }
                        }
                    }
                }
                let _ = job;
            }
            WorkerEvent::Failed { job, error, .. } => self.handle_worker_failure(job, error).await,
        }
    }

    /// The processor already recorded this failure against C3 (and, for a
    /// budget deferral, never touched C3 at all) before its `Err` became
    /// this event — this handler only reacts to the outcome, it never
    /// records a second time.
    async fn handle_worker_failure(&self, job: QueueJobData, error: ProcessorError) {
        if let Err(e) = self.workspace.update_task_status(&job.task_id, TaskStatus::Failed).await {
            tracing::warn!(task_id = %job.task_id, error = %e, "failed to mark task failed");
        }

        let scope = match &job.pipeline_id {
            Some(id) => PauseScope::Pipeline(id),
            None => PauseScope::Global,
        };
        let paused = self.failures.should_pause(scope);
        if paused {
            if let Err(e) = self.worker.pause().await {
                tracing::warn!(error = %e, "failed to pause worker after cascade threshold crossed");
            }
        }

        let message = format!(
            "task {} failed: {error}; pipeline_paused={paused}",
            job.task_id
        );
        let entry = Learning::new(job.task_id.clone(), message);
        if let Err(e) = self.workspace.append_learning(entry).await {
            tracing::warn!(task_id = %job.task_id, error = %e, "failed to record failure learning");
        }
    }

    /// One fallback-drain attempt: only proceeds while the broker reports
    /// connected. On the first re-submission failure, the drained job and
    /// every remaining drained job are pushed back to disk in original
    /// order and the attempt aborts — never drop a job.
    async fn drain_fallback_once(&self) -> anyhow::Result<()> {
        if !self.broker.is_connected() {
            return Ok(());
        }
        let drained = self.fallback.drain().await?;
        if drained.is_empty() {
            return Ok(());
        }
        let total = drained.len();
        let mut resubmitted = 0;
        for (i, job) in drained.iter().enumerate() {
            let opts = JobOptions {
                priority: task_priority_to_queue_priority(job.data.priority),
                attempts: self.config.retry.max_attempts,
                backoff: BackoffOptions {
                    exponential: true,
                    initial_delay_ms: self.config.retry.initial_delay_ms,
                },
                job_id: job.data.task_id.clone(),
                retention: RetentionOptions::default(),
            };
            if let Err(e) = self.queue.add(&self.config.queue_name, &job.data, opts).await {
                tracing::warn!(error = %e, task_id = %job.data.task_id, "re-submission during fallback drain failed, restoring remainder to disk");
                for remaining in &drained[i..] {
                    self.fallback.enqueue(&remaining.data).await?;
                }
                return Ok(());
            }
            resubmitted += 1;
        }
        tracing::info!(resubmitted, total, "fallback drain resubmitted all pending jobs");
        Ok(())
    }

    pub async fn health(&self) -> anyhow::Result<SystemHealth> {
        let budget = self.budget_source.snapshot().await.ok();
        let (queue_depth, active_agents) = match self.queue.get_job_counts().await {
            Ok(counts) => {
                let depth = counts.get("waiting").copied().unwrap_or(0)
                    + counts.get("delayed").copied().unwrap_or(0)
                    + counts.get("prioritized").copied().unwrap_or(0);
                let active = counts.get("active").copied().unwrap_or(0) as u32;
                (depth, active)
            }
            Err(e) => {
                tracing::warn!(error = %e, "get_job_counts failed, reporting degraded queue state");
                (0, 0)
            }
        };

        let dead_letter_count = match self.queue.get_failed(None, None).await {
            Ok(failed) => failed.len() as u64,
            Err(e) => {
                tracing::warn!(error = %e, "get_failed failed, reporting empty dead-letter count");
                0
            }
        };

        Ok(self
            .health_monitor
            .check_health(
                active_agents,
                self.config.max_parallel_agents,
                queue_depth,
                dead_letter_count,
                budget.as_ref(),
            )
            .await)
    }

    pub async fn dead_letter_entries(&self) -> anyhow::Result<Vec<DeadLetterEntry>> {
        let failed = self.queue.get_failed(None, None).await?;
        let mut entries = Vec::with_capacity(failed.len());
        for job in &failed {
            entries.push(DeadLetterEntry {
                task_id: job.task_id().to_string(),
                skill: job.skill().to_string(),
                failed_at: job.failed_at(),
                attempts: job.attempts_made(),
                last_error: job.last_error().to_string(),
                original_priority: job.original_priority(),
            });
        }
        Ok(entries)
    }

    pub async fn retry_dead_letter(&self, task_id: &str) -> anyhow::Result<()> {
        let failed = self.queue.get_failed(None, None).await?;
        let entry = failed
            .into_iter()
            .find(|j| j.task_id() == task_id)
            .ok_or_else(|| anyhow::anyhow!("no dead-lettered job found for task {task_id}"))?;
        entry.retry().await.map_err(|e: AdapterError| anyhow::anyhow!(e))
    }
}

/// Liveness probe of the broker connection, wired into the health
/// registry. A successful `ping` is `healthy`; a failed one is `offline`.
pub struct BrokerHealthCheck {
    broker: Arc<dyn BrokerConnection>,
}

impl BrokerHealthCheck {
    pub fn new(broker: Arc<dyn BrokerConnection>) -> Self {
        Self { broker }
    }
}

#[async_trait::async_trait]
impl crate::health::HealthCheck for BrokerHealthCheck {
    fn name(&self) -> &str {
        "broker"
    }

    async fn check(&self) -> anyhow::Result<ComponentStatus> {
        self.broker.ping().await?;
        Ok(ComponentStatus::Healthy)
    }
}

/// Liveness probe of the worker adapter. `healthy` iff `is_running()`,
/// else `offline` (spec §4.7).
pub struct WorkerHealthCheck {
    worker: Arc<dyn WorkerAdapter>,
}

impl WorkerHealthCheck {
    pub fn new(worker: Arc<dyn WorkerAdapter>) -> Self {
        Self { worker }
    }
}

#[async_trait::async_trait]
impl crate::health::HealthCheck for WorkerHealthCheck {
    fn name(&self) -> &str {
        "worker"
    }

    async fn check(&self) -> anyhow::Result<ComponentStatus> {
        if self.worker.is_running() {
            Ok(ComponentStatus::Healthy)
        } else {
            Ok(ComponentStatus::Offline)
        }
    }
}

/// Queue-adapter probe: `degraded` when inspection calls fail, rather than
/// `offline` — the broker itself may still be reachable even if counts
/// can't be read right now (spec §4.7).
pub struct QueueHealthCheck {
    queue: Arc<dyn QueueAdapter>,
}

impl QueueHealthCheck {
    pub fn new(queue: Arc<dyn QueueAdapter>) -> Self {
        Self { queue }
    }
}

#[async_trait::async_trait]
impl crate::health::HealthCheck for QueueHealthCheck {
    fn name(&self) -> &str {
        "queue"
    }

    async fn check(&self) -> anyhow::Result<ComponentStatus> {
        if let Err(e) = self.queue.get_job_counts().await {
            tracing::warn!(error = %e, "queue adapter inspection failed");
            return Ok(ComponentStatus::Degraded);
        }
        if let Err(e) = self.queue.get_failed(None, None).await {
            tracing::warn!(error = %e, "queue adapter dead-letter inspection failed");
            return Ok(ComponentStatus::Degraded);
        }
        Ok(ComponentStatus::Healthy)
    }
}
