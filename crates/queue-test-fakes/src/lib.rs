//! In-memory test doubles for every out-of-scope collaborator trait in
//! `queue-core`: the broker connection, the queue/worker adapters, the
//! workspace, the executor, and the director. Each fake is configurable
//! enough to drive the end-to-end scenarios in the integration tests
//! without a real broker, filesystem workspace, or LLM executor.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use queue_core::adapters::queue::{
    AdapterError, FailedJob, JobCounts, JobHandle, JobOptions, JobRecord, QueueAdapter,
};
use queue_core::adapters::{BrokerConnection, WorkerAdapter, WorkerEvent};
use queue_core::external::{
    BudgetSource, Director, Executor, ExecutionResult, GoalAdvance, Learning, ReviewDecision,
    ReviewRecord, Workspace,
};
use queue_core::{BudgetState, Priority, Task};

/// Liveness double. `ping` succeeds (and latches connected) unless
/// `set_should_fail(true)` was called; `disconnect`/`quit` always latch
/// disconnected.
#[derive(Default)]
pub struct FakeBroker {
    connected: AtomicBool,
    should_fail: AtomicBool,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerConnection for FakeBroker {
    async fn ping(&self) -> anyhow::Result<String> {
        if self.should_fail.load(Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            anyhow::bail!("broker unreachable");
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok("PONG".to_string())
    }

    async fn quit(&self) -> anyhow::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn status(&self) -> String {
        if self.connected.load(Ordering::SeqCst) {
            "ready".to_string()
        } else {
            "disconnected".to_string()
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A fake job the queue adapter holds in its `failed` bucket.
pub struct FakeFailedJob {
    pub task_id: String,
    pub skill: String,
    pub failed_at: DateTime<Utc>,
    pub attempts_made: u32,
    pub last_error: String,
    pub original_priority: Priority,
    pub retried: Mutex<bool>,
}

#[async_trait]
impl FailedJob for FakeFailedJob {
    fn task_id(&self) -> &str {
        &self.task_id
    }
    fn skill(&self) -> &str {
        &self.skill
    }
    fn failed_at(&self) -> DateTime<Utc> {
        self.failed_at
    }
    fn attempts_made(&self) -> u32 {
        self.attempts_made
    }
    fn last_error(&self) -> &str {
        &self.last_error
    }
    fn original_priority(&self) -> Priority {
        self.original_priority
    }

    async fn retry(&self) -> Result<(), AdapterError> {
        *self.retried.lock().unwrap() = true;
        Ok(())
    }
}

/// Submit/inspect/retry double, backed by an in-memory map. `add` can be
/// made to reject every submission via [`Self::set_reject_submissions`], to
/// exercise the queue manager's fallback-to-disk path.
#[derive(Default)]
pub struct FakeQueueAdapter {
    jobs: Mutex<Vec<JobRecord>>,
    reject_submissions: AtomicBool,
    paused: AtomicBool,
    failed: Mutex<Vec<FakeFailedJobHandle>>,
}

struct FakeFailedJobHandle {
    task_id: String,
    skill: String,
    failed_at: DateTime<Utc>,
    attempts_made: u32,
    last_error: String,
    original_priority: Priority,
}

impl FakeQueueAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reject_submissions(&self, reject: bool) {
        self.reject_submissions.store(reject, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<JobRecord> {
        self.jobs.lock().unwrap().clone()
    }

    /// Seed a dead-lettered job for [`QueueAdapter::get_failed`] tests.
    pub fn push_failed(
        &self,
        task_id: impl Into<String>,
        skill: impl Into<String>,
        attempts_made: u32,
        last_error: impl Into<String>,
        original_priority: Priority,
    ) {
        self.failed.lock().unwrap().push(FakeFailedJobHandle {
            task_id: task_id.into(),
            skill: skill.into(),
            failed_at: Utc::now(),
            attempts_made,
            last_error: last_error.into(),
            original_priority,
        });
    }
}

#[async_trait]
impl QueueAdapter for FakeQueueAdapter {
    async fn add(
        &self,
        _name: &str,
        data: &queue_core::task::QueueJobData,
        _opts: JobOptions,
    ) -> Result<JobHandle, AdapterError> {
        if self.reject_submissions.load(Ordering::SeqCst) {
            return Err(AdapterError::Rejected("queue adapter unavailable".to_string()));
        }
        self.jobs.lock().unwrap().push(JobRecord {
            data: data.clone(),
            attempts_made: 0,
        });
        Ok(JobHandle { id: data.task_id.clone() })
    }

    async fn get_job_counts(&self) -> Result<JobCounts, AdapterError> {
        let mut counts: JobCounts = HashMap::new();
        counts.insert("waiting".to_string(), self.jobs.lock().unwrap().len() as u64);
        counts.insert("active".to_string(), 0);
        counts.insert("delayed".to_string(), 0);
        counts.insert("prioritized".to_string(), 0);
        Ok(counts)
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, AdapterError> {
        Ok(self.jobs.lock().unwrap().iter().find(|j| j.data.task_id == id).cloned())
    }

    async fn get_failed(
        &self,
        _start: Option<usize>,
        _end: Option<usize>,
    ) -> Result<Vec<Box<dyn FailedJob>>, AdapterError> {
        Ok(self
            .failed
            .lock()
            .unwrap()
            .iter()
            .map(|f| {
                Box::new(FakeFailedJob {
                    task_id: f.task_id.clone(),
                    skill: f.skill.clone(),
                    failed_at: f.failed_at,
                    attempts_made: f.attempts_made,
                    last_error: f.last_error.clone(),
                    original_priority: f.original_priority,
                    retried: Mutex::new(false),
                }) as Box<dyn FailedJob>
            })
            .collect())
    }

    async fn obliterate(&self) -> Result<(), AdapterError> {
        self.jobs.lock().unwrap().clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn pause(&self) -> Result<(), AdapterError> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), AdapterError> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Consumer-runtime double. Tests push [`WorkerEvent`]s through
/// [`Self::push`] and the queue manager's event loop consumes them off
/// [`WorkerAdapter::events`] exactly as it would a real broker's stream.
pub struct FakeWorkerAdapter {
    sender: mpsc::UnboundedSender<WorkerEvent>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<WorkerEvent>>>,
    running: AtomicBool,
    paused: AtomicBool,
}

impl FakeWorkerAdapter {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
        }
    }

    /// Publish one event as if the broker's consumer runtime had emitted it.
    pub fn push(&self, event: WorkerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

impl Default for FakeWorkerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerAdapter for FakeWorkerAdapter {
    fn events(&self) -> Pin<Box<dyn Stream<Item = WorkerEvent> + Send>> {
        let receiver = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .expect("FakeWorkerAdapter::events() called more than once");
        Box::pin(UnboundedReceiverStream::new(receiver))
    }

    async fn close(&self) -> Result<(), AdapterError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn pause(&self) -> Result<(), AdapterError> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), AdapterError> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Persistence double: every task, output, and learning lives in memory
/// for the lifetime of the test.
#[derive(Default)]
pub struct FakeWorkspace {
    tasks: Mutex<HashMap<String, Task>>,
    outputs: Mutex<HashMap<(String, String, String), String>>,
    learnings: Mutex<Vec<Learning>>,
    reviews: Mutex<HashMap<String, Vec<ReviewRecord>>>,
    files: Mutex<HashMap<String, String>>,
}

impl FakeWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_task(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id.clone(), task);
    }

    pub fn seed_file(&self, path: impl Into<String>, content: impl Into<String>) {
        self.files.lock().unwrap().insert(path.into(), content.into());
    }

    pub fn status_of(&self, id: &str) -> Option<queue_core::task::TaskStatus> {
        self.tasks.lock().unwrap().get(id).map(|t| t.status)
    }

    pub fn learnings(&self) -> Vec<Learning> {
        self.learnings.lock().unwrap().clone()
    }

    pub fn output_for(&self, squad: &str, skill: &str, id: &str) -> Option<String> {
        self.outputs
            .lock()
            .unwrap()
            .get(&(squad.to_string(), skill.to_string(), id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl Workspace for FakeWorkspace {
    async fn read_task(&self, id: &str) -> anyhow::Result<Task> {
        self.tasks
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such task: {id}"))
    }

    async fn write_task(&self, task: &Task) -> anyhow::Result<()> {
        self.tasks.lock().unwrap().insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn update_task_status(&self, id: &str, status: queue_core::task::TaskStatus) -> anyhow::Result<()> {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(id) {
            task.status = status;
        }
        Ok(())
    }

    async fn read_output(&self, squad: &str, skill: &str, id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.output_for(squad, skill, id))
    }

    async fn write_output(&self, squad: &str, skill: &str, id: &str, content: &str) -> anyhow::Result<()> {
        self.outputs
            .lock()
            .unwrap()
            .insert((squad.to_string(), skill.to_string(), id.to_string()), content.to_string());
        Ok(())
    }

    async fn append_learning(&self, entry: Learning) -> anyhow::Result<()> {
        self.learnings.lock().unwrap().push(entry);
        Ok(())
    }

    async fn list_tasks(&self) -> anyhow::Result<Vec<Task>> {
        Ok(self.tasks.lock().unwrap().values().cloned().collect())
    }

    async fn list_reviews(&self, id: &str) -> anyhow::Result<Vec<ReviewRecord>> {
        Ok(self.reviews.lock().unwrap().get(id).cloned().unwrap_or_default())
    }

    async fn read_file(&self, path: &str) -> anyhow::Result<Option<String>> {
        Ok(self.files.lock().unwrap().get(path).cloned())
    }
}

/// Executor double. Scripted per call, in order; panics if exhausted so a
/// test that under-scripts calls fails loudly rather than hanging.
pub struct FakeExecutor {
    results: Mutex<std::collections::VecDeque<ExecutionResult>>,
}

impl FakeExecutor {
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
        }
    }

    /// An executor that always succeeds with empty output, for tests that
    /// only care about routing/admission, not execution content.
    pub fn always_succeeds() -> Self {
        Self::new(vec![])
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, task: &Task, _budget: &BudgetState) -> anyhow::Result<ExecutionResult> {
        let mut results = self.results.lock().unwrap();
        Ok(results.pop_front().unwrap_or_else(|| ExecutionResult::succeeded(task.id.clone())))
    }
}

/// Director double. Scripted review decisions keyed by task id, and a
/// scripted goal-advance outcome.
#[derive(Default)]
pub struct FakeDirector {
    reviews: Mutex<HashMap<String, ReviewDecision>>,
    goal_advances: Mutex<HashMap<String, GoalAdvance>>,
}

impl FakeDirector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_review(&self, task_id: impl Into<String>, decision: ReviewDecision) {
        self.reviews.lock().unwrap().insert(task_id.into(), decision);
    }

    pub fn script_goal_advance(&self, goal_id: impl Into<String>, advance: GoalAdvance) {
        self.goal_advances.lock().unwrap().insert(goal_id.into(), advance);
    }
}

#[async_trait]
impl Director for FakeDirector {
    async fn review_completed_task(&self, task_id: &str) -> anyhow::Result<ReviewDecision> {
        self.reviews
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no scripted review for task {task_id}"))
    }

    async fn advance_goal(&self, goal_id: &str) -> anyhow::Result<GoalAdvance> {
        self.goal_advances
            .lock()
            .unwrap()
            .get(goal_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no scripted goal advance for goal {goal_id}"))
    }
}

/// Budget-source double. Holds one snapshot, swappable mid-test to
/// exercise the dispatch-time re-check in the worker processor.
pub struct FakeBudgetSource {
    state: Mutex<BudgetState>,
}

impl FakeBudgetSource {
    pub fn new(state: BudgetState) -> Self {
        Self { state: Mutex::new(state) }
    }

    pub fn unconstrained() -> Self {
        Self::new(BudgetState::unconstrained())
    }

    pub fn set(&self, state: BudgetState) {
        *self.state.lock().unwrap() = state;
    }
}

#[async_trait]
impl BudgetSource for FakeBudgetSource {
    async fn snapshot(&self) -> anyhow::Result<BudgetState> {
        Ok(self.state.lock().unwrap().clone())
    }
}
