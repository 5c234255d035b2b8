//! End-to-end scenarios driving [`QueueManager`] and [`WorkerProcessor`]
//! against the in-memory fakes from `queue-test-fakes` — no real broker,
//! filesystem workspace, or executor involved.

use std::sync::Arc;
use std::time::Duration;

use queue_core::adapters::{BrokerConnection, WorkerAdapter, WorkerEvent};
use queue_core::budget::{AdmissionDecision, BudgetGate, BudgetLevel};
use queue_core::config::QueueManagerConfig;
use queue_core::events::{EventSink, QueueEvent, RecordingEventSink};
use queue_core::external::{ExecutionResult, ReviewAction, ReviewDecision, ReviewVerdict, Workspace};
use queue_core::failure::{FailureTracker, PauseScope};
use queue_core::fallback::FallbackQueue;
use queue_core::health::HealthMonitor;
use queue_core::manager::{EnqueueOutcome, QueueManager};
use queue_core::processor::{ProcessorError, WorkerProcessor};
use queue_core::router::CompletionRouter;
use queue_core::task::{NextDirective, Priority, QueueJobData, Task, TaskOutput, TaskStatus};
use queue_core::BudgetState;
use queue_test_fakes::{
    FakeBroker, FakeBudgetSource, FakeDirector, FakeExecutor, FakeQueueAdapter, FakeWorkerAdapter,
    FakeWorkspace,
};

fn task(id: &str, priority: Priority, next: NextDirective, pipeline_id: Option<String>) -> Task {
    Task {
        id: id.to_string(),
        to: "writer".to_string(),
        priority,
        goal_id: None,
        pipeline_id,
        status: TaskStatus::Pending,
        revision_count: 0,
        next,
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

fn budget(level: BudgetLevel, allowed: &[Priority]) -> BudgetState {
    BudgetState {
        total_budget: 1000.0,
        spent: 0.0,
        percent_used: 0.0,
        level,
        allowed_priorities: allowed.iter().copied().collect(),
        model_override: None,
    }
}

fn manager(
    queue: Arc<FakeQueueAdapter>,
    broker: Arc<FakeBroker>,
    worker: Arc<FakeWorkerAdapter>,
    workspace: Arc<FakeWorkspace>,
    budget_source: Arc<FakeBudgetSource>,
    fallback_dir: &std::path::Path,
) -> Arc<QueueManager> {
    let config = QueueManagerConfig::new("test-queue", fallback_dir.to_string_lossy().to_string());
    let failures = Arc::new(FailureTracker::new(config.cascade_threshold));
    let events: Arc<dyn EventSink> = Arc::new(RecordingEventSink::new());
    let health_monitor = HealthMonitor::new(vec![], Duration::from_secs(1));
    Arc::new(QueueManager::new(
        config,
        broker,
        queue,
        worker,
        workspace,
        budget_source,
        failures,
        events,
        health_monitor,
    ))
}

// Scenario 1: normal enqueue.
#[tokio::test]
async fn normal_enqueue_submits_one_job_with_mapped_priority_and_matching_job_id() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(FakeQueueAdapter::new());
    let manager = manager(
        queue.clone(),
        Arc::new(FakeBroker::new()),
        Arc::new(FakeWorkerAdapter::new()),
        Arc::new(FakeWorkspace::new()),
        Arc::new(FakeBudgetSource::new(budget(BudgetLevel::Normal, &Priority::ALL))),
        dir.path(),
    );

    let t = task("t-1", Priority::P2, NextDirective::Complete, None);
    let outcome = manager.enqueue(&t).await.unwrap();

    assert_eq!(outcome, EnqueueOutcome::Enqueued);
    let submitted = queue.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].data.task_id, "t-1");
    assert_eq!(
        queue_core::priority::task_priority_to_queue_priority(submitted[0].data.priority),
        10
    );
}

// Scenario 2: throttle deferral.
#[tokio::test]
async fn throttle_level_defers_a_priority_outside_the_allowed_set() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(FakeQueueAdapter::new());
    let workspace = Arc::new(FakeWorkspace::new());
    let mut t = task("t-1", Priority::P2, NextDirective::Complete, None);
    t.status = TaskStatus::Pending;
    workspace.seed_task(t.clone());

    let manager = manager(
        queue.clone(),
        Arc::new(FakeBroker::new()),
        Arc::new(FakeWorkerAdapter::new()),
        workspace.clone(),
        Arc::new(FakeBudgetSource::new(budget(BudgetLevel::Throttle, &[Priority::P0, Priority::P1]))),
        dir.path(),
    );

    let outcome = manager.enqueue(&t).await.unwrap();

    assert_eq!(outcome, EnqueueOutcome::Deferred);
    assert_eq!(workspace.status_of("t-1"), Some(TaskStatus::Deferred));
    assert!(queue.submitted().is_empty());
}

// Scenario 3: broker-down fallback.
#[tokio::test]
async fn rejected_submission_falls_back_to_the_filesystem_queue() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(FakeQueueAdapter::new());
    queue.set_reject_submissions(true);
    let workspace = Arc::new(FakeWorkspace::new());

    let manager = manager(
        queue.clone(),
        Arc::new(FakeBroker::new()),
        Arc::new(FakeWorkerAdapter::new()),
        workspace,
        Arc::new(FakeBudgetSource::new(budget(BudgetLevel::Normal, &Priority::ALL))),
        dir.path(),
    );

    let t = task("t-1", Priority::P1, NextDirective::Complete, None);
    let outcome = manager.enqueue(&t).await.unwrap();

    assert_eq!(outcome, EnqueueOutcome::Fallback);
    let mut entries = std::fs::read_dir(dir.path()).unwrap();
    let entry = entries.next().unwrap().unwrap();
    let name = entry.file_name().into_string().unwrap();
    assert!(name.starts_with("005-"), "expected 005- prefix, got {name}");
    let body = std::fs::read_to_string(entry.path()).unwrap();
    assert!(body.contains("\"t-1\""));
}

// Scenario 4: fallback drain on recovery.
#[tokio::test]
async fn starting_the_manager_drains_the_fallback_queue_priority_first() {
    let dir = tempfile::tempdir().unwrap();
    let fallback = FallbackQueue::new(dir.path());
    fallback
        .enqueue(&QueueJobData::from_task(
            &task("low", Priority::P3, NextDirective::Complete, None),
            chrono::Utc::now(),
        ))
        .await
        .unwrap();
    fallback
        .enqueue(&QueueJobData::from_task(
            &task("high", Priority::P0, NextDirective::Complete, None),
            chrono::Utc::now(),
        ))
        .await
        .unwrap();

    let queue = Arc::new(FakeQueueAdapter::new());
    let broker = Arc::new(FakeBroker::new());
    broker.ping().await.unwrap();
    let worker = Arc::new(FakeWorkerAdapter::new());

    let manager = manager(
        queue.clone(),
        broker,
        worker,
        Arc::new(FakeWorkspace::new()),
        Arc::new(FakeBudgetSource::new(budget(BudgetLevel::Normal, &Priority::ALL))),
        dir.path(),
    );

    manager.start().await.unwrap();

    let submitted = queue.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(
        queue_core::priority::task_priority_to_queue_priority(submitted[0].data.priority),
        1
    );
    assert_eq!(
        queue_core::priority::task_priority_to_queue_priority(submitted[1].data.priority),
        20
    );

    manager.stop().await.unwrap();
}

// Scenario 5: cascade pause.
#[tokio::test]
async fn three_consecutive_failures_on_a_pipeline_cross_the_threshold_exactly_once() {
    let tracker = FailureTracker::new(3);
    let sink = RecordingEventSink::new();

    for _ in 0..3 {
        tracker.record_failure("t", Some("pipe-a"), &sink);
    }

    assert!(tracker.should_pause(PauseScope::Pipeline("pipe-a")));
    assert_eq!(
        sink.count_matching(|e| matches!(e, QueueEvent::PipelineBlocked { .. })),
        1
    );
}

#[tokio::test]
async fn worker_processor_classifies_a_third_consecutive_failure_and_cascade_pauses_the_fourth() {
    let workspace = Arc::new(FakeWorkspace::new());
    let budget_source = Arc::new(FakeBudgetSource::unconstrained());
    let failures = Arc::new(FailureTracker::new(3));
    let events: Arc<dyn EventSink> = Arc::new(RecordingEventSink::new());
    let director = Arc::new(FakeDirector::new());
    let router = Arc::new(CompletionRouter::new(
        workspace.clone(),
        director,
        Default::default(),
    ));

    let failing_result = |id: &str| ExecutionResult::failed(id, "TOOL_ERROR", "tool crashed");
    let executor = Arc::new(FakeExecutor::new(vec![
        failing_result("t-1"),
        failing_result("t-2"),
        failing_result("t-3"),
    ]));

    let processor = WorkerProcessor::new(
        workspace.clone(),
        executor,
        budget_source,
        failures.clone(),
        events,
        router,
    );

    for id in ["t-1", "t-2", "t-3"] {
        workspace.seed_task(task(id, Priority::P1, NextDirective::Complete, Some("pipe-a".to_string())));
        let job = QueueJobData::from_task(&workspace.read_task(id).await.unwrap(), chrono::Utc::now());
        let result = processor.process(&job).await;
        assert!(matches!(result, Err(ProcessorError::TaskExecutionError { .. })));
    }

    assert!(failures.should_pause(PauseScope::Pipeline("pipe-a")));

    workspace.seed_task(task("t-4", Priority::P1, NextDirective::Complete, Some("pipe-a".to_string())));
    let job = QueueJobData::from_task(&workspace.read_task("t-4").await.unwrap(), chrono::Utc::now());
    let result = processor.process(&job).await;
    assert!(matches!(result, Err(ProcessorError::CascadePauseError { .. })));
}

// Scenario 6: director review approve.
#[tokio::test]
async fn director_approve_completes_the_task_and_appends_a_learning() {
    let workspace = Arc::new(FakeWorkspace::new());
    let director = Arc::new(FakeDirector::new());
    director.script_review(
        "t-1",
        ReviewDecision {
            review: ReviewVerdict { verdict: "looks good".to_string(), findings: vec![] },
            action: ReviewAction::Approve,
            next_tasks: vec![],
            escalation: None,
            learning: Some(serde_json::json!({"note": "first pass"})),
        },
    );
    let router = CompletionRouter::new(workspace.clone(), director, Default::default());

    let t = task("t-1", Priority::P1, NextDirective::DirectorReview, None);
    workspace.seed_task(t.clone());
    let result = ExecutionResult::succeeded("t-1");
    let action = router.route(&t, &result).await.unwrap();

    assert_eq!(action, queue_core::task::RoutingAction::Complete { task_id: "t-1".to_string() });
    assert_eq!(workspace.status_of("t-1"), Some(TaskStatus::Approved));
    assert!(workspace.learnings().iter().any(|l| l.task_id == "t-1"));
}

// Scenario 7: director review revise then escalate.
#[tokio::test]
async fn director_revise_enqueues_next_tasks_and_escalate_dead_letters() {
    let workspace = Arc::new(FakeWorkspace::new());
    let director = Arc::new(FakeDirector::new());
    let revision_follow_up = task("t-1-revision", Priority::P1, NextDirective::DirectorReview, None);
    director.script_review(
        "t-1",
        ReviewDecision {
            review: ReviewVerdict { verdict: "needs work".to_string(), findings: vec!["typo".to_string()] },
            action: ReviewAction::Revise,
            next_tasks: vec![revision_follow_up],
            escalation: None,
            learning: None,
        },
    );
    let router = CompletionRouter::new(workspace.clone(), director.clone(), Default::default());

    let t = task("t-1", Priority::P1, NextDirective::DirectorReview, None);
    workspace.seed_task(t.clone());
    let result = ExecutionResult::succeeded("t-1");
    let action = router.route(&t, &result).await.unwrap();
    match action {
        queue_core::task::RoutingAction::EnqueueTasks { tasks } => assert_eq!(tasks.len(), 1),
        other => panic!("unexpected action: {other:?}"),
    }
    assert_eq!(workspace.status_of("t-1"), Some(TaskStatus::Revision));

    // Simulate the max-revisions cutoff: the director now escalates instead.
    director.script_review(
        "t-2",
        ReviewDecision {
            review: ReviewVerdict { verdict: "still broken after max revisions".to_string(), findings: vec![] },
            action: ReviewAction::EscalateHuman,
            next_tasks: vec![],
            escalation: Some(queue_core::external::Escalation {
                reason: "exceeded max revisions".to_string(),
            }),
            learning: None,
        },
    );
    let mut t2 = task("t-2", Priority::P1, NextDirective::DirectorReview, None);
    t2.revision_count = 3;
    workspace.seed_task(t2.clone());
    let action2 = router.route(&t2, &ExecutionResult::succeeded("t-2")).await.unwrap();
    assert_eq!(
        action2,
        queue_core::task::RoutingAction::DeadLetter {
            task_id: "t-2".to_string(),
            reason: "escalated_to_human".to_string(),
        }
    );
    assert_eq!(workspace.status_of("t-2"), Some(TaskStatus::Blocked));
}

// Scenario 8: BUDGET_EXHAUSTED passthrough.
#[tokio::test]
async fn budget_exhausted_executor_error_becomes_a_deferral_not_a_counted_failure() {
    let workspace = Arc::new(FakeWorkspace::new());
    workspace.seed_task(task("t-1", Priority::P1, NextDirective::Complete, Some("pipe-a".to_string())));
    let budget_source = Arc::new(FakeBudgetSource::unconstrained());
    let failures = Arc::new(FailureTracker::new(3));
    let events: Arc<dyn EventSink> = Arc::new(RecordingEventSink::new());
    let director = Arc::new(FakeDirector::new());
    let router = Arc::new(CompletionRouter::new(workspace.clone(), director, Default::default()));
    let executor = Arc::new(FakeExecutor::new(vec![ExecutionResult::failed(
        "t-1",
        queue_core::external::BUDGET_EXHAUSTED,
        "budget exhausted mid-run",
    )]));

    let processor = WorkerProcessor::new(workspace.clone(), executor, budget_source, failures.clone(), events, router);

    let job = QueueJobData::from_task(&workspace.read_task("t-1").await.unwrap(), chrono::Utc::now());
    let result = processor.process(&job).await;

    assert!(matches!(result, Err(ProcessorError::BudgetDeferralError { .. })));
    assert_eq!(failures.failure_counts().get("pipe-a"), None);
}

// Spec §8 invariant: BudgetGate.check(t,b) == block iff b.level == exhausted.
#[tokio::test]
async fn budget_gate_blocks_iff_exhausted() {
    let gate = BudgetGate::new();
    let t = task("t", Priority::P3, NextDirective::Complete, None);
    for level in [
        BudgetLevel::Normal,
        BudgetLevel::Warning,
        BudgetLevel::Throttle,
        BudgetLevel::Critical,
        BudgetLevel::Exhausted,
    ] {
        let b = budget(level, &Priority::ALL);
        let decision = gate.check(&t, &b);
        assert_eq!(decision == AdmissionDecision::Block, level == BudgetLevel::Exhausted);
    }
}

// Round-trip a worker event through the fake worker adapter's stream, as
// the queue manager's consumer loop does in production.
#[tokio::test]
async fn worker_adapter_events_stream_delivers_completed_and_failed_events_in_order() {
    use tokio_stream::StreamExt;

    let worker = Arc::new(FakeWorkerAdapter::new());
    let mut events = worker.events();

    let job = QueueJobData::from_task(&task("t-1", Priority::P1, NextDirective::Complete, None), chrono::Utc::now());
    worker.push(WorkerEvent::Completed {
        job: job.clone(),
        attempts_made: 1,
        routing_action: queue_core::task::RoutingAction::Complete { task_id: "t-1".to_string() },
    });
    worker.push(WorkerEvent::Failed {
        job,
        attempts_made: 1,
        error: ProcessorError::TaskExecutionError {
            task_id: "t-1".to_string(),
            code: None,
            message: "boom".to_string(),
        },
    });

    assert!(matches!(events.next().await, Some(WorkerEvent::Completed { .. })));
    assert!(matches!(events.next().await, Some(WorkerEvent::Failed { .. })));
}
