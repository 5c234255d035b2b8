//! Event types emitted by the budget gate and failure tracker, and the
//! [`EventSink`] seam they're emitted through.
//!
//! Modeled on the `EventBus`/`EventPayload` split used for budget-pressure
//! notifications in the wider agent-orchestration corpus: a plain data enum
//! plus a narrow publish trait, so the queue never hard-codes where events
//! end up (metrics, a log line, a channel consumed by a dashboard).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::BudgetLevel;

/// A unique, monotonically-ordered event identifier. Combines a timestamp
/// with a process-wide counter so ids stay unique even when several events
/// are emitted within the same clock tick (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventId {
    pub emitted_at: DateTime<Utc>,
    pub sequence: u64,
}

static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn next_event_id() -> EventId {
    EventId {
        emitted_at: Utc::now(),
        sequence: EVENT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
    }
}

/// Every event the core can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueEvent {
    AgentFailure {
        id: EventId,
        task_id: String,
        pipeline_id: Option<String>,
        consecutive_failures: u32,
    },
    PipelineBlocked {
        id: EventId,
        pipeline_id: String,
        consecutive_failures: u32,
        threshold: u32,
    },
    BudgetWarning {
        id: EventId,
        level: BudgetLevel,
        percent_used: f64,
        spent: f64,
        total_budget: f64,
    },
    BudgetCritical {
        id: EventId,
        level: BudgetLevel,
        percent_used: f64,
        spent: f64,
        total_budget: f64,
    },
}

impl QueueEvent {
    pub fn agent_failure(
        task_id: impl Into<String>,
        pipeline_id: Option<String>,
        consecutive_failures: u32,
    ) -> Self {
        Self::AgentFailure {
            id: next_event_id(),
            task_id: task_id.into(),
            pipeline_id,
            consecutive_failures,
        }
    }

    pub fn pipeline_blocked(
        pipeline_id: impl Into<String>,
        consecutive_failures: u32,
        threshold: u32,
    ) -> Self {
        Self::PipelineBlocked {
            id: next_event_id(),
            pipeline_id: pipeline_id.into(),
            consecutive_failures,
            threshold,
        }
    }

    pub fn budget_warning(
        level: BudgetLevel,
        percent_used: f64,
        spent: f64,
        total_budget: f64,
    ) -> Self {
        Self::BudgetWarning {
            id: next_event_id(),
            level,
            percent_used,
            spent,
            total_budget,
        }
    }

    pub fn budget_critical(
        level: BudgetLevel,
        percent_used: f64,
        spent: f64,
        total_budget: f64,
    ) -> Self {
        Self::BudgetCritical {
            id: next_event_id(),
            level,
            percent_used,
            spent,
            total_budget,
        }
    }
}

/// Narrow publish seam for [`QueueEvent`]s. Implementations must not block
/// the caller for long — this is invoked from the hot admission/failure
/// paths.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: QueueEvent);
}

/// An [`EventSink`] that only logs via `tracing`. The default for
/// production wiring when no dashboard/metrics consumer is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: QueueEvent) {
        match event {
            QueueEvent::AgentFailure {
                task_id,
                pipeline_id,
                consecutive_failures,
                ..
            } => {
                tracing::warn!(
                    task_id = %task_id,
                    pipeline_id = pipeline_id.as_deref().unwrap_or("<none>"),
                    consecutive_failures,
                    "agent_failure"
                );
            }
            QueueEvent::PipelineBlocked {
                pipeline_id,
                consecutive_failures,
                threshold,
                ..
            } => {
                tracing::warn!(
                    pipeline_id = %pipeline_id,
                    consecutive_failures,
                    threshold,
                    "pipeline_blocked"
                );
            }
            QueueEvent::BudgetWarning {
                level,
                percent_used,
                ..
            } => {
                tracing::warn!(level = ?level, percent_used, "budget_warning");
            }
            QueueEvent::BudgetCritical {
                level,
                percent_used,
                ..
            } => {
                tracing::error!(level = ?level, percent_used, "budget_critical");
            }
        }
    }
}

/// An [`EventSink`] that records every event in-memory, in emission order.
/// Used by tests that assert on exact emission counts (e.g. the
/// exactly-once `pipeline_blocked` invariant).
#[derive(Debug, Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<QueueEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<QueueEvent> {
        self.events.lock().expect("event sink mutex poisoned").clone()
    }

    pub fn count_matching(&self, mut pred: impl FnMut(&QueueEvent) -> bool) -> usize {
        self.events
            .lock()
            .expect("event sink mutex poisoned")
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: QueueEvent) {
        self.events.lock().expect("event sink mutex poisoned").push(event);
    }
}
