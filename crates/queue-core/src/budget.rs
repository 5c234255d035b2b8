//! C2: the budget gate. A pure function over `(Task, BudgetState)` plus the
//! batch-filtering and event-emission wrapper the queue manager calls.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::events::{EventSink, QueueEvent};
use crate::task::{Priority, Task};

/// Severity level of a [`BudgetState`] snapshot. Invariant (enforced by
/// whoever produces the snapshot, not by this crate): `allowed_priorities`
/// shrinks monotonically with severity — `Normal` allows all four,
/// `Exhausted` allows none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLevel {
    Normal,
    Warning,
    Throttle,
    Critical,
    Exhausted,
}

/// Point-in-time snapshot of spend, pulled fresh at admission and at
/// dispatch time. Owned by the out-of-scope cost/budget collaborator; this
/// crate only consumes the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub total_budget: f64,
    pub spent: f64,
    pub percent_used: f64,
    pub level: BudgetLevel,
    pub allowed_priorities: HashSet<Priority>,
    pub model_override: Option<String>,
}

impl BudgetState {
    /// A budget state with no spend and every priority allowed. Handy as a
    /// test default and as the safe fallback when a real snapshot can't be
    /// obtained (callers should prefer surfacing that failure, though —
    /// this exists for tests, not for masking adapter errors).
    pub fn unconstrained() -> Self {
        Self {
            total_budget: f64::INFINITY,
            spent: 0.0,
            percent_used: 0.0,
            level: BudgetLevel::Normal,
            allowed_priorities: Priority::ALL.into_iter().collect(),
            model_override: None,
        }
    }
}

/// The outcome of checking one task against a budget snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionDecision {
    Allow,
    Defer,
    Block,
}

/// Stateless evaluator for the admission rule in spec §4.1.
#[derive(Debug, Default, Clone, Copy)]
pub struct BudgetGate;

impl BudgetGate {
    pub fn new() -> Self {
        Self
    }

    /// `block` when exhausted; `allow` when the task's priority is in the
    /// allowed set; `defer` otherwise. Never emits events itself — call
    /// [`Self::check_and_emit`] when event emission is wanted, so pure
    /// callers (like [`Self::filter_batch`]) can stay side-effect free.
    pub fn check(&self, task: &Task, budget: &BudgetState) -> AdmissionDecision {
        self.check_priority(task.priority, budget)
    }

    /// Same rule as [`Self::check`], evaluated against a bare priority
    /// rather than a loaded [`Task`] — for call sites that only have a
    /// queue job envelope and need an admission verdict before paying for
    /// a task load.
    pub fn check_priority(&self, priority: Priority, budget: &BudgetState) -> AdmissionDecision {
        if budget.level == BudgetLevel::Exhausted {
            return AdmissionDecision::Block;
        }
        if budget.allowed_priorities.contains(&priority) {
            AdmissionDecision::Allow
        } else {
            AdmissionDecision::Defer
        }
    }

    /// [`Self::check`] plus the event emission spec'd for admission calls:
    /// `budget_critical` at `exhausted`, `budget_warning` at `warning` or
    /// `critical`, nothing at `normal`/`throttle`.
    pub fn check_and_emit(
        &self,
        task: &Task,
        budget: &BudgetState,
        sink: &dyn EventSink,
    ) -> AdmissionDecision {
        self.emit_level_event(budget, sink);
        self.check(task, budget)
    }

    fn emit_level_event(&self, budget: &BudgetState, sink: &dyn EventSink) {
        match budget.level {
            BudgetLevel::Exhausted => sink.emit(QueueEvent::budget_critical(
                budget.level,
                budget.percent_used,
                budget.spent,
                budget.total_budget,
            )),
            BudgetLevel::Warning | BudgetLevel::Critical => sink.emit(QueueEvent::budget_warning(
                budget.level,
                budget.percent_used,
                budget.spent,
                budget.total_budget,
            )),
            BudgetLevel::Normal | BudgetLevel::Throttle => {}
        }
    }

    /// Partition a batch into allowed and deferred tasks, preserving input
    /// order within each partition. Tasks that would `block` are folded
    /// into `deferred` — the caller (queue manager) still needs to mark
    /// them in the workspace, and from the batch API's perspective both
    /// outcomes mean "did not submit this tick".
    pub fn filter_batch(&self, tasks: &[Task], budget: &BudgetState) -> FilteredBatch {
        let mut allowed = Vec::new();
        let mut deferred = Vec::new();
        for task in tasks {
            match self.check(task, budget) {
                AdmissionDecision::Allow => allowed.push(task.clone()),
                AdmissionDecision::Defer | AdmissionDecision::Block => {
                    deferred.push(task.clone())
                }
            }
        }
        FilteredBatch { allowed, deferred }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilteredBatch {
    pub allowed: Vec<Task>,
    pub deferred: Vec<Task>,
}
