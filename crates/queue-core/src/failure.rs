//! C3: per-pipeline consecutive-failure accounting.
//!
//! This is the only shared mutable state on the hot path (spec §5, §9), so
//! it is guarded by a single `std::sync::Mutex` around the whole map —
//! `recordFailure`/`recordSuccess`/`shouldPause` are linearizable, and the
//! `pipeline_blocked` threshold-crossing check happens inside the same
//! critical section as the increment so it can never double-fire under
//! contention.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::events::{EventSink, QueueEvent};

/// Cascade-accounting key used when a task has no `pipeline_id`.
pub const GLOBAL_KEY: &str = "__global__";

/// Which keys [`FailureTracker::should_pause`] should scan.
pub enum PauseScope<'a> {
    /// Scan every tracked key; pause if any has crossed the threshold.
    Any,
    /// The global sentinel bucket.
    Global,
    /// A specific pipeline id.
    Pipeline(&'a str),
}

struct Inner {
    counts: HashMap<String, u32>,
    threshold: u32,
}

/// Consecutive-failure counter, bucketed by pipeline id (or [`GLOBAL_KEY`]).
pub struct FailureTracker {
    inner: Mutex<Inner>,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                counts: HashMap::new(),
                threshold,
            }),
        }
    }

    /// Increment the failure count for `key` (or [`GLOBAL_KEY`] when
    /// `pipeline_id` is `None`). Always emits `agent_failure`; emits
    /// `pipeline_blocked` exactly once, on the tick where the count
    /// transitions from `threshold - 1` to `threshold` — never again while
    /// it stays at or above threshold.
    pub fn record_failure(
        &self,
        task_id: &str,
        pipeline_id: Option<&str>,
        sink: &dyn EventSink,
    ) -> u32 {
        let key = pipeline_id.unwrap_or(GLOBAL_KEY).to_string();
        let (new_count, crossed_threshold, threshold) = {
            let mut inner = self.inner.lock().expect("failure tracker mutex poisoned");
            let entry = inner.counts.entry(key.clone()).or_insert(0);
            *entry += 1;
            let new_count = *entry;
            let threshold = inner.threshold;
            (new_count, new_count == threshold, threshold)
        };

        sink.emit(QueueEvent::agent_failure(task_id, pipeline_id.map(str::to_string), new_count));
        if crossed_threshold {
            sink.emit(QueueEvent::pipeline_blocked(key, new_count, threshold));
        }
        new_count
    }

    /// Reset `key`'s count to 0. Does not remove the key — the zero is
    /// still observable via [`Self::failure_counts`].
    pub fn record_success(&self, key: &str) {
        let mut inner = self.inner.lock().expect("failure tracker mutex poisoned");
        inner.counts.insert(key.to_string(), 0);
    }

    /// Whether the tracked count(s) for `scope` have reached the threshold.
    pub fn should_pause(&self, scope: PauseScope<'_>) -> bool {
        let inner = self.inner.lock().expect("failure tracker mutex poisoned");
        match scope {
            PauseScope::Any => inner.counts.values().any(|&c| c >= inner.threshold),
            PauseScope::Global => {
                inner.counts.get(GLOBAL_KEY).copied().unwrap_or(0) >= inner.threshold
            }
            PauseScope::Pipeline(key) => {
                inner.counts.get(key).copied().unwrap_or(0) >= inner.threshold
            }
        }
    }

    /// Remove one key's tracked count, or every key when `key` is `None`.
    pub fn reset(&self, key: Option<&str>) {
        let mut inner = self.inner.lock().expect("failure tracker mutex poisoned");
        match key {
            Some(k) => {
                inner.counts.remove(k);
            }
            None => inner.counts.clear(),
        }
    }

    /// Snapshot of all tracked counts, for inspection/tests.
    pub fn failure_counts(&self) -> HashMap<String, u32> {
        self.inner.lock().expect("failure tracker mutex poisoned").counts.clone()
    }
}
