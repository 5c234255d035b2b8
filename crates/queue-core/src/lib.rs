//! Priority task queue with budget-gated admission, cascading-failure
//! protection, result-driven completion routing, and a filesystem
//! fallback for when the broker is unreachable.
//!
//! This crate is the scheduling substrate between a planner that emits
//! tasks and executors that run them. The broker, workspace, executor,
//! director, and budget source are all consumed through the trait seams
//! in [`adapters`] and [`external`] — nothing here talks to a network or
//! a database directly, aside from the filesystem-backed [`fallback`]
//! queue.

pub mod adapters;
pub mod budget;
pub mod config;
pub mod events;
pub mod external;
pub mod failure;
pub mod fallback;
pub mod health;
pub mod manager;
pub mod priority;
pub mod processor;
pub mod router;
pub mod task;

pub use budget::{AdmissionDecision, BudgetGate, BudgetLevel, BudgetState};
pub use config::QueueManagerConfig;
pub use events::{EventSink, QueueEvent, RecordingEventSink, TracingEventSink};
pub use failure::FailureTracker;
pub use fallback::FallbackQueue;
pub use health::{HealthMonitor, SystemHealth, SystemState};
pub use manager::{EnqueueOutcome, QueueManager};
pub use processor::{ProcessorError, WorkerProcessor};
pub use router::CompletionRouter;
pub use task::{NextDirective, Priority, RoutingAction, Task, TaskStatus};
