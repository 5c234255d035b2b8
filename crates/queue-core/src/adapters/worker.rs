//! C7: abstraction over the broker's consumer runtime.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::adapters::queue::AdapterError;
use crate::processor::ProcessorError;
use crate::task::{QueueJobData, RoutingAction};

/// One event surfaced by the worker's event stream, per spec §4.4
/// (`on('completed', ...)` / `on('failed', ...)`).
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Completed {
        job: QueueJobData,
        attempts_made: u32,
        routing_action: RoutingAction,
    },
    Failed {
        job: QueueJobData,
        attempts_made: u32,
        error: ProcessorError,
    },
}

/// Abstraction over the broker's consumer runtime: event subscription,
/// pause/resume/close, liveness. The real adapter wires
/// [`crate::processor::WorkerProcessor`] as the broker's per-job processor
/// callback and republishes its outcome through [`Self::events`] as
/// `completed`/`failed` — that wiring itself is the out-of-scope broker
/// collaborator; this trait only carries the observable surface.
#[async_trait]
pub trait WorkerAdapter: Send + Sync {
    /// A stream of every `completed`/`failed` event the worker emits.
    fn events(&self) -> Pin<Box<dyn Stream<Item = WorkerEvent> + Send>>;

    async fn close(&self) -> Result<(), AdapterError>;
    async fn pause(&self) -> Result<(), AdapterError>;
    async fn resume(&self) -> Result<(), AdapterError>;
    fn is_running(&self) -> bool;
}
