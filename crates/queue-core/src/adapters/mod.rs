//! C5–C7: narrow adapter seams over the broker's control channel, its
//! submit/inspect/retry surface, and its consumer runtime. Each is
//! satisfiable by the real broker or by an in-memory test double (see the
//! `queue-test-fakes` crate) — no network or filesystem access is implied
//! by the traits themselves.

pub mod broker;
pub mod queue;
pub mod worker;

pub use broker::BrokerConnection;
pub use queue::{AdapterError, FailedJob, JobCounts, JobOptions, JobRecord, QueueAdapter};
pub use worker::{WorkerAdapter, WorkerEvent};
