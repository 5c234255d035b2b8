//! C5: abstraction over the broker's control channel.

use async_trait::async_trait;

/// Liveness/control channel to the broker. Implementations wrap whatever
/// client library the real broker needs (e.g. a Redis client for a
/// BullMQ-style broker) — that client is an out-of-scope collaborator;
/// this crate only consumes this trait.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Probe liveness. Returns an opaque liveness token (e.g. `"PONG"`) on
    /// success. A successful ping latches [`Self::is_connected`] to `true`.
    async fn ping(&self) -> anyhow::Result<String>;

    /// Graceful shutdown: let in-flight work finish.
    async fn quit(&self) -> anyhow::Result<()>;

    /// Hard shutdown: drop the connection immediately.
    async fn disconnect(&self);

    /// A short human-readable status string (e.g. `"ready"`, `"connecting"`).
    fn status(&self) -> String;

    /// Whether the connection is currently considered live. Latched to the
    /// outcome of the last [`Self::ping`] call, not re-probed on read.
    fn is_connected(&self) -> bool;
}
