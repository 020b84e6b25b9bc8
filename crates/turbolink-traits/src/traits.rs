//! The channel adapter trait.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportResult;
use crate::types::{HealthCheckResult, TransportReply};

/// A single transport-specific communication path.
///
/// Implementations perform exactly one attempt per call. They never retry,
/// never switch to another channel and never track availability; the engine
/// wrapping them owns all of that.
#[async_trait]
pub trait Channel: Send + Sync + std::fmt::Debug {
    /// Short name of the transport kind (`"http"`, `"websocket"`, ...), used in logs.
    fn kind(&self) -> &'static str;

    /// Establishes the transport.
    async fn connect(&self) -> TransportResult<()>;

    /// Releases transport resources. Must be idempotent.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Performs one delivery attempt of `payload`.
    async fn send(&self, payload: &Value) -> TransportResult<TransportReply>;

    /// Probes the transport. Failure is reported in the result, never as an error.
    async fn health_check(&self) -> HealthCheckResult;

    /// Returns the remote address or identifier, if the transport has one.
    fn endpoint(&self) -> Option<String> {
        None
    }
}
