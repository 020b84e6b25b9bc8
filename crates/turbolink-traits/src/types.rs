//! Core channel types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// Availability state of a channel.
///
/// The only transitions are `Idle -> Connected` (successful connect),
/// `Idle | Connected -> Unavailable` (initial connect failure or failure
/// threshold reached) and `Unavailable -> Idle` (health check recovered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// Registered but not (or no longer) known to be connected
    #[default]
    Idle,
    /// Connected and passing health checks
    Connected,
    /// Cannot be used for sends
    Unavailable,
}

impl ChannelStatus {
    /// Returns the lowercase wire name of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connected => "connected",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an adapter returns for one successful delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportReply {
    /// Transport-level status code (HTTP status, or 200 for fire-and-forget transports)
    pub status: u16,
    /// Decoded response body
    pub data: Value,
}

impl TransportReply {
    /// Create a reply with the given status and data.
    pub fn new(status: u16, data: Value) -> Self {
        Self { status, data }
    }

    /// Create a `200` reply.
    pub fn ok(data: Value) -> Self {
        Self::new(200, data)
    }
}

/// Response envelope for a delivered payload, stamped with the channel that carried it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResponse {
    /// Decoded response body
    pub data: Value,
    /// Transport-level status code
    pub status: u16,
    /// When the response was received
    pub timestamp: DateTime<Utc>,
    /// Identifier of the channel that delivered the payload
    pub channel_id: String,
}

impl ChannelResponse {
    /// Stamp a transport reply with the delivering channel and the current time.
    pub fn from_reply(channel_id: impl Into<String>, reply: TransportReply) -> Self {
        Self {
            data: reply.data,
            status: reply.status,
            timestamp: Utc::now(),
            channel_id: channel_id.into(),
        }
    }
}

/// Outcome of a single health probe. Probes report failure through this value, never by erroring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckResult {
    /// Whether the channel answered the probe successfully
    pub is_healthy: bool,
    /// Time the probe took
    pub latency: Duration,
    /// Why the probe failed, if it did
    pub error: Option<TransportError>,
}

impl HealthCheckResult {
    /// A successful probe.
    pub fn healthy(latency: Duration) -> Self {
        Self {
            is_healthy: true,
            latency,
            error: None,
        }
    }

    /// A failed probe with its cause.
    pub fn unhealthy(latency: Duration, error: TransportError) -> Self {
        Self {
            is_healthy: false,
            latency,
            error: Some(error),
        }
    }
}
