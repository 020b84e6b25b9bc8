//! # Turbolink
//!
//! Resilient multi-channel request delivery. A client registers several
//! interchangeable channels (HTTP, WebSocket, ...) ranked by priority and keeps
//! sending while individual channels degrade, recover or get replaced.
//!
//! ## Overview
//!
//! - **Channels**: [`ManagedChannel`] wraps any [`Channel`] adapter with the
//!   `idle / connected / unavailable` state machine and a periodic health loop.
//! - **Failover**: [`ChannelManager`] keeps one current channel, switches to the
//!   best usable one on failure and retries the failed send once.
//! - **Buffering**: [`RequestBuffer`] parks requests that arrive mid-switch and
//!   replays them when the switch completes.
//! - **Monitoring**: [`HealthMonitor`] polls every channel for reporting only.
//! - **Facade**: [`ConnectionService`] ties it together behind
//!   `initialize` / `send` / `shutdown`.
//!
//! Every state transition is published as a [`ConnectionEvent`]; logging goes
//! through `tracing`, so the embedding application decides where it ends up.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use turbolink::{ChannelConfig, ConnectionService, ManagedChannel};
//! use turbolink_http::{HttpChannel, HttpChannelConfig};
//!
//! let http = HttpChannel::new(HttpChannelConfig::new("http://localhost:3000"))?;
//! let channel = Arc::new(ManagedChannel::new(ChannelConfig::new("http", 10), Arc::new(http)));
//!
//! let service = ConnectionService::new();
//! service.initialize(vec![channel]).await?;
//! let reply = service.send(serde_json::json!({"hello": "world"}), false).await?;
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod buffer;
mod channel;
mod config;
mod error;
mod events;
mod health;
mod manager;
mod service;
mod stats;

pub use buffer::{BufferedRequest, BufferedRequestInfo, PendingRequest, ReplayFuture, RequestBuffer};
pub use channel::ManagedChannel;
pub use config::{BufferConfig, ChannelConfig, ConnectionServiceConfig, HealthMonitorConfig};
pub use error::{ConnectionError, ConnectionResult};
pub use events::{ConnectionEvent, EVENT_BUS_CAPACITY, EventBus};
pub use health::{HealthMonitor, HealthReport};
pub use manager::{ChannelManager, SwitchOutcome};
pub use service::{ChannelSummary, ConnectionService, DEFAULT_SWITCH_REASON};
pub use stats::{ManagerStats, StatsSnapshot};

// Adapter contract, so applications only need this crate
pub use turbolink_traits::{
    Channel, ChannelResponse, ChannelStatus, HealthCheckResult, TransportError, TransportReply,
    TransportResult,
};
