//! # Turbolink Channel Traits
//!
//! The adapter contract for the turbolink failover engine. A transport (HTTP,
//! WebSocket, anything else) becomes usable by the engine by implementing
//! [`Channel`]: four operations, no knowledge of priorities, buffering, or
//! failover.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Traits**: [`Channel`]
//! - **Types**: [`ChannelStatus`], [`TransportReply`], [`ChannelResponse`], [`HealthCheckResult`]
//! - **Errors**: [`TransportError`], [`TransportResult`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use turbolink_traits::{Channel, HealthCheckResult, TransportReply, TransportResult};
//! use async_trait::async_trait;
//!
//! #[derive(Debug)]
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Channel for MyTransport {
//!     fn kind(&self) -> &'static str { "my-transport" }
//!     // ... connect, disconnect, send, health_check
//! }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

mod error;
mod traits;
mod types;

pub use error::{TransportError, TransportResult};
pub use traits::Channel;
pub use types::{ChannelResponse, ChannelStatus, HealthCheckResult, TransportReply};
