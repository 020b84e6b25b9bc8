//! # Turbolink WebSocket Channel
//!
//! WebSocket adapter for the turbolink failover engine, built on
//! `tokio-tungstenite`.
//!
//! The socket reconnects on its own after an unexpected close, retrying every
//! `reconnect_interval` until it succeeds or [`Channel::disconnect`] is
//! called. While it is down, `send` fails with `NotConnected` and health
//! checks report unhealthy, so the engine fails over in the meantime.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use turbolink::{ChannelConfig, ManagedChannel};
//! use turbolink_websocket::{WebSocketChannel, WebSocketChannelConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ws = WebSocketChannel::new(
//!     WebSocketChannelConfig::new("ws://localhost:3001/ws")
//!         .with_reconnect_interval(Duration::from_secs(2)),
//! )?;
//! let mut pushed = ws.subscribe_messages();
//! let channel = Arc::new(ManagedChannel::new(ChannelConfig::new("ws", 5), Arc::new(ws)));
//! # Ok(())
//! # }
//! ```
//!
//! [`Channel::disconnect`]: turbolink_traits::Channel::disconnect

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

mod channel;

pub use channel::{WebSocketChannel, WebSocketChannelConfig};
