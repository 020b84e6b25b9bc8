//! # Turbolink HTTP Channel
//!
//! HTTP adapter for the turbolink failover engine, built on `reqwest`.
//!
//! - **connect**: a successful probe of the health endpoint
//! - **send**: `POST` the JSON payload to the send path; non-2xx is an error
//! - **health_check**: `GET` the health path, healthy on 2xx
//! - **disconnect**: drop pooled connections
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use turbolink::{ChannelConfig, ManagedChannel};
//! use turbolink_http::{HttpChannel, HttpChannelConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let http = HttpChannel::new(
//!     HttpChannelConfig::new("http://localhost:3000")
//!         .with_timeout(Duration::from_secs(2))
//!         .with_header("x-api-key", "secret"),
//! )?;
//! let channel = Arc::new(ManagedChannel::new(ChannelConfig::new("http", 10), Arc::new(http)));
//! # Ok(())
//! # }
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

mod transport;

pub use transport::{HttpChannel, HttpChannelConfig};
