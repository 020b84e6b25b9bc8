//! Managed channel: the availability state machine wrapped around an adapter.
//!
//! A [`ManagedChannel`] owns the parts of a channel every transport shares:
//! status, the consecutive-failure counter, the periodic health loop and the
//! shutdown sequence. The transport itself is an `Arc<dyn Channel>` supplied by
//! an adapter crate.
//!
//! ```text
//!            connect ok                threshold reached
//!   Idle ───────────────► Connected ─────────────────────┐
//!    │ ▲                                                 ▼
//!    │ └────────────── health check recovers ────── Unavailable
//!    └──────── connect failed / threshold reached ───────▲
//! ```

use std::sync::{Arc, Weak};
use std::time::Instant as StdInstant;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use turbolink_traits::{
    Channel, ChannelResponse, ChannelStatus, HealthCheckResult, TransportError, TransportResult,
};

use crate::config::ChannelConfig;
use crate::events::{ConnectionEvent, EventBus};

#[derive(Debug, Default)]
struct ChannelState {
    status: ChannelStatus,
    consecutive_failures: u32,
}

/// A registered channel: one adapter plus its health state machine.
///
/// Always used behind an `Arc`; [`initialize`](Self::initialize) hands a weak
/// reference to the background health loop so dropping the last `Arc` ends it.
#[derive(Debug)]
pub struct ManagedChannel {
    config: ChannelConfig,
    transport: Arc<dyn Channel>,
    state: Mutex<ChannelState>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    events: EventBus,
}

impl ManagedChannel {
    /// Wrap an adapter. The channel starts `Idle` with no health loop running.
    pub fn new(config: ChannelConfig, transport: Arc<dyn Channel>) -> Self {
        Self {
            config,
            transport,
            state: Mutex::new(ChannelState::default()),
            health_task: Mutex::new(None),
            events: EventBus::new(),
        }
    }

    /// Unique channel id
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Selection priority
    pub fn priority(&self) -> i32 {
        self.config.priority
    }

    /// Channel configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Transport kind of the wrapped adapter
    pub fn kind(&self) -> &'static str {
        self.transport.kind()
    }

    /// Remote address reported by the wrapped adapter
    pub fn endpoint(&self) -> Option<String> {
        self.transport.endpoint()
    }

    /// The wrapped adapter
    pub fn transport(&self) -> &Arc<dyn Channel> {
        &self.transport
    }

    /// Current status
    pub fn status(&self) -> ChannelStatus {
        self.state.lock().status
    }

    /// Failed probes since the last recovery or connect. Diagnostics only.
    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// `true` unless the channel is unavailable
    pub fn is_available(&self) -> bool {
        self.status() != ChannelStatus::Unavailable
    }

    /// `true` if the channel may be selected for sends
    pub fn can_use(&self) -> bool {
        matches!(self.status(), ChannelStatus::Idle | ChannelStatus::Connected)
    }

    /// Whether the background health loop is running
    pub fn is_health_loop_running(&self) -> bool {
        self.health_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Receive this channel's events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Connect the adapter and start the health loop.
    ///
    /// On success the channel becomes `Connected` and the first probe runs one
    /// `health_check_interval` later. On failure the channel becomes
    /// `Unavailable`, `channel.unavailable` is published and no loop is
    /// started. Returns the resulting status; connect failures are never raised.
    pub async fn initialize(self: &Arc<Self>) -> ChannelStatus {
        match self.transport.connect().await {
            Ok(()) => {
                self.set_status(ChannelStatus::Connected);
                let task = self.spawn_health_loop();
                if let Some(previous) = self.health_task.lock().replace(task) {
                    previous.abort();
                }
                tracing::info!(
                    channel_id = %self.id(),
                    kind = self.kind(),
                    endpoint = ?self.endpoint(),
                    "Channel connected"
                );
                ChannelStatus::Connected
            }
            Err(error) => {
                tracing::warn!(
                    channel_id = %self.id(),
                    kind = self.kind(),
                    endpoint = ?self.endpoint(),
                    error = %error,
                    "Channel failed to connect"
                );
                self.set_status(ChannelStatus::Unavailable);
                self.events.publish(ConnectionEvent::ChannelUnavailable {
                    channel_id: self.id().to_string(),
                    error,
                });
                ChannelStatus::Unavailable
            }
        }
    }

    /// Perform one delivery attempt and stamp the reply with this channel's id.
    pub async fn send(&self, payload: &Value) -> TransportResult<ChannelResponse> {
        let reply = self.transport.send(payload).await?;
        Ok(ChannelResponse::from_reply(self.id(), reply))
    }

    /// Probe the adapter, bounded by the configured timeout.
    ///
    /// Never fails; a timed-out probe is reported as unhealthy.
    pub async fn health_check(&self) -> HealthCheckResult {
        let timeout = self.config.timeout;
        let started = StdInstant::now();
        match tokio::time::timeout(timeout, self.transport.health_check()).await {
            Ok(result) => result,
            Err(_) => HealthCheckResult::unhealthy(
                started.elapsed(),
                TransportError::timeout("health check", timeout),
            ),
        }
    }

    /// Stop the health loop, disconnect the adapter and force `Unavailable`.
    ///
    /// Disconnect errors are logged. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.stop_health_loop();

        if let Err(error) = self.transport.disconnect().await {
            tracing::error!(
                channel_id = %self.id(),
                error = %error,
                "Error during channel shutdown"
            );
        }

        self.set_status(ChannelStatus::Unavailable);
    }

    fn stop_health_loop(&self) {
        if let Some(task) = self.health_task.lock().take() {
            task.abort();
        }
    }

    fn spawn_health_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let channel: Weak<Self> = Arc::downgrade(self);
        let period = self.config.health_check_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(channel) = channel.upgrade() else {
                    break;
                };
                let result = channel.health_check().await;
                channel.record_health(&result);
            }
        })
    }

    fn set_status(&self, status: ChannelStatus) {
        let previous = {
            let mut state = self.state.lock();
            let previous = state.status;
            state.status = status;
            if status == ChannelStatus::Connected && previous != ChannelStatus::Connected {
                state.consecutive_failures = 0;
            }
            previous
        };

        tracing::debug!(
            channel_id = %self.id(),
            from = %previous,
            to = %status,
            "Channel status changed"
        );
    }

    /// Apply one health-loop outcome to the state machine and publish the
    /// resulting events.
    pub(crate) fn record_health(&self, result: &HealthCheckResult) {
        self.events.publish(ConnectionEvent::HealthCheck {
            channel_id: self.id().to_string(),
            status: if result.is_healthy {
                ChannelStatus::Connected
            } else {
                ChannelStatus::Unavailable
            },
        });

        if result.is_healthy {
            let recovered = {
                let mut state = self.state.lock();
                state.consecutive_failures = 0;
                if state.status == ChannelStatus::Unavailable {
                    state.status = ChannelStatus::Idle;
                    true
                } else {
                    false
                }
            };

            if recovered {
                tracing::info!(
                    channel_id = %self.id(),
                    latency_ms = result.latency.as_millis() as u64,
                    "Channel recovered"
                );
                self.events.publish(ConnectionEvent::ChannelRecovered {
                    channel_id: self.id().to_string(),
                });
            }
            return;
        }

        let (failures, became_unavailable) = {
            let mut state = self.state.lock();
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            let reached = state.consecutive_failures >= self.config.retry_attempts;
            let transition = reached && state.status != ChannelStatus::Unavailable;
            if transition {
                state.status = ChannelStatus::Unavailable;
            }
            (state.consecutive_failures, transition)
        };

        if became_unavailable {
            let error = result.error.clone().unwrap_or_else(|| {
                TransportError::ConnectionLost("health check reported unhealthy".into())
            });
            tracing::warn!(
                channel_id = %self.id(),
                failed_checks = failures,
                error = %error,
                "Channel marked as unavailable"
            );
            self.events.publish(ConnectionEvent::ChannelUnavailable {
                channel_id: self.id().to_string(),
                error,
            });
        } else {
            tracing::debug!(
                channel_id = %self.id(),
                failed_checks = failures,
                error = ?result.error,
                "Health check failed"
            );
        }
    }
}

impl Drop for ManagedChannel {
    fn drop(&mut self) {
        self.stop_health_loop();
    }
}
