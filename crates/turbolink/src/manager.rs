//! Channel registry, failover and send routing.
//!
//! The [`ChannelManager`] owns every registered [`ManagedChannel`], a single
//! current-channel pointer and the [`RequestBuffer`]. At most one switch runs at
//! a time: `switching` is taken by compare-and-swap and released by a guard, and
//! callers that find it taken never wait for it. A losing
//! [`switch_channel`](ChannelManager::switch_channel) returns
//! [`SwitchOutcome::AlreadyInProgress`]; a losing non-critical `send` is parked
//! in the buffer until the switch flushes it.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use turbolink_traits::ChannelStatus;

use crate::buffer::{BufferedRequest, ReplayFuture, RequestBuffer};
use crate::channel::ManagedChannel;
use crate::config::BufferConfig;
use crate::error::{ConnectionError, ConnectionResult};
use crate::events::{ConnectionEvent, EventBus};
use crate::stats::{ManagerStats, StatsSnapshot};

/// Result of a [`ChannelManager::switch_channel`] call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The current pointer moved
    Switched {
        /// Previous current channel
        from: Option<String>,
        /// New current channel
        to: String,
    },
    /// Another switch was in flight; nothing was done
    AlreadyInProgress,
}

impl SwitchOutcome {
    /// Target of a completed switch
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Switched { to, .. } => Some(to),
            Self::AlreadyInProgress => None,
        }
    }
}

/// Holds the `switching` flag; clears it on drop.
struct SwitchGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SwitchGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
struct ManagerInner {
    /// Registration order is the priority tie-break
    channels: RwLock<Vec<Arc<ManagedChannel>>>,
    current: ArcSwapOption<ManagedChannel>,
    switching: AtomicBool,
    buffer: RequestBuffer,
    events: EventBus,
    watchers: Mutex<HashMap<String, JoinHandle<()>>>,
    stats: ManagerStats,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        for (_, watcher) in self.watchers.lock().drain() {
            watcher.abort();
        }
    }
}

/// Selects, switches and sends through registered channels.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Debug, Clone)]
pub struct ChannelManager {
    inner: Arc<ManagerInner>,
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new(BufferConfig::default())
    }
}

impl ChannelManager {
    /// Create a manager with an empty registry.
    pub fn new(buffer: BufferConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                channels: RwLock::new(Vec::new()),
                current: ArcSwapOption::empty(),
                switching: AtomicBool::new(false),
                buffer: RequestBuffer::new(buffer),
                events: EventBus::new(),
                watchers: Mutex::new(HashMap::new()),
                stats: ManagerStats::new(),
            }),
        }
    }

    /// Add a channel to the registry and start forwarding its events.
    ///
    /// When the channel publishes `channel.unavailable` while it is current, a
    /// background switch is started; its failure is logged, not returned.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::DuplicateChannel`] if the id is taken.
    pub fn register_channel(&self, channel: Arc<ManagedChannel>) -> ConnectionResult<()> {
        {
            let mut channels = self.inner.channels.write();
            if channels.iter().any(|c| c.id() == channel.id()) {
                return Err(ConnectionError::DuplicateChannel(channel.id().to_string()));
            }
            channels.push(Arc::clone(&channel));
        }

        let events = channel.subscribe();
        let watcher = tokio::spawn(watch_channel(Arc::downgrade(&self.inner), events));
        if let Some(previous) = self
            .inner
            .watchers
            .lock()
            .insert(channel.id().to_string(), watcher)
        {
            previous.abort();
        }

        tracing::info!(
            channel_id = %channel.id(),
            priority = channel.priority(),
            kind = channel.kind(),
            "Channel registered"
        );
        Ok(())
    }

    /// Point the manager at a registered, usable channel.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotFound`] for an unknown id,
    /// [`ConnectionError::Unavailable`] if the channel cannot be used.
    pub fn set_current_channel(&self, channel_id: &str) -> ConnectionResult<()> {
        let channel = self
            .get_channel(channel_id)
            .ok_or_else(|| ConnectionError::NotFound(channel_id.to_string()))?;

        if !channel.can_use() {
            return Err(ConnectionError::Unavailable(channel_id.to_string()));
        }

        let previous = self.inner.current.swap(Some(channel));
        tracing::info!(
            from = ?previous.as_ref().map(|c| c.id()),
            to = %channel_id,
            "Current channel changed"
        );
        Ok(())
    }

    /// Move to the best usable channel other than the current one, then flush
    /// the request buffer.
    ///
    /// Candidates are ordered by priority, highest first; equal priorities keep
    /// registration order.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NoAvailableChannels`] if there is no candidate, after
    /// publishing `no.available.channels` and `switch.failed`.
    pub async fn switch_channel(&self, reason: &str) -> ConnectionResult<SwitchOutcome> {
        let Some(guard) = SwitchGuard::try_acquire(&self.inner.switching) else {
            tracing::debug!(reason, "Channel switch already in progress");
            self.inner.stats.record_switch_skipped();
            return Ok(SwitchOutcome::AlreadyInProgress);
        };

        let from = self.get_current_channel_id();
        let selected = self.select_and_assign(from.as_deref(), reason);
        drop(guard);

        match selected {
            Ok(to) => {
                self.inner.stats.record_switch_completed();
                let replayed = self.inner.buffer.process_all().await;
                self.inner.stats.record_replayed(replayed);
                Ok(SwitchOutcome::Switched { from, to })
            }
            Err((to, error)) => {
                self.inner.stats.record_switch_failed();
                tracing::error!(
                    from = ?from,
                    reason,
                    error = %error,
                    "Channel switch failed"
                );
                self.inner.events.publish(ConnectionEvent::SwitchFailed {
                    from,
                    to,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    fn select_and_assign(
        &self,
        from: Option<&str>,
        reason: &str,
    ) -> Result<String, (Option<String>, ConnectionError)> {
        let target = self
            .get_available_channels()
            .into_iter()
            .find(|c| Some(c.id()) != from);

        let Some(target) = target else {
            self.inner.events.publish(ConnectionEvent::NoAvailableChannels {
                current_channel: from.map(str::to_string),
            });
            tracing::error!(from = ?from, "No available channels for switching");
            return Err((None, ConnectionError::NoAvailableChannels));
        };

        let to = target.id().to_string();
        self.inner.events.publish(ConnectionEvent::SwitchInitiated {
            from: from.map(str::to_string),
            to: to.clone(),
            reason: reason.to_string(),
        });
        tracing::info!(from = ?from, to = %to, reason, "Initiating channel switch");

        self.set_current_channel(&to)
            .map_err(|error| (Some(to.clone()), error))?;

        self.inner.events.publish(ConnectionEvent::SwitchCompleted {
            from: from.map(str::to_string),
            to: to.clone(),
        });
        tracing::info!(from = ?from, to = %to, "Channel switch completed");
        Ok(to)
    }

    /// Send `payload` through the current channel and return the response data.
    ///
    /// While a switch is in flight a non-critical request is buffered and this
    /// call resolves with the outcome of its replay. A failed attempt triggers
    /// one switch and one retry on the new channel; if a switch was already in
    /// flight the original error is returned instead. When another caller has
    /// already moved the current channel by the time the attempt fails, the
    /// retry goes to that channel without a further switch.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotInitialized`] without a current channel, the
    /// transport error of the final attempt, [`ConnectionError::NoAvailableChannels`]
    /// if failover found no candidate, or a buffer rejection.
    pub async fn send(&self, payload: Value, critical: bool) -> ConnectionResult<Value> {
        let Some(current) = self.inner.current.load_full() else {
            return Err(ConnectionError::NotInitialized);
        };

        if !critical && self.is_switching() {
            return self.buffer_request(payload).await;
        }

        self.inner.stats.record_send();
        let error = match current.send(&payload).await {
            Ok(response) => return Ok(response.data),
            Err(error) => error,
        };

        self.inner.stats.record_send_failure();
        tracing::error!(
            channel_id = %current.id(),
            error = %error,
            "Send failed, attempting channel switch"
        );

        if self.is_switching() {
            return Err(error.into());
        }

        if let Some(now) = self.inner.current.load_full()
            && !Arc::ptr_eq(&current, &now)
        {
            tracing::debug!(
                from = %current.id(),
                to = %now.id(),
                "Current channel moved during send, retrying without switch"
            );
            return self.retry_on(&now, &payload).await;
        }

        match self.switch_channel("send failure").await? {
            SwitchOutcome::Switched { .. } => {
                let Some(next) = self.inner.current.load_full() else {
                    return Err(error.into());
                };
                self.retry_on(&next, &payload).await
            }
            SwitchOutcome::AlreadyInProgress => Err(error.into()),
        }
    }

    async fn retry_on(&self, channel: &ManagedChannel, payload: &Value) -> ConnectionResult<Value> {
        let retried = channel.send(payload).await;
        self.inner.stats.record_failover_retry(retried.is_ok());
        retried.map(|response| response.data).map_err(Into::into)
    }

    async fn buffer_request(&self, payload: Value) -> ConnectionResult<Value> {
        let manager = Arc::downgrade(&self.inner);
        let (request, pending) =
            BufferedRequest::new(false, move || replay_send(manager, payload));

        tracing::debug!(request_id = %request.id(), "Request buffered during switch");
        self.inner.buffer.add(request);
        self.inner.stats.record_buffered();

        // The switch may have flushed before the request landed
        if !self.is_switching() {
            let replayed = self.inner.buffer.process_all().await;
            self.inner.stats.record_replayed(replayed);
        }

        pending.wait().await
    }

    /// Usable channels, highest priority first.
    pub fn get_available_channels(&self) -> Vec<Arc<ManagedChannel>> {
        let mut available: Vec<_> = self
            .inner
            .channels
            .read()
            .iter()
            .filter(|c| c.can_use())
            .cloned()
            .collect();
        // Stable sort keeps registration order among equal priorities
        available.sort_by_key(|c| Reverse(c.priority()));
        available
    }

    /// Every registered channel, in registration order.
    pub fn channels(&self) -> Vec<Arc<ManagedChannel>> {
        self.inner.channels.read().clone()
    }

    /// Look up a registered channel.
    pub fn get_channel(&self, channel_id: &str) -> Option<Arc<ManagedChannel>> {
        self.inner
            .channels
            .read()
            .iter()
            .find(|c| c.id() == channel_id)
            .cloned()
    }

    /// Status of a registered channel.
    pub fn get_channel_status(&self, channel_id: &str) -> Option<ChannelStatus> {
        self.get_channel(channel_id).map(|c| c.status())
    }

    /// The current channel.
    pub fn get_current_channel(&self) -> Option<Arc<ManagedChannel>> {
        self.inner.current.load_full()
    }

    /// Id of the current channel.
    pub fn get_current_channel_id(&self) -> Option<String> {
        self.inner
            .current
            .load_full()
            .map(|c| c.id().to_string())
    }

    /// Number of registered channels.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.read().len()
    }

    /// Whether a switch is in flight.
    pub fn is_switching(&self) -> bool {
        self.inner.switching.load(Ordering::Acquire)
    }

    /// Number of requests waiting in the buffer.
    pub fn buffered_requests(&self) -> usize {
        self.inner.buffer.len()
    }

    /// Receive manager events and the forwarded events of every registered channel.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Counters snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Reject buffered requests, shut every channel down and empty the registry.
    ///
    /// Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let rejected = self.inner.buffer.clear();

        for (_, watcher) in self.inner.watchers.lock().drain() {
            watcher.abort();
        }

        self.inner.current.store(None);
        let channels = std::mem::take(&mut *self.inner.channels.write());
        let count = channels.len();

        for channel in channels {
            channel.shutdown().await;
        }

        if count > 0 || rejected > 0 {
            tracing::info!(
                channels = count,
                rejected_requests = rejected,
                "Channel manager shut down"
            );
        }
    }
}

/// Replay operation of a buffered request: a critical send on the manager, if
/// it still exists.
fn replay_send(manager: Weak<ManagerInner>, payload: Value) -> ReplayFuture {
    async move {
        let inner = manager.upgrade().ok_or(ConnectionError::BufferCleared)?;
        ChannelManager { inner }.send(payload, true).await
    }
    .boxed()
}

/// Forward one channel's events onto the manager bus and trigger failover when
/// the current channel becomes unavailable.
async fn watch_channel(
    manager: Weak<ManagerInner>,
    mut events: broadcast::Receiver<ConnectionEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Channel event watcher lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let Some(inner) = manager.upgrade() else {
            break;
        };
        inner.events.publish(event.clone());

        match event {
            ConnectionEvent::ChannelUnavailable { channel_id, error } => {
                tracing::warn!(
                    channel_id = %channel_id,
                    error = %error,
                    "Channel became unavailable"
                );

                let is_current = inner
                    .current
                    .load_full()
                    .is_some_and(|c| c.id() == channel_id);

                if is_current {
                    let manager = ChannelManager { inner };
                    tokio::spawn(async move {
                        if let Err(error) = manager.switch_channel("channel unavailable").await {
                            tracing::error!(
                                channel_id = %channel_id,
                                error = %error,
                                "Failed to switch channel after failure"
                            );
                        }
                    });
                }
            }
            ConnectionEvent::ChannelRecovered { channel_id } => {
                tracing::info!(channel_id = %channel_id, "Channel recovered");
            }
            _ => {}
        }
    }
}
