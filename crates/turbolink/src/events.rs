//! Typed event bus.
//!
//! Every component announces its state transitions as a [`ConnectionEvent`] on
//! an [`EventBus`]. Publishing never blocks and never fails; a bus with no
//! subscribers simply drops the event. Slow subscribers observe
//! [`broadcast::error::RecvError::Lagged`] instead of stalling publishers.

use tokio::sync::broadcast;
use turbolink_traits::{ChannelStatus, TransportError};

use crate::error::ConnectionError;

/// Number of events buffered per subscriber before it starts lagging.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// A state transition published by a channel, the channel manager or the health monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionEvent {
    /// The channel can no longer be used
    ChannelUnavailable {
        /// Channel that became unavailable
        channel_id: String,
        /// Failure that caused it
        error: TransportError,
    },
    /// A previously unavailable channel passed a health check
    ChannelRecovered {
        /// Channel that recovered
        channel_id: String,
    },
    /// Outcome of one tick of a channel's own health loop
    HealthCheck {
        /// Probed channel
        channel_id: String,
        /// `Connected` if the probe passed, `Unavailable` otherwise
        status: ChannelStatus,
    },
    /// A switch picked a target and is about to move the current pointer
    SwitchInitiated {
        /// Previous current channel, if any
        from: Option<String>,
        /// Selected target
        to: String,
        /// Why the switch was requested
        reason: String,
    },
    /// The current pointer moved
    SwitchCompleted {
        /// Previous current channel, if any
        from: Option<String>,
        /// New current channel
        to: String,
    },
    /// A switch attempt failed
    SwitchFailed {
        /// Current channel when the switch started
        from: Option<String>,
        /// Target, if one had been selected
        to: Option<String>,
        /// Why it failed
        error: ConnectionError,
    },
    /// Failover found no usable candidate
    NoAvailableChannels {
        /// Current channel when the search ran
        current_channel: Option<String>,
    },
}

impl ConnectionEvent {
    /// Dotted event name (`"channel.unavailable"`, `"switch.completed"`, ...).
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ChannelUnavailable { .. } => "channel.unavailable",
            Self::ChannelRecovered { .. } => "channel.recovered",
            Self::HealthCheck { .. } => "health.check",
            Self::SwitchInitiated { .. } => "switch.initiated",
            Self::SwitchCompleted { .. } => "switch.completed",
            Self::SwitchFailed { .. } => "switch.failed",
            Self::NoAvailableChannels { .. } => "no.available.channels",
        }
    }

    /// The channel this event is about, when there is a single one.
    ///
    /// Switch events report their target.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::ChannelUnavailable { channel_id, .. }
            | Self::ChannelRecovered { channel_id }
            | Self::HealthCheck { channel_id, .. } => Some(channel_id),
            Self::SwitchInitiated { to, .. } | Self::SwitchCompleted { to, .. } => Some(to),
            Self::SwitchFailed { to, .. } => to.as_deref(),
            Self::NoAvailableChannels { current_channel } => current_channel.as_deref(),
        }
    }
}

/// Broadcast-backed publish/subscribe hub for [`ConnectionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ConnectionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with [`EVENT_BUS_CAPACITY`] slots per subscriber.
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUS_CAPACITY)
    }

    /// Create a bus with a custom per-subscriber capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every current subscriber.
    pub fn publish(&self, event: ConnectionEvent) {
        tracing::trace!(event = event.name(), "Publishing connection event");
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
