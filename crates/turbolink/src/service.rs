//! Connection service facade.
//!
//! Wires a [`ChannelManager`] and a [`HealthMonitor`] together and owns the
//! initialize/shutdown lifecycle. Subscribers of the service receive every
//! manager event and every forwarded channel event on one stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use turbolink_traits::{ChannelStatus, HealthCheckResult};

use crate::channel::ManagedChannel;
use crate::config::ConnectionServiceConfig;
use crate::error::{ConnectionError, ConnectionResult};
use crate::events::ConnectionEvent;
use crate::health::{HealthMonitor, HealthReport};
use crate::manager::{ChannelManager, SwitchOutcome};
use crate::stats::StatsSnapshot;

/// Reason used when [`ConnectionService::switch_channel`] is called without one.
pub const DEFAULT_SWITCH_REASON: &str = "auto-switch";

/// Summary row returned by [`ConnectionService::get_available_channels`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSummary {
    /// Channel id
    pub id: String,
    /// Selection priority
    pub priority: i32,
    /// Current status
    pub status: ChannelStatus,
    /// Transport endpoint, when the adapter reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Entry point for applications: initialize with channels, then send.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use turbolink::{Channel, ChannelConfig, ConnectionService, ManagedChannel};
/// # async fn example(http: Arc<dyn Channel>) -> turbolink::ConnectionResult<()> {
///
/// let service = ConnectionService::new();
/// let primary = Arc::new(ManagedChannel::new(ChannelConfig::new("http", 10), http));
/// service.initialize(vec![primary]).await?;
///
/// let reply = service.send(serde_json::json!({"hello": "world"}), false).await?;
/// println!("{reply}");
/// service.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConnectionService {
    config: ConnectionServiceConfig,
    manager: ChannelManager,
    monitor: HealthMonitor,
    initialized: AtomicBool,
    lifecycle: Mutex<()>,
}

impl Default for ConnectionService {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionService {
    /// Create a service with default buffer and health monitor settings.
    pub fn new() -> Self {
        Self::with_config(ConnectionServiceConfig::default())
    }

    /// Create a service with explicit settings.
    pub fn with_config(config: ConnectionServiceConfig) -> Self {
        Self {
            manager: ChannelManager::new(config.buffer.clone()),
            monitor: HealthMonitor::new(config.health_monitor.clone()),
            config,
            initialized: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        }
    }

    /// Service configuration
    pub fn config(&self) -> &ConnectionServiceConfig {
        &self.config
    }

    /// The underlying channel manager
    pub fn manager(&self) -> &ChannelManager {
        &self.manager
    }

    /// Whether `initialize` has succeeded and `shutdown` has not been called since.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Register and connect `channels` in order, then select the best usable one.
    ///
    /// Connect failures do not abort initialization; the channel is simply left
    /// unavailable. If no channel ends up usable, everything registered so far is
    /// shut down again.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::AlreadyInitialized`] on a second call,
    /// [`ConnectionError::Config`] for an invalid channel configuration,
    /// [`ConnectionError::DuplicateChannel`] for repeated ids and
    /// [`ConnectionError::NoAvailableChannels`] if nothing connected.
    pub async fn initialize(&self, channels: Vec<Arc<ManagedChannel>>) -> ConnectionResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.is_initialized() {
            tracing::warn!("Connection service already initialized");
            return Err(ConnectionError::AlreadyInitialized);
        }

        self.config.validate()?;
        for channel in &channels {
            channel.config().validate()?;
        }

        let channel_count = channels.len();
        for channel in channels {
            if let Err(error) = self.manager.register_channel(Arc::clone(&channel)) {
                self.rollback(&error).await;
                return Err(error);
            }
            self.monitor.register_channel(&channel);
            channel.initialize().await;
        }

        let selected = match self.manager.get_available_channels().first() {
            Some(best) => self
                .manager
                .set_current_channel(best.id())
                .map(|()| best.id().to_string()),
            None => Err(ConnectionError::NoAvailableChannels),
        };

        let current = match selected {
            Ok(current) => current,
            Err(error) => {
                self.rollback(&error).await;
                return Err(error);
            }
        };

        self.initialized.store(true, Ordering::Release);
        tracing::info!(
            channel_count,
            current_channel = %current,
            "Connection service initialized"
        );
        Ok(())
    }

    async fn rollback(&self, error: &ConnectionError) {
        tracing::error!(error = %error, "Connection service initialization failed");
        self.manager.shutdown().await;
        self.monitor.shutdown();
    }

    fn ensure_initialized(&self) -> ConnectionResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ConnectionError::NotInitialized)
        }
    }

    /// Send through the current channel; see [`ChannelManager::send`].
    pub async fn send(&self, payload: Value, critical: bool) -> ConnectionResult<Value> {
        self.ensure_initialized()?;
        self.manager.send(payload, critical).await
    }

    /// Switch to the best other channel. `reason` defaults to `"auto-switch"`.
    pub async fn switch_channel(&self, reason: Option<&str>) -> ConnectionResult<SwitchOutcome> {
        self.ensure_initialized()?;
        self.manager
            .switch_channel(reason.unwrap_or(DEFAULT_SWITCH_REASON))
            .await
    }

    /// Id of the current channel, if any.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotInitialized`] before `initialize` or after `shutdown`.
    pub fn get_current_channel_id(&self) -> ConnectionResult<Option<String>> {
        self.ensure_initialized()?;
        Ok(self.manager.get_current_channel_id())
    }

    /// Status of a registered channel.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotInitialized`] outside the initialized lifecycle,
    /// [`ConnectionError::NotFound`] for an unknown id.
    pub fn get_channel_status(&self, channel_id: &str) -> ConnectionResult<ChannelStatus> {
        self.ensure_initialized()?;
        self.manager
            .get_channel_status(channel_id)
            .ok_or_else(|| ConnectionError::NotFound(channel_id.to_string()))
    }

    /// Usable channels, highest priority first.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotInitialized`] before `initialize` or after `shutdown`.
    pub fn get_available_channels(&self) -> ConnectionResult<Vec<ChannelSummary>> {
        self.ensure_initialized()?;
        Ok(self
            .manager
            .get_available_channels()
            .into_iter()
            .map(|channel| ChannelSummary {
                id: channel.id().to_string(),
                priority: channel.priority(),
                status: channel.status(),
                endpoint: channel.endpoint(),
            })
            .collect())
    }

    /// Probe a channel now through the health monitor.
    pub async fn force_health_check(&self, channel_id: &str) -> ConnectionResult<HealthCheckResult> {
        self.ensure_initialized()?;
        self.monitor.force_health_check(channel_id).await
    }

    /// Latest health report of a channel.
    pub fn get_channel_health(&self, channel_id: &str) -> ConnectionResult<HealthReport> {
        self.ensure_initialized()?;
        self.monitor.get_channel_health(channel_id)
    }

    /// Receive manager and channel events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.manager.subscribe()
    }

    /// Manager counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.manager.stats()
    }

    /// Shut both managers down and allow a later `initialize`.
    ///
    /// Safe to call repeatedly and before `initialize`.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let was_initialized = self.initialized.swap(false, Ordering::AcqRel);
        if was_initialized {
            tracing::info!("Shutting down connection service");
        }

        self.manager.shutdown().await;
        self.monitor.shutdown();

        if was_initialized {
            tracing::info!("Connection service shutdown complete");
        }
    }
}
