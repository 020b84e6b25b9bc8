//! Observational health monitor.
//!
//! Polls every registered channel on its own timer and keeps the latest probe
//! outcome for reporting. It reads channel status only through the channel's
//! public accessors and never changes it; failover is driven solely by each
//! channel's own health loop.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use turbolink_traits::{ChannelStatus, HealthCheckResult};

use crate::channel::ManagedChannel;
use crate::config::HealthMonitorConfig;
use crate::error::{ConnectionError, ConnectionResult};

/// Latest known health of a monitored channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Channel id
    pub channel_id: String,
    /// Channel status at the time of the query
    pub status: ChannelStatus,
    /// Outcome of the last probe, `None` before the first one
    pub is_healthy: Option<bool>,
    /// Latency of the last probe
    pub latency: Option<Duration>,
    /// When the last probe finished
    pub last_check: Option<DateTime<Utc>>,
    /// Failure reported by the last probe
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
struct ProbeRecord {
    is_healthy: bool,
    latency: Duration,
    checked_at: DateTime<Utc>,
    error: Option<String>,
}

#[derive(Debug)]
struct MonitoredChannel {
    channel: Weak<ManagedChannel>,
    task: JoinHandle<()>,
}

/// Periodic, report-only health poller.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    channels: DashMap<String, MonitoredChannel>,
    probes: Arc<DashMap<String, ProbeRecord>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthMonitorConfig::default())
    }
}

impl HealthMonitor {
    /// Create a monitor polling at `config.interval`.
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self {
            config,
            channels: DashMap::new(),
            probes: Arc::new(DashMap::new()),
        }
    }

    /// Polling interval
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Start polling a channel. Re-registering an id restarts its timer.
    ///
    /// Only a weak reference is kept; the timer stops once the channel is dropped.
    /// Must be called from within a Tokio runtime.
    pub fn register_channel(&self, channel: &Arc<ManagedChannel>) {
        let id = channel.id().to_string();
        let task = self.spawn_poller(channel);
        let monitored = MonitoredChannel {
            channel: Arc::downgrade(channel),
            task,
        };

        if let Some(previous) = self.channels.insert(id.clone(), monitored) {
            previous.task.abort();
        }
        tracing::debug!(channel_id = %id, interval = ?self.config.interval, "Health monitoring started");
    }

    /// Stop polling a channel and drop its reference. Returns whether it was monitored.
    pub fn unregister_channel(&self, channel_id: &str) -> bool {
        self.probes.remove(channel_id);
        match self.channels.remove(channel_id) {
            Some((_, monitored)) => {
                monitored.task.abort();
                tracing::debug!(channel_id = %channel_id, "Health monitoring stopped");
                true
            }
            None => false,
        }
    }

    /// Ids of monitored channels
    pub fn monitored_channels(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Probe a channel now and return the raw result.
    ///
    /// The result is also kept as the channel's latest report.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotFound`] if the channel is not monitored.
    pub async fn force_health_check(&self, channel_id: &str) -> ConnectionResult<HealthCheckResult> {
        let channel = self.resolve(channel_id)?;
        let result = channel.health_check().await;
        record_probe(&self.probes, channel_id, &result);
        Ok(result)
    }

    /// Current status and last probe outcome of a channel.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotFound`] if the channel is not monitored.
    pub fn get_channel_health(&self, channel_id: &str) -> ConnectionResult<HealthReport> {
        let channel = self.resolve(channel_id)?;
        let probe = self.probes.get(channel_id).map(|entry| entry.value().clone());

        Ok(HealthReport {
            channel_id: channel_id.to_string(),
            status: channel.status(),
            is_healthy: probe.as_ref().map(|p| p.is_healthy),
            latency: probe.as_ref().map(|p| p.latency),
            last_check: probe.as_ref().map(|p| p.checked_at),
            last_error: probe.and_then(|p| p.error),
        })
    }

    /// Stop every timer and release every channel reference.
    pub fn shutdown(&self) {
        let ids = self.monitored_channels();
        for id in &ids {
            if let Some((_, monitored)) = self.channels.remove(id) {
                monitored.task.abort();
            }
        }
        self.probes.clear();
        if !ids.is_empty() {
            tracing::debug!(channels = ids.len(), "Health monitor shut down");
        }
    }

    fn resolve(&self, channel_id: &str) -> ConnectionResult<Arc<ManagedChannel>> {
        self.channels
            .get(channel_id)
            .and_then(|entry| entry.channel.upgrade())
            .ok_or_else(|| ConnectionError::NotFound(channel_id.to_string()))
    }

    fn spawn_poller(&self, channel: &Arc<ManagedChannel>) -> JoinHandle<()> {
        let channel = Arc::downgrade(channel);
        let probes = Arc::clone(&self.probes);
        let period = self.config.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(channel) = channel.upgrade() else {
                    break;
                };

                let result = channel.health_check().await;
                tracing::debug!(
                    channel_id = %channel.id(),
                    healthy = result.is_healthy,
                    latency_ms = result.latency.as_millis() as u64,
                    "Health check completed"
                );

                if !result.is_healthy && channel.is_available() {
                    tracing::warn!(
                        channel_id = %channel.id(),
                        error = ?result.error.as_ref().map(ToString::to_string),
                        "Channel became unhealthy"
                    );
                }

                record_probe(&probes, channel.id(), &result);
            }
        })
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        for entry in self.channels.iter() {
            entry.task.abort();
        }
    }
}

fn record_probe(probes: &DashMap<String, ProbeRecord>, channel_id: &str, result: &HealthCheckResult) {
    probes.insert(
        channel_id.to_string(),
        ProbeRecord {
            is_healthy: result.is_healthy,
            latency: result.latency,
            checked_at: Utc::now(),
            error: result.error.as_ref().map(ToString::to_string),
        },
    );
}
