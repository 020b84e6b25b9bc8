//! Common test utilities for integration tests
//!
//! Provides a scripted in-memory channel whose connect, send and probe
//! outcomes are switched at runtime by the test.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use turbolink::{
    Channel, ChannelConfig, ConnectionEvent, HealthCheckResult, ManagedChannel, TransportError,
    TransportReply, TransportResult,
};

/// How a [`ScriptedChannel`] answers sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Return the payload unchanged
    Payload,
    /// Return `{"echo": payload}`
    Echo,
    /// Return `{"via": <channel name>}`
    Via,
}

/// Shared record of connect attempts across several channels, in call order
#[derive(Debug, Clone, Default)]
pub struct ConnectLog(Arc<Mutex<Vec<String>>>);

impl ConnectLog {
    pub fn names(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// In-memory channel with runtime-switchable behaviour
#[derive(Debug)]
pub struct ScriptedChannel {
    name: String,
    reply: Reply,
    refuse_connect: AtomicBool,
    fail_sends: AtomicBool,
    unhealthy: AtomicBool,
    send_delay_ms: AtomicUsize,
    connect_log: Mutex<Option<ConnectLog>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub sends: AtomicUsize,
    pub probes: AtomicUsize,
}

impl ScriptedChannel {
    pub fn new(name: &str, reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply,
            refuse_connect: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            unhealthy: AtomicBool::new(false),
            send_delay_ms: AtomicUsize::new(0),
            connect_log: Mutex::new(None),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            sends: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        })
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    pub fn delay_sends(&self, delay: Duration) {
        self.send_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn record_connects(&self, log: &ConnectLog) {
        *self.connect_log.lock() = Some(log.clone());
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn connect(&self) -> TransportResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = self.connect_log.lock().as_ref() {
            log.0.lock().push(self.name.clone());
        }
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(format!(
                "{} refused connection",
                self.name
            )));
        }
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, payload: &Value) -> TransportResult<TransportReply> {
        self.sends.fetch_add(1, Ordering::SeqCst);

        let delay = self.send_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("fail".into()));
        }

        let data = match self.reply {
            Reply::Payload => payload.clone(),
            Reply::Echo => json!({ "echo": payload }),
            Reply::Via => json!({ "via": self.name }),
        };
        Ok(TransportReply::ok(data))
    }

    async fn health_check(&self) -> HealthCheckResult {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.unhealthy.load(Ordering::SeqCst) {
            HealthCheckResult::unhealthy(
                Duration::from_millis(1),
                TransportError::ConnectionLost(format!("{} is down", self.name)),
            )
        } else {
            HealthCheckResult::healthy(Duration::from_millis(1))
        }
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("scripted://{}", self.name))
    }
}

/// A managed channel over a fresh scripted transport
pub fn managed(
    id: &str,
    priority: i32,
    reply: Reply,
) -> (Arc<ManagedChannel>, Arc<ScriptedChannel>) {
    managed_with(ChannelConfig::new(id, priority), reply)
}

/// A managed channel with explicit configuration
pub fn managed_with(
    config: ChannelConfig,
    reply: Reply,
) -> (Arc<ManagedChannel>, Arc<ScriptedChannel>) {
    let transport = ScriptedChannel::new(&config.id, reply);
    let channel = Arc::new(ManagedChannel::new(config, transport.clone()));
    (channel, transport)
}

/// Drain every event currently queued on a receiver
pub fn drain(events: &mut broadcast::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

/// Wait (bounded) for the first event with the given name
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    name: &str,
) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if event.name() == name => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event bus closed while waiting for {name}")
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
}
