//! Bounded, age-bounded holding area for requests diverted during a switch.
//!
//! Every entry carries a one-shot completion. Each exit path settles it: replay
//! success or failure, expiry ([`ConnectionError::BufferTimeout`]), capacity
//! eviction ([`ConnectionError::BufferFull`]) or [`RequestBuffer::clear`]
//! ([`ConnectionError::BufferCleared`]). An entry dropped without being settled
//! also surfaces as `BufferCleared` to its caller.
//!
//! Expired entries are only reaped when a new entry is added.

use std::collections::HashMap;
use std::fmt;

use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::BufferConfig;
use crate::error::{ConnectionError, ConnectionResult};

/// Future produced by a buffered request's replay operation.
pub type ReplayFuture = BoxFuture<'static, ConnectionResult<Value>>;

type ReplayFn = Box<dyn FnOnce() -> ReplayFuture + Send>;

/// A request waiting in the buffer.
pub struct BufferedRequest {
    id: String,
    replay: ReplayFn,
    completion: oneshot::Sender<ConnectionResult<Value>>,
    enqueued_at: Instant,
    critical: bool,
}

impl fmt::Debug for BufferedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedRequest")
            .field("id", &self.id)
            .field("enqueued_at", &self.enqueued_at)
            .field("critical", &self.critical)
            .finish_non_exhaustive()
    }
}

impl BufferedRequest {
    /// Create a request with a fresh `req_<uuid>` id, stamped now.
    ///
    /// Returns the entry to buffer and the handle its caller awaits.
    pub fn new<F>(critical: bool, replay: F) -> (Self, PendingRequest)
    where
        F: FnOnce() -> ReplayFuture + Send + 'static,
    {
        let id = format!("req_{}", Uuid::new_v4());
        let (completion, receiver) = oneshot::channel();
        let request = Self {
            id: id.clone(),
            replay: Box::new(replay),
            completion,
            enqueued_at: Instant::now(),
            critical,
        };
        (request, PendingRequest { id, receiver })
    }

    /// Buffer-assigned id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the request entered the buffer
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Reserved for priority handling; not used by eviction
    pub fn is_critical(&self) -> bool {
        self.critical
    }

    /// Time spent waiting so far
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Settle the caller with an error without replaying.
    pub fn reject(self, error: ConnectionError) {
        // The caller may have stopped waiting
        let _ = self.completion.send(Err(error));
    }

    /// Run the replay operation and settle the caller with its outcome.
    pub async fn replay(self) {
        let Self {
            id,
            replay,
            completion,
            ..
        } = self;

        let result = replay().await;
        if let Err(error) = &result {
            tracing::debug!(request_id = %id, error = %error, "Buffered request replay failed");
        }
        let _ = completion.send(result);
    }

    fn info(&self) -> BufferedRequestInfo {
        BufferedRequestInfo {
            id: self.id.clone(),
            enqueued_at: self.enqueued_at,
            critical: self.critical,
        }
    }
}

/// Caller-side handle of a [`BufferedRequest`].
#[derive(Debug)]
pub struct PendingRequest {
    id: String,
    receiver: oneshot::Receiver<ConnectionResult<Value>>,
}

impl PendingRequest {
    /// Id of the buffered entry
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait until the entry is replayed, rejected or dropped.
    pub async fn wait(self) -> ConnectionResult<Value> {
        self.receiver
            .await
            .unwrap_or(Err(ConnectionError::BufferCleared))
    }
}

/// Read-only view of a buffered entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedRequestInfo {
    /// Buffer-assigned id
    pub id: String,
    /// When the request entered the buffer
    pub enqueued_at: Instant,
    /// Critical flag given at buffering time
    pub critical: bool,
}

/// Bounded map of [`BufferedRequest`]s keyed by id.
#[derive(Debug)]
pub struct RequestBuffer {
    config: BufferConfig,
    entries: Mutex<HashMap<String, BufferedRequest>>,
}

impl Default for RequestBuffer {
    fn default() -> Self {
        Self::new(BufferConfig::default())
    }
}

impl RequestBuffer {
    /// Create an empty buffer.
    pub fn new(config: BufferConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(config.capacity.min(1024))),
            config,
        }
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Age after which entries are rejected on the next `add`
    pub fn max_age(&self) -> Duration {
        self.config.max_age
    }

    /// Number of buffered entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Insert a request.
    ///
    /// Expired entries are rejected with `BufferTimeout` first. If the buffer
    /// is still full, the oldest entry is rejected with `BufferFull`. A
    /// zero-capacity buffer rejects the incoming request itself.
    pub fn add(&self, request: BufferedRequest) {
        let mut expired = Vec::new();
        let mut evicted = None;

        let size = {
            let mut entries = self.entries.lock();

            let max_age = self.config.max_age;
            let stale: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.age() > max_age)
                .map(|(id, _)| id.clone())
                .collect();
            for id in stale {
                if let Some(entry) = entries.remove(&id) {
                    expired.push(entry);
                }
            }

            if self.config.capacity == 0 {
                // Nothing can be held; the incoming request is the one rejected
                evicted = Some(request);
            } else {
                if entries.len() >= self.config.capacity {
                    let oldest = entries
                        .values()
                        .min_by_key(|entry| entry.enqueued_at)
                        .map(|entry| entry.id.clone());
                    if let Some(id) = oldest {
                        evicted = entries.remove(&id);
                    }
                }
                entries.insert(request.id.clone(), request);
            }
            entries.len()
        };

        for entry in expired {
            tracing::debug!(request_id = %entry.id, "Removed expired buffered request");
            let id = entry.id.clone();
            entry.reject(ConnectionError::BufferTimeout { id });
        }

        if let Some(entry) = evicted {
            tracing::warn!(
                request_id = %entry.id,
                capacity = self.config.capacity,
                "Request buffer is full, evicting oldest request"
            );
            let id = entry.id.clone();
            entry.reject(ConnectionError::BufferFull { id });
        }

        tracing::debug!(buffer_size = size, "Request buffered");
    }

    /// Snapshot of the entry with the given id.
    pub fn get(&self, id: &str) -> Option<BufferedRequestInfo> {
        self.entries.lock().get(id).map(BufferedRequest::info)
    }

    /// Take the entry out of the buffer without settling it.
    pub fn remove(&self, id: &str) -> Option<BufferedRequest> {
        self.entries.lock().remove(id)
    }

    /// Replay every buffered entry concurrently and wait for all of them.
    ///
    /// Entries are taken out of the buffer before any replay starts, so
    /// requests buffered meanwhile wait for the next flush. Each replay runs
    /// as its own task and settles its caller even if this future is dropped.
    /// Returns the number of entries replayed.
    pub async fn process_all(&self) -> usize {
        let drained: Vec<BufferedRequest> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        if count == 0 {
            return 0;
        }

        tracing::debug!(count, "Processing all buffered requests");

        let replays = drained
            .into_iter()
            .map(|entry| tokio::spawn(entry.replay()));

        for outcome in join_all(replays).await {
            if let Err(error) = outcome {
                tracing::error!(error = %error, "Buffered request replay task failed");
            }
        }

        count
    }

    /// Reject every entry with `BufferCleared` and empty the buffer.
    ///
    /// Returns the number of entries rejected.
    pub fn clear(&self) -> usize {
        let drained: Vec<BufferedRequest> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for entry in drained {
            entry.reject(ConnectionError::BufferCleared);
        }
        if count > 0 {
            tracing::debug!(count, "Request buffer cleared");
        }
        count
    }
}
