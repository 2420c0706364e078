//! Work Queue
//!
//! A single named, durable, competing-consumers queue carrying `{task_id, tax_id}`
//! work items. Delivery is at-least-once: a message stays "in flight" for its
//! consumer until it is acknowledged or rejected.
//!
//! ## Consumer leases
//! Every consumer registers under a unique name and holds a lease that it renews
//! with `heartbeat`. Registering a name whose lease is still live fails, so two
//! processes never share an in-flight list. `recover_in_flight` puts back on the
//! queue the caller's own leftovers and the in-flight messages of consumers whose
//! lease expired (crashed workers), never those of a live peer.
//!
//! ## Backends
//! - **`RedisWorkQueue`**: reliable-queue pattern on Redis lists. Messages move
//!   atomically from the queue list to a per-consumer processing list (`LMOVE`),
//!   and are removed from there on ack/reject (`LREM`). Leases are keys with a
//!   `PX` expiry, registered consumers a set.
//! - **`MemoryWorkQueue`**: process-local queue with the same semantics, used by
//!   tests and by the in-memory `all` mode.

use super::types::WorkItem;
use crate::error::QueueError;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Lease of a consumer that stops sending heartbeats.
pub const DEFAULT_CONSUMER_LEASE: Duration = Duration::from_secs(15);

/// A message handed to exactly one consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Backend-specific handle used to settle the message.
    pub tag: String,
    /// Raw JSON body as published.
    pub body: String,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Publishes a persistent work item.
    async fn publish(&self, item: &WorkItem) -> Result<(), QueueError>;

    /// Takes the next message, if any, and marks it in flight for this consumer.
    async fn consume(&self) -> Result<Option<Delivery>, QueueError>;

    /// Removes a processed message permanently.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Drops a message without requeueing it.
    async fn reject(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Returns to the queue the messages left in flight by this consumer and by
    /// consumers whose lease expired. Only call while this consumer holds no
    /// message. Returns how many were recovered.
    async fn recover_in_flight(&self) -> Result<usize, QueueError>;

    /// Claims this consumer's name; `ConsumerActive` if a live consumer holds it.
    async fn register(&self) -> Result<(), QueueError> {
        Ok(())
    }

    /// Renews this consumer's lease.
    async fn heartbeat(&self) -> Result<(), QueueError> {
        Ok(())
    }

    /// Gives the lease up on clean shutdown.
    async fn release(&self) -> Result<(), QueueError> {
        Ok(())
    }

    /// How often `heartbeat` must run; `None` for backends without leases.
    fn heartbeat_interval(&self) -> Option<Duration> {
        None
    }
}

fn heartbeat_every(lease: Duration) -> Duration {
    (lease / 3).max(Duration::from_millis(1))
}

// --- Redis backend ---

/// Redis list-backed queue.
///
/// Keys, for queue `q` and consumer `c`:
/// `q` (ready list), `q:processing:c` (in flight), `q:lease:c` (lease),
/// `q:consumers` (registered names).
pub struct RedisWorkQueue {
    conn: MultiplexedConnection,
    queue_name: String,
    consumer: String,
    lease: Duration,
}

impl RedisWorkQueue {
    pub fn new(
        conn: MultiplexedConnection,
        queue_name: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            conn,
            queue_name: queue_name.into(),
            consumer: consumer.into(),
            lease: DEFAULT_CONSUMER_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn processing_key(&self, consumer: &str) -> String {
        format!("{}:processing:{}", self.queue_name, consumer)
    }

    fn lease_key(&self, consumer: &str) -> String {
        format!("{}:lease:{}", self.queue_name, consumer)
    }

    fn consumers_key(&self) -> String {
        format!("{}:consumers", self.queue_name)
    }

    fn lease_ms(&self) -> u64 {
        (self.lease.as_millis() as u64).max(1)
    }

    async fn remove_in_flight(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(self.processing_key(&self.consumer))
            .arg(1)
            .arg(&delivery.tag)
            .query_async(&mut conn)
            .await?;

        if removed == 0 {
            tracing::warn!(
                "Message was not in flight for consumer {} (queue {})",
                self.consumer,
                self.queue_name
            );
        }
        Ok(())
    }

    /// Moves every message of `consumer`'s processing list back to the queue.
    async fn drain(&self, consumer: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let mut moved = 0usize;

        loop {
            // Newest in-flight first, so the oldest ends up nearest the consuming end.
            let body: Option<String> = redis::cmd("LMOVE")
                .arg(self.processing_key(consumer))
                .arg(&self.queue_name)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;

            match body {
                Some(_) => moved += 1,
                None => return Ok(moved),
            }
        }
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn publish(&self, item: &WorkItem) -> Result<(), QueueError> {
        let body = serde_json::to_string(item)?;
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.queue_name)
            .arg(body)
            .query_async(&mut conn)
            .await?;

        tracing::debug!("Published task {} to {}", item.task_id, self.queue_name);
        Ok(())
    }

    async fn consume(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn.clone();
        let body: Option<String> = redis::cmd("LMOVE")
            .arg(&self.queue_name)
            .arg(self.processing_key(&self.consumer))
            .arg("RIGHT")
            .arg("LEFT")
            .query_async(&mut conn)
            .await?;

        Ok(body.map(|body| Delivery {
            tag: body.clone(),
            body,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.remove_in_flight(delivery).await
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.remove_in_flight(delivery).await
    }

    async fn recover_in_flight(&self) -> Result<usize, QueueError> {
        let mut recovered = self.drain(&self.consumer).await?;

        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.consumers_key())
            .query_async(&mut conn)
            .await?;

        for peer in members.iter().filter(|name| **name != self.consumer) {
            let alive: i64 = redis::cmd("EXISTS")
                .arg(self.lease_key(peer))
                .query_async(&mut conn)
                .await?;
            if alive > 0 {
                continue;
            }

            let moved = self.drain(peer).await?;
            if moved > 0 {
                tracing::warn!("Recovered {} messages of expired consumer {}", moved, peer);
            }
            recovered += moved;

            let _: i64 = redis::cmd("SREM")
                .arg(self.consumers_key())
                .arg(peer)
                .query_async(&mut conn)
                .await?;
        }

        if recovered > 0 {
            tracing::info!(
                "Requeued {} in-flight messages on {} (consumer {})",
                recovered,
                self.queue_name,
                self.consumer
            );
        }
        Ok(recovered)
    }

    async fn register(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let claimed: Option<String> = redis::cmd("SET")
            .arg(self.lease_key(&self.consumer))
            .arg(super::types::now_ms())
            .arg("NX")
            .arg("PX")
            .arg(self.lease_ms())
            .query_async(&mut conn)
            .await?;

        if claimed.is_none() {
            return Err(QueueError::ConsumerActive(self.consumer.clone()));
        }

        let _: i64 = redis::cmd("SADD")
            .arg(self.consumers_key())
            .arg(&self.consumer)
            .query_async(&mut conn)
            .await?;

        tracing::info!("Registered consumer {} on {}", self.consumer, self.queue_name);
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(self.lease_key(&self.consumer))
            .arg(super::types::now_ms())
            .arg("PX")
            .arg(self.lease_ms())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn release(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.lease_key(&self.consumer))
            .query_async(&mut conn)
            .await?;

        // Leftovers (failed settlements) stay registered so a peer recovers them.
        let pending: i64 = redis::cmd("LLEN")
            .arg(self.processing_key(&self.consumer))
            .query_async(&mut conn)
            .await?;
        if pending == 0 {
            let _: i64 = redis::cmd("SREM")
                .arg(self.consumers_key())
                .arg(&self.consumer)
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        Some(heartbeat_every(self.lease))
    }
}

// --- In-memory backend ---

struct InFlight {
    consumer: String,
    body: String,
}

#[derive(Default)]
struct MemoryQueueState {
    ready: VecDeque<String>,
    in_flight: HashMap<u64, InFlight>,
    leases: HashMap<String, Instant>,
    next_tag: u64,
    acked: usize,
    rejected: usize,
}

impl MemoryQueueState {
    fn is_alive(&self, consumer: &str, now: Instant) -> bool {
        self.leases
            .get(consumer)
            .is_some_and(|expires_at| *expires_at > now)
    }

    /// Pushes the selected in-flight messages to the front, oldest first.
    fn requeue_where(&mut self, select: impl Fn(&InFlight) -> bool) -> usize {
        let mut tags: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| select(entry))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();

        for tag in tags.iter().rev() {
            if let Some(entry) = self.in_flight.remove(tag) {
                self.ready.push_front(entry.body);
            }
        }
        tags.len()
    }
}

/// Process-local queue with the same delivery semantics as the Redis backend.
///
/// Handles created with [`MemoryWorkQueue::consumer`] share one queue and act as
/// separate consumers.
pub struct MemoryWorkQueue {
    state: Arc<Mutex<MemoryQueueState>>,
    consumer: String,
    lease: Duration,
}

impl Default for MemoryWorkQueue {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            consumer: "memory".to_string(),
            lease: DEFAULT_CONSUMER_LEASE,
        }
    }
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Another consumer of the same queue.
    pub fn consumer(&self, name: impl Into<String>) -> Self {
        Self {
            state: self.state.clone(),
            consumer: name.into(),
            lease: self.lease,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Pushes a raw body, bypassing `WorkItem` encoding (malformed messages in tests).
    pub async fn publish_raw(&self, body: impl Into<String>) {
        self.state.lock().await.ready.push_back(body.into());
    }

    /// Simulates a broker redelivering everything any consumer held.
    pub async fn requeue_unacked(&self) -> usize {
        self.state.lock().await.requeue_where(|_| true)
    }

    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Messages in flight across all consumers.
    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// `(acked, rejected)` counters.
    pub async fn settled_counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.acked, state.rejected)
    }

    async fn settle(&self, delivery: &Delivery, ack: bool) {
        let Ok(tag) = delivery.tag.parse::<u64>() else {
            return;
        };

        let mut state = self.state.lock().await;
        let owned = state
            .in_flight
            .get(&tag)
            .is_some_and(|entry| entry.consumer == self.consumer);
        if !owned {
            return;
        }

        state.in_flight.remove(&tag);
        if ack {
            state.acked += 1;
        } else {
            state.rejected += 1;
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn publish(&self, item: &WorkItem) -> Result<(), QueueError> {
        let body = serde_json::to_string(item)?;
        self.state.lock().await.ready.push_back(body);
        Ok(())
    }

    async fn consume(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock().await;
        let Some(body) = state.ready.pop_front() else {
            return Ok(None);
        };

        state.next_tag += 1;
        let tag = state.next_tag;
        state.in_flight.insert(
            tag,
            InFlight {
                consumer: self.consumer.clone(),
                body: body.clone(),
            },
        );

        Ok(Some(Delivery {
            tag: tag.to_string(),
            body,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.settle(delivery, true).await;
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.settle(delivery, false).await;
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let dead: Vec<String> = state
            .in_flight
            .values()
            .map(|entry| entry.consumer.clone())
            .filter(|name| *name != self.consumer && !state.is_alive(name, now))
            .collect();

        let recovered = state.requeue_where(|entry| {
            entry.consumer == self.consumer || dead.contains(&entry.consumer)
        });
        state
            .leases
            .retain(|name, expires_at| *name == self.consumer || *expires_at > now);
        Ok(recovered)
    }

    async fn register(&self) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        if state.is_alive(&self.consumer, now) {
            return Err(QueueError::ConsumerActive(self.consumer.clone()));
        }
        state.leases.insert(self.consumer.clone(), now + self.lease);
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), QueueError> {
        self.state
            .lock()
            .await
            .leases
            .insert(self.consumer.clone(), Instant::now() + self.lease);
        Ok(())
    }

    async fn release(&self) -> Result<(), QueueError> {
        self.state.lock().await.leases.remove(&self.consumer);
        Ok(())
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        Some(heartbeat_every(self.lease))
    }
}
