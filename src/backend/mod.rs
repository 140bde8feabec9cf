//! Capabilities the coordinator and worker depend on.
//!
//! Each trait has a Postgres variant for production and an in-memory variant
//! for tests and local runs. Both are injected as `Arc<dyn _>`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::model::{AckDecision, ReportJob};

pub use memory::{InMemoryJobQueue, InMemoryLockBackend, QueueStats};
pub use postgres::{PgLockBackend, PgmqJobQueue};

/// Cross-process expiring lock, used as a coalescing gate.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Atomically create `name` with `ttl` unless a live lock already exists.
    /// Returns true only for the caller that created it.
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<bool>;

    /// Remove `name`. Returns whether a live lock existed.
    async fn release(&self, name: &str) -> Result<bool>;
}

/// Durable, at-least-once, competing-consumer job transport.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, job: &ReportJob) -> Result<()>;

    /// Open a consumer. Each call gets its own stream of deliveries.
    async fn subscribe(&self) -> Result<Box<dyn Subscription>>;

    /// Stop handing out deliveries. Open subscriptions end with `Ok(None)`.
    async fn close(&self) -> Result<()>;
}

/// One consumer's view of the queue.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `Ok(None)` once the queue is closed.
    ///
    /// Dropping the returned future before it resolves must not lose a
    /// message: anything taken off the queue but not returned becomes
    /// visible again later.
    async fn next(&mut self) -> Result<Option<Delivery>>;

    /// Acknowledge or requeue a delivery handed out by this subscription.
    async fn settle(&mut self, delivery: Delivery, decision: AckDecision) -> Result<()>;
}

/// A message handed to a worker, owned until it is settled.
///
/// Not `Clone`: `settle` consumes it, so a delivery is settled at most once.
#[derive(Debug)]
pub struct Delivery {
    id: i64,
    attempt: u32,
    payload: Vec<u8>,
}

impl Delivery {
    pub fn new(id: i64, attempt: u32, payload: Vec<u8>) -> Self {
        Self {
            id,
            attempt,
            payload,
        }
    }

    /// Transport-assigned message id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// 1 on first delivery, incremented on every redelivery.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
