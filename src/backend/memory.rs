//! In-process lock and queue with the same contracts as the Postgres ones.
//!
//! Only coordinate within one process. Used by tests and local dry runs.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Delivery, JobQueue, LockBackend, Subscription};
use crate::error::{Error, Result};
use crate::model::{AckDecision, ReportJob};

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

/// Expiring locks in a map. Expiry follows tokio's clock, so paused-time
/// tests can step through a window.
#[derive(Default)]
pub struct InMemoryLockBackend {
    locks: Mutex<HashMap<String, Instant>>,
}

impl InMemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is currently held.
    pub fn is_held(&self, name: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(name)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(name).is_some_and(|expires_at| *expires_at > now) {
            return Ok(false);
        }
        locks.insert(name.to_string(), now + ttl);
        Ok(true)
    }

    async fn release(&self, name: &str) -> Result<bool> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(locks
            .remove(name)
            .is_some_and(|expires_at| expires_at > Instant::now()))
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Counters over the lifetime of an [`InMemoryJobQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub published: u64,
    pub acked: u64,
    pub requeued: u64,
}

/// FIFO queue with per-delivery settlement.
///
/// Messages a subscription took but never settled go back to the front of
/// the queue when that subscription is dropped.
#[derive(Clone, Default)]
pub struct InMemoryJobQueue {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    next_subscriber: AtomicU64,
}

#[derive(Default)]
struct QueueState {
    next_id: i64,
    ready: VecDeque<Message>,
    in_flight: HashMap<i64, InFlight>,
    settlements: Vec<(i64, AckDecision)>,
    stats: QueueStats,
    closed: bool,
}

struct Message {
    id: i64,
    reads: u32,
    payload: Vec<u8>,
}

struct InFlight {
    subscriber: u64,
    message: Message,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an arbitrary payload, bypassing job encoding. Returns its id.
    pub fn publish_raw(&self, payload: impl Into<Vec<u8>>) -> Result<i64> {
        let id = {
            let mut state = self.shared.state();
            if state.closed {
                return Err(Error::QueueClosed);
            }
            state.next_id += 1;
            let id = state.next_id;
            state.ready.push_back(Message {
                id,
                reads: 0,
                payload: payload.into(),
            });
            state.stats.published += 1;
            id
        };
        self.shared.notify.notify_one();
        Ok(id)
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.state().stats
    }

    /// Every settlement so far, in order: `(message id, decision)`.
    pub fn settlements(&self) -> Vec<(i64, AckDecision)> {
        self.shared.state().settlements.clone()
    }

    /// Messages waiting to be delivered.
    pub fn ready_len(&self) -> usize {
        self.shared.state().ready.len()
    }

    /// Messages delivered and not yet settled.
    pub fn in_flight_len(&self) -> usize {
        self.shared.state().in_flight.len()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn publish(&self, job: &ReportJob) -> Result<()> {
        self.publish_raw(job.encode()?)?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn Subscription>> {
        if self.shared.state().closed {
            return Err(Error::QueueClosed);
        }
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(InMemorySubscription {
            id,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.shared.state().closed = true;
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

struct InMemorySubscription {
    id: u64,
    shared: Arc<Shared>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            // Register interest before looking, so a publish in between wakes us.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state();
                if state.closed {
                    return Ok(None);
                }
                if let Some(mut message) = state.ready.pop_front() {
                    message.reads += 1;
                    let delivery = Delivery::new(message.id, message.reads, message.payload.clone());
                    state.in_flight.insert(
                        message.id,
                        InFlight {
                            subscriber: self.id,
                            message,
                        },
                    );
                    return Ok(Some(delivery));
                }
            }

            notified.await;
        }
    }

    async fn settle(&mut self, delivery: Delivery, decision: AckDecision) -> Result<()> {
        let id = delivery.id();
        {
            let mut state = self.shared.state();
            let entry = match state.in_flight.remove(&id) {
                Some(entry) if entry.subscriber == self.id => entry,
                other => {
                    if let Some(entry) = other {
                        state.in_flight.insert(id, entry);
                    }
                    return Err(Error::Other(format!(
                        "delivery {id} is not in flight on this subscription"
                    )));
                }
            };
            state.settlements.push((id, decision));
            match decision {
                AckDecision::Ack => state.stats.acked += 1,
                AckDecision::RequeueForRetry => {
                    state.stats.requeued += 1;
                    state.ready.push_back(entry.message);
                }
            }
        }
        if decision == AckDecision::RequeueForRetry {
            self.shared.notify.notify_one();
        }
        Ok(())
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        let returned = {
            let mut state = self.shared.state();
            let mut abandoned: Vec<i64> = state
                .in_flight
                .iter()
                .filter(|(_, entry)| entry.subscriber == self.id)
                .map(|(id, _)| *id)
                .collect();
            abandoned.sort_unstable_by(|a, b| b.cmp(a));
            for id in &abandoned {
                if let Some(entry) = state.in_flight.remove(id) {
                    state.ready.push_front(entry.message);
                }
            }
            abandoned.len()
        };
        for _ in 0..returned {
            self.shared.notify.notify_one();
        }
    }
}
