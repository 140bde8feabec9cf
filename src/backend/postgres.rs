//! Postgres-backed lock and pgmq-backed job queue.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{Delivery, JobQueue, LockBackend, Subscription};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::{AckDecision, ReportJob};

/// Locks stored in the `coalescing_locks` table.
pub struct PgLockBackend {
    db: Arc<Db>,
}

impl PgLockBackend {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LockBackend for PgLockBackend {
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<bool> {
        self.db.try_acquire_lock(name, ttl).await
    }

    async fn release(&self, name: &str) -> Result<bool> {
        self.db.release_lock(name).await
    }
}

/// Report jobs in a pgmq queue.
///
/// A read hides the message for `visibility_timeout` seconds; if the worker
/// dies before settling, the message reappears for another worker.
pub struct PgmqJobQueue {
    db: Arc<Db>,
    queue_name: String,
    visibility_timeout: i32,
    poll_interval: Duration,
    closed: Arc<AtomicBool>,
}

impl PgmqJobQueue {
    pub fn new(
        db: Arc<Db>,
        queue_name: impl Into<String>,
        visibility_timeout: i32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            queue_name: queue_name.into(),
            visibility_timeout,
            poll_interval,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Create the underlying pgmq queue if it does not exist.
    pub async fn declare(&self) -> Result<()> {
        self.db.create_queue(&self.queue_name).await
    }
}

#[async_trait]
impl JobQueue for PgmqJobQueue {
    async fn publish(&self, job: &ReportJob) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::QueueClosed);
        }
        let payload = serde_json::to_value(job)
            .map_err(|e| Error::Other(format!("encode report job: {e}")))?;
        let msg_id = self.db.send_to_queue(&self.queue_name, &payload, 0).await?;
        debug!(msg_id, survey_id = %job.survey_id, "report job published");
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn Subscription>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::QueueClosed);
        }
        // Fail here rather than on the first read when the queue is missing.
        self.db.create_queue(&self.queue_name).await?;
        Ok(Box::new(PgmqSubscription {
            db: Arc::clone(&self.db),
            queue_name: self.queue_name.clone(),
            visibility_timeout: self.visibility_timeout,
            poll_interval: self.poll_interval,
            closed: Arc::clone(&self.closed),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct PgmqSubscription {
    db: Arc<Db>,
    queue_name: String,
    visibility_timeout: i32,
    poll_interval: Duration,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Subscription for PgmqSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Ok(None);
            }
            if let Some(msg) = self
                .db
                .read_from_queue(&self.queue_name, self.visibility_timeout)
                .await?
            {
                let payload = serde_json::to_vec(&msg.message)
                    .map_err(|e| Error::Other(format!("re-encode pgmq payload: {e}")))?;
                let attempt = u32::try_from(msg.read_ct).unwrap_or(1).max(1);
                return Ok(Some(Delivery::new(msg.msg_id, attempt, payload)));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn settle(&mut self, delivery: Delivery, decision: AckDecision) -> Result<()> {
        match decision {
            AckDecision::Ack => {
                self.db
                    .archive_message(&self.queue_name, delivery.id())
                    .await
            }
            AckDecision::RequeueForRetry => {
                self.db
                    .set_visibility_timeout(&self.queue_name, delivery.id(), 0)
                    .await
            }
        }
    }
}
