//! Submission coordinator: the lock gate in front of job publication.

use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{JobQueue, LockBackend};
use crate::config::{DEFAULT_LOCK_PREFIX, DEFAULT_LOCK_TTL};
use crate::error::{Error, Result};
use crate::model::{ReportJob, SubmissionEvent, SubmitOutcome, SurveyId};
use crate::telemetry::metrics;

/// Configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Length of the coalescing window per survey.
    pub lock_ttl: Duration,
    /// Prepended to the survey id to form the lock name.
    pub lock_prefix: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_ttl: DEFAULT_LOCK_TTL,
            lock_prefix: DEFAULT_LOCK_PREFIX.to_string(),
        }
    }
}

/// Admits at most one report job per survey per lock window.
///
/// Holds no state of its own; every decision is made by the lock backend, so
/// any number of coordinators across processes can share one backend.
pub struct SubmissionCoordinator {
    locks: Arc<dyn LockBackend>,
    queue: Arc<dyn JobQueue>,
    config: CoordinatorConfig,
}

impl SubmissionCoordinator {
    pub fn new(
        locks: Arc<dyn LockBackend>,
        queue: Arc<dyn JobQueue>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            locks,
            queue,
            config,
        }
    }

    /// Lock name guarding the window for `survey_id`.
    pub fn lock_name(&self, survey_id: &SurveyId) -> String {
        format!("{}{}", self.config.lock_prefix, survey_id)
    }

    /// Schedule a report job for the event's survey unless one is already
    /// pending in the current window.
    ///
    /// The lock is left to expire after a successful publish; it is the
    /// debounce window, not a guard around the publish. If publishing fails
    /// the lock is released so the next submission can try again.
    pub async fn submit(&self, event: &SubmissionEvent) -> Result<SubmitOutcome> {
        let result = self.admit(event).await;
        let label = match &result {
            Ok(outcome) => outcome.to_string(),
            Err(_) => "error".to_string(),
        };
        metrics::submissions().add(1, &[KeyValue::new("result", label)]);
        result
    }

    async fn admit(&self, event: &SubmissionEvent) -> Result<SubmitOutcome> {
        let lock_name = self.lock_name(&event.survey_id);

        let acquired = self
            .locks
            .acquire(&lock_name, self.config.lock_ttl)
            .await
            .map_err(|e| Error::LockBackend(Box::new(e)))?;

        if !acquired {
            debug!(
                submission_id = %event.id,
                survey_id = %event.survey_id,
                "report job already pending, coalescing"
            );
            return Ok(SubmitOutcome::Coalesced);
        }

        let job = ReportJob::from(event);
        if let Err(publish_err) = self.queue.publish(&job).await {
            // The publish error is the one the caller sees.
            if let Err(release_err) = self.locks.release(&lock_name).await {
                warn!(
                    lock = %lock_name,
                    error = %release_err,
                    "failed to release lock after publish failure; it will expire"
                );
            }
            return Err(Error::QueuePublish(Box::new(publish_err)));
        }

        info!(
            submission_id = %event.id,
            survey_id = %event.survey_id,
            "report job scheduled"
        );
        Ok(SubmitOutcome::Scheduled)
    }

    /// Release the coalescing lock for `survey_id` so the next submission
    /// schedules a fresh job. Returns whether a live lock existed.
    pub async fn reopen_window(&self, survey_id: &SurveyId) -> Result<bool> {
        let lock_name = self.lock_name(survey_id);
        self.locks
            .release(&lock_name)
            .await
            .map_err(|e| Error::LockBackend(Box::new(e)))
    }
}
