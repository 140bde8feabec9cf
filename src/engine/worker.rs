//! Worker loop: pulls report jobs, runs the generator, settles deliveries.

use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

use crate::backend::{Delivery, JobQueue, Subscription};
use crate::error::{Error, Result};
use crate::model::{AckDecision, ReportJob};
use crate::report::ReportGenerator;
use crate::telemetry::job::{record_decision, start_job_span};
use crate::telemetry::metrics;

/// Configuration for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pause after a failed receive before trying again.
    pub retry_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// Where a delivery ended up after handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Payload did not decode. Acked so it is never redelivered.
    Dropped,
    /// Report generated. Acked.
    Generated,
    /// Generation failed. Requeued for another attempt.
    Failed,
}

impl JobOutcome {
    pub fn decision(self) -> AckDecision {
        match self {
            JobOutcome::Dropped | JobOutcome::Generated => AckDecision::Ack,
            JobOutcome::Failed => AckDecision::RequeueForRetry,
        }
    }

    fn label(self) -> &'static str {
        match self {
            JobOutcome::Dropped => "drop",
            JobOutcome::Generated => "ack",
            JobOutcome::Failed => "requeue",
        }
    }
}

/// Consumes report jobs one at a time until cancelled.
///
/// Decode failures are acked and dropped, generator failures are requeued
/// without limit, successes are acked.
pub struct WorkerLoop {
    queue: Arc<dyn JobQueue>,
    generator: Arc<dyn ReportGenerator>,
    config: WorkerConfig,
}

impl WorkerLoop {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        generator: Arc<dyn ReportGenerator>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            generator,
            config,
        }
    }

    /// Run until `token` is cancelled or the queue closes.
    ///
    /// Cancellation is checked before each pull and while waiting for a
    /// delivery. A delivery already handed to the handler always finishes
    /// and is settled; an in-progress generation is never interrupted.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let mut subscription = self
            .queue
            .subscribe()
            .await
            .map_err(|e| Error::QueueConsume(Box::new(e)))?;

        info!("report worker started");

        loop {
            if token.is_cancelled() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = subscription.next() => next,
            };

            let delivery = match next {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    info!("job queue closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to receive report job, retrying");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.config.retry_interval) => continue,
                    }
                }
            };

            self.process(&mut *subscription, delivery).await;
        }

        info!("report worker stopped");
        Ok(())
    }

    /// Handle one delivery and settle it.
    async fn process(&self, subscription: &mut dyn Subscription, delivery: Delivery) {
        let span = start_job_span(delivery.id(), delivery.attempt());
        async {
            let outcome = self.handle(&delivery).await;
            let decision = outcome.decision();
            let delivery_id = delivery.id();
            match subscription.settle(delivery, decision).await {
                Ok(()) => {
                    record_decision(&tracing::Span::current(), decision);
                    metrics::jobs_settled().add(1, &[KeyValue::new("decision", outcome.label())]);
                }
                // The transport will redeliver once the message becomes visible.
                Err(e) => warn!(delivery_id, %decision, error = %e, "failed to settle delivery"),
            }
        }
        .instrument(span)
        .await
    }

    /// Decode and generate, without settling.
    pub async fn handle(&self, delivery: &Delivery) -> JobOutcome {
        let job = match ReportJob::decode(delivery.payload()) {
            Ok(job) => job,
            Err(e) => {
                // Redelivery cannot fix a malformed payload.
                warn!(delivery_id = delivery.id(), error = %e, "dropping undecodable report job");
                return JobOutcome::Dropped;
            }
        };
        tracing::Span::current().record("job.survey_id", job.survey_id.as_str());

        let start = Instant::now();
        let result = self.generator.generate(&job.survey_id).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                metrics::report_duration_ms()
                    .record(duration_ms as f64, &[KeyValue::new("result", "ok")]);
                info!(survey_id = %job.survey_id, duration_ms, "report generated");
                JobOutcome::Generated
            }
            Err(e) => {
                metrics::report_duration_ms()
                    .record(duration_ms as f64, &[KeyValue::new("result", "error")]);
                error!(
                    survey_id = %job.survey_id,
                    attempt = delivery.attempt(),
                    duration_ms,
                    error = %e,
                    "report generation failed, requeueing"
                );
                JobOutcome::Failed
            }
        }
    }
}
