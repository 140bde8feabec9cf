//! Report generation, the expensive work a job stands for.

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::model::SurveyId;

/// Builds the report for one survey. May be slow and may fail; the worker
/// retries failures by requeueing, so implementations must be idempotent.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, survey_id: &SurveyId) -> Result<()>;
}

/// Stand-in generator that sleeps for a fixed time and always succeeds.
#[derive(Debug, Clone)]
pub struct SimulatedReportGenerator {
    work: Duration,
}

impl SimulatedReportGenerator {
    pub fn new(work: Duration) -> Self {
        Self { work }
    }
}

impl Default for SimulatedReportGenerator {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl ReportGenerator for SimulatedReportGenerator {
    async fn generate(&self, survey_id: &SurveyId) -> Result<()> {
        info!(%survey_id, "generating report");
        tokio::time::sleep(self.work).await;
        info!(%survey_id, "report generation completed");
        Ok(())
    }
}
