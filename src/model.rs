//! Core data model.
//!
//! A submission is a survey response arriving at the ingress. It only matters
//! to the core as a carrier of its survey id, which is the coalescing key for
//! report jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Survey Id
// ---------------------------------------------------------------------------

/// Coalescing identity of a report job. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SurveyId(String);

impl SurveyId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidSurveyId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SurveyId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SurveyId> for String {
    fn from(id: SurveyId) -> Self {
        id.0
    }
}

impl std::str::FromStr for SurveyId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl std::fmt::Display for SurveyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// A survey response handed to the coordinator by the ingress.
///
/// Not persisted: the coordinator only derives a [`ReportJob`] from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionEvent {
    pub id: Uuid,
    pub survey_id: SurveyId,
    /// Raw answers. The core never looks inside.
    pub answers: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SubmissionEvent {
    pub fn new(survey_id: SurveyId) -> Self {
        Self {
            id: Uuid::new_v4(),
            survey_id,
            answers: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn answers(mut self, answers: serde_json::Value) -> Self {
        self.answers = answers;
        self
    }
}

// ---------------------------------------------------------------------------
// Report Job
// ---------------------------------------------------------------------------

/// The queued unit of work: generate the report for one survey.
///
/// Wire format is `{"survey_id": "..."}`; the field name is shared with other
/// producers and consumers of the queue and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportJob {
    pub survey_id: SurveyId,
}

impl ReportJob {
    pub fn new(survey_id: SurveyId) -> Self {
        Self { survey_id }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Other(format!("encode report job: {e}")))
    }

    /// Decode a queue payload. Fails for malformed JSON, a missing field or an
    /// empty survey id.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(Error::JobDecode)
    }
}

impl From<&SubmissionEvent> for ReportJob {
    fn from(event: &SubmissionEvent) -> Self {
        Self::new(event.survey_id.clone())
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What a successful submission did. Callers treat both as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The coalescing lock was free; a job was published.
    Scheduled,
    /// A job for this survey is already pending in the current window.
    Coalesced,
}

impl std::fmt::Display for SubmitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubmitOutcome::Scheduled => "scheduled",
            SubmitOutcome::Coalesced => "coalesced",
        };
        write!(f, "{s}")
    }
}

/// How the worker settles a delivery with the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckDecision {
    /// Remove the delivery permanently.
    Ack,
    /// Return the delivery to the queue for redelivery.
    RequeueForRetry,
}

impl std::fmt::Display for AckDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AckDecision::Ack => "ack",
            AckDecision::RequeueForRetry => "requeue",
        };
        write!(f, "{s}")
    }
}
