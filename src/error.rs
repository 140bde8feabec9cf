//! Error types for reportq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The coalescing lock backend was unreachable or failed.
    #[error("failed to set lock: {0}")]
    LockBackend(#[source] Box<Error>),

    /// A job was admitted by the lock but could not be published.
    #[error("failed to publish report job: {0}")]
    QueuePublish(#[source] Box<Error>),

    /// The worker could not subscribe to the job queue.
    #[error("failed to start worker: {0}")]
    QueueConsume(#[source] Box<Error>),

    #[error("failed to decode report job: {0}")]
    JobDecode(#[source] serde_json::Error),

    #[error("failed to generate report for survey {survey_id}: {reason}")]
    ReportGeneration { survey_id: String, reason: String },

    #[error("invalid survey id: {0:?}")]
    InvalidSurveyId(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue is closed")]
    QueueClosed,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
