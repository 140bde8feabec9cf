//! Report job span helpers.
//!
//! One span per delivery, from decode through settlement.

use tracing::Span;

use crate::model::AckDecision;

/// Start a span for handling one delivery.
///
/// `job.survey_id` is filled in once the payload decodes; `job.decision`
/// once the delivery is settled (see [`record_decision`]).
pub fn start_job_span(delivery_id: i64, attempt: u32) -> Span {
    tracing::info_span!(
        "job.handle",
        "job.delivery_id" = delivery_id,
        "job.attempt" = attempt,
        "job.survey_id" = tracing::field::Empty,
        "job.decision" = tracing::field::Empty,
    )
}

/// Record the settlement decision on the span and emit an event in it.
pub fn record_decision(span: &Span, decision: AckDecision) {
    span.record("job.decision", tracing::field::display(decision));
    span.in_scope(|| {
        tracing::debug!(%decision, "delivery settled");
    });
}
