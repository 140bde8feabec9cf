//! Metric instrument factories for reportq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"reportq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for reportq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("reportq")
}

/// Counter: submissions seen by the coordinator.
/// Labels: `result` ("scheduled" | "coalesced" | "error").
pub fn submissions() -> Counter<u64> {
    meter()
        .u64_counter("reportq.submissions")
        .with_description("Number of survey submissions handled by the coordinator")
        .build()
}

/// Counter: queue-level operations (create, send, read, archive, set_vt).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("reportq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: deliveries settled by workers.
/// Labels: `decision` ("ack" | "requeue" | "drop").
pub fn jobs_settled() -> Counter<u64> {
    meter()
        .u64_counter("reportq.jobs.settled")
        .with_description("Number of report job deliveries settled")
        .build()
}

/// Histogram: report generation duration in milliseconds.
/// Labels: `result` ("ok" | "error").
pub fn report_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("reportq.report.duration_ms")
        .with_description("Report generation duration in milliseconds")
        .with_unit("ms")
        .build()
}
