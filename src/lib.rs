//! # reportq
//!
//! Coalesces bursts of survey submissions into at most one pending report
//! job per survey, and works those jobs off a durable queue with
//! at-least-once delivery.
//!
//! Provides the submission coordinator (expiring-lock gate in front of
//! publication), the worker loop and its supervisor, Postgres (lock table +
//! pgmq) and in-memory backends, and OpenTelemetry observability.

pub mod backend;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod report;
pub mod telemetry;
