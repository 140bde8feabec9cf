//! Core engine: submission coalescing, the worker loop, and its supervisor.

pub mod coordinator;
pub mod supervisor;
pub mod worker;

pub use coordinator::{CoordinatorConfig, SubmissionCoordinator};
pub use supervisor::{ProcessSupervisor, SupervisorHandle};
pub use worker::{JobOutcome, WorkerConfig, WorkerLoop};
