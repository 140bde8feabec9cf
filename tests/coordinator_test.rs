//! Tests for the submission coordinator's lock gate.

mod support;

use std::sync::Arc;
use std::time::Duration;

use reportq::backend::{InMemoryJobQueue, InMemoryLockBackend};
use reportq::engine::{CoordinatorConfig, SubmissionCoordinator};
use reportq::error::Error;
use reportq::model::{SubmissionEvent, SubmitOutcome};
use support::{Acquire, RecordingQueue, ScriptedLock, survey};

fn event(survey_id: &str) -> SubmissionEvent {
    SubmissionEvent::new(survey(survey_id)).answers(serde_json::json!({"q1": "answer1"}))
}

fn scripted(
    lock: ScriptedLock,
    queue: RecordingQueue,
) -> (Arc<ScriptedLock>, Arc<RecordingQueue>, SubmissionCoordinator) {
    let lock = Arc::new(lock);
    let queue = Arc::new(queue);
    let coordinator =
        SubmissionCoordinator::new(lock.clone(), queue.clone(), CoordinatorConfig::default());
    (lock, queue, coordinator)
}

fn in_memory() -> (Arc<InMemoryLockBackend>, InMemoryJobQueue, SubmissionCoordinator) {
    let lock = Arc::new(InMemoryLockBackend::new());
    let queue = InMemoryJobQueue::new();
    let coordinator = SubmissionCoordinator::new(
        lock.clone(),
        Arc::new(queue.clone()),
        CoordinatorConfig::default(),
    );
    (lock, queue, coordinator)
}

// ---------------------------------------------------------------------------
// Single submission against scripted backends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn free_lock_publishes_one_job_and_keeps_the_lock() {
    let (lock, queue, coordinator) =
        scripted(ScriptedLock::new(Acquire::Grant), RecordingQueue::new());

    let outcome = coordinator.submit(&event("survey-123")).await.unwrap();

    assert_eq!(outcome, SubmitOutcome::Scheduled);
    assert_eq!(
        lock.acquires(),
        vec![("lock:survey-123".to_string(), Duration::from_secs(30))]
    );
    let published = queue.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].survey_id.as_str(), "survey-123");
    assert!(lock.releases().is_empty(), "lock must stay held after publish");
}

#[tokio::test]
async fn held_lock_coalesces_without_error() {
    let (lock, queue, coordinator) =
        scripted(ScriptedLock::new(Acquire::Deny), RecordingQueue::new());

    let outcome = coordinator.submit(&event("survey-123")).await.unwrap();

    assert_eq!(outcome, SubmitOutcome::Coalesced);
    assert_eq!(lock.acquires().len(), 1);
    assert!(queue.published().is_empty());
    assert!(lock.releases().is_empty());
}

#[tokio::test]
async fn lock_backend_failure_short_circuits() {
    let (lock, queue, coordinator) =
        scripted(ScriptedLock::new(Acquire::Fail), RecordingQueue::new());

    let err = coordinator.submit(&event("survey-123")).await.unwrap_err();

    assert!(matches!(err, Error::LockBackend(_)), "got {err:?}");
    assert!(err.to_string().contains("failed to set lock"));
    assert!(queue.published().is_empty());
    assert!(lock.releases().is_empty());
}

#[tokio::test]
async fn publish_failure_releases_the_lock_once() {
    let (lock, queue, coordinator) =
        scripted(ScriptedLock::new(Acquire::Grant), RecordingQueue::failing());

    let err = coordinator.submit(&event("survey-123")).await.unwrap_err();

    assert!(matches!(err, Error::QueuePublish(_)), "got {err:?}");
    assert!(err.to_string().contains("failed to publish report job"));
    assert!(err.to_string().contains("queue connection error"));
    assert_eq!(lock.releases(), vec!["lock:survey-123".to_string()]);
    assert!(queue.published().is_empty());
}

#[tokio::test]
async fn publish_error_wins_over_release_error() {
    let (lock, _queue, coordinator) = scripted(
        ScriptedLock::new(Acquire::Grant).failing_release(),
        RecordingQueue::failing(),
    );

    let err = coordinator.submit(&event("survey-123")).await.unwrap_err();

    assert!(matches!(err, Error::QueuePublish(_)), "got {err:?}");
    assert_eq!(lock.releases().len(), 1);
}

#[tokio::test]
async fn lock_name_uses_configured_prefix_and_ttl() {
    let lock = Arc::new(ScriptedLock::new(Acquire::Grant));
    let coordinator = SubmissionCoordinator::new(
        lock.clone(),
        Arc::new(RecordingQueue::new()),
        CoordinatorConfig {
            lock_ttl: Duration::from_secs(5),
            lock_prefix: "report:lock:".to_string(),
        },
    );

    assert_eq!(coordinator.lock_name(&survey("s-9")), "report:lock:s-9");
    coordinator.submit(&event("s-9")).await.unwrap();
    assert_eq!(
        lock.acquires(),
        vec![("report:lock:s-9".to_string(), Duration::from_secs(5))]
    );
}

// ---------------------------------------------------------------------------
// Coalescing windows against the in-memory backends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_submissions_within_window_publish_once() {
    let (_lock, queue, coordinator) = in_memory();

    assert_eq!(
        coordinator.submit(&event("survey-123")).await.unwrap(),
        SubmitOutcome::Scheduled
    );
    for _ in 0..5 {
        assert_eq!(
            coordinator.submit(&event("survey-123")).await.unwrap(),
            SubmitOutcome::Coalesced
        );
    }

    assert_eq!(queue.stats().published, 1);
    assert_eq!(queue.ready_len(), 1);
}

#[tokio::test]
async fn different_surveys_are_not_coalesced() {
    let (_lock, queue, coordinator) = in_memory();

    coordinator.submit(&event("survey-a")).await.unwrap();
    coordinator.submit(&event("survey-b")).await.unwrap();
    coordinator.submit(&event("survey-a")).await.unwrap();

    assert_eq!(queue.stats().published, 2);
}

#[tokio::test(start_paused = true)]
async fn window_reopens_after_lock_expires() {
    let (lock, queue, coordinator) = in_memory();

    coordinator.submit(&event("survey-123")).await.unwrap();
    tokio::time::advance(Duration::from_secs(29)).await;
    assert_eq!(
        coordinator.submit(&event("survey-123")).await.unwrap(),
        SubmitOutcome::Coalesced
    );
    assert!(lock.is_held("lock:survey-123"));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!lock.is_held("lock:survey-123"));
    assert_eq!(
        coordinator.submit(&event("survey-123")).await.unwrap(),
        SubmitOutcome::Scheduled
    );

    assert_eq!(queue.stats().published, 2);
}

#[tokio::test]
async fn window_reopens_after_explicit_release() {
    let (_lock, queue, coordinator) = in_memory();

    coordinator.submit(&event("survey-123")).await.unwrap();
    assert!(coordinator.reopen_window(&survey("survey-123")).await.unwrap());
    assert!(!coordinator.reopen_window(&survey("survey-123")).await.unwrap());

    assert_eq!(
        coordinator.submit(&event("survey-123")).await.unwrap(),
        SubmitOutcome::Scheduled
    );
    assert_eq!(queue.stats().published, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_publish_once() {
    let (_lock, queue, coordinator) = in_memory();
    let coordinator = Arc::new(coordinator);

    let mut tasks = Vec::new();
    for _ in 0..64 {
        let coordinator = Arc::clone(&coordinator);
        tasks.push(tokio::spawn(async move {
            coordinator.submit(&event("survey-123")).await.unwrap()
        }));
    }

    let mut scheduled = 0;
    for task in tasks {
        if task.await.unwrap() == SubmitOutcome::Scheduled {
            scheduled += 1;
        }
    }

    assert_eq!(scheduled, 1);
    assert_eq!(queue.stats().published, 1);
}
