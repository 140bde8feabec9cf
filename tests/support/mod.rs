#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reportq::backend::{JobQueue, LockBackend, Subscription};
use reportq::error::{Error, Result};
use reportq::model::{ReportJob, SurveyId};
use reportq::report::ReportGenerator;
use tokio::sync::Notify;

pub fn survey(id: &str) -> SurveyId {
    SurveyId::new(id).unwrap()
}

/// Poll `condition` every few milliseconds; panic after five seconds.
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

/// Await `fut`, panicking if it takes longer than five seconds.
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum Acquire {
    Grant,
    Deny,
    Fail,
}

/// Lock backend with a fixed answer that records every call.
pub struct ScriptedLock {
    acquire: Acquire,
    fail_release: bool,
    pub acquires: Mutex<Vec<(String, Duration)>>,
    pub releases: Mutex<Vec<String>>,
}

impl ScriptedLock {
    pub fn new(acquire: Acquire) -> Self {
        Self {
            acquire,
            fail_release: false,
            acquires: Mutex::new(Vec::new()),
            releases: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    pub fn acquires(&self) -> Vec<(String, Duration)> {
        self.acquires.lock().unwrap().clone()
    }

    pub fn releases(&self) -> Vec<String> {
        self.releases.lock().unwrap().clone()
    }
}

#[async_trait]
impl LockBackend for ScriptedLock {
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<bool> {
        self.acquires.lock().unwrap().push((name.to_string(), ttl));
        match self.acquire {
            Acquire::Grant => Ok(true),
            Acquire::Deny => Ok(false),
            Acquire::Fail => Err(Error::Other("lock backend connection refused".into())),
        }
    }

    async fn release(&self, name: &str) -> Result<bool> {
        self.releases.lock().unwrap().push(name.to_string());
        if self.fail_release {
            Err(Error::Other("lock backend connection reset".into()))
        } else {
            Ok(true)
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Publish-only queue that records jobs, or rejects them.
#[derive(Default)]
pub struct RecordingQueue {
    fail_publish: bool,
    pub published: Mutex<Vec<ReportJob>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_publish: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<ReportJob> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn publish(&self, job: &ReportJob) -> Result<()> {
        if self.fail_publish {
            return Err(Error::Other("queue connection error".into()));
        }
        self.published.lock().unwrap().push(job.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn Subscription>> {
        Err(Error::Other("consuming is not supported here".into()))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Fails a configurable number of times per survey, then succeeds.
/// `u32::MAX` failures means it never succeeds.
#[derive(Default)]
pub struct ScriptedGenerator {
    failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing(survey_id: &str, times: u32) -> Self {
        let generator = Self::default();
        generator
            .failures
            .lock()
            .unwrap()
            .insert(survey_id.to_string(), times);
        generator
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportGenerator for ScriptedGenerator {
    async fn generate(&self, survey_id: &SurveyId) -> Result<()> {
        // Keep retry loops from starving the test task on one thread.
        tokio::task::yield_now().await;
        self.calls.lock().unwrap().push(survey_id.to_string());
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(survey_id.as_str()) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                Err(Error::ReportGeneration {
                    survey_id: survey_id.to_string(),
                    reason: "report store unavailable".into(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Blocks inside `generate` until released, so tests can act mid-job.
#[derive(Default)]
pub struct GatedGenerator {
    started: Notify,
    release: Notify,
    running: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl GatedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until a generation call is in progress.
    pub async fn wait_started(&self) {
        let started = self.started.notified();
        if self.running.load(Ordering::Acquire) {
            return;
        }
        started.await;
    }

    /// Let the in-progress call finish.
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportGenerator for GatedGenerator {
    async fn generate(&self, survey_id: &SurveyId) -> Result<()> {
        self.calls.lock().unwrap().push(survey_id.to_string());
        self.running.store(true, Ordering::Release);
        self.started.notify_waiters();
        self.release.notified().await;
        self.running.store(false, Ordering::Release);
        Ok(())
    }
}
