//! Named promise queue.
//!
//! At most one transformation task is ever in flight per path: scheduling a
//! path that is already running returns the existing shared future, so
//! concurrent callers fan in on the same job. Entries are removed when the
//! job settles; a resettled module re-schedules only after
//! `reset_compilation`.
//!
//! Jobs are spawned eagerly and bounded by a semaphore so a large graph
//! cannot start an unbounded number of concurrent compiles.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::SharedError;

pub type JobResult = Result<(), SharedError>;
pub type SharedJob = Shared<BoxFuture<'static, JobResult>>;

pub const DEFAULT_CONCURRENCY: usize = 50;

pub struct TransformQueue {
    in_flight: Mutex<FxHashMap<String, SharedJob>>,
    permits: Arc<Semaphore>,
}

impl TransformQueue {
    pub fn new(concurrency: usize) -> Self {
        Self {
            in_flight: Mutex::new(FxHashMap::default()),
            permits: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Return the in-flight job for `path`, or start `work` and record it.
    pub fn schedule<F>(&self, path: &str, work: F) -> SharedJob
    where
        F: Future<Output = JobResult> + Send + 'static,
    {
        let job = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(path) {
                return existing.clone();
            }
            let job = work.boxed().shared();
            in_flight.insert(path.to_string(), job.clone());
            job
        };
        // Drive the job even if no caller awaits it; dependency compiles are
        // scheduled fire-and-forget and awaited later through
        // `module_finished`.
        tokio::spawn({
            let job = job.clone();
            async move {
                let _ = job.await;
            }
        });
        job
    }

    pub fn get_in_flight(&self, path: &str) -> Option<SharedJob> {
        self.in_flight.lock().get(path).cloned()
    }

    /// Drop the settled entry for `path`.
    pub fn finish(&self, path: &str) {
        self.in_flight.lock().remove(path);
    }

    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed.
        self.permits.clone().acquire_owned().await.unwrap()
    }

    pub fn clear(&self) {
        self.in_flight.lock().clear();
    }

    /// Completed-job placeholder for paths that are already compiled.
    pub fn ready() -> SharedJob {
        futures::future::ready(Ok(())).boxed().shared()
    }
}

impl Default for TransformQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}
