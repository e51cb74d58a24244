//! Background task queue for matching and grouping passes.
//!
//! Every unit of work is a single pass for a single cohort. After a pass the
//! worker decides whether the cohort needs another one and, if so, submits
//! exactly one follow-up job. Passes of the same cohort never overlap: each job
//! holds the cohort's lock for the duration of the pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, OwnedMutexGuard};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, instrument, warn};

use super::cache::CacheManager;
use super::runner::PassRunner;
use super::store::EngineStore;
use crate::core::{decide, Convergence};
use crate::models::{CohortId, PassJob, PassKind};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Task queue is full")]
    Full,

    #[error("Task queue is closed")]
    Closed,
}

/// Worker pool tuning
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_passes: u32,
    pub max_conflict_retries: u32,
    pub resubmit_delay: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            max_passes: 100,
            max_conflict_retries: 3,
            resubmit_delay: Duration::ZERO,
        }
    }
}

/// Handle used to submit passes
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<PassJob>,
    default_max_passes: u32,
}

impl TaskQueue {
    /// Bounded queue; the receiver goes to the worker pool
    pub fn new(capacity: usize, default_max_passes: u32) -> (Self, mpsc::Receiver<PassJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender, default_max_passes }, receiver)
    }

    /// Submit the first pass of a run; fails fast when the queue is saturated
    pub fn submit(
        &self,
        cohort_id: CohortId,
        kind: PassKind,
        max_passes: Option<u32>,
    ) -> Result<PassJob, QueueError> {
        let job = PassJob::first(cohort_id, kind, max_passes.unwrap_or(self.default_max_passes));
        self.sender.try_send(job.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;

        info!(job_id = %job.job_id, cohort_id, %kind, max_passes = job.max_passes, "Pass submitted");
        Ok(job)
    }

    /// Enqueue a job, waiting for room
    pub async fn enqueue(&self, job: PassJob) -> Result<(), QueueError> {
        self.sender.send(job).await.map_err(|_| QueueError::Closed)
    }
}

/// One async mutex per cohort
#[derive(Default)]
pub struct CohortLocks {
    locks: Mutex<HashMap<CohortId, Arc<tokio::sync::Mutex<()>>>>,
}

impl CohortLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, cohort_id: CohortId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop locks nobody holds or waits on
            locks.retain(|id, lock| *id == cohort_id || Arc::strong_count(lock) > 1);
            locks.entry(cohort_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Consumes pass jobs and resubmits follow-ups
pub struct PassWorker<S> {
    runner: Arc<PassRunner<S>>,
    cache: Arc<CacheManager>,
    locks: Arc<CohortLocks>,
    queue: TaskQueue,
    options: WorkerOptions,
    follow_ups: Mutex<JoinSet<()>>,
}

impl<S: EngineStore + 'static> PassWorker<S> {
    pub fn new(
        runner: Arc<PassRunner<S>>,
        cache: Arc<CacheManager>,
        locks: Arc<CohortLocks>,
        queue: TaskQueue,
        options: WorkerOptions,
    ) -> Self {
        Self {
            runner,
            cache,
            locks,
            queue,
            options,
            follow_ups: Mutex::new(JoinSet::new()),
        }
    }

    /// Run one job and return the follow-up to submit, if any
    #[instrument(skip(self, job), fields(job_id = %job.job_id, cohort_id = job.cohort_id, kind = %job.kind, pass = job.pass_number))]
    pub async fn process(&self, job: &PassJob) -> Option<PassJob> {
        let _guard = self.locks.acquire(job.cohort_id).await;

        let report = match self
            .runner
            .run_pass(job.kind, job.cohort_id, job.pass_number)
            .await
        {
            Ok(report) => report,
            Err(e) if e.is_retryable() && job.conflict_retries < self.options.max_conflict_retries => {
                warn!(error = %e, retries = job.conflict_retries, "Pass failed, retrying");
                return Some(job.retry());
            }
            Err(e) => {
                error!(error = %e, "Pass failed");
                return None;
            }
        };

        if let Err(e) = self.cache.store_report(&report).await {
            warn!(error = %e, "Failed to cache pass report");
        }

        match decide(&report, job.max_passes) {
            Convergence::Resubmit => Some(job.next_pass()),
            Convergence::Converged => {
                info!("Cohort converged");
                None
            }
            Convergence::Stalled => {
                info!(remaining = report.remaining, "No further progress possible, leaving remainder");
                None
            }
            Convergence::PassLimitReached => {
                warn!(remaining = report.remaining, max_passes = job.max_passes, "Pass limit reached");
                None
            }
        }
    }

    fn resubmit(&self, job: PassJob, mut shutdown: watch::Receiver<bool>) {
        let queue = self.queue.clone();
        let delay = self.options.resubmit_delay;
        let job_id = job.job_id;
        let send = async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.enqueue(job).await
        };

        // Sending from a separate task keeps a full queue from blocking the worker
        let mut follow_ups = self.follow_ups.lock().unwrap_or_else(|e| e.into_inner());
        while follow_ups.try_join_next().is_some() {}
        follow_ups.spawn(async move {
            tokio::select! {
                sent = send => {
                    if let Err(e) = sent {
                        warn!(%job_id, error = %e, "Dropped follow-up pass");
                    }
                }
                _ = stopped(&mut shutdown) => {
                    warn!(%job_id, "Shutting down before follow-up pass was queued");
                }
            }
        });
    }

    /// Wait for follow-ups spawned by any worker to finish or give up
    async fn drain_follow_ups(&self) {
        let mut pending = {
            let mut follow_ups = self.follow_ups.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *follow_ups, JoinSet::new())
        };
        while pending.join_next().await.is_some() {}
    }

    async fn run(
        self: Arc<Self>,
        receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<PassJob>>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let job = tokio::select! {
                job = async { receiver.lock().await.recv().await } => job,
                _ = stopped(&mut shutdown) => {
                    info!("Pass worker shutting down");
                    break;
                }
            };

            let Some(job) = job else {
                break;
            };

            if let Some(next) = self.process(&job).await {
                self.resubmit(next, shutdown.clone());
            }
        }

        self.drain_follow_ups().await;
    }
}

/// Resolves once shutdown is signalled or the signalling side is gone
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Start the worker pool and return the submission handle
pub fn start_workers<S: EngineStore + 'static>(
    runner: Arc<PassRunner<S>>,
    cache: Arc<CacheManager>,
    options: WorkerOptions,
    shutdown: watch::Receiver<bool>,
) -> (TaskQueue, Vec<JoinHandle<()>>) {
    let (queue, receiver) = TaskQueue::new(options.queue_capacity, options.max_passes);

    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
    let locks = Arc::new(CohortLocks::new());
    let worker = Arc::new(PassWorker::new(
        runner,
        cache,
        locks,
        queue.clone(),
        options.clone(),
    ));

    info!(workers = options.workers, capacity = options.queue_capacity, "Starting pass workers");

    let handles = (0..options.workers.max(1))
        .map(|_| tokio::spawn(worker.clone().run(receiver.clone(), shutdown.clone())))
        .collect();

    (queue, handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Compatibility, Gender, Group, GroupAssignment, NewPairing, Pairing, Participant, Role,
    };
    use crate::services::memory::InMemoryStore;
    use crate::services::store::{
        AssignmentStore, GroupDirectory, PairingStore, ParticipantDirectory, StoreError,
        StoreResult,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Rejects the first `failures` pairing writes as conflicts
    struct ConflictingStore {
        inner: InMemoryStore,
        failures: AtomicU32,
    }

    #[async_trait]
    impl ParticipantDirectory for ConflictingStore {
        async fn participants(&self, cohort_id: CohortId, gender: Gender) -> StoreResult<Vec<Participant>> {
            self.inner.participants(cohort_id, gender).await
        }
    }

    #[async_trait]
    impl PairingStore for ConflictingStore {
        async fn pairings(&self, cohort_id: CohortId) -> StoreResult<Vec<Pairing>> {
            self.inner.pairings(cohort_id).await
        }

        async fn insert_pairing(&self, pairing: &NewPairing) -> StoreResult<Pairing> {
            let rejected = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if rejected {
                return Err(StoreError::Conflict(format!("student {}", pairing.student_id)));
            }
            self.inner.insert_pairing(pairing).await
        }
    }

    #[async_trait]
    impl GroupDirectory for ConflictingStore {
        async fn groups(&self, cohort_id: CohortId, gender: Gender) -> StoreResult<Vec<Group>> {
            self.inner.groups(cohort_id, gender).await
        }
    }

    #[async_trait]
    impl AssignmentStore for ConflictingStore {
        async fn assignments(&self, cohort_id: CohortId) -> StoreResult<Vec<GroupAssignment>> {
            self.inner.assignments(cohort_id).await
        }

        async fn insert_assignments(&self, batch: &[GroupAssignment]) -> StoreResult<()> {
            self.inner.insert_assignments(batch).await
        }
    }

    async fn conflicting_worker(
        failures: u32,
        max_conflict_retries: u32,
    ) -> (PassWorker<ConflictingStore>, Arc<CacheManager>, Arc<ConflictingStore>) {
        let inner = InMemoryStore::new();
        for (id, role) in [(1, Role::Teacher), (2, Role::Student)] {
            inner
                .add_participant(Participant {
                    user_id: id,
                    cohort_id: 1,
                    role,
                    gender: Gender::Male,
                    compatibility: Compatibility::default(),
                    is_active: true,
                })
                .unwrap();
        }
        let store = Arc::new(ConflictingStore { inner, failures: AtomicU32::new(failures) });
        let cache = Arc::new(CacheManager::new(None, 100, 60).await.unwrap());
        let (queue, _receiver) = TaskQueue::new(8, 10);
        let options = WorkerOptions { max_conflict_retries, ..WorkerOptions::default() };

        let worker = PassWorker::new(
            Arc::new(PassRunner::new(store.clone())),
            cache.clone(),
            Arc::new(CohortLocks::new()),
            queue,
            options,
        );
        (worker, cache, store)
    }

    #[tokio::test]
    async fn test_conflict_reruns_same_pass_until_retry_cap() {
        let (worker, cache, store) = conflicting_worker(5, 2).await;
        let job = PassJob::first(1, PassKind::Matching, 10);

        let first_retry = worker.process(&job).await.unwrap();
        assert_eq!(first_retry.pass_number, 1);
        assert_eq!(first_retry.conflict_retries, 1);
        assert_ne!(first_retry.job_id, job.job_id);

        let second_retry = worker.process(&first_retry).await.unwrap();
        assert_eq!(second_retry.pass_number, 1);
        assert_eq!(second_retry.conflict_retries, 2);

        // Cap reached: the job is dropped
        assert!(worker.process(&second_retry).await.is_none());
        assert!(cache.latest_report(1, PassKind::Matching).await.unwrap().is_none());
        assert!(store.inner.pairings(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_retry_recovers() {
        let (worker, cache, store) = conflicting_worker(1, 3).await;
        let job = PassJob::first(1, PassKind::Matching, 10);

        let retry = worker.process(&job).await.unwrap();
        assert_eq!(retry.conflict_retries, 1);

        // The retried pass pairs the only student and converges
        assert!(worker.process(&retry).await.is_none());
        let report = cache.latest_report(1, PassKind::Matching).await.unwrap().unwrap();
        assert_eq!((report.pass_number, report.created, report.remaining), (1, 1, 0));
        assert_eq!(store.inner.pairings(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cohort_lock_serializes_same_cohort() {
        let locks = CohortLocks::new();
        let guard = locks.acquire(1).await;

        // A different cohort is not blocked
        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire(2)).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(50), locks.acquire(1)).await;
        assert!(same.is_err());

        drop(guard);
        let same = tokio::time::timeout(Duration::from_millis(50), locks.acquire(1)).await;
        assert!(same.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_drains_delayed_follow_up() {
        let store = Arc::new(InMemoryStore::new());
        for (id, role) in [(1, Role::Teacher), (2, Role::Student), (3, Role::Student)] {
            store
                .add_participant(Participant {
                    user_id: id,
                    cohort_id: 1,
                    role,
                    gender: Gender::Female,
                    compatibility: Compatibility::default(),
                    is_active: true,
                })
                .unwrap();
        }
        let cache = Arc::new(CacheManager::new(None, 100, 60).await.unwrap());
        let options = WorkerOptions {
            workers: 2,
            resubmit_delay: Duration::from_secs(30),
            ..WorkerOptions::default()
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue, handles) =
            start_workers(Arc::new(PassRunner::new(store.clone())), cache.clone(), options, shutdown_rx);

        queue.submit(1, PassKind::Matching, None).unwrap();
        let first_pass = async {
            loop {
                if let Some(report) = cache.latest_report(1, PassKind::Matching).await.unwrap() {
                    return report;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        let report = tokio::time::timeout(Duration::from_secs(5), first_pass).await.unwrap();
        assert_eq!((report.pass_number, report.remaining), (1, 1));

        // The second pass is still waiting out its delay
        shutdown_tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        }
        assert_eq!(store.pairings(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_fails_when_full() {
        let (queue, _receiver) = TaskQueue::new(1, 5);

        let job = queue.submit(1, PassKind::Matching, None).unwrap();
        assert_eq!(job.max_passes, 5);
        assert_eq!(job.pass_number, 1);
        assert!(matches!(queue.submit(2, PassKind::Matching, Some(3)), Err(QueueError::Full)));
    }
}
