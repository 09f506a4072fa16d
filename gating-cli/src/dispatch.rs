//! Dispatch Queue: runs whole pipelines on a pool of worker loops.
//!
//! Jobs are keyed by [`PipelineJob::key`]. A submission whose key is already
//! queued or running is chained onto that job and receives the same outcome.
//! Each loop pops the oldest high-priority job, else the oldest default one,
//! and checks the job's validity predicate before running it and after it
//! completes, as does `submit`; a job that fails any check resolves as
//! [`JobOutcome::Discarded`]. There is no explicit cancel.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use gating_core::{PipelineJob, PipelineOutput};

use crate::transport::{Transport, TransportError};

/// Whether a job's target (sample, template group) still exists.
pub type Validity = Arc<dyn Fn() -> bool + Send + Sync>;

pub fn always_valid() -> Validity {
    Arc::new(|| true)
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed(Arc<PipelineOutput>),
    /// The target went away before or during the run.
    Discarded,
    Failed(String),
}

impl JobOutcome {
    pub fn output(&self) -> Option<&PipelineOutput> {
        match self {
            JobOutcome::Completed(output) => Some(output),
            _ => None,
        }
    }
}

pub struct JobHandle {
    key: String,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the job. A queue that shuts down first reports `Discarded`.
    pub async fn outcome(self) -> JobOutcome {
        self.rx.await.unwrap_or(JobOutcome::Discarded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Default,
}

struct QueuedJob {
    job: Arc<PipelineJob>,
    check_validity: Validity,
    waiters: Vec<oneshot::Sender<JobOutcome>>,
}

#[derive(Default)]
struct Lane {
    order: VecDeque<String>,
    jobs: HashMap<String, QueuedJob>,
}

impl Lane {
    fn push(&mut self, key: String, job: QueuedJob) {
        self.order.push_back(key.clone());
        self.jobs.insert(key, job);
    }

    fn pop(&mut self) -> Option<(String, QueuedJob)> {
        while let Some(key) = self.order.pop_front() {
            if let Some(job) = self.jobs.remove(&key) {
                return Some((key, job));
            }
        }
        None
    }

    fn remove(&mut self, key: &str) -> Option<QueuedJob> {
        let job = self.jobs.remove(key)?;
        self.order.retain(|k| k != key);
        Some(job)
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }
}

#[derive(Default)]
struct QueueState {
    priority: Lane,
    default: Lane,
    /// Waiters of jobs a worker has popped but not finished.
    running: HashMap<String, Vec<oneshot::Sender<JobOutcome>>>,
}

impl QueueState {
    fn pop(&mut self) -> Option<(String, QueuedJob)> {
        self.priority.pop().or_else(|| self.default.pop())
    }

    fn pending(&self) -> usize {
        self.priority.len() + self.default.len()
    }
}

struct Inner<T> {
    transport: T,
    state: Mutex<QueueState>,
    notify: Notify,
    shutdown: AtomicBool,
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport> Inner<T> {
    /// Pop the next job and move its waiters to the running set.
    fn next_job(&self) -> Option<(String, Arc<PipelineJob>, Validity)> {
        let mut state = lock(&self.state);
        let (key, QueuedJob { job, check_validity, waiters }) = state.pop()?;
        state.running.insert(key.clone(), waiters);
        if state.pending() > 0 {
            self.notify.notify_one();
        }
        Some((key, job, check_validity))
    }

    fn finish(&self, key: &str, outcome: JobOutcome) {
        let waiters = lock(&self.state).running.remove(key).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn run_with_retry(&self, key: &str, job: Arc<PipelineJob>) -> Result<PipelineOutput, TransportError> {
        match self.transport.run(job.clone()).await {
            Err(e) if e.is_transient() => {
                warn!("{}: {}, retrying once", key, e);
                self.transport.run(job).await
            }
            result => result,
        }
    }

    async fn process(&self, key: String, job: Arc<PipelineJob>, check_validity: Validity) {
        if !check_validity() {
            debug!("{}: target no longer valid, dropping", key);
            self.finish(&key, JobOutcome::Discarded);
            return;
        }
        let start = Instant::now();
        let outcome = match self.run_with_retry(&key, job).await {
            Ok(_) if !check_validity() => {
                debug!("{}: target changed during computation, discarding result", key);
                JobOutcome::Discarded
            }
            Ok(output) => {
                debug!("{}: {:?} in {:?}", key, output.status, start.elapsed());
                JobOutcome::Completed(Arc::new(output))
            }
            Err(e) => {
                error!("{}: {}", key, e);
                JobOutcome::Failed(e.to_string())
            }
        };
        self.finish(&key, outcome);
    }
}

async fn worker_loop<T: Transport>(inner: Arc<Inner<T>>, worker: usize) {
    debug!("dispatch worker {} started", worker);
    loop {
        let notified = inner.notify.notified();
        tokio::pin!(notified);
        // Register before looking at the queue so a submit in between still wakes us
        notified.as_mut().enable();
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match inner.next_job() {
            Some((key, job, check_validity)) => inner.process(key, job, check_validity).await,
            None => notified.await,
        }
    }
    debug!("dispatch worker {} stopped", worker);
}

/// Leaves two cores for the host, but always at least one worker.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(2)
        .max(1)
}

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DispatchQueue<T: Transport> {
    inner: Arc<Inner<T>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl<T: Transport> DispatchQueue<T> {
    pub fn new(transport: T) -> Self {
        Self::with_workers(transport, default_worker_count())
    }

    pub fn with_workers(transport: T, workers: usize) -> Self {
        DispatchQueue {
            inner: Arc::new(Inner {
                transport,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                shutdown: AtomicBool::new(false),
            }),
            workers: Mutex::new(vec![]),
            worker_count: workers.max(1),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Spawn the worker loops. Must be called from within a tokio runtime;
    /// calling it again is a no-op.
    pub fn start(&self) {
        let mut workers = lock(&self.workers);
        if !workers.is_empty() {
            return;
        }
        for worker in 0..self.worker_count {
            workers.push(tokio::spawn(worker_loop(self.inner.clone(), worker)));
        }
        info!("dispatch queue started with {} workers", self.worker_count);
    }

    /// Queue `job`, or chain onto an identical job that is already queued or
    /// running. A high-priority submission promotes a queued default job.
    pub fn submit(&self, job: PipelineJob, priority: Priority, check_validity: Validity) -> JobHandle {
        let key = job.key();
        let (tx, rx) = oneshot::channel();
        let handle = JobHandle { key: key.clone(), rx };
        if self.inner.shutdown.load(Ordering::SeqCst) {
            warn!("{}: submitted after shutdown", key);
            return handle;
        }
        if !check_validity() {
            debug!("{}: target already gone at submission", key);
            let _ = tx.send(JobOutcome::Discarded);
            return handle;
        }

        let mut state = lock(&self.inner.state);
        if let Some(waiters) = state.running.get_mut(&key) {
            debug!("{}: already running, chaining", key);
            waiters.push(tx);
            return handle;
        }
        if let Some(queued) = state.priority.jobs.get_mut(&key) {
            debug!("{}: already queued, chaining", key);
            queued.waiters.push(tx);
            return handle;
        }
        if priority == Priority::High {
            if let Some(mut queued) = state.default.remove(&key) {
                debug!("{}: promoting to priority", key);
                queued.waiters.push(tx);
                state.priority.push(key, queued);
                return handle;
            }
        } else if let Some(queued) = state.default.jobs.get_mut(&key) {
            debug!("{}: already queued, chaining", key);
            queued.waiters.push(tx);
            return handle;
        }

        let queued = QueuedJob { job: Arc::new(job), check_validity, waiters: vec![tx] };
        match priority {
            Priority::High => state.priority.push(key, queued),
            Priority::Default => state.default.push(key, queued),
        }
        drop(state);
        self.inner.notify.notify_one();
        handle
    }

    /// Jobs queued but not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        lock(&self.inner.state).pending()
    }

    /// Stop the worker loops. Jobs still queued resolve as `Discarded`;
    /// running jobs get [`SHUTDOWN_TIMEOUT`] to finish before their loops are
    /// aborted, and their handles then resolve as `Discarded` too.
    pub async fn shutdown(&self) {
        self.shutdown_within(SHUTDOWN_TIMEOUT).await
    }

    async fn shutdown_within(&self, timeout: Duration) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let dropped = {
            let mut state = lock(&self.inner.state);
            let dropped = state.pending();
            state.priority = Lane::default();
            state.default = Lane::default();
            dropped
        };
        if dropped > 0 {
            info!("dispatch queue shutting down, dropping {} queued jobs", dropped);
        }
        self.inner.notify.notify_waiters();

        let handles: Vec<_> = lock(&self.workers).drain(..).collect();
        let start = Instant::now();
        for mut handle in handles {
            let remaining = timeout.saturating_sub(start.elapsed());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("dispatch worker did not stop within {:?}, aborting", timeout);
                handle.abort();
            }
        }

        // Jobs whose loops were aborted never reach `finish`
        let orphaned: Vec<_> = lock(&self.inner.state).running.drain().collect();
        for (key, waiters) in orphaned {
            debug!("{}: aborted at shutdown", key);
            for waiter in waiters {
                let _ = waiter.send(JobOutcome::Discarded);
            }
        }
        debug!("dispatch queue stopped in {:?}", start.elapsed());
    }
}
