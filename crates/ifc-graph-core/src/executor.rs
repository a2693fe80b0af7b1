//! Batch execution, sequential or over a bounded worker pool.
//!
//! ```text
//!            ┌──────────── queue (batches in submission order) ─────────────┐
//!            │ b0 b1 b2 b3 ...                                              │
//!            └───┬───────────────┬───────────────┬──────────────────────────┘
//!                ▼               ▼               ▼
//!           worker 0        worker 1        worker w-1     one pooled session each
//!                │               │               │
//!                └──── (index, result) ──────────┴──> slots[index]
//! ```
//!
//! Results come back in submission order whatever the completion order.
//! A batch whose function fails or panics yields `Output::default()` and a
//! [`BatchFailure`]; siblings keep running. A fatal store error stops workers
//! from taking new batches, in-flight batches are awaited, then the error is
//! returned.

use crate::error::{Error, Result};
use crate::graph::{GraphSession, PooledSession, SessionPool};
use crate::partition::{Batch, BatchDomain};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Work applied to one batch with the worker's session
#[async_trait]
pub trait BatchProcessor<T: Sync>: Send + Sync {
    /// Per-batch result; `Default` is the zero value used for failed batches
    type Output: Default + Send + 'static;

    /// Process one batch
    async fn process(&self, session: &mut dyn GraphSession, batch: &Batch<T>) -> Result<Self::Output>;
}

/// How batches are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One session, batches in order
    Sequential,
    /// Bounded worker pool
    Parallel {
        /// Worker count, at least one
        workers: usize,
    },
}

impl ExecutionMode {
    /// Number of workers this mode runs
    pub fn workers(&self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Parallel { workers } => (*workers).max(1),
        }
    }
}

/// Progress event, emitted once per finished batch in completion order
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    /// Domain of the batch
    pub domain: BatchDomain,
    /// Submission index of the batch that just finished
    pub batch_index: usize,
    /// Batches finished so far
    pub completed: usize,
    /// Batches submitted
    pub total: usize,
    /// Items in the finished batch
    pub items: usize,
    /// False if the batch failed
    pub succeeded: bool,
    /// Time spent on the batch
    pub elapsed: Duration,
}

impl BatchProgress {
    /// Completion percentage
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Progress callback
pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// A batch that contributed a zero result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    /// Submission index
    pub index: usize,
    /// Domain
    pub domain: BatchDomain,
    /// Items in the batch
    pub items: usize,
    /// Failure description
    pub reason: String,
}

/// Results of an execution, one per batch in submission order
#[derive(Debug, Clone)]
pub struct ExecutionReport<R> {
    /// Per-batch results, index-aligned with the input
    pub results: Vec<R>,
    /// Batches that failed, sorted by index
    pub failures: Vec<BatchFailure>,
}

impl<R> ExecutionReport<R> {
    /// Sum of all per-batch results
    pub fn total(self) -> R
    where
        R: std::iter::Sum<R>,
    {
        self.results.into_iter().sum()
    }
}

/// Runs a [`BatchProcessor`] over a list of batches
pub struct BatchExecutor {
    mode: ExecutionMode,
    pool: SessionPool,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("mode", &self.mode)
            .field("pool", &self.pool)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

enum BatchResult<R> {
    Done(R),
    Failed(BatchFailure),
}

struct Shared<T> {
    queue: Mutex<VecDeque<Batch<T>>>,
    abort: AtomicBool,
    fatal: Mutex<Option<Error>>,
    completed: AtomicUsize,
    total: usize,
}

impl BatchExecutor {
    /// Create an executor
    pub fn new(mode: ExecutionMode, pool: SessionPool) -> Self {
        Self {
            mode,
            pool,
            progress: None,
        }
    }

    /// Attach a progress callback
    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Scheduling mode
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Run `processor` over every batch
    pub async fn run<T, P>(&self, processor: Arc<P>, batches: Vec<Batch<T>>) -> Result<ExecutionReport<P::Output>>
    where
        T: Send + Sync + 'static,
        P: BatchProcessor<T> + 'static,
    {
        let total = batches.len();
        if total == 0 {
            return Ok(ExecutionReport {
                results: Vec::new(),
                failures: Vec::new(),
            });
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(batches.into_iter().collect()),
            abort: AtomicBool::new(false),
            fatal: Mutex::new(None),
            completed: AtomicUsize::new(0),
            total,
        });

        let outcomes = match self.mode {
            ExecutionMode::Sequential => {
                worker_loop(0, self.pool.clone(), processor, Arc::clone(&shared), self.progress.clone()).await
            }
            ExecutionMode::Parallel { workers } => {
                let workers = workers.max(1).min(total);
                debug!(workers, batches = total, "starting parallel batch execution");

                let mut set = JoinSet::new();
                for worker in 0..workers {
                    set.spawn(worker_loop(
                        worker,
                        self.pool.clone(),
                        Arc::clone(&processor),
                        Arc::clone(&shared),
                        self.progress.clone(),
                    ));
                }

                let mut outcomes = Vec::with_capacity(total);
                let mut join_error = None;
                while let Some(joined) = set.join_next().await {
                    match joined {
                        Ok(worker_outcomes) => outcomes.extend(worker_outcomes),
                        Err(e) => {
                            shared.abort.store(true, Ordering::SeqCst);
                            join_error.get_or_insert_with(|| Error::execution(format!("worker task failed: {e}")));
                        }
                    }
                }
                if let Some(e) = join_error {
                    return Err(e);
                }
                outcomes
            }
        };

        if let Some(fatal) = shared.fatal.lock().take() {
            return Err(fatal);
        }

        let mut results: Vec<P::Output> = (0..total).map(|_| P::Output::default()).collect();
        let mut failures = Vec::new();
        for (index, outcome) in outcomes {
            match outcome {
                BatchResult::Done(value) => {
                    if let Some(slot) = results.get_mut(index) {
                        *slot = value;
                    }
                }
                BatchResult::Failed(failure) => failures.push(failure),
            }
        }
        failures.sort_by_key(|f| f.index);

        Ok(ExecutionReport { results, failures })
    }
}

async fn worker_loop<T, P>(
    worker: usize,
    pool: SessionPool,
    processor: Arc<P>,
    shared: Arc<Shared<T>>,
    progress: Option<ProgressCallback>,
) -> Vec<(usize, BatchResult<P::Output>)>
where
    T: Send + Sync + 'static,
    P: BatchProcessor<T> + 'static,
{
    let mut outcomes = Vec::new();
    let mut session: Option<PooledSession> = None;

    loop {
        if shared.abort.load(Ordering::SeqCst) {
            break;
        }
        let Some(batch) = shared.queue.lock().pop_front() else {
            break;
        };

        if session.is_none() {
            match pool.acquire().await {
                Ok(s) => session = Some(s),
                Err(e) => {
                    error!(worker, error = %e, "failed to open graph store session");
                    record_fatal(&shared, e);
                    break;
                }
            }
        }
        let Some(active) = session.as_mut() else {
            break;
        };

        let start = Instant::now();
        let result = AssertUnwindSafe(processor.process(active.session(), &batch))
            .catch_unwind()
            .await;
        let elapsed = start.elapsed();

        let (outcome, succeeded) = match result {
            Ok(Ok(value)) => (BatchResult::Done(value), true),
            Ok(Err(e)) if e.is_fatal() => {
                error!(worker, domain = %batch.domain, batch = batch.index, error = %e, "fatal error, stopping batch execution");
                let failure = failure_for(&batch, e.to_string());
                record_fatal(&shared, e);
                (BatchResult::Failed(failure), false)
            }
            Ok(Err(e)) => {
                error!(worker, domain = %batch.domain, batch = batch.index, error = %e, "batch failed, contributing zero");
                (BatchResult::Failed(failure_for(&batch, e.to_string())), false)
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(worker, domain = %batch.domain, batch = batch.index, %reason, "batch panicked, contributing zero");
                // the session may be mid-exchange; take a fresh one next time
                session = None;
                (BatchResult::Failed(failure_for(&batch, format!("panicked: {reason}"))), false)
            }
        };

        let completed = shared.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let event = BatchProgress {
            domain: batch.domain,
            batch_index: batch.index,
            completed,
            total: shared.total,
            items: batch.len(),
            succeeded,
            elapsed,
        };
        info!(
            domain = %batch.domain,
            batch = batch.index,
            elapsed_ms = elapsed.as_millis() as u64,
            "Batch {}/{} complete ({:.1}%)",
            completed,
            shared.total,
            event.percent()
        );
        if let Some(callback) = &progress {
            callback(event);
        }

        outcomes.push((batch.index, outcome));
    }

    outcomes
}

fn record_fatal<T>(shared: &Shared<T>, error: Error) {
    shared.abort.store(true, Ordering::SeqCst);
    let mut fatal = shared.fatal.lock();
    if fatal.is_none() {
        *fatal = Some(error);
    }
}

fn failure_for<T>(batch: &Batch<T>, reason: String) -> BatchFailure {
    BatchFailure {
        index: batch.index,
        domain: batch.domain,
        items: batch.len(),
        reason,
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphStore, MemoryGraphStore};
    use crate::partition::partition;

    /// Sums items, sleeping longer for earlier batches so completion order
    /// is the reverse of submission order.
    struct SumProcessor {
        active: AtomicUsize,
        peak: AtomicUsize,
        fail_index: Option<usize>,
        panic_index: Option<usize>,
        fatal_index: Option<usize>,
    }

    impl SumProcessor {
        fn new() -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_index: None,
                panic_index: None,
                fatal_index: None,
            }
        }
    }

    #[async_trait]
    impl BatchProcessor<u64> for SumProcessor {
        type Output = u64;

        async fn process(&self, _session: &mut dyn GraphSession, batch: &Batch<u64>) -> Result<u64> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5 * (8 - batch.index.min(8)) as u64)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if Some(batch.index) == self.fail_index {
                return Err(Error::store_query("rejected"));
            }
            if Some(batch.index) == self.fatal_index {
                return Err(Error::store_unavailable("connection reset"));
            }
            if Some(batch.index) == self.panic_index {
                panic!("boom");
            }
            Ok(batch.items.iter().sum())
        }
    }

    fn pool(store: &MemoryGraphStore, size: usize) -> SessionPool {
        SessionPool::new(Arc::new(store.clone()) as Arc<dyn GraphStore>, size)
    }

    fn batches(n: u64, size: usize) -> Vec<Batch<u64>> {
        partition((1..=n).collect(), size, BatchDomain::Elements).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_results_are_in_submission_order() {
        let store = MemoryGraphStore::new();
        let executor = BatchExecutor::new(ExecutionMode::Parallel { workers: 4 }, pool(&store, 4));
        let report = executor
            .run(Arc::new(SumProcessor::new()), batches(16, 2))
            .await
            .unwrap();

        let expected: Vec<u64> = (0..8u64).map(|i| (2 * i + 1) + (2 * i + 2)).collect();
        assert_eq!(report.results, expected);
        assert!(report.failures.is_empty());
        assert_eq!(report.total(), (1..=16).sum::<u64>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded_by_workers() {
        let store = MemoryGraphStore::new();
        let processor = Arc::new(SumProcessor::new());
        let executor = BatchExecutor::new(ExecutionMode::Parallel { workers: 3 }, pool(&store, 3));
        executor.run(Arc::clone(&processor), batches(40, 2)).await.unwrap();

        assert!(processor.peak.load(Ordering::SeqCst) <= 3);
        assert!(store.performance().peak_open_sessions <= 3);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_batch_contributes_zero() {
        let store = MemoryGraphStore::new();
        let mut processor = SumProcessor::new();
        processor.fail_index = Some(1);
        let executor = BatchExecutor::new(ExecutionMode::Parallel { workers: 2 }, pool(&store, 2));
        let report = executor.run(Arc::new(processor), batches(6, 2)).await.unwrap();

        assert_eq!(report.results, vec![3, 0, 11]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(report.failures[0].items, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panicking_batch_is_isolated() {
        let store = MemoryGraphStore::new();
        let mut processor = SumProcessor::new();
        processor.panic_index = Some(0);
        let executor = BatchExecutor::new(ExecutionMode::Parallel { workers: 2 }, pool(&store, 2));
        let report = executor.run(Arc::new(processor), batches(6, 2)).await.unwrap();

        assert_eq!(report.results, vec![0, 7, 11]);
        assert!(report.failures[0].reason.contains("boom"));
    }

    #[tokio::test]
    async fn test_sequential_matches_parallel() {
        let store = MemoryGraphStore::new();
        let sequential = BatchExecutor::new(ExecutionMode::Sequential, pool(&store, 1))
            .run(Arc::new(SumProcessor::new()), batches(25, 4))
            .await
            .unwrap();
        let parallel = BatchExecutor::new(ExecutionMode::Parallel { workers: 5 }, pool(&store, 5))
            .run(Arc::new(SumProcessor::new()), batches(25, 4))
            .await
            .unwrap();
        assert_eq!(sequential.results, parallel.results);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fatal_error_aborts_execution() {
        let store = MemoryGraphStore::new();
        let mut processor = SumProcessor::new();
        processor.fatal_index = Some(2);
        let executor = BatchExecutor::new(ExecutionMode::Parallel { workers: 2 }, pool(&store, 2));
        let err = executor.run(Arc::new(processor), batches(40, 2)).await.unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_progress_reports_every_batch() {
        let store = MemoryGraphStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let executor = BatchExecutor::new(ExecutionMode::Parallel { workers: 2 }, pool(&store, 2))
            .with_progress(Some(Arc::new(move |p: BatchProgress| sink.lock().push(p))));
        executor.run(Arc::new(SumProcessor::new()), batches(10, 3)).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 4);
        let mut completed: Vec<usize> = seen.iter().map(|p| p.completed).collect();
        completed.sort_unstable();
        assert_eq!(completed, vec![1, 2, 3, 4]);
        assert!(seen.iter().any(|p| (p.percent() - 100.0).abs() < f64::EPSILON));
        assert_eq!(seen.iter().map(|p| p.items).sum::<usize>(), 10);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let store = MemoryGraphStore::new();
        let report = BatchExecutor::new(ExecutionMode::Parallel { workers: 4 }, pool(&store, 4))
            .run(Arc::new(SumProcessor::new()), Vec::new())
            .await
            .unwrap();
        assert!(report.results.is_empty());
        assert_eq!(store.performance().sessions_opened, 0);
    }
}
