//! Bounded-concurrency batch execution.
//!
//! A fixed pool of workers drains a priority-sorted queue. Each attempt runs
//! on its own tokio task under a timeout; failures and timeouts are retried
//! with a fixed delay, then recorded as permanent failures. A timed-out
//! attempt is not cancelled: its task keeps running detached and its outcome
//! is ignored.

pub mod health;

pub use health::HealthReport;

use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    fmt::Display,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, mpsc},
    time::{Instant, sleep, timeout},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub concurrency: usize,
    pub task_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub min_free_memory_bytes: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            task_timeout: Duration::from_secs(120),
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
            min_free_memory_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchTask<P> {
    pub id: String,
    pub payload: P,
    pub priority: i32,
    /// Per-task retry budget, capped by the controller's `max_retries`.
    pub retries: Option<u32>,
}

impl<P> BatchTask<P> {
    pub fn new(id: impl Into<String>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
            priority: 0,
            retries: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<O> {
    pub task_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<O>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub retries_used: u32,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retries: u32,
    pub elapsed_ms: u64,
    pub average_task_ms: f64,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport<O> {
    /// In completion order.
    pub results: Vec<BatchResult<O>>,
    pub stats: BatchStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

type ProgressHook = Box<dyn Fn(&BatchProgress) + Send + Sync>;
type CompletionHook<O> = Box<dyn Fn(&BatchResult<O>) + Send + Sync>;

/// Callbacks invoked from the batch's own future as each result arrives.
pub struct BatchHooks<O> {
    on_progress: Option<ProgressHook>,
    on_task_complete: Option<CompletionHook<O>>,
}

impl<O> Default for BatchHooks<O> {
    fn default() -> Self {
        Self {
            on_progress: None,
            on_task_complete: None,
        }
    }
}

impl<O> BatchHooks<O> {
    pub fn on_progress(mut self, hook: impl Fn(&BatchProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(hook));
        self
    }

    pub fn on_task_complete(
        mut self,
        hook: impl Fn(&BatchResult<O>) + Send + Sync + 'static,
    ) -> Self {
        self.on_task_complete = Some(Box::new(hook));
        self
    }
}

pub struct BatchController {
    config: BatchConfig,
    concurrency: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    active_batches: Arc<AtomicUsize>,
    memory_probe: fn() -> Option<u64>,
}

/// Holds one unit of a shared counter; released on drop, including when the
/// owning future is dropped mid-batch.
struct CounterGuard(Arc<AtomicUsize>);

impl CounterGuard {
    fn hold(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BatchController {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            concurrency: AtomicUsize::new(config.concurrency.max(1)),
            config,
            in_flight: Arc::new(AtomicUsize::new(0)),
            active_batches: Arc::new(AtomicUsize::new(0)),
            memory_probe: health::available_memory_bytes,
        }
    }

    pub fn with_memory_probe(mut self, probe: fn() -> Option<u64>) -> Self {
        self.memory_probe = probe;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::SeqCst)
    }

    /// Takes effect for the next batch; a running batch keeps the worker
    /// count it started with.
    pub fn set_concurrency(&self, limit: usize) {
        self.concurrency.store(limit.max(1), Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn active_batches(&self) -> usize {
        self.active_batches.load(Ordering::SeqCst)
    }

    pub fn health(&self) -> HealthReport {
        HealthReport::probe(
            (self.memory_probe)(),
            self.config.min_free_memory_bytes,
            self.concurrency(),
            self.in_flight(),
            self.active_batches(),
        )
    }

    pub async fn process_batch<P, O, E, F, Fut>(
        &self,
        tasks: Vec<BatchTask<P>>,
        executor: F,
        hooks: &BatchHooks<O>,
    ) -> BatchReport<O>
    where
        P: Clone + Send + 'static,
        O: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
    {
        self.process_batch_limited(tasks, None, executor, hooks).await
    }

    /// Like [`process_batch`](Self::process_batch) with a per-batch worker
    /// limit. The limit can only lower the controller's concurrency, never
    /// raise it, and does not outlive the batch.
    pub async fn process_batch_limited<P, O, E, F, Fut>(
        &self,
        tasks: Vec<BatchTask<P>>,
        limit: Option<usize>,
        executor: F,
        hooks: &BatchHooks<O>,
    ) -> BatchReport<O>
    where
        P: Clone + Send + 'static,
        O: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
    {
        let started = Instant::now();
        let total = tasks.len();
        let ceiling = self.concurrency();
        let workers = limit.unwrap_or(ceiling).min(ceiling).min(total).max(1);
        let _active = CounterGuard::hold(&self.active_batches);
        info!(target = "arbitrage.batch", total, workers, "batch started");

        let mut tasks = tasks;
        // Stable: equal priorities keep submission order in the queue.
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
        let task_ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let executor = Arc::new(executor);
        let (tx, mut rx) = mpsc::channel::<BatchResult<O>>(workers);

        for _ in 0..workers {
            let queue = queue.clone();
            let executor = executor.clone();
            let tx = tx.clone();
            let in_flight = self.in_flight.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some(task) = next else { break };
                    let result = {
                        let _slot = CounterGuard::hold(&in_flight);
                        run_task(task, executor.clone(), &config).await
                    };
                    if tx.send(result).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(total);
        let mut progress = BatchProgress {
            completed: 0,
            total,
            succeeded: 0,
            failed: 0,
        };
        while let Some(result) = rx.recv().await {
            progress.completed += 1;
            if result.success {
                progress.succeeded += 1;
            } else {
                progress.failed += 1;
            }
            if let Some(hook) = &hooks.on_task_complete {
                hook(&result);
            }
            if let Some(hook) = &hooks.on_progress {
                hook(&progress);
            }
            results.push(result);
        }

        // A task without a result never finished; record it instead of
        // letting it vanish from the report.
        for id in undelivered(task_ids, &results) {
            warn!(target = "arbitrage.batch", task_id = %id, "task lost without a result");
            results.push(BatchResult {
                task_id: id,
                success: false,
                output: None,
                error: Some("worker stopped before the task completed".into()),
                execution_time_ms: 0,
                retries_used: 0,
                timed_out: false,
            });
        }

        let stats = summarize(&results, total, started.elapsed(), workers);
        info!(
            target = "arbitrage.batch",
            total = stats.total,
            succeeded = stats.succeeded,
            failed = stats.failed,
            retries = stats.retries,
            elapsed_ms = stats.elapsed_ms,
            "batch finished"
        );
        BatchReport { results, stats }
    }
}

async fn run_task<P, O, E, F, Fut>(task: BatchTask<P>, executor: Arc<F>, config: &BatchConfig) -> BatchResult<O>
where
    P: Clone + Send + 'static,
    O: Send + 'static,
    E: Display + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, E>> + Send + 'static,
{
    let started = Instant::now();
    let budget = task.retries.unwrap_or(config.max_retries).min(config.max_retries);
    let mut retries_used = 0;

    loop {
        // The executor itself is called inside the spawned task so a panic
        // while building the future is caught like any other panic.
        let executor = executor.clone();
        let payload = task.payload.clone();
        let attempt = tokio::spawn(async move { (*executor)(payload).await });
        let (error, timed_out) = match timeout(config.task_timeout, attempt).await {
            Ok(Ok(Ok(output))) => {
                debug!(target = "arbitrage.batch", task_id = %task.id, retries_used, "task succeeded");
                return BatchResult {
                    task_id: task.id,
                    success: true,
                    output: Some(output),
                    error: None,
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    retries_used,
                    timed_out: false,
                };
            }
            Ok(Ok(Err(err))) => (err.to_string(), false),
            Ok(Err(join)) => (format!("task aborted: {join}"), false),
            Err(_) => (
                format!("timed out after {}ms", config.task_timeout.as_millis()),
                true,
            ),
        };

        warn!(
            target = "arbitrage.batch",
            task_id = %task.id,
            attempt = retries_used + 1,
            timed_out,
            error = %error,
            "task attempt failed"
        );
        if retries_used >= budget {
            return BatchResult {
                task_id: task.id,
                success: false,
                output: None,
                error: Some(error),
                execution_time_ms: started.elapsed().as_millis() as u64,
                retries_used,
                timed_out,
            };
        }
        retries_used += 1;
        sleep(config.retry_delay).await;
    }
}

fn undelivered<O>(task_ids: Vec<String>, results: &[BatchResult<O>]) -> Vec<String> {
    let mut delivered: HashMap<&str, usize> = HashMap::new();
    for result in results {
        *delivered.entry(result.task_id.as_str()).or_default() += 1;
    }
    task_ids
        .into_iter()
        .filter(|id| match delivered.get_mut(id.as_str()) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        })
        .collect()
}

fn summarize<O>(results: &[BatchResult<O>], total: usize, elapsed: Duration, concurrency: usize) -> BatchStats {
    let succeeded = results.iter().filter(|r| r.success).count();
    let task_ms: u64 = results.iter().map(|r| r.execution_time_ms).sum();
    BatchStats {
        total,
        succeeded,
        failed: total.saturating_sub(succeeded),
        retries: results.iter().map(|r| r.retries_used).sum(),
        elapsed_ms: elapsed.as_millis() as u64,
        average_task_ms: if results.is_empty() {
            0.0
        } else {
            task_ms as f64 / results.len() as f64
        },
        concurrency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex as StdMutex, atomic::AtomicU32};

    fn fast_config() -> BatchConfig {
        BatchConfig {
            concurrency: 2,
            task_timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_delay: Duration::from_millis(100),
            min_free_memory_bytes: 0,
        }
    }

    fn tasks(n: usize) -> Vec<BatchTask<usize>> {
        (0..n).map(|i| BatchTask::new(format!("t{i}"), i)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_task_is_isolated() {
        for bad in [0usize, 3, 7] {
            let controller = BatchController::new(fast_config());
            let mut input = tasks(8);
            input[bad].priority = 10;
            let report = controller
                .process_batch(
                    input,
                    move |i: usize| async move {
                        if i == bad { Err(format!("task {i} broke")) } else { Ok(i * 2) }
                    },
                    &BatchHooks::default(),
                )
                .await;
            assert_eq!(report.stats.total, 8);
            assert_eq!(report.stats.succeeded, 7);
            assert_eq!(report.stats.failed, 1);
            let failed: Vec<_> = report.results.iter().filter(|r| !r.success).collect();
            assert_eq!(failed[0].task_id, format!("t{bad}"));
            assert_eq!(failed[0].retries_used, 2);
            assert_eq!(report.stats.retries, 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let controller = BatchController::new(fast_config());
        let report = controller
            .process_batch(
                tasks(1),
                move |_| {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) < 1 {
                            Err("flaky")
                        } else {
                            Ok("done")
                        }
                    }
                },
                &BatchHooks::default(),
            )
            .await;
        assert!(report.results[0].success);
        assert_eq!(report.results[0].retries_used, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn per_task_retries_are_capped() {
        let controller = BatchController::new(fast_config());
        let input = vec![
            BatchTask::new("none", 0).with_retries(0),
            BatchTask::new("many", 1).with_retries(9),
        ];
        let report = controller
            .process_batch(input, |_| async { Err::<(), _>("always") }, &BatchHooks::default())
            .await;
        let by_id = |id: &str| report.results.iter().find(|r| r.task_id == id).unwrap().retries_used;
        assert_eq!(by_id("none"), 0);
        assert_eq!(by_id("many"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failed_attempt() {
        let config = BatchConfig {
            max_retries: 1,
            task_timeout: Duration::from_secs(1),
            ..fast_config()
        };
        let controller = BatchController::new(config);
        let report = controller
            .process_batch(
                tasks(1),
                |_| async {
                    sleep(Duration::from_secs(60)).await;
                    Ok::<_, String>(())
                },
                &BatchHooks::default(),
            )
            .await;
        let result = &report.results[0];
        assert!(!result.success);
        assert!(result.timed_out);
        assert_eq!(result.retries_used, 1);
        assert!(result.error.as_deref().unwrap_or_default().starts_with("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn panics_are_recorded_not_propagated() {
        let controller = BatchController::new(BatchConfig {
            max_retries: 0,
            ..fast_config()
        });
        let report = controller
            .process_batch(
                tasks(3),
                |i: usize| async move {
                    if i == 1 {
                        panic!("executor bug");
                    }
                    Ok::<_, String>(i)
                },
                &BatchHooks::default(),
            )
            .await;
        assert_eq!(report.stats.succeeded, 2);
        assert_eq!(report.stats.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn executor_panicking_before_its_future_loses_no_tasks() {
        let controller = BatchController::new(BatchConfig {
            max_retries: 0,
            ..fast_config()
        });
        controller.set_concurrency(1);
        let report = controller
            .process_batch(
                tasks(4),
                |i: usize| {
                    if i == 1 {
                        panic!("bad payload");
                    }
                    async move { Ok::<_, String>(i) }
                },
                &BatchHooks::default(),
            )
            .await;
        assert_eq!(report.results.len(), 4);
        assert_eq!(report.stats.total, 4);
        assert_eq!(report.stats.succeeded, 3);
        assert_eq!(report.stats.failed, 1);
        let failed = report.results.iter().find(|r| !r.success).unwrap();
        assert_eq!(failed.task_id, "t1");
        assert!(failed.error.as_deref().unwrap_or_default().starts_with("task aborted"));
        assert_eq!(controller.in_flight(), 0);
        assert_eq!(controller.active_batches(), 0);
    }

    #[test]
    fn undelivered_counts_duplicate_ids() {
        let done = |id: &str| BatchResult::<()> {
            task_id: id.into(),
            success: true,
            output: None,
            error: None,
            execution_time_ms: 1,
            retries_used: 0,
            timed_out: false,
        };
        let ids = vec!["a".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(undelivered(ids, &[done("a"), done("b")]), vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_batch_releases_its_counters() {
        let controller = BatchController::new(fast_config());
        let hooks = BatchHooks::default();
        let batch = controller.process_batch(
            tasks(2),
            |_| async {
                sleep(Duration::from_secs(60)).await;
                Ok::<_, String>(())
            },
            &hooks,
        );
        let _ = timeout(Duration::from_secs(1), batch).await;
        assert_eq!(controller.active_batches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_limit_only_lowers_concurrency() {
        let controller = BatchController::new(fast_config());
        let hooks = BatchHooks::default();
        let run = |limit: Option<usize>| {
            controller.process_batch_limited(tasks(6), limit, |i: usize| async move { Ok::<_, String>(i) }, &hooks)
        };
        assert_eq!(run(Some(50)).await.stats.concurrency, 2);
        assert_eq!(run(Some(1)).await.stats.concurrency, 1);
        assert_eq!(run(None).await.stats.concurrency, 2);
        assert_eq!(controller.concurrency(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let controller = BatchController::new(fast_config());
        let (r, p) = (running.clone(), peak.clone());
        let report = controller
            .process_batch(
                tasks(6),
                move |_| {
                    let (running, peak) = (r.clone(), p.clone());
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(50)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(())
                    }
                },
                &BatchHooks::default(),
            )
            .await;
        assert_eq!(report.stats.succeeded, 6);
        assert_eq!(report.stats.concurrency, 2);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(controller.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_worker_dispatches_by_priority() {
        let controller = BatchController::new(fast_config());
        controller.set_concurrency(1);
        let input = vec![
            BatchTask::new("low", 0).with_priority(1),
            BatchTask::new("high", 1).with_priority(9),
            BatchTask::new("mid", 2).with_priority(5),
        ];
        let report = controller
            .process_batch(input, |i: usize| async move { Ok::<_, String>(i) }, &BatchHooks::default())
            .await;
        let order: Vec<_> = report.results.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(order, vec!["high", "mid", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn hooks_fire_for_every_task() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let last = Arc::new(StdMutex::new(None));
        let (seen_hook, last_hook) = (seen.clone(), last.clone());
        let hooks = BatchHooks::default()
            .on_task_complete(move |r: &BatchResult<usize>| {
                seen_hook.lock().unwrap().push(r.task_id.clone());
            })
            .on_progress(move |p| {
                *last_hook.lock().unwrap() = Some(*p);
            });
        let controller = BatchController::new(fast_config());
        controller
            .process_batch(tasks(4), |i: usize| async move { Ok::<_, String>(i) }, &hooks)
            .await;
        assert_eq!(seen.lock().unwrap().len(), 4);
        let progress = last.lock().unwrap().unwrap();
        assert_eq!((progress.completed, progress.total, progress.succeeded), (4, 4, 4));
    }

    #[tokio::test]
    async fn empty_batch_reports_zeroes() {
        let controller = BatchController::new(fast_config());
        let report = controller
            .process_batch(Vec::<BatchTask<()>>::new(), |_| async { Ok::<_, String>(()) }, &BatchHooks::default())
            .await;
        assert!(report.results.is_empty());
        assert_eq!(report.stats.total, 0);
        assert_eq!(report.stats.average_task_ms, 0.0);
    }
}
