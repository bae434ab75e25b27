//! Poll loop and worker pool that resolve pending tasks

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, error, info, warn};

use crate::core::quota::{QuotaError, QuotaFetcher};
use crate::core::store::TaskStore;
use crate::core::task::{Task, TaskStatus};

/// Outcome counters for one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub loaded: usize,
    pub resolved: usize,
    pub failed: usize,
    /// Tasks left pending because the cycle deadline passed before they started.
    pub skipped: usize,
    pub write_errors: usize,
}

impl CycleReport {
    fn merge(&mut self, other: CycleReport) {
        self.resolved += other.resolved;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.write_errors += other.write_errors;
    }
}

/// Aborts workers still running when a cycle is dropped mid-flight, so a
/// cancelled cycle leaves nothing behind that can write to the store.
struct WorkerHandles(Vec<JoinHandle<CycleReport>>);

impl Drop for WorkerHandles {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

pub struct Poller {
    store: Arc<dyn TaskStore>,
    fetcher: Arc<dyn QuotaFetcher>,
    tick: Duration,
    num_workers: usize,
}

impl Poller {
    pub fn new(
        store: Arc<dyn TaskStore>,
        fetcher: Arc<dyn QuotaFetcher>,
        tick: Duration,
        num_workers: usize,
    ) -> Self {
        Self {
            store,
            fetcher,
            tick,
            num_workers: num_workers.max(1),
        }
    }

    /// Runs poll cycles back to back, sleeping `tick - elapsed` between them,
    /// until `shutdown` resolves.
    ///
    /// Shutdown during a cycle aborts its workers. Tasks they had not written
    /// back stay pending.
    pub async fn run<S>(&self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        info!(tick = ?self.tick, workers = self.num_workers, "Worker started");
        tokio::pin!(shutdown);

        loop {
            let started = Instant::now();
            tokio::select! {
                _ = self.run_cycle() => {}
                _ = &mut shutdown => break,
            }

            let remaining = self.tick.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                warn!(elapsed = ?started.elapsed(), "Poll cycle overran its tick");
            }
            tokio::select! {
                _ = sleep(remaining) => {}
                _ = &mut shutdown => break,
            }
        }
        info!("Worker stopped");
    }

    /// Loads every pending task and resolves them with `num_workers` workers.
    ///
    /// Returns once all workers have drained the handoff channel.
    pub async fn run_cycle(&self) -> CycleReport {
        let deadline = Instant::now() + self.tick;

        let tasks = match self.store.get_pending_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "Failed to load pending tasks");
                return CycleReport::default();
            }
        };

        let mut report = CycleReport {
            loaded: tasks.len(),
            ..Default::default()
        };
        if tasks.is_empty() {
            debug!("No pending tasks");
            return report;
        }
        info!(pending = tasks.len(), "Dispatching pending tasks");

        // Rendezvous channel: a send completes only when a worker takes the task.
        let (tx, rx) = flume::bounded::<Task>(0);
        let mut workers = WorkerHandles(
            (0..self.num_workers)
                .map(|worker_id| {
                    let worker = Worker {
                        id: worker_id,
                        store: Arc::clone(&self.store),
                        fetcher: Arc::clone(&self.fetcher),
                        deadline,
                    };
                    tokio::spawn(worker.run(rx.clone()))
                })
                .collect(),
        );
        drop(rx);

        for task in tasks {
            if tx.send_async(task).await.is_err() {
                error!("All workers exited before the batch was dispatched");
                break;
            }
        }
        drop(tx);

        for result in join_all(workers.0.iter_mut()).await {
            match result {
                Ok(worker_report) => report.merge(worker_report),
                Err(e) => error!(error = %e, "Worker terminated abnormally"),
            }
        }

        info!(
            loaded = report.loaded,
            resolved = report.resolved,
            failed = report.failed,
            skipped = report.skipped,
            write_errors = report.write_errors,
            "Poll cycle finished"
        );
        report
    }
}

struct Worker {
    id: usize,
    store: Arc<dyn TaskStore>,
    fetcher: Arc<dyn QuotaFetcher>,
    deadline: Instant,
}

impl Worker {
    async fn run(self, tasks: flume::Receiver<Task>) -> CycleReport {
        let mut report = CycleReport::default();
        while let Ok(task) = tasks.recv_async().await {
            if Instant::now() >= self.deadline {
                warn!(worker = self.id, task_id = task.id, "Cycle deadline passed, leaving task pending");
                report.skipped += 1;
                continue;
            }
            self.process(task, &mut report).await;
        }
        debug!(worker = self.id, "Worker drained");
        report
    }

    async fn process(&self, mut task: Task, report: &mut CycleReport) {
        info!(worker = self.id, task_id = task.id, code = %task.code, "Processing task");

        let fetched = timeout_at(self.deadline, self.fetcher.fetch_quota(&task.code))
            .await
            .unwrap_or(Err(QuotaError::DeadlineExceeded));
        match fetched {
            Ok(price) => {
                info!(task_id = task.id, price, "Fetched quota");
                task.resolve(price);
            }
            Err(e) => {
                error!(task_id = task.id, error = %e, "Fetching quota failed");
                task.fail();
            }
        }

        match self.store.update_task(&task).await {
            Ok(stored) if stored.status == TaskStatus::Success => report.resolved += 1,
            Ok(_) => report.failed += 1,
            Err(e) => {
                error!(task_id = task.id, error = %e, "Failed to store task status");
                report.write_errors += 1;
            }
        }
    }
}
