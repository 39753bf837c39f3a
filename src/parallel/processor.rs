use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Extra threads on top of the core count when sizing automatically
const AUTO_EXTRA_WORKERS: usize = 4;

/// Keeps `active` accurate even when a job panics
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Fixed-size pool of worker threads awaited through oneshot channels
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
    /// Jobs currently executing on a worker thread
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("match-worker-{index}"))
            .panic_handler(|_| tracing::error!("Worker job panicked"))
            .build()
            .context("Failed to build matching worker pool")?;

        Ok(Self {
            pool,
            workers,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of worker threads
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs running right now
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Run `job` on a worker thread and suspend until it finishes
    ///
    /// Returns an error only if the job panicked.
    pub async fn run<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = tokio::sync::oneshot::channel();
        let active = self.active.clone();

        self.pool.spawn(move || {
            let result = {
                let _guard = ActiveGuard::enter(active);
                job()
            };
            // The awaiting task may have been dropped; nothing to report then
            let _ = result_tx.send(result);
        });

        result_rx
            .await
            .map_err(|_| anyhow::anyhow!("Worker job panicked before producing a result"))
    }

    /// Calculate the matching pool size
    ///
    /// # Algorithm
    /// ```text
    /// configured > 0  => min(configured, cap)
    /// configured == 0 => min(cpu_cores + 4, cap)
    /// always at least 1
    /// ```
    pub fn calculate_optimal_workers(configured: usize, cap: usize) -> usize {
        let cap = cap.max(1);
        let wanted = if configured > 0 {
            configured
        } else {
            num_cpus::get() + AUTO_EXTRA_WORKERS
        };
        wanted.clamp(1, cap)
    }
}
