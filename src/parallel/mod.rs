//! Bounded worker pool for CPU-bound work driven from async code
//!
//! Orchestration runs on a cooperative async scheduler; anything CPU-bound
//! (rule matching) is handed to this pool so it never blocks the scheduler.
//!
//! # Architecture Responsibilities
//!
//! ## What This Module Does:
//! - **Resource Discovery**: Detects available CPU cores using `num_cpus::get()`
//! - **Resource Calculation**: Applies the configured worker count and cap
//! - **Execution**: Runs closures on a fixed-size rayon pool and hands the result back
//!   to the awaiting task
//!
//! ## What This Module Does NOT Do:
//! - **Domain Logic**: Knows nothing about samples, rules or archives
//! - **Admission Control for Subprocesses**: Extraction is bounded separately by the batch runner
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │   Async task    │    │   WorkerPool     │    │   rayon threads │
//! │  (orchestrator) │───▶│  oneshot bridge  │───▶│  (N = workers)  │
//! │   awaits result │◀───│                  │◀───│                 │
//! └─────────────────┘    └──────────────────┘    └─────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use yara_triage::parallel::WorkerPool;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let workers = WorkerPool::calculate_optimal_workers(0, 32);
//! let pool = WorkerPool::new(workers)?;
//! let answer = pool.run(|| 6 * 7).await?;
//! assert_eq!(answer, 42);
//! # Ok(())
//! # }
//! ```

pub mod processor;

pub use processor::WorkerPool;
