//! Cell Executors
//!
//! The scheduler fans a mapped function's missing cells out through an
//! [`Executor`]: an ordered map over linear indices. Two implementations
//! ship: inline sequential execution, and a rayon thread pool.
//!
//! Cancellation is cooperative. The first failing cell flips a shared flag;
//! tasks that have not started yet observe it and return without running the
//! user function, queued results drain, and the first error in index order
//! propagates. No new work is submitted after an error.

use crate::errors::{Result, RunError};
use crate::value::Value;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The per-cell outputs of one task, in output-name order.
pub type CellOutputs = Vec<Value>;

/// A task evaluated at one linear cell index.
pub type CellTask<'a> = dyn Fn(usize) -> Result<CellOutputs> + Send + Sync + 'a;

/// Minimal executor contract: an ordered map over cell indices.
pub trait Executor: Send + Sync {
    /// Apply `task` to every index, returning outputs in input order.
    ///
    /// After the first error, no further tasks run; the error returned is
    /// the earliest failing index's.
    fn map_indices(&self, indices: &[usize], task: &CellTask<'_>) -> Result<Vec<CellOutputs>>;
}

/// Shared cancellation flag checked by queued cell tasks.
#[derive(Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Runs every cell inline on the driver thread.
#[derive(Default)]
pub struct SequentialExecutor;

impl Executor for SequentialExecutor {
    fn map_indices(&self, indices: &[usize], task: &CellTask<'_>) -> Result<Vec<CellOutputs>> {
        let mut outputs = Vec::with_capacity(indices.len());
        for &index in indices {
            outputs.push(task(index)?);
        }
        Ok(outputs)
    }
}

/// Fans cells out over a rayon pool.
pub struct ThreadPoolExecutor {
    pool: rayon::ThreadPool,
}

impl ThreadPoolExecutor {
    /// Build a pool with `num_threads` workers; `0` means one per CPU core.
    pub fn new(num_threads: usize) -> Result<Self> {
        let threads = if num_threads == 0 {
            num_cpus::get()
        } else {
            num_threads
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| RunError::Executor(e.to_string()))?;
        Ok(ThreadPoolExecutor { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Executor for ThreadPoolExecutor {
    fn map_indices(&self, indices: &[usize], task: &CellTask<'_>) -> Result<Vec<CellOutputs>> {
        let cancel = CancelFlag::new();

        let results: Vec<Option<Result<CellOutputs>>> = self.pool.install(|| {
            indices
                .par_iter()
                .map(|&index| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let result = task(index);
                    if result.is_err() {
                        cancel.cancel();
                    }
                    Some(result)
                })
                .collect()
        });

        let mut outputs = Vec::with_capacity(indices.len());
        let mut first_error: Option<RunError> = None;
        for result in results {
            match result {
                Some(Ok(cell)) => outputs.push(cell),
                // Keep the earliest failing index's error.
                Some(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                // Skipped by cancellation; an error exists elsewhere.
                None => {}
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }
}
