use rayon::prelude::*;

use crate::blocks::LinearizedBlocks;
use crate::error::FactorError;

/// Minimum indices per rayon work unit; per-point cost is uneven (the
/// nearest-neighbor search depth varies), so chunks stay small to
/// load-balance.
const MIN_CHUNK: usize = 8;

/// A fixed-size worker pool for per-point passes over a source cloud.
///
/// With one worker everything runs on the calling thread; with more, work is
/// dispatched to an owned rayon pool built once at construction. Each worker
/// folds into its own accumulator and the partials are merged with an
/// associative operation, so results do not depend on the worker count
/// beyond floating point summation order.
pub struct WorkerPool {
    pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    /// Build a pool with `num_threads` workers.
    pub fn new(num_threads: usize) -> Result<Self, FactorError> {
        if num_threads == 0 {
            return Err(FactorError::InvalidThreadCount);
        }
        let pool = if num_threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()
                .map_err(|e| FactorError::ThreadPool(e.to_string()))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self { pool })
    }

    /// Order-preserving map over `0..len`.
    pub fn map_collect<T, F>(&self, len: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        match &self.pool {
            None => (0..len).map(f).collect(),
            Some(pool) => pool.install(|| {
                (0..len)
                    .into_par_iter()
                    .with_min_len(MIN_CHUNK)
                    .map(f)
                    .collect()
            }),
        }
    }

    /// Fold every index of `0..len` into a worker-local accumulator, then
    /// merge the partials.
    pub fn map_reduce<A, I, F, M>(&self, len: usize, identity: I, fold: F, merge: M) -> A
    where
        A: Send,
        I: Fn() -> A + Sync + Send,
        F: Fn(A, usize) -> A + Sync + Send,
        M: Fn(A, A) -> A + Sync + Send,
    {
        match &self.pool {
            None => (0..len).fold(identity(), fold),
            Some(pool) => pool.install(|| {
                (0..len)
                    .into_par_iter()
                    .with_min_len(MIN_CHUNK)
                    .fold(&identity, &fold)
                    .reduce(&identity, &merge)
            }),
        }
    }
}

/// Per-worker partial sums of one evaluation pass.
///
/// The cost sum is carried alongside the derivative blocks so the scalar
/// total is accumulated through the same fold whether or not derivatives
/// were requested.
pub(crate) struct EvalSums {
    pub cost: f64,
    pub blocks: LinearizedBlocks,
}

impl EvalSums {
    pub fn zeros() -> Self {
        Self {
            cost: 0.0,
            blocks: LinearizedBlocks::zeros(),
        }
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.cost += other.cost;
        self.blocks.add_assign(&other.blocks);
        self
    }
}
