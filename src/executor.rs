//! Execution resources the kernels consume: a worker pool, scratch memory,
//! a phase barrier and a capability query for reduced-precision storage.
//!
//! `Executor::reference()` runs every kernel on a single worker, which makes
//! it the sequential reference; `Executor::parallel(n)` uses a rayon pool.

use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{KernelError, Result};
use crate::jacobi::precision::StoragePrecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    Reference,
    Parallel,
}

/// Handle to a worker pool plus device capabilities.
#[derive(Clone)]
pub struct Executor {
    kind: ExecutorKind,
    pool: Arc<ThreadPool>,
    supported: Vec<StoragePrecision>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("kind", &self.kind)
            .field("workers", &self.pool.current_num_threads())
            .field("supported", &self.supported)
            .finish()
    }
}

impl Executor {
    /// Single-worker executor.
    pub fn reference() -> Result<Self> {
        Self::build(ExecutorKind::Reference, 1)
    }

    /// Parallel executor with `threads` workers (0 = one per core).
    pub fn parallel(threads: usize) -> Result<Self> {
        Self::build(ExecutorKind::Parallel, threads)
    }

    fn build(kind: ExecutorKind, threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("precond-worker-{i}"))
            .build()
            .map_err(|e| KernelError::InvalidConfig(format!("failed to build worker pool: {e}")))?;
        Ok(Self {
            kind,
            pool: Arc::new(pool),
            supported: StoragePrecision::ALL.to_vec(),
        })
    }

    /// Restrict the storage precisions this executor reports as supported.
    pub fn with_supported_precisions(mut self, supported: &[StoragePrecision]) -> Self {
        self.supported = supported.to_vec();
        self
    }

    pub fn kind(&self) -> ExecutorKind {
        self.kind
    }

    /// Number of workers that concurrently claim scheduler work.
    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Does this executor support storing values in `precision`?
    pub fn supports(&self, precision: StoragePrecision) -> bool {
        self.supported.contains(&precision)
    }

    /// Run `op` inside the worker pool.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }

    /// Zero-initialised scratch buffer owned by a single kernel call.
    pub fn alloc_scratch<T: Default + Clone>(&self, len: usize) -> Vec<T> {
        tracing::trace!(
            len,
            bytes = len * std::mem::size_of::<T>(),
            "scratch allocation"
        );
        vec![T::default(); len]
    }

    /// Phase boundary. Kernels launched through `install` have completed when
    /// it returns, so this only orders memory for callers that share buffers.
    pub fn synchronize(&self) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}
