//! Reference CPU backend

mod kernels;

use super::Backend;
use super::kernels::run_node;
use crate::error::{Error, Result};
use crate::runtime::{Context, TensorId};
use kernels::RefKernels;
use rayon::{ThreadPool, ThreadPoolBuilder};

pub const DEFAULT_N_THREADS: usize = 4;

const NAME: &str = "CPU";

/// Reference backend running on its own rayon pool
pub struct CpuBackend {
    pool: ThreadPool,
    n_threads: usize,
}

fn build_pool(n_threads: usize) -> Result<ThreadPool> {
    if n_threads == 0 {
        return Err(Error::InvalidArgument {
            arg: "n_threads",
            reason: "must be at least 1".into(),
        });
    }
    ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("cpu-backend-{i}"))
        .build()
        .map_err(|e| Error::backend(NAME, format!("cannot start thread pool: {e}")))
}

impl CpuBackend {
    pub fn new() -> Result<Self> {
        Self::with_threads(DEFAULT_N_THREADS)
    }

    pub fn with_threads(n_threads: usize) -> Result<Self> {
        Ok(Self {
            pool: build_pool(n_threads)?,
            n_threads,
        })
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_cpu(&self) -> bool {
        true
    }

    fn set_n_threads(&mut self, n_threads: usize) -> Result<()> {
        if n_threads != self.n_threads {
            self.pool = build_pool(n_threads)?;
            self.n_threads = n_threads;
            tracing::debug!(n_threads, "resized CPU backend pool");
        }
        Ok(())
    }

    fn compute_node(&self, ctx: &Context, node: TensorId) -> Result<()> {
        self.pool.install(|| run_node(&RefKernels, NAME, ctx, node))
    }
}
