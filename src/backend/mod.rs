//! Compute backends
//!
//! A backend owns buffers and executes graph nodes whose storage lives in
//! those buffers. Two implementations exist:
//!
//! - [`AccelBackend`]: tiled kernels and a fused online-softmax attention
//!   kernel; the primary target under test.
//! - [`CpuBackend`]: straightforward reference kernels on a dedicated
//!   thread pool.
//!
//! [`compare::compare_graph_backend`] drives the same graph through two
//! backends node by node.

pub mod accel;
pub mod compare;
pub mod cpu;
pub(crate) mod kernels;

pub use accel::AccelBackend;
pub use compare::{GraphCopy, TensorRef, compare_graph_backend, graph_copy};
pub use cpu::CpuBackend;

use crate::error::Result;
use crate::runtime::{BackendBuffer, Context, DEFAULT_ALIGNMENT, Graph, TensorId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque compute target.
///
/// All entry points block until the work is done, so `synchronize` only
/// has to drain whatever a backend chooses to queue.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn alignment(&self) -> usize {
        DEFAULT_ALIGNMENT
    }

    fn alloc_buffer(&self, size: usize) -> Result<BackendBuffer> {
        tracing::debug!(backend = self.name(), size, "allocating buffer");
        Ok(BackendBuffer::new(self.name(), size))
    }

    fn is_cpu(&self) -> bool {
        false
    }

    /// Worker count for backends that parallelise on host threads
    fn set_n_threads(&mut self, _n_threads: usize) -> Result<()> {
        Ok(())
    }

    /// Execute one node; its sources must already hold their values
    fn compute_node(&self, ctx: &Context, node: TensorId) -> Result<()>;

    fn graph_compute(&self, ctx: &Context, graph: &Graph) -> Result<()> {
        for &node in graph.nodes() {
            self.compute_node(ctx, node)?;
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}

/// Selectable primary backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Accel,
    Cpu,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Accel => f.write_str("accel"),
            BackendKind::Cpu => f.write_str("cpu"),
        }
    }
}

/// Initialise the primary backend
pub fn init_backend(kind: BackendKind) -> Result<Box<dyn Backend>> {
    let backend: Box<dyn Backend> = match kind {
        BackendKind::Accel => Box::new(AccelBackend::new()),
        BackendKind::Cpu => Box::new(CpuBackend::new()?),
    };
    tracing::info!(backend = backend.name(), "using backend");
    Ok(backend)
}
