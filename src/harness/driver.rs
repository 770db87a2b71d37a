//! Measure, allocate and run the attention graph
//!
//! The compute buffer is sized once by a measuring pass; every later graph
//! is placed by one real [`GraphAllocator`] over that buffer, reset between
//! runs so offsets are identical from run to run.

use super::graph::build_graph;
use super::metric::{isinf_or_max, nmse_finite};
use super::model::AttentionModel;
use crate::backend::{Backend, TensorRef, compare_graph_backend};
use crate::config::{GraphMode, HarnessConfig};
use crate::error::{Error, Result};
use crate::runtime::{Context, GraphAllocator, Op, TensorId};

/// Peak bytes the graph for `mode` needs beyond the model inputs
pub fn measure_compute_buffer(model: &AttentionModel, mode: GraphMode) -> Result<usize> {
    let (mut ctx, graph) = build_graph(model, mode)?;
    let mut measure = GraphAllocator::new_measure(model.backend.alignment());
    measure.alloc_graph(&mut ctx, &graph)
}

/// Allocate the compute buffer on the model's backend and wrap it in an allocator
pub fn compute_allocator(model: &AttentionModel, size: usize) -> Result<GraphAllocator> {
    let buffer = model.backend.alloc_buffer(size)?;
    tracing::info!(
        backend = model.backend.name(),
        mb = size as f64 / (1024.0 * 1024.0),
        "allocated compute buffer"
    );
    Ok(GraphAllocator::from_buffer(buffer, model.backend.alignment()))
}

/// What one run of [`compute_graph`] produced
pub enum Outcome {
    /// Single-backend result, readable through `ctx`
    Computed { ctx: Context, result: TensorId },
    /// Backend comparison verdict and the recorded failures in traversal order
    Compared { ok: bool, failures: Vec<String> },
}

/// Shared state of the comparison callback.
///
/// `ok` only ever goes from `true` to `false`. A tensor that cannot be read
/// back is stored in `fatal` and stops the traversal.
#[derive(Debug)]
pub struct ComparisonState {
    pub ok: bool,
    pub max_err: f64,
    pub backend1: String,
    pub backend2: String,
    pub failures: Vec<String>,
    pub fatal: Option<Error>,
}

impl ComparisonState {
    pub fn new(max_err: f64, backend1: &str, backend2: &str) -> Self {
        Self {
            ok: true,
            max_err,
            backend1: backend1.to_string(),
            backend2: backend2.to_string(),
            failures: Vec::new(),
            fatal: None,
        }
    }

    fn fail(&mut self, msg: String) {
        tracing::debug!(failure = %msg, "backend mismatch");
        self.failures.push(msg);
        self.ok = false;
    }

    /// Check one pair of corresponding tensors; `false` stops the traversal
    pub fn check(&mut self, t1: TensorRef<'_>, t2: TensorRef<'_>) -> bool {
        match self.check_pair(t1, t2) {
            Ok(()) => true,
            Err(e) => {
                self.ok = false;
                self.fatal = Some(e);
                false
            }
        }
    }

    fn check_pair(&mut self, t1: TensorRef<'_>, t2: TensorRef<'_>) -> Result<()> {
        let meta = t1.meta();
        if meta.op == Op::None && t1.bytes()? != t2.bytes()? {
            self.fail(format!("sentinel mismatch: {}", meta.name));
            return Ok(());
        }

        let f1 = t1.to_f32()?;
        let f2 = t2.to_f32()?;
        let desc = meta.op.name();
        let (bn1, bn2) = (self.backend1.clone(), self.backend2.clone());

        for (i, (&a, &b)) in f1.iter().zip(&f2).enumerate() {
            if a.is_nan() || b.is_nan() {
                self.fail(format!("[{desc}] NaN at index {i} ({bn1}={a:.6} {bn2}={b:.6})"));
                return Ok(());
            }
            match (isinf_or_max(a), isinf_or_max(b)) {
                (true, true) if a.is_sign_negative() != b.is_sign_negative() => {
                    self.fail(format!("[{desc}] inf sign mismatch: {bn1}={a:.6} {bn2}={b:.6}"));
                    return Ok(());
                }
                (true, false) | (false, true) => {
                    self.fail(format!("[{desc}] inf mismatch: {bn1}={a:.6} {bn2}={b:.6}"));
                    return Ok(());
                }
                _ => {}
            }
        }

        let err = nmse_finite(&f1, &f2);
        if err > self.max_err {
            self.fail(format!("[{desc}] NMSE = {err:.9} > {:.9}", self.max_err));
        }
        Ok(())
    }
}

/// Place and run the attention graph.
///
/// The allocator is reset first. CPU backends get `config.n_threads`
/// workers. Without `config.compare` the graph runs on the model's
/// backend; with it, the model's backend is checked node by node against
/// `reference`.
pub fn compute_graph(
    model: &mut AttentionModel,
    reference: &mut dyn Backend,
    allocator: &mut GraphAllocator,
    config: &HarnessConfig,
) -> Result<Outcome> {
    allocator.reset();
    let (mut ctx, graph) = build_graph(model, config.graph)?;
    allocator.alloc_graph(&mut ctx, &graph)?;

    if model.backend.is_cpu() {
        model.backend.set_n_threads(config.n_threads)?;
    }
    if reference.is_cpu() {
        reference.set_n_threads(config.n_threads)?;
    }

    if !config.compare {
        model.backend.graph_compute(&ctx, &graph)?;
        model.backend.synchronize()?;
        let result = graph
            .result()
            .ok_or_else(|| Error::graph("graph has no nodes"))?;
        return Ok(Outcome::Computed { ctx, result });
    }

    let backend = model.backend.as_ref();
    let mut state = ComparisonState::new(config.max_err, backend.name(), reference.name());
    let completed = compare_graph_backend(backend, &*reference, &ctx, &graph, |_, t1, t2| {
        state.check(t1, t2)
    })?;
    if let Some(e) = state.fatal {
        return Err(e);
    }
    Ok(Outcome::Compared {
        ok: state.ok && completed,
        failures: state.failures,
    })
}
