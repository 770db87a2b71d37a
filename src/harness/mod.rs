//! Flash-attention equivalence harness
//!
//! Builds scaled-dot-product attention either as one fused
//! `flash_attn_ext` node or as the unfused `mul_mat`/`soft_max_ext` chain,
//! runs it on a backend, and either dumps the result or checks the backend
//! node by node against the CPU reference.
//!
//! # Example
//!
//! ```no_run
//! use attncheck::backend::{AccelBackend, CpuBackend};
//! use attncheck::config::HarnessConfig;
//! use attncheck::harness::{
//!     AttentionModel, Outcome, compute_allocator, compute_graph, measure_compute_buffer,
//! };
//!
//! # fn main() -> attncheck::Result<()> {
//! let config = HarnessConfig { compare: true, ..HarnessConfig::default() };
//! let mut model = AttentionModel::load(config.shape, Box::new(AccelBackend::new()))?;
//! let size = measure_compute_buffer(&model, config.graph)?;
//! let mut allocator = compute_allocator(&model, size)?;
//! let mut cpu = CpuBackend::new()?;
//! let outcome = compute_graph(&mut model, &mut cpu, &mut allocator, &config)?;
//! if let Outcome::Compared { ok, .. } = outcome {
//!     assert!(ok);
//! }
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod graph;
pub mod metric;
pub mod model;
pub mod report;

pub use crate::config::GraphMode;
pub use driver::{
    ComparisonState, Outcome, compute_allocator, compute_graph, measure_compute_buffer,
};
pub use graph::build_graph;
pub use metric::{isinf_or_max, nmse, nmse_finite};
pub use model::{AttentionInputs, AttentionModel};
pub use report::format_dump;
