//! # attncheck
//!
//! **Numerical equivalence checks for fused attention kernels and vocabulary tokenizers.**
//!
//! attncheck carries a small ggml-style tensor runtime (typed, byte-strided
//! tensors, views, a topologically sorted graph, a measuring allocator) and
//! two backends that execute it: a tiled accelerated backend with a fused
//! online-softmax attention kernel, and a reference CPU backend. On top of
//! that sit two checkers.
//!
//! ## Layout
//!
//! ```text
//! ┌───────────────────────────────┬────────────────────────────────┐
//! │ harness (attn-check)          │ tokenizer (tok-check)          │
//! │ fused vs naive, accel vs CPU  │ SPM / BPE round-trip, BMP probe│
//! ├───────────────────────────────┼────────────────────────────────┤
//! │ backend: Accel, CPU, compare  │ format::gguf: reader, writer   │
//! ├───────────────────────────────┤                                │
//! │ runtime: tensors, graph, alloc│                                │
//! └───────────────────────────────┴────────────────────────────────┘
//! ```
//!
//! ## Design
//!
//! - **Graph first**: ops only record shapes; backends run nodes in order
//! - **Views share storage**: transpose/permute re-stride their source
//! - **Flattener**: every comparison reads tensors in logical element order
//! - **Measure, then allocate**: one compute buffer sized by a dry run

pub mod backend;
pub mod config;
pub mod error;
pub mod format;
pub mod harness;
pub mod quant;
pub mod runtime;
pub mod tokenizer;

pub use backend::{AccelBackend, Backend, BackendKind, CpuBackend, compare_graph_backend};
pub use config::{AttentionShape, GraphMode, HarnessConfig};
pub use error::{Error, Result};
pub use format::{GgmlType, Gguf, GgufWriter};
pub use quant::QuantFormat;
pub use runtime::{Context, Graph, GraphAllocator, TensorId, tensor_to_float};
pub use tokenizer::{Vocab, VocabTokenizer, VocabType, check_roundtrip};
