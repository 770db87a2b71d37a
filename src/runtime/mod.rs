//! Minimal ggml-style tensor runtime
//!
//! Tensors are typed, byte-strided descriptors living in a [`Context`]
//! arena. Operations append nodes; [`Graph::build_forward_expand`] orders
//! them; allocators give them storage in [`BackendBuffer`]s; backends run
//! the nodes.

pub mod alloc;
pub mod buffer;
pub mod context;
pub mod flatten;
pub mod graph;
pub mod op;
pub mod ops;
pub mod tensor;

pub use alloc::{DEFAULT_ALIGNMENT, GraphAllocator, TensorAllocator};
pub use buffer::BackendBuffer;
pub use context::Context;
pub use flatten::{flatten_bytes, tensor_to_float};
pub use graph::Graph;
pub use op::Op;
pub use ops::{KQ_MASK_PAD, pad};
pub use tensor::{MAX_DIMS, TensorData, TensorId, TensorMeta};

/// Little-endian bytes of an f32 slice
pub fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Little-endian binary16 bytes of an f32 slice (round to nearest even)
pub fn f32_to_f16_bytes(values: &[f32]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|&v| half::f16::from_f32(v).to_le_bytes())
        .collect()
}
