//! GGUF container: memory-mapped header reader, metadata values and a
//! metadata-only writer for vocabulary files.

pub mod metadata;
pub mod reader;
pub mod types;
pub mod value;
pub mod writer;

pub use metadata::GgufMetadata;
pub use reader::Gguf;
pub use types::{GgmlType, GgufValueType};
pub use value::GgufValue;
pub use writer::GgufWriter;

/// Tensor info entry from a GGUF file
#[derive(Debug, Clone)]
pub struct GgufTensorInfo {
    pub name: String,
    pub n_dims: u32,
    pub shape: Vec<usize>,
    pub ggml_type: GgmlType,
    /// Offset relative to the aligned data section
    pub offset: u64,
}
