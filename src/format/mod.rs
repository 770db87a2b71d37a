pub mod gguf;

pub use gguf::{GgmlType, Gguf, GgufMetadata, GgufTensorInfo, GgufValue, GgufValueType, GgufWriter};
