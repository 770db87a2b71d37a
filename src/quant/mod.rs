pub mod dequant;
pub mod format;
#[cfg(test)]
pub(crate) mod quantize;

pub use dequant::{dequantize_block, dequantize_row};
pub use format::QuantFormat;
