//! Simple block-quantization formats (GGUF-compatible)
//!
//! Every format here packs 32 consecutive elements of a row into one
//! fixed-size, little-endian block with no padding between blocks.

use crate::error::{Error, Result};
use std::fmt;

/// Block formats with a CPU dequantizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantFormat {
    /// 4-bit, f16 scale. 18 bytes/block
    Q4_0,
    /// 4-bit, f16 scale and min. 20 bytes/block
    Q4_1,
    /// 5-bit, f16 scale, 32 high bits. 22 bytes/block
    Q5_0,
    /// 5-bit, f16 scale and min, 32 high bits. 24 bytes/block
    Q5_1,
    /// 8-bit, f16 scale. 34 bytes/block
    Q8_0,
    /// 8-bit, f16 scale and f16 sum. 36 bytes/block
    Q8_1,
}

impl QuantFormat {
    /// Logical elements per block
    pub const fn block_size(self) -> usize {
        32
    }

    /// Exact bytes per block
    pub const fn block_bytes(self) -> usize {
        match self {
            Self::Q4_0 => 18,
            Self::Q4_1 => 20,
            Self::Q5_0 => 22,
            Self::Q5_1 => 24,
            Self::Q8_0 => 34,
            Self::Q8_1 => 36,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Q4_0 => "Q4_0",
            Self::Q4_1 => "Q4_1",
            Self::Q5_0 => "Q5_0",
            Self::Q5_1 => "Q5_1",
            Self::Q8_0 => "Q8_0",
            Self::Q8_1 => "Q8_1",
        }
    }

    /// Storage bytes for `numel` elements. `numel` must be a whole number of blocks.
    pub fn storage_bytes(self, numel: usize) -> Result<usize> {
        if numel % self.block_size() != 0 {
            return Err(Error::InvalidArgument {
                arg: "numel",
                reason: format!(
                    "{numel} is not a multiple of the {} block size {}",
                    self.name(),
                    self.block_size()
                ),
            });
        }
        Ok(numel / self.block_size() * self.block_bytes())
    }
}

impl fmt::Display for QuantFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
