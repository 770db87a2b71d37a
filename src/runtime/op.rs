//! Graph operation tags

/// Operation that produces a tensor. `None` marks leafs: inputs and constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    None,
    /// Contiguous copy, element type preserved
    Cont,
    /// Swap axes 0 and 1 (view)
    Transpose,
    /// Axis `i` of the source becomes axis `axes[i]` of the result (view)
    Permute([usize; 4]),
    /// `r[i0,i1] = Σ_k a[k,i0] · b[k,i1]`, broadcast over axes 2 and 3
    MulMat,
    /// Row softmax of `x · scale + mask`
    SoftMax { scale: f32 },
    /// Fused `softmax(q·kᵀ · scale + mask) · v`
    FlashAttnExt { scale: f32 },
}

impl Op {
    /// Upper-case descriptor used in diagnostics
    pub const fn name(&self) -> &'static str {
        match self {
            Op::None => "NONE",
            Op::Cont => "CONT",
            Op::Transpose => "TRANSPOSE",
            Op::Permute(_) => "PERMUTE",
            Op::MulMat => "MUL_MAT",
            Op::SoftMax { .. } => "SOFT_MAX",
            Op::FlashAttnExt { .. } => "FLASH_ATTN_EXT",
        }
    }

    /// Views share their source's storage and compute nothing
    pub const fn is_view(&self) -> bool {
        matches!(self, Op::Transpose | Op::Permute(_))
    }

    pub const fn is_leaf(&self) -> bool {
        matches!(self, Op::None)
    }
}
