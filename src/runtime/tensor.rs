//! Tensor metadata
//!
//! # Layout contract
//!
//! - `ne[i]` is the extent of axis `i`; axis 0 is innermost.
//! - `nb[i]` is the byte stride of axis `i`. For block types `nb[0]` is the
//!   block size in bytes and steps `block_size()` elements at once.
//! - Unused trailing axes have `ne = 1`.
//! - A view has `view_src` set and addresses the source's storage at
//!   `view_offs`; its own strides may be non-contiguous.

use super::buffer::BackendBuffer;
use super::op::Op;
use crate::format::gguf::GgmlType;

pub const MAX_DIMS: usize = 4;

/// Index of a tensor in its [`Context`](super::Context).
///
/// Ids stay valid across [`Context::fork`](super::Context::fork), which is
/// how the same node is addressed on two backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub(crate) usize);

impl TensorId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Placement of a tensor's first byte
#[derive(Debug, Clone)]
pub struct TensorData {
    pub buffer: BackendBuffer,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct TensorMeta {
    pub name: String,
    pub ty: GgmlType,
    pub ne: [usize; MAX_DIMS],
    pub nb: [usize; MAX_DIMS],
    pub op: Op,
    pub src: Vec<TensorId>,
    pub view_src: Option<TensorId>,
    pub view_offs: usize,
    pub data: Option<TensorData>,
}

impl TensorMeta {
    /// Contiguous tensor of `ty` with extents `ne`
    pub(crate) fn contiguous(ty: GgmlType, ne: [usize; MAX_DIMS]) -> Self {
        Self {
            name: String::new(),
            ty,
            ne,
            nb: contiguous_strides(ty, &ne),
            op: Op::None,
            src: Vec::new(),
            view_src: None,
            view_offs: 0,
            data: None,
        }
    }

    pub fn nelements(&self) -> usize {
        self.ne.iter().product()
    }

    /// Bytes spanned from the first to one past the last element
    pub fn nbytes(&self) -> usize {
        if self.ne.contains(&0) {
            return 0;
        }
        let blck = self.ty.block_size();
        let tail: usize = (1..MAX_DIMS).map(|i| (self.ne[i] - 1) * self.nb[i]).sum();
        if blck == 1 {
            self.ty.type_size() + (self.ne[0] - 1) * self.nb[0] + tail
        } else {
            self.ne[0] * self.nb[0] / blck + tail
        }
    }

    pub fn is_contiguous(&self) -> bool {
        self.nb == contiguous_strides(self.ty, &self.ne)
    }

    /// Axis 0 no longer has the smallest stride
    pub fn is_transposed(&self) -> bool {
        self.nb[0] > self.nb[1]
    }

    pub fn is_view(&self) -> bool {
        self.view_src.is_some()
    }
}

pub(crate) fn contiguous_strides(ty: GgmlType, ne: &[usize; MAX_DIMS]) -> [usize; MAX_DIMS] {
    let mut nb = [0usize; MAX_DIMS];
    nb[0] = ty.type_size();
    nb[1] = ty.row_size(ne[0]);
    for i in 2..MAX_DIMS {
        nb[i] = nb[i - 1] * ne[i - 1];
    }
    nb
}
