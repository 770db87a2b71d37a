//! Node dispatch shared by the backends
//!
//! Sources are gathered into logical-order f32 through the flattener, the
//! backend's kernel set computes a contiguous f32 result, and the result is
//! written to the node's storage. `CONT` copies raw elements and is the
//! same everywhere.

use crate::error::{Error, Result};
use crate::format::gguf::GgmlType;
use crate::runtime::flatten::gather_elements;
use crate::runtime::{Context, Op, TensorId, f32_to_bytes, tensor_to_float};

/// `a: [k, m, a2, a3]`, `b: [k, n, ne2, ne3]`, result `[m, n, ne2, ne3]`
#[derive(Debug, Clone, Copy)]
pub(crate) struct MatMulDims {
    pub k: usize,
    pub m: usize,
    pub n: usize,
    pub a2: usize,
    pub a3: usize,
    pub ne2: usize,
    pub ne3: usize,
    /// `b` goes through binary16 first, as for an F16 `a`
    pub round_b_f16: bool,
}

impl MatMulDims {
    /// Start of the `a` matrix broadcast to batch `(i2, i3)`
    #[inline]
    pub fn a_offset(&self, i2: usize, i3: usize) -> usize {
        let (r2, r3) = (self.ne2 / self.a2, self.ne3 / self.a3);
        (i2 / r2 + self.a2 * (i3 / r3)) * self.m * self.k
    }
}

/// Softmax over rows of `ne[0]`; row `(i1, i2, i3)` adds mask row `i1`
#[derive(Debug, Clone, Copy)]
pub(crate) struct SoftMaxDims {
    pub ne: [usize; 4],
    pub scale: f32,
}

/// `q: [d, n_q, n_head, ne3]`, `k: [d, n_kv, n_head_kv, ne3]`,
/// `v: [dv, n_kv, n_head_kv, ne3]`, result `[dv, n_head, n_q, ne3]`
#[derive(Debug, Clone, Copy)]
pub(crate) struct AttnDims {
    pub d: usize,
    pub dv: usize,
    pub n_q: usize,
    pub n_head: usize,
    pub n_kv: usize,
    pub n_head_kv: usize,
    pub ne3: usize,
    pub scale: f32,
    /// Q goes through binary16 first, as for F16 keys
    pub round_q_f16: bool,
}

impl AttnDims {
    /// Decompose an output row index into `(head, query, batch)`
    #[inline]
    pub fn split_row(&self, row: usize) -> (usize, usize, usize) {
        (row % self.n_head, (row / self.n_head) % self.n_q, row / (self.n_head * self.n_q))
    }

    #[inline]
    pub fn q_offset(&self, h: usize, iq: usize, i3: usize) -> usize {
        (iq + self.n_q * (h + self.n_head * i3)) * self.d
    }

    /// Row offset of key/value `0` for query head `h`, in units of rows
    #[inline]
    pub fn kv_row0(&self, h: usize, i3: usize) -> usize {
        let hk = h / (self.n_head / self.n_head_kv);
        self.n_kv * (hk + self.n_head_kv * i3)
    }
}

/// Mask as a dense row-major `[rows, row_len]` table
pub(crate) struct Mask {
    pub values: Vec<f32>,
    pub row_len: usize,
}

impl Mask {
    #[inline]
    pub fn row(&self, r: usize) -> &[f32] {
        &self.values[r * self.row_len..(r + 1) * self.row_len]
    }
}

/// Masked logits are clamped so `±inf` behaves as `±FLT_MAX`: a fully
/// masked row then softmaxes to a uniform distribution instead of NaN.
#[inline]
pub(crate) fn saturate(x: f32) -> f32 {
    x.clamp(-f32::MAX, f32::MAX)
}

#[inline]
pub(crate) fn round_f16(x: f32) -> f32 {
    half::f16::from_f32(x).to_f32()
}

/// One backend's arithmetic
pub(crate) trait KernelSet {
    fn mul_mat(&self, a: &[f32], b: &[f32], dims: &MatMulDims) -> Vec<f32>;

    fn soft_max(&self, x: &[f32], mask: Option<&Mask>, dims: &SoftMaxDims) -> Vec<f32>;

    fn flash_attn(
        &self,
        q: &[f32],
        k: &[f32],
        v: &[f32],
        mask: Option<&Mask>,
        dims: &AttnDims,
    ) -> Vec<f32>;
}

fn read_mask(ctx: &Context, id: Option<&TensorId>) -> Result<Option<Mask>> {
    id.map(|&m| {
        Ok(Mask {
            values: tensor_to_float(ctx, m)?,
            row_len: ctx.tensor(m).ne[0],
        })
    })
    .transpose()
}

/// Execute `node` with `kernels`, writing its contiguous result
pub(crate) fn run_node<K: KernelSet + ?Sized>(
    kernels: &K,
    backend: &str,
    ctx: &Context,
    node: TensorId,
) -> Result<()> {
    let t = ctx.tensor(node);
    let data = t.data.as_ref().ok_or_else(|| {
        Error::backend(backend, format!("node {} ('{}') has no storage", node.index(), t.name))
    })?;
    if data.buffer.backend() != backend {
        return Err(Error::backend(
            backend,
            format!(
                "node {} lives in a '{}' buffer",
                node.index(),
                data.buffer.backend()
            ),
        ));
    }
    tracing::trace!(backend, node = node.index(), op = t.op.name(), "compute node");

    let out = match t.op {
        Op::None | Op::Transpose | Op::Permute(_) => return Ok(()),
        Op::Cont => {
            let bytes = ctx.with_tensor_bytes(t.src[0], gather_elements)?;
            return ctx.tensor_set(node, &bytes, 0);
        }
        Op::MulMat => {
            let (ta, tb) = (ctx.tensor(t.src[0]), ctx.tensor(t.src[1]));
            let dims = MatMulDims {
                k: ta.ne[0],
                m: ta.ne[1],
                n: tb.ne[1],
                a2: ta.ne[2],
                a3: ta.ne[3],
                ne2: tb.ne[2],
                ne3: tb.ne[3],
                round_b_f16: ta.ty == GgmlType::F16,
            };
            let a = tensor_to_float(ctx, t.src[0])?;
            let b = tensor_to_float(ctx, t.src[1])?;
            kernels.mul_mat(&a, &b, &dims)
        }
        Op::SoftMax { scale } => {
            let x = tensor_to_float(ctx, t.src[0])?;
            let mask = read_mask(ctx, t.src.get(1))?;
            let dims = SoftMaxDims { ne: t.ne, scale };
            kernels.soft_max(&x, mask.as_ref(), &dims)
        }
        Op::FlashAttnExt { scale } => {
            let (tq, tk, tv) = (ctx.tensor(t.src[0]), ctx.tensor(t.src[1]), ctx.tensor(t.src[2]));
            let dims = AttnDims {
                d: tq.ne[0],
                dv: tv.ne[0],
                n_q: tq.ne[1],
                n_head: tq.ne[2],
                n_kv: tk.ne[1],
                n_head_kv: tk.ne[2],
                ne3: tq.ne[3],
                scale,
                round_q_f16: tk.ty == GgmlType::F16,
            };
            let q = tensor_to_float(ctx, t.src[0])?;
            let k = tensor_to_float(ctx, t.src[1])?;
            let v = tensor_to_float(ctx, t.src[2])?;
            let mask = read_mask(ctx, t.src.get(3))?;
            kernels.flash_attn(&q, &k, &v, mask.as_ref(), &dims)
        }
    };

    debug_assert_eq!(out.len(), t.nelements());
    ctx.tensor_set(node, &f32_to_bytes(&out), 0)
}
