//! Graph-building operations
//!
//! Each builder validates its operands' shapes, appends the result tensor
//! to the context and returns its id. Nothing is computed here; kernels run
//! when a backend executes the graph.

use super::context::Context;
use super::op::Op;
use super::tensor::{MAX_DIMS, TensorId, TensorMeta};
use crate::error::{Error, Result};
use crate::format::gguf::GgmlType;

/// Required multiple for the query axis of an attention mask
pub const KQ_MASK_PAD: usize = 32;

/// Round `x` up to a multiple of `n`
pub const fn pad(x: usize, n: usize) -> usize {
    x.div_ceil(n) * n
}

fn shape_err(op: Op, reason: String) -> Error {
    Error::graph(format!("{}: {reason}", op.name()))
}

impl Context {
    fn result(
        &mut self,
        op: Op,
        ty: GgmlType,
        ne: [usize; MAX_DIMS],
        src: Vec<TensorId>,
    ) -> TensorId {
        let mut t = TensorMeta::contiguous(ty, ne);
        t.op = op;
        t.src = src;
        self.push(t)
    }

    /// View of `a` with new extents and strides, sharing `a`'s storage
    fn view(
        &mut self,
        op: Op,
        a: TensorId,
        ne: [usize; MAX_DIMS],
        nb: [usize; MAX_DIMS],
    ) -> TensorId {
        let src = self.tensor(a);
        let (view_src, view_offs) = match src.view_src {
            Some(root) => (root, src.view_offs),
            None => (a, 0),
        };
        let mut t = TensorMeta::contiguous(src.ty, ne);
        t.nb = nb;
        t.op = op;
        t.src = vec![a];
        t.view_src = Some(view_src);
        t.view_offs = view_offs;
        t.name = if src.name.is_empty() {
            String::new()
        } else {
            format!("{} ({})", src.name, op.name().to_lowercase())
        };
        self.push(t)
    }

    fn check_mask(&self, op: Op, mask: TensorId, ne0: usize, min_rows: usize) -> Result<()> {
        let m = self.tensor(mask);
        if !matches!(m.ty, GgmlType::F16 | GgmlType::F32) {
            return Err(Error::UnsupportedType {
                ty: m.ty,
                context: "attention mask",
            });
        }
        if !m.is_contiguous() || m.ne[2] != 1 || m.ne[3] != 1 {
            return Err(shape_err(op, "mask must be a contiguous 2-D tensor".into()));
        }
        if m.ne[0] != ne0 || m.ne[1] < min_rows {
            return Err(shape_err(
                op,
                format!("mask is {:?}, need [{ne0}, >={min_rows}]", &m.ne[..2]),
            ));
        }
        Ok(())
    }

    /// `r[i0, i1, i2, i3] = Σ_k a[k, i0, i2/r2, i3/r3] · b[k, i1, i2, i3]`, F32 result
    pub fn mul_mat(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        let (ta, tb) = (self.tensor(a), self.tensor(b));
        if ta.ne[0] != tb.ne[0] {
            return Err(shape_err(
                Op::MulMat,
                format!("inner dims differ: {} vs {}", ta.ne[0], tb.ne[0]),
            ));
        }
        if tb.ne[2] % ta.ne[2] != 0 || tb.ne[3] % ta.ne[3] != 0 {
            return Err(shape_err(
                Op::MulMat,
                format!("cannot broadcast {:?} over {:?}", ta.ne, tb.ne),
            ));
        }
        if ta.is_transposed() {
            return Err(shape_err(Op::MulMat, "src0 must not be transposed".into()));
        }
        let ne = [ta.ne[1], tb.ne[1], tb.ne[2], tb.ne[3]];
        Ok(self.result(Op::MulMat, GgmlType::F32, ne, vec![a, b]))
    }

    /// Row softmax of `a · scale + mask[row]` along axis 0
    pub fn soft_max_ext(
        &mut self,
        a: TensorId,
        mask: Option<TensorId>,
        scale: f32,
    ) -> Result<TensorId> {
        let op = Op::SoftMax { scale };
        let ta = self.tensor(a);
        if ta.ty != GgmlType::F32 {
            return Err(Error::UnsupportedType {
                ty: ta.ty,
                context: "soft_max_ext input",
            });
        }
        let ne = ta.ne;
        let mut src = vec![a];
        if let Some(m) = mask {
            self.check_mask(op, m, ne[0], ne[1])?;
            src.push(m);
        }
        Ok(self.result(op, GgmlType::F32, ne, src))
    }

    /// Fused attention.
    ///
    /// `q: [D, B, H]`, `k: [D, S, Hk]`, `v: [Dv, S, Hk]` with `H % Hk == 0`,
    /// `mask: [S, >= pad(B, KQ_MASK_PAD)]`. The result is F32 `[Dv, H, B]`:
    /// head-major per query, the layout `permute(·, 0, 2, 1, 3)` gives the
    /// unfused product.
    pub fn flash_attn_ext(
        &mut self,
        q: TensorId,
        k: TensorId,
        v: TensorId,
        mask: Option<TensorId>,
        scale: f32,
    ) -> Result<TensorId> {
        let op = Op::FlashAttnExt { scale };
        let (tq, tk, tv) = (self.tensor(q), self.tensor(k), self.tensor(v));
        if tq.ne[0] != tk.ne[0] {
            return Err(shape_err(
                op,
                format!("q head dim {} != k head dim {}", tq.ne[0], tk.ne[0]),
            ));
        }
        if tk.ne[1] != tv.ne[1] || tk.ne[2] != tv.ne[2] || tk.ne[3] != tv.ne[3] {
            return Err(shape_err(
                op,
                format!("k {:?} and v {:?} disagree", tk.ne, tv.ne),
            ));
        }
        if tq.ne[2] % tk.ne[2] != 0 || tq.ne[3] != tk.ne[3] {
            return Err(shape_err(
                op,
                format!("{} query heads over {} kv heads", tq.ne[2], tk.ne[2]),
            ));
        }
        let ne = [tv.ne[0], tq.ne[2], tq.ne[1], tq.ne[3]];
        let (n_kv, n_q) = (tk.ne[1], tq.ne[1]);
        let mut src = vec![q, k, v];
        if let Some(m) = mask {
            self.check_mask(op, m, n_kv, pad(n_q, KQ_MASK_PAD))?;
            src.push(m);
        }
        Ok(self.result(op, GgmlType::F32, ne, src))
    }

    /// Contiguous copy of `a` with the same type and extents
    pub fn cont(&mut self, a: TensorId) -> Result<TensorId> {
        let ta = self.tensor(a);
        let (ty, ne) = (ta.ty, ta.ne);
        if ty.is_quantized() {
            return Err(Error::UnsupportedType { ty, context: "cont" });
        }
        Ok(self.result(Op::Cont, ty, ne, vec![a]))
    }

    /// Swap axes 0 and 1
    pub fn transpose(&mut self, a: TensorId) -> Result<TensorId> {
        let ta = self.tensor(a);
        let (mut ne, mut nb) = (ta.ne, ta.nb);
        ne.swap(0, 1);
        nb.swap(0, 1);
        Ok(self.view(Op::Transpose, a, ne, nb))
    }

    /// Axis `i` of `a` becomes axis `axes[i]` of the result
    pub fn permute(&mut self, a: TensorId, axes: [usize; MAX_DIMS]) -> Result<TensorId> {
        let mut seen = [false; MAX_DIMS];
        for &ax in &axes {
            if ax >= MAX_DIMS || seen[ax] {
                return Err(Error::InvalidArgument {
                    arg: "axes",
                    reason: format!("{axes:?} is not a permutation of 0..{MAX_DIMS}"),
                });
            }
            seen[ax] = true;
        }
        let ta = self.tensor(a);
        let (mut ne, mut nb) = ([0; MAX_DIMS], [0; MAX_DIMS]);
        for (i, &ax) in axes.iter().enumerate() {
            ne[ax] = ta.ne[i];
            nb[ax] = ta.nb[i];
        }
        Ok(self.view(Op::Permute(axes), a, ne, nb))
    }
}
