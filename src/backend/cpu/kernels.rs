//! Reference kernels
//!
//! Direct loops with f64 accumulation and two-pass softmax. Parallel over
//! output rows on whatever rayon pool is current.

use crate::backend::kernels::{
    AttnDims, KernelSet, Mask, MatMulDims, SoftMaxDims, round_f16, saturate,
};
use rayon::prelude::*;
use std::borrow::Cow;

pub(crate) struct RefKernels;

#[inline]
fn dot_f64(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum()
}

fn maybe_round(x: &[f32], round: bool) -> Cow<'_, [f32]> {
    if round {
        Cow::Owned(x.iter().map(|&v| round_f16(v)).collect())
    } else {
        Cow::Borrowed(x)
    }
}

/// `exp(x - max)` for every element in f64; returns the sum
fn exp_shifted(row: &[f32], weights: &mut [f64]) -> f64 {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    let mut sum = 0f64;
    for (w, &x) in weights.iter_mut().zip(row) {
        *w = (x as f64 - max).exp();
        sum += *w;
    }
    sum
}

impl KernelSet for RefKernels {
    fn mul_mat(&self, a: &[f32], b: &[f32], dims: &MatMulDims) -> Vec<f32> {
        let MatMulDims { k, m, n, ne2, ne3, .. } = *dims;
        let b = maybe_round(b, dims.round_b_f16);
        let mut out = vec![0f32; m * n * ne2 * ne3];
        out.par_chunks_mut(m).enumerate().for_each(|(row, dst)| {
            let (i2, i3) = ((row / n) % ne2, row / (n * ne2));
            let a_mat = &a[dims.a_offset(i2, i3)..][..m * k];
            let b_row = &b[row * k..][..k];
            for (d, a_row) in dst.iter_mut().zip(a_mat.chunks_exact(k)) {
                *d = dot_f64(a_row, b_row) as f32;
            }
        });
        out
    }

    fn soft_max(&self, x: &[f32], mask: Option<&Mask>, dims: &SoftMaxDims) -> Vec<f32> {
        let [ne0, ne1, ..] = dims.ne;
        let mut out = x.to_vec();
        out.par_chunks_mut(ne0).enumerate().for_each(|(row, dst)| {
            let mrow = mask.map(|m| m.row(row % ne1));
            for (j, v) in dst.iter_mut().enumerate() {
                *v = saturate(*v * dims.scale + mrow.map_or(0.0, |m| m[j]));
            }
            let mut w = vec![0f64; ne0];
            let sum = exp_shifted(dst, &mut w);
            for (v, w) in dst.iter_mut().zip(&w) {
                *v = (w / sum) as f32;
            }
        });
        out
    }

    fn flash_attn(
        &self,
        q: &[f32],
        k: &[f32],
        v: &[f32],
        mask: Option<&Mask>,
        dims: &AttnDims,
    ) -> Vec<f32> {
        let AttnDims { d, dv, n_q, n_head, n_kv, ne3, .. } = *dims;
        let mut out = vec![0f32; dv * n_head * n_q * ne3];
        out.par_chunks_mut(dv).enumerate().for_each(|(row, dst)| {
            let (h, iq, i3) = dims.split_row(row);
            let q_row = maybe_round(&q[dims.q_offset(h, iq, i3)..][..d], dims.round_q_f16);
            let kv0 = dims.kv_row0(h, i3);
            let mrow = mask.map(|m| m.row(iq));

            let scores: Vec<f32> = (0..n_kv)
                .map(|s| {
                    let k_row = &k[(kv0 + s) * d..][..d];
                    let logit = dot_f64(&q_row, k_row) as f32 * dims.scale;
                    saturate(logit + mrow.map_or(0.0, |m| m[s]))
                })
                .collect();
            let mut w = vec![0f64; n_kv];
            let sum = exp_shifted(&scores, &mut w);

            let mut acc = vec![0f64; dv];
            for (s, &ws) in w.iter().enumerate() {
                let v_row = &v[(kv0 + s) * dv..][..dv];
                for (a, &x) in acc.iter_mut().zip(v_row) {
                    *a += ws * x as f64;
                }
            }
            for (o, a) in dst.iter_mut().zip(&acc) {
                *o = (a / sum) as f32;
            }
        });
        out
    }
}
