//! Tiled f32 kernels
//!
//! Matmul walks output tiles of `TILE_N` columns so each `a` row is reused
//! while hot. Attention is FlashAttention-2 style: keys and values are
//! consumed in tiles of `TILE_KV` with a running max, running sum and a
//! rescaled accumulator, so the score matrix is never materialised.

use crate::backend::kernels::{
    AttnDims, KernelSet, Mask, MatMulDims, SoftMaxDims, round_f16, saturate,
};
use rayon::prelude::*;

const TILE_N: usize = 4;
const TILE_KV: usize = 32;
const LANES: usize = 8;

pub(crate) struct TiledKernels;

/// f32 dot product over `LANES` independent accumulators
#[inline]
fn dot_f32(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0f32; LANES];
    let (ac, bc) = (a.chunks_exact(LANES), b.chunks_exact(LANES));
    let tail: f32 = ac
        .remainder()
        .iter()
        .zip(bc.remainder())
        .map(|(x, y)| x * y)
        .sum();
    for (x, y) in ac.zip(bc) {
        for l in 0..LANES {
            acc[l] += x[l] * y[l];
        }
    }
    acc.iter().sum::<f32>() + tail
}

impl KernelSet for TiledKernels {
    fn mul_mat(&self, a: &[f32], b: &[f32], dims: &MatMulDims) -> Vec<f32> {
        let MatMulDims { k, m, n, ne2, ne3, .. } = *dims;
        let b: Vec<f32> = if dims.round_b_f16 {
            b.iter().map(|&x| round_f16(x)).collect()
        } else {
            b.to_vec()
        };
        let mut out = vec![0f32; m * n * ne2 * ne3];
        out.par_chunks_mut(m * TILE_N)
            .enumerate()
            .for_each(|(tile, dst)| {
                let row0 = tile * TILE_N;
                let rows = dst.len() / m;
                let a_base: Vec<usize> = (row0..row0 + rows)
                    .map(|row| dims.a_offset((row / n) % ne2, row / (n * ne2)))
                    .collect();
                for i0 in 0..m {
                    for (r, &base) in a_base.iter().enumerate() {
                        let a_row = &a[base + i0 * k..][..k];
                        let b_row = &b[(row0 + r) * k..][..k];
                        dst[r * m + i0] = dot_f32(a_row, b_row);
                    }
                }
            });
        out
    }

    fn soft_max(&self, x: &[f32], mask: Option<&Mask>, dims: &SoftMaxDims) -> Vec<f32> {
        let [ne0, ne1, ..] = dims.ne;
        let mut out = x.to_vec();
        out.par_chunks_mut(ne0).enumerate().for_each(|(row, dst)| {
            let mrow = mask.map(|m| m.row(row % ne1));
            let mut max = f32::NEG_INFINITY;
            for (j, v) in dst.iter_mut().enumerate() {
                *v = saturate(*v * dims.scale + mrow.map_or(0.0, |m| m[j]));
                max = max.max(*v);
            }
            let mut sum = 0f32;
            for v in dst.iter_mut() {
                *v = (*v - max).exp();
                sum += *v;
            }
            let inv = 1.0 / sum;
            dst.iter_mut().for_each(|v| *v *= inv);
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
            let q_row: Vec<f32> = q[dims.q_offset(h, iq, i3)..][..d]
                .iter()
                .map(|&x| if dims.round_q_f16 { round_f16(x) } else { x })
                .collect();
            let kv0 = dims.kv_row0(h, i3);
            let mrow = mask.map(|m| m.row(iq));

            let mut m_run = f32::NEG_INFINITY;
            let mut l_run = 0f32;
            let mut acc = vec![0f32; dv];
            let mut tile = [0f32; TILE_KV];

            for t0 in (0..n_kv).step_by(TILE_KV) {
                let len = TILE_KV.min(n_kv - t0);
                let mut m_tile = f32::NEG_INFINITY;
                for (j, s) in tile[..len].iter_mut().enumerate() {
                    let k_row = &k[(kv0 + t0 + j) * d..][..d];
                    let logit = dot_f32(&q_row, k_row) * dims.scale;
                    *s = saturate(logit + mrow.map_or(0.0, |m| m[t0 + j]));
                    m_tile = m_tile.max(*s);
                }

                let m_new = m_run.max(m_tile);
                let correction = (m_run - m_new).exp();
                if correction != 1.0 {
                    l_run *= correction;
                    acc.iter_mut().for_each(|a| *a *= correction);
                }
                for (j, &s) in tile[..len].iter().enumerate() {
                    let p = (s - m_new).exp();
                    l_run += p;
                    let v_row = &v[(kv0 + t0 + j) * dv..][..dv];
                    for (a, &x) in acc.iter_mut().zip(v_row) {
                        *a += p * x;
                    }
                }
                m_run = m_new;
            }

            let inv = 1.0 / l_run;
            for (o, a) in dst.iter_mut().zip(&acc) {
                *o = a * inv;
            }
        });
        out
    }
}
