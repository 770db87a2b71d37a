//! CPU dequantization of single blocks
//!
//! Element order follows ggml: in the 4- and 5-bit formats the low nibble
//! of byte `j` is element `j` and the high nibble is element `j + 16`.

use super::format::QuantFormat;
use crate::error::{Error, Result};
use half::f16;

const QK: usize = 32;

#[inline]
fn f16_at(block: &[u8], at: usize) -> f32 {
    f16::from_le_bytes([block[at], block[at + 1]]).to_f32()
}

/// Dequantize exactly one block of `format` into `out[..32]`
pub fn dequantize_block(format: QuantFormat, block: &[u8], out: &mut [f32]) -> Result<()> {
    if block.len() < format.block_bytes() || out.len() < QK {
        return Err(Error::InvalidArgument {
            arg: "block",
            reason: format!(
                "{format} needs {} input bytes and {QK} outputs, got {} and {}",
                format.block_bytes(),
                block.len(),
                out.len()
            ),
        });
    }
    let out = &mut out[..QK];
    match format {
        QuantFormat::Q4_0 => {
            let d = f16_at(block, 0);
            let qs = &block[2..18];
            for j in 0..QK / 2 {
                out[j] = ((qs[j] & 0x0F) as i32 - 8) as f32 * d;
                out[j + QK / 2] = ((qs[j] >> 4) as i32 - 8) as f32 * d;
            }
        }
        QuantFormat::Q4_1 => {
            let d = f16_at(block, 0);
            let m = f16_at(block, 2);
            let qs = &block[4..20];
            for j in 0..QK / 2 {
                out[j] = (qs[j] & 0x0F) as f32 * d + m;
                out[j + QK / 2] = (qs[j] >> 4) as f32 * d + m;
            }
        }
        QuantFormat::Q5_0 => {
            let d = f16_at(block, 0);
            let qh = u32::from_le_bytes([block[2], block[3], block[4], block[5]]);
            let qs = &block[6..22];
            for j in 0..QK / 2 {
                let (lo, hi) = five_bit(qs[j], qh, j);
                out[j] = (lo as i32 - 16) as f32 * d;
                out[j + QK / 2] = (hi as i32 - 16) as f32 * d;
            }
        }
        QuantFormat::Q5_1 => {
            let d = f16_at(block, 0);
            let m = f16_at(block, 2);
            let qh = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
            let qs = &block[8..24];
            for j in 0..QK / 2 {
                let (lo, hi) = five_bit(qs[j], qh, j);
                out[j] = lo as f32 * d + m;
                out[j + QK / 2] = hi as f32 * d + m;
            }
        }
        QuantFormat::Q8_0 => {
            let d = f16_at(block, 0);
            for (o, &q) in out.iter_mut().zip(&block[2..34]) {
                *o = q as i8 as f32 * d;
            }
        }
        QuantFormat::Q8_1 => {
            // bytes 2..4 carry d * sum(qs), unused when dequantizing
            let d = f16_at(block, 0);
            for (o, &q) in out.iter_mut().zip(&block[4..36]) {
                *o = q as i8 as f32 * d;
            }
        }
    }
    Ok(())
}

/// Low and high 5-bit values packed at position `j`
#[inline]
fn five_bit(q: u8, qh: u32, j: usize) -> (u32, u32) {
    let lo = (q & 0x0F) as u32 | (((qh >> j) & 1) << 4);
    let hi = (q >> 4) as u32 | (((qh >> (j + 16)) & 1) << 4);
    (lo, hi)
}

/// Dequantize a run of whole blocks into `out`
pub fn dequantize_row(format: QuantFormat, blocks: &[u8], out: &mut [f32]) -> Result<()> {
    let n_blocks = blocks.len() / format.block_bytes();
    if out.len() != n_blocks * QK {
        return Err(Error::InvalidArgument {
            arg: "out",
            reason: format!("{} outputs for {n_blocks} {format} blocks", out.len()),
        });
    }
    for (block, chunk) in blocks
        .chunks_exact(format.block_bytes())
        .zip(out.chunks_exact_mut(QK))
    {
        dequantize_block(format, block, chunk)?;
    }
    Ok(())
}
