//! Reference quantizers for Q8_0 and Q4_0 rows, used to build test inputs

use super::format::QuantFormat;
use crate::error::Result;
use half::f16;

/// Quantize `src` (a whole number of 32-element blocks) to Q8_0
pub(crate) fn quantize_q8_0(src: &[f32]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(QuantFormat::Q8_0.storage_bytes(src.len())?);
    for chunk in src.chunks_exact(32) {
        let amax = chunk.iter().fold(0f32, |m, &x| m.max(x.abs()));
        let d = amax / 127.0;
        let id = if d != 0.0 { 1.0 / d } else { 0.0 };
        out.extend_from_slice(&f16::from_f32(d).to_le_bytes());
        out.extend(chunk.iter().map(|&x| (x * id).round() as i8 as u8));
    }
    Ok(out)
}

/// Quantize `src` (a whole number of 32-element blocks) to Q4_0
///
/// The element with the largest magnitude maps to nibble 0 (value -8).
pub(crate) fn quantize_q4_0(src: &[f32]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(QuantFormat::Q4_0.storage_bytes(src.len())?);
    for chunk in src.chunks_exact(32) {
        let max = chunk
            .iter()
            .fold(0f32, |m, &x| if x.abs() > m.abs() { x } else { m });
        let d = max / -8.0;
        let id = if d != 0.0 { 1.0 / d } else { 0.0 };
        out.extend_from_slice(&f16::from_f32(d).to_le_bytes());
        let q = |x: f32| ((x * id + 8.5) as i32).clamp(0, 15) as u8;
        for j in 0..16 {
            out.push(q(chunk[j]) | (q(chunk[j + 16]) << 4));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::dequantize_row;

    fn ramp() -> Vec<f32> {
        (0..64).map(|i| (i as f32 - 31.5) / 8.0).collect()
    }

    #[test]
    fn test_q8_0_error_bound() {
        let src = ramp();
        let q = quantize_q8_0(&src).unwrap();
        assert_eq!(q.len(), 68);
        let mut back = vec![0f32; 64];
        dequantize_row(QuantFormat::Q8_0, &q, &mut back).unwrap();
        for (a, b) in src.iter().zip(&back) {
            assert!((a - b).abs() < 0.02, "{a} vs {b}");
        }
    }

    #[test]
    fn test_q4_0_error_bound() {
        let src = ramp();
        let q = quantize_q4_0(&src).unwrap();
        let mut back = vec![0f32; 64];
        dequantize_row(QuantFormat::Q4_0, &q, &mut back).unwrap();
        for (a, b) in src.iter().zip(&back) {
            assert!((a - b).abs() < 0.3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_partial_block_rejected() {
        assert!(quantize_q8_0(&[1.0; 31]).is_err());
    }
}
