//! Strided tensor to flat f32 conversion

use super::context::Context;
use super::tensor::{TensorId, TensorMeta};
use crate::error::{Error, Result};
use crate::format::gguf::GgmlType;
use crate::quant::{dequantize_block, dequantize_row};
use half::f16;

/// Read every element of `meta` from `bytes` in logical order.
///
/// `bytes` starts at the tensor's first byte and spans at least
/// `meta.nbytes()`. Axis 0 advances one block at a time, so strided views
/// and block-quantized rows are both handled; quantized rows whose blocks
/// are packed back to back are dequantized in one pass. The result has
/// `meta.nelements()` values.
pub fn flatten_bytes(meta: &TensorMeta, bytes: &[u8]) -> Result<Vec<f32>> {
    let ty = meta.ty;
    let bs = ty.block_size();
    let quant = ty.to_quant_format();
    if !matches!(
        ty,
        GgmlType::F32 | GgmlType::F16 | GgmlType::I32 | GgmlType::I16 | GgmlType::I8
    ) && quant.is_none()
    {
        return Err(Error::UnsupportedType {
            ty,
            context: "tensor flattening",
        });
    }
    if bytes.len() < meta.nbytes() {
        return Err(Error::InvalidArgument {
            arg: "bytes",
            reason: format!("{} bytes for a {}-byte tensor", bytes.len(), meta.nbytes()),
        });
    }

    let [ne0, ne1, ne2, ne3] = meta.ne;
    let nb = meta.nb;
    let mut out = Vec::with_capacity(meta.nelements());
    let mut block = [0f32; 32];
    for i3 in 0..ne3 {
        for i2 in 0..ne2 {
            for i1 in 0..ne1 {
                let row = i3 * nb[3] + i2 * nb[2] + i1 * nb[1];
                if let Some(fmt) = quant.filter(|f| nb[0] == f.block_bytes()) {
                    let start = out.len();
                    out.resize(start + ne0, 0.0);
                    let end = row + fmt.storage_bytes(ne0)?;
                    dequantize_row(fmt, &bytes[row..end], &mut out[start..])?;
                    continue;
                }
                for i0 in (0..ne0).step_by(bs) {
                    let at = row + i0 / bs * nb[0];
                    match ty {
                        GgmlType::F32 => out.push(f32::from_le_bytes(le(bytes, at))),
                        GgmlType::F16 => out.push(f16::from_le_bytes(le(bytes, at)).to_f32()),
                        GgmlType::I32 => out.push(i32::from_le_bytes(le(bytes, at)) as f32),
                        GgmlType::I16 => out.push(i16::from_le_bytes(le(bytes, at)) as f32),
                        GgmlType::I8 => out.push(bytes[at] as i8 as f32),
                        _ => {
                            if let Some(fmt) = quant {
                                let src = &bytes[at..at + fmt.block_bytes()];
                                dequantize_block(fmt, src, &mut block)?;
                                out.extend_from_slice(&block[..bs]);
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(out)
}

#[inline]
fn le<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut b = [0u8; N];
    b.copy_from_slice(&bytes[at..at + N]);
    b
}

/// Flatten a tensor straight out of its backend buffer
pub fn tensor_to_float(ctx: &Context, id: TensorId) -> Result<Vec<f32>> {
    ctx.with_tensor_bytes(id, flatten_bytes)
}

/// Gather the raw element bytes of a non-block tensor in logical order
pub(crate) fn gather_elements(meta: &TensorMeta, bytes: &[u8]) -> Result<Vec<u8>> {
    if meta.ty.is_quantized() {
        return Err(Error::UnsupportedType {
            ty: meta.ty,
            context: "element gather",
        });
    }
    let ts = meta.ty.type_size();
    let [ne0, ne1, ne2, ne3] = meta.ne;
    let nb = meta.nb;
    let mut out = Vec::with_capacity(meta.nelements() * ts);
    for i3 in 0..ne3 {
        for i2 in 0..ne2 {
            for i1 in 0..ne1 {
                let row = i3 * nb[3] + i2 * nb[2] + i1 * nb[1];
                if nb[0] == ts {
                    out.extend_from_slice(&bytes[row..row + ne0 * ts]);
                } else {
                    for i0 in 0..ne0 {
                        let at = row + i0 * nb[0];
                        out.extend_from_slice(&bytes[at..at + ts]);
                    }
                }
            }
        }
    }
    Ok(out)
}
