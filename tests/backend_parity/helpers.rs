//! Shared helpers for attncheck backend parity tests.

use attncheck::backend::{AccelBackend, Backend, CpuBackend};
use attncheck::config::AttentionShape;
use attncheck::format::GgmlType;
use attncheck::runtime::{
    BackendBuffer, Context, TensorAllocator, TensorId, f32_to_bytes, f32_to_f16_bytes,
};

pub fn small_shape() -> AttentionShape {
    AttentionShape {
        head_dim: 16,
        n_queries: 32,
        n_kv: 128,
        n_heads: 2,
    }
}

pub fn accel() -> AccelBackend {
    AccelBackend::new()
}

pub fn cpu() -> CpuBackend {
    CpuBackend::with_threads(2).unwrap()
}

/// Deterministic pseudo-random values using a sin-based pattern.
pub fn det_values(n: usize, phase: f32) -> Vec<f32> {
    (0..n).map(|i| ((i as f32 + phase) * 0.1).sin() * 0.5).collect()
}

/// Upload `values` as a new contiguous tensor in `backend`'s memory
pub fn upload(
    ctx: &mut Context,
    backend: &dyn Backend,
    ty: GgmlType,
    ne: &[usize],
    values: &[f32],
) -> (TensorId, BackendBuffer) {
    let id = ctx.new_tensor(ty, ne).unwrap();
    let size = ctx.tensor(id).nbytes();
    let buffer = backend.alloc_buffer(size).unwrap();
    let mut talloc = TensorAllocator::new(buffer.clone(), backend.alignment());
    talloc.alloc(ctx, id).unwrap();
    let bytes = match ty {
        GgmlType::F32 => f32_to_bytes(values),
        GgmlType::F16 => f32_to_f16_bytes(values),
        other => panic!("upload: {other} not supported"),
    };
    ctx.tensor_set(id, &bytes, 0).unwrap();
    (id, buffer)
}

pub fn assert_parity_f32_tol(a: &[f32], b: &[f32], op: &str, rtol: f32, atol: f32) {
    assert_eq!(
        a.len(),
        b.len(),
        "parity_f32[{}]: length mismatch: {} vs {}",
        op,
        a.len(),
        b.len()
    );
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        if diff > tol {
            panic!(
                "parity_f32[{}] at index {}: {} vs {} (diff={}, tol={})",
                op, i, x, y, diff, tol
            );
        }
    }
}
