//! Backend parity for the attention graphs: Accel vs CPU node by node.

use super::helpers::*;
use attncheck::backend::{Backend, compare_graph_backend};
use attncheck::config::{GraphMode, HarnessConfig};
use attncheck::format::GgmlType;
use attncheck::harness::{
    AttentionInputs, AttentionModel, ComparisonState, Outcome, build_graph, compute_allocator,
    compute_graph, measure_compute_buffer,
};
use attncheck::runtime::{Context, Graph, GraphAllocator, KQ_MASK_PAD, Op, pad, tensor_to_float};

fn compare_model(graph: GraphMode) -> (bool, Vec<String>) {
    let shape = small_shape();
    let inputs = AttentionInputs::patterned(&shape);
    compare_inputs(&inputs, graph, HarnessConfig::default().max_err)
}

fn compare_inputs(inputs: &AttentionInputs, graph: GraphMode, max_err: f64) -> (bool, Vec<String>) {
    let shape = small_shape();
    let mut model = AttentionModel::with_inputs(shape, inputs, Box::new(accel())).unwrap();
    let config = HarnessConfig {
        shape,
        graph,
        compare: true,
        max_err,
        ..HarnessConfig::default()
    };
    let size = measure_compute_buffer(&model, graph).unwrap();
    let mut alloc = compute_allocator(&model, size).unwrap();
    let mut reference = cpu();
    match compute_graph(&mut model, &mut reference, &mut alloc, &config).unwrap() {
        Outcome::Compared { ok, failures } => (ok, failures),
        Outcome::Computed { .. } => panic!("compare mode was requested"),
    }
}

#[test]
fn test_fused_graph_parity() {
    let (ok, failures) = compare_model(GraphMode::Fused);
    assert!(failures.is_empty(), "{failures:?}");
    assert!(ok);
}

#[test]
fn test_naive_graph_parity() {
    let (ok, failures) = compare_model(GraphMode::Naive);
    assert!(failures.is_empty(), "{failures:?}");
    assert!(ok);
}

#[test]
fn test_zero_tolerance_reports_failures() {
    let shape = small_shape();
    let mut inputs = AttentionInputs::patterned(&shape);
    // irregular values so f32 and f64 accumulation round differently
    inputs.q = det_values(inputs.q.len(), 0.0);
    inputs.k = det_values(inputs.k.len(), 1.0);
    inputs.v = det_values(inputs.v.len(), 2.0);

    let (ok, failures) = compare_inputs(&inputs, GraphMode::Naive, 0.0);
    assert!(!ok);
    assert!(!failures.is_empty());
    assert!(failures.iter().all(|f| f.contains("NMSE")), "{failures:?}");

    // the same inputs pass at the default threshold
    let (ok, failures) = compare_inputs(&inputs, GraphMode::Naive, 5e-4);
    assert!(failures.is_empty(), "{failures:?}");
    assert!(ok);
}

#[test]
fn test_callback_order_and_sentinels() {
    let shape = small_shape();
    let model = AttentionModel::load(shape, Box::new(accel())).unwrap();
    let (mut ctx, graph) = build_graph(&model, GraphMode::Naive).unwrap();
    let size = measure_compute_buffer(&model, GraphMode::Naive).unwrap();
    let mut alloc = compute_allocator(&model, size).unwrap();
    alloc.alloc_graph(&mut ctx, &graph).unwrap();

    let before: Vec<Vec<u8>> = graph
        .leafs()
        .iter()
        .map(|&id| ctx.tensor_get(id, 0, ctx.tensor(id).nbytes()).unwrap())
        .collect();

    let mut seen = Vec::new();
    let reference = cpu();
    let backend = model.backend.as_ref();
    let completed = compare_graph_backend(backend, &reference, &ctx, &graph, |i, t1, t2| {
        assert_eq!(t1.id(), t2.id());
        assert_eq!(t1.backend(), "Accel");
        assert_eq!(t2.backend(), "CPU");
        if t1.meta().op == Op::None {
            let name = &t1.meta().name;
            assert_eq!(t1.bytes().unwrap(), t2.bytes().unwrap(), "sentinel {name}");
        }
        seen.push(i);
        true
    })
    .unwrap();
    assert!(completed);
    assert_eq!(seen, (0..graph.n_nodes() + graph.leafs().len()).collect::<Vec<_>>());

    // inputs are unchanged after execution
    for (&id, bytes) in graph.leafs().iter().zip(&before) {
        assert_eq!(&ctx.tensor_get(id, 0, bytes.len()).unwrap(), bytes);
    }
}

#[test]
fn test_callback_can_stop_traversal() {
    let model = AttentionModel::load(small_shape(), Box::new(accel())).unwrap();
    let (mut ctx, graph) = build_graph(&model, GraphMode::Naive).unwrap();
    let size = measure_compute_buffer(&model, GraphMode::Naive).unwrap();
    let mut alloc = compute_allocator(&model, size).unwrap();
    alloc.alloc_graph(&mut ctx, &graph).unwrap();

    let mut calls = 0;
    let reference = cpu();
    let backend = model.backend.as_ref();
    let completed = compare_graph_backend(backend, &reference, &ctx, &graph, |i, _, _| {
        calls += 1;
        i < 1
    })
    .unwrap();
    assert!(!completed);
    assert_eq!(calls, 2);
}

#[test]
fn test_grouped_heads_parity() {
    // 4 query heads over 2 kv heads, query length off the mask pad
    let (d, b, s, h, hk) = (32, 7, 96, 4, 2);
    let backend = accel();
    let mut ctx = Context::new();
    let q_values = det_values(d * b * h, 0.0);
    let k_values = det_values(d * s * hk, 1.0);
    let v_values = det_values(d * s * hk, 2.0);
    let (q, _qb) = upload(&mut ctx, &backend, GgmlType::F32, &[d, b, h], &q_values);
    let (k, _kb) = upload(&mut ctx, &backend, GgmlType::F16, &[d, s, hk], &k_values);
    let (v, _vb) = upload(&mut ctx, &backend, GgmlType::F16, &[d, s, hk], &v_values);
    let rows = pad(b, KQ_MASK_PAD);
    let mut mask_values = vec![0f32; s * rows];
    // causal-style mask: query i sees keys up to s - b + i
    for i in 0..b {
        for j in (s - b + i + 1)..s {
            mask_values[i * s + j] = f32::NEG_INFINITY;
        }
    }
    let (mask, _mb) = upload(&mut ctx, &backend, GgmlType::F16, &[s, rows], &mask_values);

    let out = ctx
        .flash_attn_ext(q, k, v, Some(mask), 1.0 / (d as f32).sqrt())
        .unwrap();
    let mut graph = Graph::new();
    graph.build_forward_expand(&ctx, out);

    let mut measure = GraphAllocator::new_measure(backend.alignment());
    let size = measure.alloc_graph(&mut ctx.fork(), &graph).unwrap();
    let buffer = backend.alloc_buffer(size).unwrap();
    let mut alloc = GraphAllocator::from_buffer(buffer, backend.alignment());
    alloc.alloc_graph(&mut ctx, &graph).unwrap();

    let reference = cpu();
    let mut state = ComparisonState::new(5e-4, backend.name(), reference.name());
    let completed = compare_graph_backend(&backend, &reference, &ctx, &graph, |_, t1, t2| {
        state.check(t1, t2)
    })
    .unwrap();
    assert!(completed);
    assert!(state.failures.is_empty(), "{:?}", state.failures);
    assert!(state.ok);

    let accel_out = tensor_to_float(&ctx, out).unwrap();
    assert_eq!(accel_out.len(), d * h * b);
    assert!(accel_out.iter().all(|x| x.is_finite()));
}

#[test]
fn test_mul_mat_f16_parity() {
    let (k, m, n) = (64, 24, 10);
    let backend = accel();
    let reference = cpu();
    let mut ctx = Context::new();
    let a_values = det_values(k * m, 3.0);
    let b_values = det_values(k * n, 5.0);
    let (a, _ab) = upload(&mut ctx, &backend, GgmlType::F16, &[k, m], &a_values);
    let (b, _bb) = upload(&mut ctx, &backend, GgmlType::F32, &[k, n], &b_values);
    let c = ctx.mul_mat(a, b).unwrap();
    let mut graph = Graph::new();
    graph.build_forward_expand(&ctx, c);
    let size = GraphAllocator::new_measure(backend.alignment())
        .alloc_graph(&mut ctx.fork(), &graph)
        .unwrap();
    let buffer = backend.alloc_buffer(size).unwrap();
    let mut alloc = GraphAllocator::from_buffer(buffer, backend.alignment());
    alloc.alloc_graph(&mut ctx, &graph).unwrap();

    let mut results = Vec::new();
    compare_graph_backend(&backend, &reference, &ctx, &graph, |_, t1, t2| {
        if t1.id() == c {
            results.push((t1.to_f32().unwrap(), t2.to_f32().unwrap()));
        }
        true
    })
    .unwrap();
    let (accel_out, cpu_out) = &results[0];
    assert_parity_f32_tol(accel_out, cpu_out, "mul_mat f16 Accel vs CPU", 1e-4, 1e-5);
}
