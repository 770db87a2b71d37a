//! Fused and naive attention graphs over the same inputs

use super::model::AttentionModel;
use crate::config::GraphMode;
use crate::error::Result;
use crate::runtime::{Context, Graph, TensorId};

/// Build the attention graph for `mode` on a fork of the model context.
///
/// The inputs keep their storage in the fork; every new tensor is
/// unplaced until a [`GraphAllocator`](crate::runtime::GraphAllocator)
/// runs over the returned graph. Both modes produce `[d, H, B]`.
pub fn build_graph(model: &AttentionModel, mode: GraphMode) -> Result<(Context, Graph)> {
    let mut ctx = model.ctx.fork();
    let scale = model.shape.scale();
    let out = match mode {
        GraphMode::Fused => {
            ctx.flash_attn_ext(model.q, model.k, model.v, Some(model.mask), scale)?
        }
        GraphMode::Naive => naive_attention(&mut ctx, model, scale)?,
    };
    ctx.set_name(out, "attn_out");

    let mut graph = Graph::new();
    graph.build_forward_expand(&ctx, out);
    Ok((ctx, graph))
}

fn naive_attention(ctx: &mut Context, model: &AttentionModel, scale: f32) -> Result<TensorId> {
    // [S, B, H]
    let kq = ctx.mul_mat(model.k, model.q)?;
    ctx.set_name(kq, "kq");
    let kq = ctx.soft_max_ext(kq, Some(model.mask), scale)?;
    ctx.set_name(kq, "kq_soft_max");

    // [S, d, H]
    let vt = ctx.transpose(model.v)?;
    let vt = ctx.cont(vt)?;
    ctx.set_name(vt, "v_t");

    // [d, B, H] -> [d, H, B]
    let kqv = ctx.mul_mat(vt, kq)?;
    ctx.set_name(kqv, "kqv");
    ctx.permute(kqv, [0, 2, 1, 3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::config::AttentionShape;
    use crate::runtime::Op;

    fn model() -> AttentionModel {
        let shape = AttentionShape {
            head_dim: 8,
            n_queries: 4,
            n_kv: 16,
            n_heads: 2,
        };
        AttentionModel::load(shape, Box::new(CpuBackend::new().unwrap())).unwrap()
    }

    #[test]
    fn test_fused_graph() {
        let m = model();
        let (ctx, g) = build_graph(&m, GraphMode::Fused).unwrap();
        assert_eq!(g.n_nodes(), 1);
        assert_eq!(g.leafs(), &[m.q, m.k, m.v, m.mask]);
        let out = ctx.tensor(g.result().unwrap());
        assert!(matches!(out.op, Op::FlashAttnExt { .. }));
        assert_eq!(out.ne, [8, 2, 4, 1]);
        // the model context is untouched
        assert_eq!(m.ctx.len(), 4);
    }

    #[test]
    fn test_naive_graph_order() {
        let m = model();
        let (ctx, g) = build_graph(&m, GraphMode::Naive).unwrap();
        let names: Vec<&str> = g.nodes().iter().map(|&id| ctx.tensor(id).op.name()).collect();
        assert_eq!(
            names,
            ["TRANSPOSE", "CONT", "MUL_MAT", "SOFT_MAX", "MUL_MAT", "PERMUTE"]
        );
        assert_eq!(g.leafs(), &[m.v, m.k, m.q, m.mask]);
        let out = ctx.tensor(g.result().unwrap());
        assert_eq!(out.ne, [8, 2, 4, 1]);
        assert!(out.is_view());
    }
}
