//! Forward computation graph

use super::context::Context;
use super::tensor::TensorId;
use std::collections::HashSet;

/// Topologically ordered node list plus the leafs they read.
///
/// Every node appears after all of its sources; the last node is the
/// overall result.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<TensorId>,
    leafs: Vec<TensorId>,
    visited: HashSet<TensorId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `tensor` and everything it depends on that is not yet in the graph
    pub fn build_forward_expand(&mut self, ctx: &Context, tensor: TensorId) {
        let before = self.nodes.len();
        self.visit(ctx, tensor);
        tracing::debug!(
            added = self.nodes.len() - before,
            n_nodes = self.nodes.len(),
            n_leafs = self.leafs.len(),
            "expanded graph"
        );
    }

    // Iterative post-order DFS: sources in order, then the tensor itself.
    fn visit(&mut self, ctx: &Context, root: TensorId) {
        let mut stack = vec![(root, 0usize)];
        while let Some((id, next_src)) = stack.pop() {
            if next_src == 0 && self.visited.contains(&id) {
                continue;
            }
            let t = ctx.tensor(id);
            if let Some(&src) = t.src.get(next_src) {
                stack.push((id, next_src + 1));
                if !self.visited.contains(&src) {
                    stack.push((src, 0));
                }
                continue;
            }
            if self.visited.insert(id) {
                if t.op.is_leaf() {
                    self.leafs.push(id);
                } else {
                    self.nodes.push(id);
                }
            }
        }
    }

    pub fn nodes(&self) -> &[TensorId] {
        &self.nodes
    }

    pub fn leafs(&self) -> &[TensorId] {
        &self.leafs
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The final node, i.e. the overall result
    pub fn result(&self) -> Option<TensorId> {
        self.nodes.last().copied()
    }

    pub fn contains(&self, id: TensorId) -> bool {
        self.visited.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::gguf::GgmlType;

    #[test]
    fn test_post_order() {
        let mut ctx = Context::new();
        let a = ctx.new_tensor_2d(GgmlType::F32, 4, 4).unwrap();
        let b = ctx.new_tensor_2d(GgmlType::F32, 4, 4).unwrap();
        let ab = ctx.mul_mat(a, b).unwrap();
        let t = ctx.transpose(ab).unwrap();
        let c = ctx.cont(t).unwrap();
        let out = ctx.mul_mat(c, ab).unwrap();

        let mut g = Graph::new();
        g.build_forward_expand(&ctx, out);
        assert_eq!(g.leafs(), &[a, b]);
        assert_eq!(g.nodes(), &[ab, t, c, out]);
        assert_eq!(g.result(), Some(out));

        // expanding again adds nothing
        g.build_forward_expand(&ctx, out);
        assert_eq!(g.n_nodes(), 4);
    }

    #[test]
    fn test_leaf_only_graph() {
        let mut ctx = Context::new();
        let a = ctx.new_tensor_1d(GgmlType::F32, 4).unwrap();
        let mut g = Graph::new();
        g.build_forward_expand(&ctx, a);
        assert_eq!(g.result(), None);
        assert_eq!(g.leafs(), &[a]);
    }
}
