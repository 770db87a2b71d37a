//! Lockstep execution of one graph on two backends

use super::Backend;
use crate::error::{Error, Result};
use crate::runtime::{
    BackendBuffer, Context, Graph, TensorAllocator, TensorData, TensorId, TensorMeta,
    tensor_to_float,
};

/// A tensor as seen on one backend
#[derive(Clone, Copy)]
pub struct TensorRef<'a> {
    ctx: &'a Context,
    id: TensorId,
    backend: &'a str,
}

impl<'a> TensorRef<'a> {
    pub fn new(ctx: &'a Context, id: TensorId, backend: &'a str) -> Self {
        Self { ctx, id, backend }
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn meta(&self) -> &'a TensorMeta {
        self.ctx.tensor(self.id)
    }

    pub fn backend(&self) -> &'a str {
        self.backend
    }

    /// Raw bytes of the tensor's span, strides included
    pub fn bytes(&self) -> Result<Vec<u8>> {
        self.ctx.tensor_get(self.id, 0, self.meta().nbytes())
    }

    /// Logical-order f32 values
    pub fn to_f32(&self) -> Result<Vec<f32>> {
        tensor_to_float(self.ctx, self.id)
    }
}

/// A graph duplicated into another backend's memory
pub struct GraphCopy {
    pub ctx: Context,
    pub buffer: BackendBuffer,
}

/// Duplicate every tensor of `graph` into one fresh buffer of `backend`.
///
/// Non-view tensors get their own storage, views are re-pointed at their
/// copied source, and leaf contents are copied over. Node contents are
/// left zeroed for `backend` to compute.
pub fn graph_copy(backend: &dyn Backend, ctx: &Context, graph: &Graph) -> Result<GraphCopy> {
    let mut copy = ctx.fork();
    for id in ctx.ids() {
        copy.tensor_mut(id).data = None;
    }

    let members: Vec<TensorId> = graph.leafs().iter().chain(graph.nodes()).copied().collect();
    let align = backend.alignment();
    let size: usize = members
        .iter()
        .map(|&id| copy.tensor(id))
        .filter(|t| !t.is_view())
        .map(|t| t.nbytes().div_ceil(align) * align)
        .sum();
    let buffer = backend.alloc_buffer(size)?;

    let mut talloc = TensorAllocator::new(buffer.clone(), align);
    for &id in &members {
        if !copy.tensor(id).is_view() {
            talloc.alloc(&mut copy, id)?;
        }
    }
    for &id in &members {
        let t = copy.tensor(id);
        let Some(parent) = t.view_src else { continue };
        let offs = t.view_offs;
        let pd = copy.tensor(parent).data.clone().ok_or_else(|| {
            Error::graph(format!(
                "view {} refers to tensor {} outside the graph",
                id.index(),
                parent.index()
            ))
        })?;
        copy.set_data(
            id,
            TensorData {
                buffer: pd.buffer,
                offset: pd.offset + offs,
            },
        );
    }

    for &leaf in graph.leafs() {
        let n = ctx.tensor(leaf).nbytes();
        let bytes = ctx.tensor_get(leaf, 0, n)?;
        copy.tensor_set(leaf, &bytes, 0)?;
    }

    tracing::debug!(
        backend = backend.name(),
        bytes = size,
        n_tensors = members.len(),
        "copied graph"
    );
    Ok(GraphCopy {
        ctx: copy,
        buffer,
    })
}

/// Run `graph` on `b1` (in place, over `ctx`) and on a copy owned by `b2`.
///
/// Nodes are executed in topological order; after both backends have
/// produced node `i`, `callback(i, t1, t2)` sees the pair. Once every node
/// has run, the leafs are passed as well (indices continue after the
/// nodes) so inputs clobbered by a kernel show up. Returns `Ok(false)` if
/// the callback stopped the traversal.
pub fn compare_graph_backend<F>(
    b1: &dyn Backend,
    b2: &dyn Backend,
    ctx: &Context,
    graph: &Graph,
    mut callback: F,
) -> Result<bool>
where
    F: FnMut(usize, TensorRef<'_>, TensorRef<'_>) -> bool,
{
    let copy = graph_copy(b2, ctx, graph)?;

    for (i, &node) in graph.nodes().iter().enumerate() {
        b1.compute_node(ctx, node)?;
        b2.compute_node(&copy.ctx, node)?;
        b1.synchronize()?;
        b2.synchronize()?;

        let t1 = TensorRef::new(ctx, node, b1.name());
        let t2 = TensorRef::new(&copy.ctx, node, b2.name());
        if !callback(i, t1, t2) {
            return Ok(false);
        }
    }

    let base = graph.n_nodes();
    for (j, &leaf) in graph.leafs().iter().enumerate() {
        let t1 = TensorRef::new(ctx, leaf, b1.name());
        let t2 = TensorRef::new(&copy.ctx, leaf, b2.name());
        if !callback(base + j, t1, t2) {
            return Ok(false);
        }
    }
    Ok(true)
}
