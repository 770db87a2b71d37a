//! Tensor placement
//!
//! [`TensorAllocator`] bumps through a buffer for long-lived inputs.
//! [`GraphAllocator`] places a graph's intermediates with liveness-based
//! reuse and, in measure mode, reports the peak size without touching any
//! memory. Measuring and then allocating the same graph over a buffer of
//! the measured size always fits: interior free blocks are identical in
//! both passes, and the tail block, the only one whose size differs, is
//! used only when no interior block fits.

use super::buffer::BackendBuffer;
use super::context::Context;
use super::graph::Graph;
use super::tensor::{TensorData, TensorId};
use crate::error::{Error, Result};
use std::collections::HashMap;

pub const DEFAULT_ALIGNMENT: usize = 32;

#[inline]
fn align_up(x: usize, alignment: usize) -> usize {
    x.div_ceil(alignment) * alignment
}

/// Linear allocator over a single buffer
pub struct TensorAllocator {
    buffer: BackendBuffer,
    offset: usize,
    alignment: usize,
}

impl TensorAllocator {
    pub fn new(buffer: BackendBuffer, alignment: usize) -> Self {
        Self {
            buffer,
            offset: 0,
            alignment,
        }
    }

    /// Place `id` at the next aligned offset
    pub fn alloc(&mut self, ctx: &mut Context, id: TensorId) -> Result<()> {
        let size = ctx.tensor(id).nbytes();
        let offset = align_up(self.offset, self.alignment);
        if offset + size > self.buffer.size() {
            return Err(Error::AllocError {
                reason: format!(
                    "tensor '{}' needs {size} bytes at {offset}, buffer holds {}",
                    ctx.tensor(id).name,
                    self.buffer.size()
                ),
            });
        }
        ctx.set_data(
            id,
            TensorData {
                buffer: self.buffer.clone(),
                offset,
            },
        );
        self.offset = offset + size;
        Ok(())
    }

    pub fn used(&self) -> usize {
        self.offset
    }
}

#[derive(Debug, Clone, Copy)]
struct FreeBlock {
    offset: usize,
    size: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Usage {
    n_children: usize,
    n_views: usize,
}

/// Liveness-based allocator for graph intermediates
pub struct GraphAllocator {
    buffer: Option<BackendBuffer>,
    alignment: usize,
    free: Vec<FreeBlock>,
    /// tensors this allocator placed, with their aligned sizes
    owned: HashMap<TensorId, (usize, usize)>,
    max_size: usize,
}

impl GraphAllocator {
    /// Allocator that only records the peak requirement
    pub fn new_measure(alignment: usize) -> Self {
        let mut a = Self {
            buffer: None,
            alignment,
            free: Vec::new(),
            owned: HashMap::new(),
            max_size: 0,
        };
        a.reset();
        a
    }

    /// Allocator that places tensors in `buffer`
    pub fn from_buffer(buffer: BackendBuffer, alignment: usize) -> Self {
        let mut a = Self {
            buffer: Some(buffer),
            alignment,
            free: Vec::new(),
            owned: HashMap::new(),
            max_size: 0,
        };
        a.reset();
        a
    }

    pub fn is_measure(&self) -> bool {
        self.buffer.is_none()
    }

    /// Forget every placement so the next graph starts from offset 0
    pub fn reset(&mut self) {
        let size = match &self.buffer {
            Some(b) => b.size(),
            None => usize::MAX / 2,
        };
        self.free = vec![FreeBlock { offset: 0, size }];
        self.owned.clear();
        self.max_size = 0;
    }

    /// Peak bytes in use since the last reset
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Place every unplaced tensor of `graph` and return the peak size.
    ///
    /// Sources are placed before their consumer. A tensor's range is
    /// returned to the free list once its last consumer and last view have
    /// been placed. Tensors that already have storage (inputs) are left
    /// alone and never freed; neither is the graph's result.
    pub fn alloc_graph(&mut self, ctx: &mut Context, graph: &Graph) -> Result<usize> {
        let mut usage: HashMap<TensorId, Usage> = HashMap::new();
        for &node in graph.nodes() {
            let t = ctx.tensor(node);
            if let Some(vs) = t.view_src {
                usage.entry(vs).or_default().n_views += 1;
            }
            for &s in &t.src {
                usage.entry(s).or_default().n_children += 1;
            }
        }

        for &node in graph.nodes() {
            let srcs = ctx.tensor(node).src.clone();
            for &s in &srcs {
                self.allocate_tensor(ctx, s)?;
            }
            self.allocate_tensor(ctx, node)?;

            for s in srcs {
                let u = usage.entry(s).or_default();
                u.n_children = u.n_children.saturating_sub(1);
                if u.n_children > 0 || u.n_views > 0 {
                    continue;
                }
                match ctx.tensor(s).view_src {
                    Some(parent) => {
                        let p = usage.entry(parent).or_default();
                        p.n_views = p.n_views.saturating_sub(1);
                        if p.n_children == 0 && p.n_views == 0 {
                            self.free_tensor(parent);
                        }
                    }
                    None => self.free_tensor(s),
                }
            }
        }

        tracing::debug!(
            measure = self.is_measure(),
            n_nodes = graph.n_nodes(),
            peak_bytes = self.max_size,
            "allocated graph"
        );
        Ok(self.max_size)
    }

    fn is_placed(&self, ctx: &Context, id: TensorId) -> bool {
        ctx.tensor(id).data.is_some() || self.owned.contains_key(&id)
    }

    fn allocate_tensor(&mut self, ctx: &mut Context, id: TensorId) -> Result<()> {
        if self.is_placed(ctx, id) {
            return Ok(());
        }
        let t = ctx.tensor(id);
        if let Some(parent) = t.view_src {
            let view_offs = t.view_offs;
            if !self.is_placed(ctx, parent) {
                self.allocate_tensor(ctx, parent)?;
            }
            // a measured view needs no bytes of its own
            if let Some(pd) = ctx.tensor(parent).data.clone() {
                ctx.set_data(
                    id,
                    TensorData {
                        buffer: pd.buffer,
                        offset: pd.offset + view_offs,
                    },
                );
            }
            return Ok(());
        }

        let size = align_up(t.nbytes(), self.alignment);
        let offset = self.alloc_bytes(size, &t.name)?;
        self.owned.insert(id, (offset, size));
        if let Some(buffer) = &self.buffer {
            ctx.set_data(
                id,
                TensorData {
                    buffer: buffer.clone(),
                    offset,
                },
            );
        }
        Ok(())
    }

    /// Best fit among the interior free blocks, falling back to the tail.
    ///
    /// The tail is the only block whose size differs between a measure pass
    /// and a real pass, so it is never compared by size and never removed,
    /// even when empty.
    fn alloc_bytes(&mut self, size: usize, name: &str) -> Result<usize> {
        let last = self.free.len().saturating_sub(1);
        let best = self.free[..last]
            .iter()
            .enumerate()
            .filter(|(_, b)| b.size >= size)
            .min_by_key(|(_, b)| b.size)
            .map(|(i, _)| i)
            .or_else(|| self.free.get(last).filter(|b| b.size >= size).map(|_| last));
        let Some(i) = best else {
            let largest = self.free.iter().map(|b| b.size).max().unwrap_or(0);
            return Err(Error::AllocError {
                reason: format!(
                    "not enough space for '{name}': need {size} bytes, \
                     largest free block is {largest}"
                ),
            });
        };
        let block = &mut self.free[i];
        let offset = block.offset;
        block.offset += size;
        block.size -= size;
        if block.size == 0 && i != last {
            self.free.remove(i);
        }
        self.max_size = self.max_size.max(offset + size);
        Ok(offset)
    }

    fn free_tensor(&mut self, id: TensorId) {
        let Some((offset, size)) = self.owned.remove(&id) else {
            return;
        };
        let pos = self.free.partition_point(|b| b.offset < offset);
        self.free.insert(pos, FreeBlock { offset, size });
        // merge with the following block, then with the preceding one
        if pos + 1 < self.free.len() && offset + size == self.free[pos + 1].offset {
            self.free[pos].size += self.free[pos + 1].size;
            self.free.remove(pos + 1);
        }
        if pos > 0 && self.free[pos - 1].offset + self.free[pos - 1].size == offset {
            self.free[pos - 1].size += self.free[pos].size;
            self.free.remove(pos);
        }
    }
}
