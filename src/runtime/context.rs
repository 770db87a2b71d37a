//! Tensor arena

use super::tensor::{MAX_DIMS, TensorData, TensorId, TensorMeta};
use crate::error::{Error, Result};
use crate::format::gguf::GgmlType;

/// Arena owning the metadata of every tensor in a computation.
///
/// Graph construction forks the input context so the inputs' metadata is
/// shared by value while each graph gets its own node set and placements.
#[derive(Debug, Clone, Default)]
pub struct Context {
    tensors: Vec<TensorMeta>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent copy; every existing [`TensorId`] stays valid in both
    pub fn fork(&self) -> Self {
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = TensorId> + '_ {
        (0..self.tensors.len()).map(TensorId)
    }

    pub fn new_tensor(&mut self, ty: GgmlType, ne: &[usize]) -> Result<TensorId> {
        if ne.is_empty() || ne.len() > MAX_DIMS {
            return Err(Error::InvalidArgument {
                arg: "ne",
                reason: format!("expected 1..={MAX_DIMS} dims, got {}", ne.len()),
            });
        }
        let mut dims = [1usize; MAX_DIMS];
        dims[..ne.len()].copy_from_slice(ne);
        if dims[0] % ty.block_size() != 0 {
            return Err(Error::InvalidArgument {
                arg: "ne",
                reason: format!(
                    "ne[0] = {} is not a multiple of the {ty} block size {}",
                    dims[0],
                    ty.block_size()
                ),
            });
        }
        Ok(self.push(TensorMeta::contiguous(ty, dims)))
    }

    pub fn new_tensor_1d(&mut self, ty: GgmlType, ne0: usize) -> Result<TensorId> {
        self.new_tensor(ty, &[ne0])
    }

    pub fn new_tensor_2d(&mut self, ty: GgmlType, ne0: usize, ne1: usize) -> Result<TensorId> {
        self.new_tensor(ty, &[ne0, ne1])
    }

    pub fn new_tensor_3d(
        &mut self,
        ty: GgmlType,
        ne0: usize,
        ne1: usize,
        ne2: usize,
    ) -> Result<TensorId> {
        self.new_tensor(ty, &[ne0, ne1, ne2])
    }

    pub(crate) fn push(&mut self, meta: TensorMeta) -> TensorId {
        self.tensors.push(meta);
        TensorId(self.tensors.len() - 1)
    }

    /// Panics on an id from an unrelated context
    pub fn tensor(&self, id: TensorId) -> &TensorMeta {
        &self.tensors[id.0]
    }

    pub(crate) fn tensor_mut(&mut self, id: TensorId) -> &mut TensorMeta {
        &mut self.tensors[id.0]
    }

    pub fn get(&self, id: TensorId) -> Option<&TensorMeta> {
        self.tensors.get(id.0)
    }

    pub fn set_name(&mut self, id: TensorId, name: impl Into<String>) {
        self.tensors[id.0].name = name.into();
    }

    pub fn set_data(&mut self, id: TensorId, data: TensorData) {
        self.tensors[id.0].data = Some(data);
    }

    fn placement(&self, id: TensorId) -> Result<&TensorData> {
        let t = self.tensor(id);
        t.data.as_ref().ok_or_else(|| Error::AllocError {
            reason: format!("tensor {} ('{}') has no storage", id.0, t.name),
        })
    }

    fn check_span(&self, id: TensorId, offset: usize, len: usize) -> Result<()> {
        let nbytes = self.tensor(id).nbytes();
        if offset + len > nbytes {
            return Err(Error::InvalidArgument {
                arg: "offset",
                reason: format!(
                    "{offset}+{len} exceeds the {nbytes} bytes of tensor '{}'",
                    self.tensor(id).name
                ),
            });
        }
        Ok(())
    }

    /// Upload host bytes into the tensor's storage at byte `offset`
    pub fn tensor_set(&self, id: TensorId, bytes: &[u8], offset: usize) -> Result<()> {
        self.check_span(id, offset, bytes.len())?;
        let data = self.placement(id)?;
        data.buffer.write(data.offset + offset, bytes)
    }

    /// Download `len` bytes of the tensor's storage from byte `offset`
    pub fn tensor_get(&self, id: TensorId, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.check_span(id, offset, len)?;
        let data = self.placement(id)?;
        data.buffer.read(data.offset + offset, len)
    }

    /// Borrow the full byte span of a tensor (`nbytes`) under a read lock
    pub fn with_tensor_bytes<T>(
        &self,
        id: TensorId,
        f: impl FnOnce(&TensorMeta, &[u8]) -> Result<T>,
    ) -> Result<T> {
        let meta = self.tensor(id);
        let data = self.placement(id)?;
        data.buffer
            .with_bytes(data.offset, meta.nbytes(), |bytes| f(meta, bytes))
    }
}
