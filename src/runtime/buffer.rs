//! Backend-owned byte buffers

use crate::error::{Error, Result};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Shared handle to a block of backend memory.
///
/// Clones refer to the same storage. Reads take a shared lock, writes an
/// exclusive one, so kernels may read sources while the host holds no guard.
#[derive(Clone)]
pub struct BackendBuffer {
    inner: Arc<BufferInner>,
}

struct BufferInner {
    backend: String,
    size: usize,
    data: RwLock<Vec<u8>>,
}

impl BackendBuffer {
    pub fn new(backend: impl Into<String>, size: usize) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                backend: backend.into(),
                size,
                data: RwLock::new(vec![0u8; size]),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Name of the backend that owns this buffer
    pub fn backend(&self) -> &str {
        &self.inner.backend
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.inner.size => Ok(()),
            _ => Err(Error::backend(
                &self.inner.backend,
                format!(
                    "access {offset}..{} out of bounds for buffer of {} bytes",
                    offset.saturating_add(len),
                    self.inner.size
                ),
            )),
        }
    }

    /// Run `f` over `len` bytes starting at `offset` under a read lock
    pub fn with_bytes<T>(
        &self,
        offset: usize,
        len: usize,
        f: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        self.check_range(offset, len)?;
        let guard = self
            .inner
            .data
            .read()
            .map_err(|_| Error::backend(&self.inner.backend, "buffer lock poisoned"))?;
        f(&guard[offset..offset + len])
    }

    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.with_bytes(offset, len, |b| Ok(b.to_vec()))
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_range(offset, bytes.len())?;
        let mut guard = self
            .inner
            .data
            .write()
            .map_err(|_| Error::backend(&self.inner.backend, "buffer lock poisoned"))?;
        guard[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl fmt::Debug for BackendBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendBuffer")
            .field("backend", &self.inner.backend)
            .field("size", &self.inner.size)
            .finish()
    }
}
