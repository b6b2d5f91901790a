//! CPU device memory

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Untyped CPU device buffer
///
/// Storage is kept in `u64` words so every element type up to 8 bytes can be
/// viewed in place. Clones share the allocation; kernels take a read or write
/// lock on it for the duration of one launch.
#[derive(Clone)]
pub struct CpuBuffer {
    inner: Arc<BufferInner>,
}

struct BufferInner {
    words: RwLock<Vec<u64>>,
    len_bytes: usize,
}

const WORD: usize = std::mem::size_of::<u64>();

impl CpuBuffer {
    /// Allocate `len_bytes` of zeroed memory
    pub fn new(len_bytes: usize) -> Result<Self> {
        let n_words = len_bytes.div_ceil(WORD);
        let mut words = Vec::new();
        words
            .try_reserve_exact(n_words)
            .map_err(|_| Error::OutOfMemory { size: len_bytes })?;
        words.resize(n_words, 0);
        Ok(Self {
            inner: Arc::new(BufferInner {
                words: RwLock::new(words),
                len_bytes,
            }),
        })
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.inner.len_bytes
    }

    /// True if the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.inner.len_bytes == 0
    }

    /// Number of live references to the allocation
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// True if both buffers share one allocation
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address of the shared allocation, used to order lock acquisition
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn copy_from(&self, data: &[u8]) -> Result<()> {
        if data.len() > self.len() {
            return Err(Error::InvalidArgument {
                arg: "data",
                reason: format!("{} bytes do not fit a {}-byte buffer", data.len(), self.len()),
            });
        }
        let mut words = self.inner.words.write();
        bytemuck::cast_slice_mut::<u64, u8>(&mut words[..])[..data.len()].copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn copy_to(&self, out: &mut [u8]) -> Result<()> {
        if out.len() > self.len() {
            return Err(Error::InvalidArgument {
                arg: "out",
                reason: format!("{} bytes requested from a {}-byte buffer", out.len(), self.len()),
            });
        }
        let words = self.inner.words.read();
        out.copy_from_slice(&bytemuck::cast_slice::<u64, u8>(&words[..])[..out.len()]);
        Ok(())
    }

    pub(crate) fn lock_shared(&self) -> RwLockReadGuard<'_, Vec<u64>> {
        self.inner.words.read_recursive()
    }

    pub(crate) fn lock_exclusive(&self) -> RwLockWriteGuard<'_, Vec<u64>> {
        self.inner.words.write()
    }
}

impl fmt::Debug for CpuBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuBuffer")
            .field("len", &self.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_roundtrip_partial() {
        let buf = CpuBuffer::new(12).unwrap();
        buf.copy_from(&[1, 2, 3, 4, 5]).unwrap();
        let mut out = [0u8; 6];
        buf.copy_to(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 0]);
    }

    #[test]
    fn test_copy_bounds() {
        let buf = CpuBuffer::new(4).unwrap();
        assert!(buf.copy_from(&[0; 5]).is_err());
        assert!(buf.copy_to(&mut [0; 5]).is_err());
    }

    #[test]
    fn test_clones_share_allocation() {
        let a = CpuBuffer::new(8).unwrap();
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.ref_count(), 2);
        assert!(!a.ptr_eq(&CpuBuffer::new(8).unwrap()));
    }
}
