//! Typed device buffers

use std::fmt;
use std::marker::PhantomData;

use super::Runtime;
use crate::dtype::Element;
use crate::error::{Error, Result};

/// Device buffer holding `len` elements of `T`
///
/// Cloning a `DeviceBuffer` shares the underlying device allocation; the
/// allocation is freed when the last clone (including clones retained by an
/// in-flight submission) is dropped.
pub struct DeviceBuffer<R: Runtime, T: Element> {
    raw: R::Buffer,
    len: usize,
    _elem: PhantomData<T>,
}

impl<R: Runtime, T: Element> DeviceBuffer<R, T> {
    /// Allocate a zero-initialized buffer of `len` elements
    pub fn zeros(queue: &R::Queue, len: usize) -> Result<Self> {
        let size = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(Error::OutOfMemory { size: usize::MAX })?;
        let raw = R::allocate(queue, size)?;
        Ok(Self {
            raw,
            len,
            _elem: PhantomData,
        })
    }

    /// Allocate a buffer and upload `data` into it
    pub fn from_slice(queue: &R::Queue, data: &[T]) -> Result<Self> {
        let buffer = Self::zeros(queue, data.len())?;
        if !data.is_empty() {
            R::write_buffer(queue, &buffer.raw, bytemuck::cast_slice(data))?;
        }
        Ok(buffer)
    }

    /// Wrap an existing raw buffer.
    ///
    /// Fails if the raw buffer is smaller than `len` elements.
    pub fn from_raw(raw: R::Buffer, len: usize) -> Result<Self> {
        let needed = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| Error::InvalidArgument {
                arg: "len",
                reason: format!("{} elements of {} overflow the address space", len, T::DTYPE),
            })?;
        let available = R::buffer_size(&raw);
        if available < needed {
            return Err(Error::InvalidArgument {
                arg: "len",
                reason: format!(
                    "buffer holds {} bytes, {} elements of {} need {}",
                    available,
                    len,
                    T::DTYPE,
                    needed
                ),
            });
        }
        Ok(Self {
            raw,
            len,
            _elem: PhantomData,
        })
    }

    /// Copy the buffer contents back to the host
    pub fn to_vec(&self, queue: &R::Queue) -> Result<Vec<T>> {
        let mut out = vec![T::zeroed(); self.len];
        if self.len > 0 {
            R::read_buffer(queue, &self.raw, bytemuck::cast_slice_mut(&mut out[..]))?;
        }
        Ok(out)
    }

    /// Overwrite the buffer contents from the host
    pub fn write(&self, queue: &R::Queue, data: &[T]) -> Result<()> {
        if data.len() != self.len {
            return Err(Error::InvalidArgument {
                arg: "data",
                reason: format!("expected {} elements, got {}", self.len, data.len()),
            });
        }
        R::write_buffer(queue, &self.raw, bytemuck::cast_slice(data))
    }

    /// Number of elements
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the buffer holds no elements
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The untyped backend buffer
    #[inline]
    pub fn raw(&self) -> &R::Buffer {
        &self.raw
    }
}

impl<R: Runtime, T: Element> Clone for DeviceBuffer<R, T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            len: self.len,
            _elem: PhantomData,
        }
    }
}

impl<R: Runtime, T: Element> fmt::Debug for DeviceBuffer<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("runtime", &R::name())
            .field("dtype", &T::DTYPE)
            .field("len", &self.len)
            .finish()
    }
}
