//! Kernel arguments
//!
//! A kernel argument is one of three kinds: a public buffer with an access
//! mode, a private (work-group local) buffer, or a scalar constant. The kind
//! is a closed enum so every consumer matches it exhaustively.

use std::fmt;

use super::Runtime;
use super::buffer::DeviceBuffer;
use crate::dtype::{DType, Element, Scalar};

/// How a kernel accesses a buffer argument
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Kernel only reads the buffer
    Read,
    /// Kernel only writes the buffer
    Write,
    /// Kernel reads and writes the buffer
    ReadWrite,
}

impl AccessMode {
    /// True if the kernel may modify the buffer
    #[inline]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Kind tag of a kernel argument
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArgumentKind {
    /// Device-visible buffer
    PublicBuffer,
    /// Work-group local buffer
    PrivateBuffer,
    /// Scalar passed by value
    PublicConstant,
}

/// A single kernel argument
pub enum KernelArgument<R: Runtime> {
    /// Device-visible buffer
    Buffer {
        /// The device buffer
        buffer: R::Buffer,
        /// Element type of the buffer
        dtype: DType,
        /// Declared access mode
        access: AccessMode,
    },
    /// Work-group local buffer of `len` elements (not supported by the scheduler)
    Local {
        /// Element type
        dtype: DType,
        /// Number of elements
        len: usize,
    },
    /// Scalar constant copied into the argument slot
    Constant(Scalar),
}

impl<R: Runtime> KernelArgument<R> {
    /// Buffer argument with the given access mode
    pub fn buffer<T: Element>(buffer: &DeviceBuffer<R, T>, access: AccessMode) -> Self {
        Self::Buffer {
            buffer: buffer.raw().clone(),
            dtype: T::DTYPE,
            access,
        }
    }

    /// Work-group local buffer of `len` elements
    pub fn local<T: Element>(len: usize) -> Self {
        Self::Local {
            dtype: T::DTYPE,
            len,
        }
    }

    /// Scalar constant argument
    pub fn constant<T: Element>(value: T) -> Self {
        Self::Constant(value.into_scalar())
    }

    /// Kind tag of this argument
    pub fn kind(&self) -> ArgumentKind {
        match self {
            Self::Buffer { .. } => ArgumentKind::PublicBuffer,
            Self::Local { .. } => ArgumentKind::PrivateBuffer,
            Self::Constant(_) => ArgumentKind::PublicConstant,
        }
    }

    /// Element type of the argument
    pub fn dtype(&self) -> DType {
        match self {
            Self::Buffer { dtype, .. } | Self::Local { dtype, .. } => *dtype,
            Self::Constant(value) => value.dtype(),
        }
    }

    /// Access mode, for buffer arguments
    pub fn access(&self) -> Option<AccessMode> {
        match self {
            Self::Buffer { access, .. } => Some(*access),
            _ => None,
        }
    }
}

impl<R: Runtime> Clone for KernelArgument<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Buffer {
                buffer,
                dtype,
                access,
            } => Self::Buffer {
                buffer: buffer.clone(),
                dtype: *dtype,
                access: *access,
            },
            Self::Local { dtype, len } => Self::Local {
                dtype: *dtype,
                len: *len,
            },
            Self::Constant(value) => Self::Constant(*value),
        }
    }
}

impl<R: Runtime> fmt::Debug for KernelArgument<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer { dtype, access, .. } => f
                .debug_struct("Buffer")
                .field("dtype", dtype)
                .field("access", access)
                .finish_non_exhaustive(),
            Self::Local { dtype, len } => f
                .debug_struct("Local")
                .field("dtype", dtype)
                .field("len", len)
                .finish(),
            Self::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
        }
    }
}

/// Ordered list of kernel arguments; position `i` binds to kernel parameter `i`
pub struct KernelArguments<R: Runtime> {
    args: Vec<KernelArgument<R>>,
}

impl<R: Runtime> KernelArguments<R> {
    /// Empty argument list
    pub fn new() -> Self {
        Self { args: Vec::new() }
    }

    /// Empty argument list with room for `n` arguments
    pub fn with_capacity(n: usize) -> Self {
        Self {
            args: Vec::with_capacity(n),
        }
    }

    /// Append an argument
    pub fn push(&mut self, arg: KernelArgument<R>) -> &mut Self {
        self.args.push(arg);
        self
    }

    /// Append a buffer argument
    pub fn push_buffer<T: Element>(
        &mut self,
        buffer: &DeviceBuffer<R, T>,
        access: AccessMode,
    ) -> &mut Self {
        self.push(KernelArgument::buffer(buffer, access))
    }

    /// Append a scalar constant argument
    pub fn push_constant<T: Element>(&mut self, value: T) -> &mut Self {
        self.push(KernelArgument::constant(value))
    }

    /// Builder-style append
    pub fn with(mut self, arg: KernelArgument<R>) -> Self {
        self.args.push(arg);
        self
    }

    /// Replace the argument at `index`
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn set(&mut self, index: usize, arg: KernelArgument<R>) {
        self.args[index] = arg;
    }

    /// Argument at `index`
    pub fn get(&self, index: usize) -> Option<&KernelArgument<R>> {
        self.args.get(index)
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// True if there are no arguments
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Iterate over arguments in index order
    pub fn iter(&self) -> std::slice::Iter<'_, KernelArgument<R>> {
        self.args.iter()
    }
}

impl<R: Runtime> Default for KernelArguments<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Runtime> Clone for KernelArguments<R> {
    fn clone(&self) -> Self {
        Self {
            args: self.args.clone(),
        }
    }
}

impl<R: Runtime> fmt::Debug for KernelArguments<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.args.iter()).finish()
    }
}

impl<R: Runtime> FromIterator<KernelArgument<R>> for KernelArguments<R> {
    fn from_iter<I: IntoIterator<Item = KernelArgument<R>>>(iter: I) -> Self {
        Self {
            args: iter.into_iter().collect(),
        }
    }
}

impl<R: Runtime> From<Vec<KernelArgument<R>>> for KernelArguments<R> {
    fn from(args: Vec<KernelArgument<R>>) -> Self {
        Self { args }
    }
}

impl<'a, R: Runtime> IntoIterator for &'a KernelArguments<R> {
    type Item = &'a KernelArgument<R>;
    type IntoIter = std::slice::Iter<'a, KernelArgument<R>>;

    fn into_iter(self) -> Self::IntoIter {
        self.args.iter()
    }
}

/// An argument after binding, as handed to a backend for submission
pub enum BoundArgument<R: Runtime> {
    /// Buffer view with the access mode the kernel was granted
    Buffer {
        /// The device buffer
        buffer: R::Buffer,
        /// Element type of the buffer
        dtype: DType,
        /// Granted access mode
        access: AccessMode,
    },
    /// Scalar value copied into the slot
    Scalar(Scalar),
}

impl<R: Runtime> fmt::Debug for BoundArgument<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer { dtype, access, .. } => f
                .debug_struct("Buffer")
                .field("dtype", dtype)
                .field("access", access)
                .finish_non_exhaustive(),
            Self::Scalar(value) => f.debug_tuple("Scalar").field(value).finish(),
        }
    }
}
