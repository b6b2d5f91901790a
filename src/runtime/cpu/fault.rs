//! CPU device faults

use thiserror::Error;

use crate::dtype::DType;

/// Fault raised by the CPU device while enqueueing or executing a kernel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CpuFault {
    /// Kernel reported a failure
    #[error("kernel fault: {0}")]
    Kernel(String),

    /// Kernel panicked
    #[error("kernel panicked: {0}")]
    Panicked(String),

    /// A written buffer is bound to more than one argument
    #[error("argument {index} aliases a buffer written by another argument")]
    BufferAliasing {
        /// Argument index
        index: usize,
    },

    /// Argument slot missing
    #[error("kernel expects argument {index}, but only {bound} were bound")]
    MissingArgument {
        /// Argument index
        index: usize,
        /// Number of bound arguments
        bound: usize,
    },

    /// Argument is of a different kind than the kernel expects
    #[error("argument {index} is not a {expected}")]
    ArgumentKind {
        /// Argument index
        index: usize,
        /// Expected kind
        expected: &'static str,
    },

    /// Argument element type does not match the kernel's parameter
    #[error("argument {index} has type {got}, kernel expects {expected}")]
    ArgumentType {
        /// Argument index
        index: usize,
        /// Parameter type
        expected: DType,
        /// Bound type
        got: DType,
    },

    /// Kernel writes a buffer bound with read-only access
    #[error("argument {index} is bound read-only")]
    ReadOnly {
        /// Argument index
        index: usize,
    },

    /// Buffer is too small for the launch range
    #[error("argument {index} holds {len} elements, launch needs {needed}")]
    OutOfBounds {
        /// Argument index
        index: usize,
        /// Elements in the buffer
        len: usize,
        /// Elements the launch touches
        needed: usize,
    },

    /// Kernel handle is null or belongs to another context
    #[error("invalid kernel object")]
    InvalidKernel,

    /// Queue worker is gone
    #[error("command queue is closed")]
    QueueClosed,
}

impl CpuFault {
    /// Kernel-reported failure
    pub fn kernel(reason: impl Into<String>) -> Self {
        Self::Kernel(reason.into())
    }
}
