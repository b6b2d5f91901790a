//! Error types for dalrt

use std::fmt;
use thiserror::Error;

/// Result type alias using dalrt's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of an operation that produces no value.
///
/// Scheduling calls report success or failure through this alias so that
/// device faults never leave the runtime as anything but an [`Error`].
pub type Status = Result<()>;

/// Native error code reported by a device API.
///
/// Values follow the OpenCL numbering so codes stay comparable across
/// backends; backends without a native code space map their failures onto
/// the closest constant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NativeCode(pub i32);

impl NativeCode {
    /// Operation succeeded
    pub const SUCCESS: Self = Self(0);
    /// Host allocation failed
    pub const OUT_OF_HOST_MEMORY: Self = Self(-6);
    /// Program failed to build for the device
    pub const BUILD_PROGRAM_FAILURE: Self = Self(-11);
    /// Device does not belong to the context
    pub const INVALID_DEVICE: Self = Self(-33);
    /// Program binary could not be loaded
    pub const INVALID_BINARY: Self = Self(-42);
    /// Compiler options were rejected
    pub const INVALID_BUILD_OPTIONS: Self = Self(-43);
    /// Program handle is null or was never built
    pub const INVALID_PROGRAM: Self = Self(-44);
    /// Program has no executable for the device
    pub const INVALID_PROGRAM_EXECUTABLE: Self = Self(-45);
    /// Kernel name not found in program
    pub const INVALID_KERNEL_NAME: Self = Self(-46);
    /// Kernel handle is null
    pub const INVALID_KERNEL: Self = Self(-48);

    /// Symbolic name of the code, if known
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "SUCCESS",
            Self::OUT_OF_HOST_MEMORY => "OUT_OF_HOST_MEMORY",
            Self::BUILD_PROGRAM_FAILURE => "BUILD_PROGRAM_FAILURE",
            Self::INVALID_DEVICE => "INVALID_DEVICE",
            Self::INVALID_BINARY => "INVALID_BINARY",
            Self::INVALID_BUILD_OPTIONS => "INVALID_BUILD_OPTIONS",
            Self::INVALID_PROGRAM => "INVALID_PROGRAM",
            Self::INVALID_PROGRAM_EXECUTABLE => "INVALID_PROGRAM_EXECUTABLE",
            Self::INVALID_KERNEL_NAME => "INVALID_KERNEL_NAME",
            Self::INVALID_KERNEL => "INVALID_KERNEL",
            _ => return None,
        })
    }
}

impl fmt::Display for NativeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Errors that can occur in dalrt operations
#[derive(Error, Debug)]
pub enum Error {
    /// Program build failed, or the program's fast-path module could not be created
    #[error("Failed to compile program '{program}': {code}")]
    Compile {
        /// Name the program was compiled under
        program: String,
        /// Native error code reported by the device compiler
        code: NativeCode,
    },

    /// Device reported a fault while a kernel was enqueued or executing
    #[error("{backend} device execution error: {reason}")]
    DeviceExecution {
        /// The backend that reported the fault
        backend: &'static str,
        /// Description of the fault
        reason: String,
    },

    /// Requested execution path is not implemented
    #[error("Method not implemented: {method}")]
    MethodNotImplemented {
        /// Description of the unimplemented path
        method: &'static str,
    },

    /// Invalid argument provided to an operation
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Out of memory
    #[error("Out of memory: failed to allocate {size} bytes")]
    OutOfMemory {
        /// Requested size in bytes
        size: usize,
    },

    /// No device matched the selection criteria
    #[error("No {backend} device matches {selector}")]
    DeviceNotFound {
        /// Backend searched
        backend: &'static str,
        /// Description of the selection criteria
        selector: String,
    },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a compile error
    pub fn compile(program: impl Into<String>, code: NativeCode) -> Self {
        Self::Compile {
            program: program.into(),
            code,
        }
    }

    /// Create a device execution error from any backend fault
    pub fn device(backend: &'static str, fault: impl fmt::Display) -> Self {
        Self::DeviceExecution {
            backend,
            reason: fault.to_string(),
        }
    }

    /// Native code carried by a compile error
    pub fn native_code(&self) -> Option<NativeCode> {
        match self {
            Self::Compile { code, .. } => Some(*code),
            _ => None,
        }
    }
}
