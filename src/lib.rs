//! # dalrt
//!
//! **Device kernel scheduling and heterogeneous execution dispatch.**
//!
//! dalrt is the layer that lets one algorithm implementation launch the same
//! kernels on different compute devices. It compiles kernel programs per
//! device, binds typed arguments, converts iteration ranges to each device's
//! native axis order, and submits launches to an in-order queue, blocking
//! until they complete.
//!
//! ## Features
//!
//! - **Resource references**: RAII ownership of retain/release-counted handles
//! - **Program compiler**: per-device builds with build logs and an optional
//!   fast-path module
//! - **Argument binder**: closed set of argument kinds (buffer, local, constant)
//! - **Range converter**: 1-3 dimensional flat and tiled ranges, per-backend
//!   axis order
//! - **Kernel scheduler**: buffer lifetime tied to the submission, device faults
//!   converted into `Status` values
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dalrt::prelude::*;
//! use dalrt::runtime::cpu::{CpuContext, CpuQueue};
//!
//! let ctx = ExecutionContext::<CpuRuntime>::new(CpuQueue::new(CpuContext::with_builtins())?);
//! let program = ctx.build_program("builtins", dalrt::runtime::cpu::BUILTIN_SOURCE)?;
//! let fill = ctx.kernel(&program, "fill_f32")?;
//!
//! let out = ctx.zeros::<f32>(16)?;
//! let args = KernelArguments::new()
//!     .with(KernelArgument::buffer(&out, AccessMode::Write))
//!     .with(KernelArgument::constant(1.0f32));
//! ctx.run(&fill, KernelRange::new_1d(16), &args)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `rayon` (default): Multi-threaded builtin CPU kernels
//! - `wgpu`: Cross-platform GPU via WebGPU

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod algorithm;
pub mod dtype;
pub mod error;
pub mod runtime;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::dtype::{DType, Element, Scalar};
    pub use crate::error::{Error, Result, Status};
    pub use crate::runtime::{
        AccessMode, CompileOptions, Device, DeviceBuffer, ExecutionContext, ExecutionTarget,
        Kernel, KernelArgument, KernelArguments, KernelNdRange, KernelRange, KernelScheduler,
        Program, Runtime, RuntimeQueue,
    };

    pub use crate::runtime::cpu::CpuRuntime;

    #[cfg(feature = "wgpu")]
    pub use crate::runtime::wgpu::WgpuRuntime;
}

/// Default runtime based on enabled features
///
/// - With `wgpu` feature: `WgpuRuntime`
/// - Otherwise: `CpuRuntime`
#[cfg(feature = "wgpu")]
pub type DefaultRuntime = runtime::wgpu::WgpuRuntime;

/// Default runtime based on enabled features
#[cfg(not(feature = "wgpu"))]
pub type DefaultRuntime = runtime::cpu::CpuRuntime;
