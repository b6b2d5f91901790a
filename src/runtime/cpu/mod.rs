//! CPU device runtime
//!
//! The host CPU presented as an OpenCL-style device: programs are built from
//! OpenCL C source text, kernels are native Rust functions registered by
//! name, and launches run in order on a per-queue worker thread.
//!
//! # Usage
//!
//! ```
//! use dalrt::prelude::*;
//! use dalrt::runtime::cpu::{BUILTIN_SOURCE, CpuContext, CpuQueue, CpuRuntime};
//!
//! # fn main() -> dalrt::error::Result<()> {
//! let queue = CpuQueue::new(CpuContext::with_builtins())?;
//! let ctx = ExecutionContext::<CpuRuntime>::new(queue);
//!
//! let program = ctx.build_program("builtins", BUILTIN_SOURCE)?;
//! let fill = ctx.kernel(&program, "fill_f32")?;
//!
//! let out = ctx.zeros::<f32>(4)?;
//! let args = KernelArguments::new()
//!     .with(KernelArgument::buffer(&out, AccessMode::Write))
//!     .with(KernelArgument::constant(2.5f32));
//! ctx.run(&fill, KernelRange::new_1d(4), &args)?;
//!
//! assert_eq!(ctx.read(&out)?, vec![2.5; 4]);
//! # Ok(())
//! # }
//! ```

mod buffer;
mod device;
mod fault;
mod invocation;
mod kernels;
mod program;
mod queue;
mod runtime;

pub use buffer::CpuBuffer;
pub use device::{CpuContext, CpuDevice};
pub use fault::CpuFault;
pub use invocation::{CpuArgs, CpuInvocation};
pub use kernels::{BUILTIN_SOURCE, CpuKernelFn, KernelRegistry};
pub use program::{
    CpuExecutable, CpuKernelHandle, CpuKernelObject, CpuModule, CpuProgramHandle,
    CpuProgramObject,
};
pub use queue::{CpuEvent, CpuQueue};
pub use runtime::CpuRuntime;
