//! WebGPU runtime implementation (requires `wgpu` feature)
//!
//! Programs are WGSL compute shaders. Kernel argument `i` binds to
//! `@group(0) @binding(i)`: buffers as storage buffers, scalars (`f32`,
//! `i32`, `u32`) as small read-only storage or uniform buffers.
//!
//! Flat ranges are dispatched in `ceil(global / @workgroup_size)` groups, so
//! shaders must bounds-check their invocation id. Tiled ranges must use the
//! entry point's `@workgroup_size` as their local size.
//!
//! # Usage
//!
//! ```ignore
//! use dalrt::prelude::*;
//! use dalrt::runtime::wgpu::{WgpuDevice, WgpuQueue, WgpuRuntime};
//!
//! let ctx = ExecutionContext::<WgpuRuntime>::new(WgpuQueue::for_device(WgpuDevice::new(0))?);
//! let program = ctx.build_program("fill", FILL_WGSL)?;
//! ```

mod context;
mod device;
mod program;
mod runtime;

pub use context::{WgpuBuffer, WgpuContext, WgpuQueue};
pub use device::{WgpuDevice, WgpuError};
pub use program::{
    BindingKind, WgpuExecutable, WgpuKernelHandle, WgpuKernelObject, WgpuModule,
    WgpuProgramHandle, WgpuProgramObject,
};
pub use runtime::{WgpuEvent, WgpuRuntime, is_wgpu_available};
