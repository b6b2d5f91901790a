//! Runtime backends for kernel execution
//!
//! This module defines the `Runtime` trait, the backend-neutral pieces built
//! on it (handles, ranges, arguments, programs, kernels, the scheduler), and
//! the backends themselves (emulated CPU device, WebGPU).
//!
//! # Architecture
//!
//! ```text
//! Runtime (backend identity)
//! ├── Device        (identifies a specific GPU/CPU)
//! ├── Queue         (in-order submission, owns the context)
//! ├── ProgramHandle (ref-counted native program)
//! ├── KernelHandle  (ref-counted native kernel)
//! └── FastModule    (program binary loaded for direct dispatch)
//!
//! Program::compile -> Kernel::new -> KernelScheduler::schedule
//!                                      ├── range conversion
//!                                      ├── argument binding
//!                                      └── submit + wait
//! ```

pub mod args;
pub mod buffer;
pub mod context;
pub mod handle;
pub mod kernel;
pub mod program;
pub mod range;
pub mod scheduler;

pub mod cpu;

#[cfg(feature = "wgpu")]
pub mod wgpu;

pub use args::{AccessMode, ArgumentKind, BoundArgument, KernelArgument, KernelArguments};
pub use buffer::DeviceBuffer;
pub use context::{ContextConfig, ExecutionContext, KernelFactory};
pub use handle::{ArcRef, RefCounted, ResourceRef};
pub use kernel::{ExecutionTarget, Kernel};
pub use program::{BuildFailure, CompileOptions, Program};
pub use range::{
    AxisOrder, KernelNdRange, KernelRange, LaunchRange, LaunchShape, NativeNdRange, NativeRange,
};
pub use scheduler::{KernelScheduler, SchedulerConfig, SchedulerStats};

use crate::error::{NativeCode, Result};

/// Core trait for kernel execution backends
///
/// `Runtime` abstracts over device APIs. It uses static dispatch via generics;
/// every backend-neutral type in this module is parameterized by it.
///
/// # Associated Types
///
/// - `Device`: Identifies a specific compute unit
/// - `Context`: Device context programs are built in
/// - `Queue`: In-order submission queue bound to one context
/// - `ProgramHandle` / `KernelHandle`: ref-counted native objects
/// - `FastModule` / `Executable`: fast-path module and resolved entry points
/// - `Event` / `Fault`: submission completion and device-side failures
pub trait Runtime: Clone + Send + Sync + 'static {
    /// Device identifier type
    type Device: Device;

    /// Device context
    type Context: Clone + Send + Sync + 'static;

    /// Submission queue
    type Queue: RuntimeQueue<Self>;

    /// Untyped device memory
    type Buffer: Clone + Send + Sync + 'static;

    /// Native program handle
    type ProgramHandle: RefCounted;

    /// Native kernel handle
    type KernelHandle: RefCounted;

    /// Program binary loaded for direct kernel lookup
    type FastModule: Send + Sync + 'static;

    /// Launchable entry point
    type Executable: Clone + Send + 'static;

    /// Completion handle of one submission
    type Event;

    /// Fault raised while enqueueing or executing
    type Fault: std::error::Error + Send + Sync + 'static;

    /// Axis order the device expects for native ranges
    const AXIS_ORDER: AxisOrder;

    /// Human-readable name of this runtime
    fn name() -> &'static str;

    /// Allocate `size_bytes` of zeroed device memory
    fn allocate(queue: &Self::Queue, size_bytes: usize) -> Result<Self::Buffer>;

    /// Size of a buffer in bytes
    fn buffer_size(buffer: &Self::Buffer) -> usize;

    /// Copy host bytes into the start of a buffer
    fn write_buffer(queue: &Self::Queue, buffer: &Self::Buffer, data: &[u8]) -> Result<()>;

    /// Copy the start of a buffer into host bytes
    fn read_buffer(queue: &Self::Queue, buffer: &Self::Buffer, out: &mut [u8]) -> Result<()>;

    /// Build a program from source for `device` within `context`
    fn build_program(
        context: &Self::Context,
        device: &Self::Device,
        source: &str,
        options: &CompileOptions,
    ) -> std::result::Result<ResourceRef<Self::ProgramHandle>, BuildFailure>;

    /// Serialized binary of a built program
    fn program_binary(
        program: &ResourceRef<Self::ProgramHandle>,
    ) -> std::result::Result<Vec<u8>, NativeCode>;

    /// Load a program binary as a fast-path module
    fn load_fast_module(
        context: &Self::Context,
        binary: &[u8],
        options: &CompileOptions,
    ) -> std::result::Result<Self::FastModule, NativeCode>;

    /// Create a native kernel object for `name`
    fn create_kernel(
        program: &ResourceRef<Self::ProgramHandle>,
        name: &str,
    ) -> std::result::Result<ResourceRef<Self::KernelHandle>, NativeCode>;

    /// Look up `name` in a fast-path module
    fn fast_kernel(
        module: &Self::FastModule,
        name: &str,
    ) -> std::result::Result<Self::Executable, NativeCode>;

    /// Turn a native kernel object into a launchable entry point
    fn resolve_kernel(
        kernel: &ResourceRef<Self::KernelHandle>,
        context: &Self::Context,
    ) -> std::result::Result<Self::Executable, Self::Fault>;

    /// Enqueue one launch
    fn submit(
        queue: &Self::Queue,
        executable: &Self::Executable,
        shape: LaunchShape,
        args: Vec<BoundArgument<Self>>,
    ) -> std::result::Result<Self::Event, Self::Fault>;

    /// Block until a submission completes
    fn wait(event: Self::Event) -> std::result::Result<(), Self::Fault>;
}

/// Trait for device identification
pub trait Device: Clone + Send + Sync + 'static {
    /// Unique identifier for this device
    fn id(&self) -> usize;

    /// Check if two devices are the same
    fn is_same(&self, other: &Self) -> bool {
        self.id() == other.id()
    }

    /// Human-readable name
    fn name(&self) -> String {
        format!("Device({})", self.id())
    }
}

/// Trait for in-order submission queues
pub trait RuntimeQueue<R: Runtime>: Clone + Send + Sync {
    /// Context this queue submits into
    fn context(&self) -> &R::Context;

    /// Device this queue submits to
    fn device(&self) -> &R::Device;

    /// Wait for all pending submissions to complete
    fn synchronize(&self) -> Result<()>;
}
