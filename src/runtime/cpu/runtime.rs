//! CPU runtime implementation

use std::panic::{AssertUnwindSafe, catch_unwind};

use super::buffer::CpuBuffer;
use super::device::{CpuContext, CpuDevice};
use super::fault::CpuFault;
use super::invocation::CpuInvocation;
use super::program::{self, CpuExecutable, CpuKernelHandle, CpuModule, CpuProgramHandle};
use super::queue::{CpuEvent, CpuQueue};
use crate::error::{NativeCode, Result};
use crate::runtime::args::BoundArgument;
use crate::runtime::handle::ResourceRef;
use crate::runtime::program::{BuildFailure, CompileOptions};
use crate::runtime::range::{AxisOrder, LaunchShape};
use crate::runtime::scheduler::panic_message;
use crate::runtime::{Runtime, RuntimeQueue};

/// CPU device runtime
///
/// This is the default runtime that works on any platform. Kernels are
/// native Rust functions linked by name from the context's registry and
/// executed on the queue's worker thread.
#[derive(Clone, Debug, Default)]
pub struct CpuRuntime;

impl Runtime for CpuRuntime {
    type Device = CpuDevice;
    type Context = CpuContext;
    type Queue = CpuQueue;
    type Buffer = CpuBuffer;
    type ProgramHandle = CpuProgramHandle;
    type KernelHandle = CpuKernelHandle;
    type FastModule = CpuModule;
    type Executable = CpuExecutable;
    type Event = CpuEvent;
    type Fault = CpuFault;

    const AXIS_ORDER: AxisOrder = AxisOrder::Declared;

    fn name() -> &'static str {
        "cpu"
    }

    fn allocate(_queue: &CpuQueue, size_bytes: usize) -> Result<CpuBuffer> {
        CpuBuffer::new(size_bytes)
    }

    fn buffer_size(buffer: &CpuBuffer) -> usize {
        buffer.len()
    }

    fn write_buffer(queue: &CpuQueue, buffer: &CpuBuffer, data: &[u8]) -> Result<()> {
        // Blocking write: ordered after everything already submitted.
        queue.synchronize()?;
        buffer.copy_from(data)
    }

    fn read_buffer(queue: &CpuQueue, buffer: &CpuBuffer, out: &mut [u8]) -> Result<()> {
        queue.synchronize()?;
        buffer.copy_to(out)
    }

    fn build_program(
        context: &CpuContext,
        device: &CpuDevice,
        source: &str,
        options: &CompileOptions,
    ) -> std::result::Result<ResourceRef<CpuProgramHandle>, BuildFailure> {
        program::build(context, device, source, options)
    }

    fn program_binary(
        program: &ResourceRef<CpuProgramHandle>,
    ) -> std::result::Result<Vec<u8>, NativeCode> {
        program::binary(program)
    }

    fn load_fast_module(
        context: &CpuContext,
        binary: &[u8],
        options: &CompileOptions,
    ) -> std::result::Result<CpuModule, NativeCode> {
        program::load_module(context, binary, options)
    }

    fn create_kernel(
        program: &ResourceRef<CpuProgramHandle>,
        name: &str,
    ) -> std::result::Result<ResourceRef<CpuKernelHandle>, NativeCode> {
        program::create_kernel(program, name)
    }

    fn fast_kernel(
        module: &CpuModule,
        name: &str,
    ) -> std::result::Result<CpuExecutable, NativeCode> {
        module.get(name).cloned().ok_or(NativeCode::INVALID_KERNEL_NAME)
    }

    fn resolve_kernel(
        kernel: &ResourceRef<CpuKernelHandle>,
        context: &CpuContext,
    ) -> std::result::Result<CpuExecutable, CpuFault> {
        kernel
            .object()
            .and_then(|object| object.executable(context))
            .ok_or(CpuFault::InvalidKernel)
    }

    fn submit(
        queue: &CpuQueue,
        executable: &CpuExecutable,
        shape: LaunchShape,
        args: Vec<BoundArgument<Self>>,
    ) -> std::result::Result<CpuEvent, CpuFault> {
        let executable = executable.clone();
        queue.enqueue(move || {
            let result = catch_unwind(AssertUnwindSafe(|| execute(&executable, shape, &args)))
                .unwrap_or_else(|payload| Err(CpuFault::Panicked(panic_message(payload.as_ref()))));
            // Release the queue's buffer references before signalling completion.
            drop(args);
            result
        })
    }

    fn wait(event: CpuEvent) -> std::result::Result<(), CpuFault> {
        event.wait()
    }
}

fn execute(
    executable: &CpuExecutable,
    shape: LaunchShape,
    args: &[BoundArgument<CpuRuntime>],
) -> std::result::Result<(), CpuFault> {
    let mut invocation = CpuInvocation::bind(shape, executable.options(), args)?;
    tracing::trace!(kernel = executable.name(), ?shape, "cpu kernel start");
    (executable.func())(&mut invocation)
}
