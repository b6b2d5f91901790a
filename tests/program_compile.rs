//! Program and kernel creation on the emulated CPU device

mod common;

use common::{TEST_SOURCE, cpu_context, init_tracing, test_registry};
use dalrt::error::NativeCode;
use dalrt::prelude::*;
use dalrt::runtime::cpu::{
    CpuBuffer, CpuContext, CpuDevice, CpuEvent, CpuExecutable, CpuFault, CpuKernelHandle,
    CpuModule, CpuProgramHandle, CpuQueue, CpuRuntime,
};
use dalrt::runtime::{AxisOrder, BoundArgument, BuildFailure, LaunchShape, ResourceRef};

fn compile(source: &str, options: &str) -> Result<Program<CpuRuntime>> {
    init_tracing();
    let context = CpuContext::new(CpuDevice::new(), test_registry());
    Program::compile(&context, &CpuDevice::new(), "program", source, options)
}

#[test]
fn test_compile_lists_kernels() {
    let program = compile(TEST_SOURCE, "").unwrap();
    let object = program.handle().object().unwrap();
    let names: Vec<_> = object.kernel_names().collect();
    assert_eq!(
        names,
        vec![
            "write_constant",
            "copy_2d",
            "record_shape",
            "always_fails",
            "panics",
            "accumulate",
            "hold"
        ]
    );
    assert!(program.fast_module().is_none());
}

#[test]
fn test_undefined_kernel_fails_build() {
    let err = compile("__kernel void missing(__global int* out) {}", "").unwrap_err();
    assert_eq!(err.native_code(), Some(NativeCode::BUILD_PROGRAM_FAILURE));
}

#[test]
fn test_unbalanced_source_fails_build() {
    let err = compile("__kernel void write_constant(__global int* out, int v) {", "").unwrap_err();
    assert_eq!(err.native_code(), Some(NativeCode::BUILD_PROGRAM_FAILURE));
}

#[test]
fn test_invalid_options_rejected() {
    let err = compile(TEST_SOURCE, "-fno-such-flag").unwrap_err();
    assert_eq!(err.native_code(), Some(NativeCode::INVALID_BUILD_OPTIONS));
}

#[test]
fn test_define_options_accepted() {
    let program = compile(TEST_SOURCE, "-D TILE=16 -DUSE_FMA -cl-mad-enable").unwrap();
    assert_eq!(program.name(), "program");
}

#[test]
fn test_werror_promotes_duplicate_declaration() {
    let source = "__kernel void panics(__global int* a) {}\n\
                  __kernel void panics(__global int* a) {}\n";
    assert!(compile(source, "").is_ok());
    let err = compile(source, "-Werror").unwrap_err();
    assert_eq!(err.native_code(), Some(NativeCode::BUILD_PROGRAM_FAILURE));
}

#[test]
fn test_device_outside_context_rejected() {
    let context = CpuContext::new(CpuDevice::new(), test_registry());
    let err = Program::<CpuRuntime>::compile(
        &context,
        &CpuDevice::with_id(3),
        "program",
        TEST_SOURCE,
        "",
    )
    .unwrap_err();
    assert_eq!(err.native_code(), Some(NativeCode::INVALID_DEVICE));
}

#[test]
fn test_unknown_kernel_name() {
    let program = compile(TEST_SOURCE, "").unwrap();
    let err = Kernel::new(ExecutionTarget::Device, &program, "nope").unwrap_err();
    assert_eq!(err.native_code(), Some(NativeCode::INVALID_KERNEL_NAME));

    let context = CpuContext::new(CpuDevice::new(), test_registry());
    let fast = Program::<CpuRuntime>::compile_with(
        &context,
        &CpuDevice::new(),
        "fast",
        TEST_SOURCE,
        &CompileOptions::new().fast_path(true),
    )
    .unwrap();
    let err = Kernel::new(ExecutionTarget::Device, &fast, "nope").unwrap_err();
    assert_eq!(err.native_code(), Some(NativeCode::INVALID_KERNEL_NAME));
}

#[test]
fn test_kernel_keeps_program_alive() {
    let program = compile(TEST_SOURCE, "").unwrap();
    let kernel = Kernel::new(ExecutionTarget::Device, &program, "write_constant").unwrap();
    drop(program);
    assert_eq!(kernel.name(), "write_constant");
    assert!(!kernel.program().handle().is_null());
}

#[test]
fn test_factory_caches_per_options() {
    let ctx = cpu_context();
    let first = ctx.build_program("test", TEST_SOURCE).unwrap();
    let second = ctx.build_program("test", TEST_SOURCE).unwrap();
    assert_eq!(ctx.factory().len(), 1);
    assert_eq!(first.name(), second.name());

    let fast = CompileOptions::new().fast_path(true);
    ctx.build_program_with("test", TEST_SOURCE, &fast).unwrap();
    assert_eq!(ctx.factory().len(), 2);

    ctx.factory().clear();
    assert!(ctx.factory().is_empty());
}

#[test]
fn test_failed_build_is_not_cached() {
    let ctx = cpu_context();
    assert!(ctx.build_program("broken", "__kernel void nope(").is_err());
    assert!(ctx.factory().is_empty());
}

/// CPU runtime whose program binaries list one kernel the context cannot link
#[derive(Clone, Debug)]
struct StaleManifest;

#[derive(Clone)]
struct StaleQueue(CpuQueue);

impl RuntimeQueue<StaleManifest> for StaleQueue {
    fn context(&self) -> &CpuContext {
        <CpuQueue as RuntimeQueue<CpuRuntime>>::context(&self.0)
    }

    fn device(&self) -> &CpuDevice {
        <CpuQueue as RuntimeQueue<CpuRuntime>>::device(&self.0)
    }

    fn synchronize(&self) -> Result<()> {
        <CpuQueue as RuntimeQueue<CpuRuntime>>::synchronize(&self.0)
    }
}

impl Runtime for StaleManifest {
    type Device = CpuDevice;
    type Context = CpuContext;
    type Queue = StaleQueue;
    type Buffer = CpuBuffer;
    type ProgramHandle = CpuProgramHandle;
    type KernelHandle = CpuKernelHandle;
    type FastModule = CpuModule;
    type Executable = CpuExecutable;
    type Event = CpuEvent;
    type Fault = CpuFault;

    const AXIS_ORDER: AxisOrder = AxisOrder::Declared;

    fn name() -> &'static str {
        "stale"
    }

    fn allocate(queue: &StaleQueue, size_bytes: usize) -> Result<CpuBuffer> {
        CpuRuntime::allocate(&queue.0, size_bytes)
    }

    fn buffer_size(buffer: &CpuBuffer) -> usize {
        CpuRuntime::buffer_size(buffer)
    }

    fn write_buffer(queue: &StaleQueue, buffer: &CpuBuffer, data: &[u8]) -> Result<()> {
        CpuRuntime::write_buffer(&queue.0, buffer, data)
    }

    fn read_buffer(queue: &StaleQueue, buffer: &CpuBuffer, out: &mut [u8]) -> Result<()> {
        CpuRuntime::read_buffer(&queue.0, buffer, out)
    }

    fn build_program(
        context: &CpuContext,
        device: &CpuDevice,
        source: &str,
        options: &CompileOptions,
    ) -> std::result::Result<ResourceRef<CpuProgramHandle>, BuildFailure> {
        CpuRuntime::build_program(context, device, source, options)
    }

    fn program_binary(
        program: &ResourceRef<CpuProgramHandle>,
    ) -> std::result::Result<Vec<u8>, NativeCode> {
        let mut binary = CpuRuntime::program_binary(program)?;
        binary.extend_from_slice(b"\nnot_in_registry");
        Ok(binary)
    }

    fn load_fast_module(
        context: &CpuContext,
        binary: &[u8],
        options: &CompileOptions,
    ) -> std::result::Result<CpuModule, NativeCode> {
        CpuRuntime::load_fast_module(context, binary, options)
    }

    fn create_kernel(
        program: &ResourceRef<CpuProgramHandle>,
        name: &str,
    ) -> std::result::Result<ResourceRef<CpuKernelHandle>, NativeCode> {
        CpuRuntime::create_kernel(program, name)
    }

    fn fast_kernel(module: &CpuModule, name: &str) -> std::result::Result<CpuExecutable, NativeCode> {
        CpuRuntime::fast_kernel(module, name)
    }

    fn resolve_kernel(
        kernel: &ResourceRef<CpuKernelHandle>,
        context: &CpuContext,
    ) -> std::result::Result<CpuExecutable, CpuFault> {
        CpuRuntime::resolve_kernel(kernel, context)
    }

    fn submit(
        _queue: &StaleQueue,
        _executable: &CpuExecutable,
        _shape: LaunchShape,
        _args: Vec<BoundArgument<Self>>,
    ) -> std::result::Result<CpuEvent, CpuFault> {
        Err(CpuFault::kernel("stale manifests are never launched"))
    }

    fn wait(event: CpuEvent) -> std::result::Result<(), CpuFault> {
        CpuRuntime::wait(event)
    }
}

#[test]
fn test_fast_path_load_failure_yields_no_program() {
    init_tracing();
    let context = CpuContext::new(CpuDevice::new(), test_registry());
    let fast = CompileOptions::new().fast_path(true);

    let err = Program::<StaleManifest>::compile_with(
        &context,
        &CpuDevice::new(),
        "stale",
        TEST_SOURCE,
        &fast,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Compile { .. }));
    assert_eq!(err.native_code(), Some(NativeCode::INVALID_BINARY));

    // The same source builds once the fast path is off.
    let program = Program::<StaleManifest>::compile_with(
        &context,
        &CpuDevice::new(),
        "stale",
        TEST_SOURCE,
        &CompileOptions::new(),
    )
    .unwrap();
    assert!(program.fast_module().is_none());
}
