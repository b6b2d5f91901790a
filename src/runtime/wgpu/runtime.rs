//! WebGPU runtime implementation

use std::fmt;
use std::sync::Arc;
use wgpu::BufferUsages;

use super::context::{WaitFor, WgpuBuffer, WgpuContext, WgpuQueue};
use super::device::{WgpuDevice, WgpuError};
use super::program::{self, WgpuExecutable, WgpuKernelHandle, WgpuModule, WgpuProgramHandle};
use crate::dtype::{DType, Scalar};
use crate::error::{NativeCode, Result};
use crate::runtime::args::BoundArgument;
use crate::runtime::handle::ResourceRef;
use crate::runtime::program::{BuildFailure, CompileOptions};
use crate::runtime::range::{AxisOrder, LaunchShape, MAX_DIMENSIONS};
use crate::runtime::{Runtime, RuntimeQueue};

/// Scalars are uploaded in buffers of this size (the uniform minimum)
const SCALAR_BUFFER_SIZE: usize = 16;

/// WebGPU Runtime adapter
///
/// Implements the generic Runtime trait for the WebGPU backend.
/// Native ranges are reversed: `global_invocation_id.x` walks the last
/// declared axis.
#[derive(Clone, Debug, Default)]
pub struct WgpuRuntime;

/// Completion handle of one WebGPU submission
pub struct WgpuEvent {
    context: WgpuContext,
    submission: wgpu::SubmissionIndex,
    _resources: Vec<Arc<wgpu::Buffer>>,
}

impl fmt::Debug for WgpuEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuEvent").finish_non_exhaustive()
    }
}

impl Runtime for WgpuRuntime {
    type Device = WgpuDevice;
    type Context = WgpuContext;
    type Queue = WgpuQueue;
    type Buffer = WgpuBuffer;
    type ProgramHandle = WgpuProgramHandle;
    type KernelHandle = WgpuKernelHandle;
    type FastModule = WgpuModule;
    type Executable = WgpuExecutable;
    type Event = WgpuEvent;
    type Fault = WgpuError;

    const AXIS_ORDER: AxisOrder = AxisOrder::Reversed;

    fn name() -> &'static str {
        "wgpu"
    }

    fn allocate(queue: &WgpuQueue, size_bytes: usize) -> Result<WgpuBuffer> {
        Ok(WgpuBuffer::new(queue.context(), size_bytes))
    }

    fn buffer_size(buffer: &WgpuBuffer) -> usize {
        buffer.len()
    }

    fn write_buffer(queue: &WgpuQueue, buffer: &WgpuBuffer, data: &[u8]) -> Result<()> {
        buffer.write(queue.context(), data)
    }

    fn read_buffer(queue: &WgpuQueue, buffer: &WgpuBuffer, out: &mut [u8]) -> Result<()> {
        buffer.read(queue.context(), 0, out)
    }

    fn build_program(
        context: &WgpuContext,
        device: &WgpuDevice,
        source: &str,
        options: &CompileOptions,
    ) -> std::result::Result<ResourceRef<WgpuProgramHandle>, BuildFailure> {
        program::build(context, device, source, options)
    }

    fn program_binary(
        program: &ResourceRef<WgpuProgramHandle>,
    ) -> std::result::Result<Vec<u8>, NativeCode> {
        program::binary(program)
    }

    fn load_fast_module(
        context: &WgpuContext,
        binary: &[u8],
        _options: &CompileOptions,
    ) -> std::result::Result<WgpuModule, NativeCode> {
        // Defines are already part of the binary's source.
        program::load_module(context, binary)
    }

    fn create_kernel(
        program: &ResourceRef<WgpuProgramHandle>,
        name: &str,
    ) -> std::result::Result<ResourceRef<WgpuKernelHandle>, NativeCode> {
        program::create_kernel(program, name)
    }

    fn fast_kernel(
        module: &WgpuModule,
        name: &str,
    ) -> std::result::Result<WgpuExecutable, NativeCode> {
        module.get(name).cloned().ok_or(NativeCode::INVALID_KERNEL_NAME)
    }

    fn resolve_kernel(
        kernel: &ResourceRef<WgpuKernelHandle>,
        context: &WgpuContext,
    ) -> std::result::Result<WgpuExecutable, WgpuError> {
        kernel
            .object()
            .and_then(|object| object.executable(context))
            .ok_or(WgpuError::InvalidKernel)
    }

    fn submit(
        queue: &WgpuQueue,
        executable: &WgpuExecutable,
        shape: LaunchShape,
        args: Vec<BoundArgument<Self>>,
    ) -> std::result::Result<WgpuEvent, WgpuError> {
        let context = queue.context();
        let device = context.wgpu_device();
        let limit = device.limits().max_compute_workgroups_per_dimension;
        let [x, y, z] = dispatch_size(executable.workgroup_size, &shape, limit)?;

        if args.len() != executable.bindings.len() {
            return Err(WgpuError::ArgumentCount {
                expected: executable.bindings.len(),
                got: args.len(),
            });
        }

        let mut resources = Vec::with_capacity(args.len());
        for (index, (arg, kind)) in args.iter().zip(executable.bindings.iter()).enumerate() {
            let resource = match arg {
                BoundArgument::Buffer { buffer, access, .. } => {
                    if kind.is_writable() && !access.is_write() {
                        return Err(WgpuError::AccessMismatch { index });
                    }
                    buffer.raw_arc()
                }
                BoundArgument::Scalar(value) => {
                    if kind.is_writable() {
                        return Err(WgpuError::AccessMismatch { index });
                    }
                    Arc::new(scalar_buffer(context, index, value)?)
                }
            };
            resources.push(resource);
        }

        let entries: Vec<wgpu::BindGroupEntry> = resources
            .iter()
            .enumerate()
            .map(|(i, buffer)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(executable.name()),
            layout: &executable.bind_group_layout,
            entries: &entries,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(executable.name()),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(executable.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&executable.pipeline);
            pass.set_bind_group(0, Some(&bind_group), &[]);
            pass.dispatch_workgroups(x, y, z);
        }

        tracing::trace!(kernel = executable.name(), ?shape, groups = ?[x, y, z], "wgpu dispatch");
        let submission = context
            .wgpu_queue()
            .submit(std::iter::once(encoder.finish()));

        Ok(WgpuEvent {
            context: context.clone(),
            submission,
            _resources: resources,
        })
    }

    fn wait(event: WgpuEvent) -> std::result::Result<(), WgpuError> {
        event.context.poll_wait(Some(event.submission), WaitFor::Completion)
    }
}

/// Workgroup counts for `shape` launched with `workgroup` sized groups.
///
/// Flat ranges round up; tiled ranges must match the declared workgroup
/// size and divide evenly.
pub(crate) fn dispatch_size(
    workgroup: [u32; 3],
    shape: &LaunchShape,
    limit: u32,
) -> std::result::Result<[u32; 3], WgpuError> {
    let mut groups = [1u32; MAX_DIMENSIONS];
    for axis in 0..MAX_DIMENSIONS {
        let size = workgroup[axis].max(1) as usize;
        let global = shape.global[axis];
        let count = match shape.local {
            Some(local) => {
                if local[axis] != size {
                    return Err(WgpuError::WorkgroupMismatch {
                        axis,
                        local: local[axis],
                        workgroup: workgroup[axis],
                    });
                }
                if global % size != 0 {
                    return Err(WgpuError::NonUniformRange {
                        axis,
                        global,
                        local: size,
                    });
                }
                global / size
            }
            None => global.div_ceil(size),
        };
        if count > limit as usize {
            return Err(WgpuError::DispatchTooLarge {
                axis,
                groups: count,
                limit,
            });
        }
        groups[axis] = count as u32;
    }
    Ok(groups)
}

fn scalar_buffer(
    context: &WgpuContext,
    index: usize,
    value: &Scalar,
) -> std::result::Result<wgpu::Buffer, WgpuError> {
    use wgpu::util::DeviceExt;

    match value.dtype() {
        DType::F32 | DType::I32 | DType::U32 => {}
        dtype => return Err(WgpuError::UnsupportedScalar { index, dtype }),
    }
    let mut contents = [0u8; SCALAR_BUFFER_SIZE];
    let bytes = value.to_le_bytes();
    contents[..bytes.len()].copy_from_slice(&bytes);

    Ok(context
        .wgpu_device()
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("dalrt scalar argument"),
            contents: &contents,
            usage: BufferUsages::STORAGE | BufferUsages::UNIFORM,
        }))
}

/// Check if WebGPU is available on this system
pub fn is_wgpu_available() -> bool {
    super::device::query_adapter_info_blocking(0).is_ok()
}
