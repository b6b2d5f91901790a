//! Common test utilities
#![allow(dead_code)]

use std::time::Duration;

use dalrt::runtime::ExecutionContext;
use dalrt::runtime::cpu::{CpuContext, CpuDevice, CpuFault, CpuQueue, CpuRuntime, KernelRegistry};
#[cfg(feature = "wgpu")]
use dalrt::runtime::wgpu::{WgpuDevice, WgpuQueue, WgpuRuntime};

/// OpenCL C declarations of the kernels registered by [`test_registry`]
pub const TEST_SOURCE: &str = r#"
__kernel void write_constant(__global int* out, int value) {
    out[get_global_id(0)] = value;
}

__kernel void copy_2d(__global const float* src, __global float* dst) {
    size_t i = get_global_id(0) * get_global_size(1) + get_global_id(1);
    dst[i] = src[i];
}

__kernel void record_shape(__global uint* out) {}

__kernel void always_fails(__global int* out) {}

__kernel void panics(__global int* out) {}

__kernel void accumulate(__global float* dst, __global const float* src) {
    dst[get_global_id(0)] += src[get_global_id(0)];
}

__kernel void hold(__global float* buf) {}
"#;

/// How long the `hold` kernel keeps its buffer locked
pub const HOLD_TIME: Duration = Duration::from_millis(300);

/// Route `tracing` output to the test harness; repeated calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builtins plus the kernels declared in [`TEST_SOURCE`]
pub fn test_registry() -> KernelRegistry {
    KernelRegistry::with_builtins()
        .with("write_constant", |inv| {
            let n = inv.global_len();
            let mut args = inv.args();
            let out = args.output::<i32>()?;
            let value = args.scalar::<i32>()?;
            if out.len() < n {
                return Err(CpuFault::OutOfBounds {
                    index: 0,
                    len: out.len(),
                    needed: n,
                });
            }
            out[..n].fill(value);
            Ok(())
        })
        .with("copy_2d", |inv| {
            let (rows, cols) = (inv.global_size(0), inv.global_size(1));
            let mut args = inv.args();
            let src = args.input::<f32>()?;
            let dst = args.output::<f32>()?;
            for r in 0..rows {
                for c in 0..cols {
                    dst[r * cols + c] = src[r * cols + c];
                }
            }
            Ok(())
        })
        .with("record_shape", |inv| {
            let shape = *inv.shape();
            let mut args = inv.args();
            let out = args.output::<u32>()?;
            out[0] = shape.dims as u32;
            for (slot, size) in out[1..4].iter_mut().zip(shape.global) {
                *slot = size as u32;
            }
            Ok(())
        })
        .with("always_fails", |_| Err(CpuFault::kernel("injected failure")))
        .with("panics", |_| panic!("kernel exploded"))
        .with("accumulate", |inv| {
            let mut args = inv.args();
            let dst = args.output::<f32>()?;
            let src = args.input::<f32>()?;
            for (d, s) in dst.iter_mut().zip(src) {
                *d += *s;
            }
            Ok(())
        })
        .with("hold", |inv| {
            let _buf = inv.args().output::<f32>()?;
            std::thread::sleep(HOLD_TIME);
            Ok(())
        })
}

/// CPU execution context with [`test_registry`] installed
pub fn cpu_context() -> ExecutionContext<CpuRuntime> {
    init_tracing();
    let context = CpuContext::new(CpuDevice::new(), test_registry());
    let queue = CpuQueue::new(context).expect("failed to start cpu queue");
    ExecutionContext::new(queue)
}

/// Create a WebGPU execution context, returning None if WebGPU is unavailable
#[cfg(feature = "wgpu")]
pub fn wgpu_context() -> Option<ExecutionContext<WgpuRuntime>> {
    init_tracing();
    if !dalrt::runtime::wgpu::is_wgpu_available() {
        println!("No GPU available, skipping test");
        return None;
    }
    let queue = WgpuQueue::for_device(WgpuDevice::new(0)).ok()?;
    Some(ExecutionContext::new(queue))
}
