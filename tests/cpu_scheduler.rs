//! Kernel scheduling on the emulated CPU device
//!
//! End-to-end launches through the scheduler: argument binding, range
//! conversion, buffer lifetime, and conversion of device faults into errors.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use common::{HOLD_TIME, TEST_SOURCE, cpu_context, init_tracing, test_registry};
use dalrt::prelude::*;
use dalrt::runtime::cpu::{CpuBuffer, CpuContext, CpuDevice, CpuQueue};
use dalrt::runtime::{AxisOrder, ContextConfig};

#[test]
fn test_write_constant_end_to_end() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = ctx.kernel(&program, "write_constant").unwrap();

    let out = ctx.zeros::<i32>(64).unwrap();
    let args = KernelArguments::new()
        .with(KernelArgument::buffer(&out, AccessMode::Write))
        .with(KernelArgument::constant(42i32));
    ctx.run(&kernel, KernelRange::new_1d(64), &args).unwrap();

    assert_eq!(ctx.read(&out).unwrap(), vec![42; 64]);
    let stats = ctx.scheduler().stats();
    assert_eq!(stats.submitted(), 1);
    assert_eq!(stats.completed(), 1);
    assert_eq!(stats.failed(), 0);
}

#[test]
fn test_single_element_constant() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = ctx.kernel(&program, "write_constant").unwrap();

    let out = ctx.zeros::<i32>(1).unwrap();
    let args = KernelArguments::new()
        .with(KernelArgument::buffer(&out, AccessMode::Write))
        .with(KernelArgument::constant(42i32));
    ctx.run(&kernel, KernelRange::new_1d(1), &args).unwrap();

    assert_eq!(ctx.read(&out).unwrap(), vec![42]);
}

#[test]
fn test_builtin_axpy() {
    let ctx = cpu_context();
    let program = ctx
        .build_program("builtins", dalrt::runtime::cpu::BUILTIN_SOURCE)
        .unwrap();
    let axpy = ctx.kernel(&program, "axpy_f32").unwrap();

    let x = ctx.buffer(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let y = ctx.buffer(&[10.0f32, 20.0, 30.0, 40.0]).unwrap();
    let args = KernelArguments::new()
        .with(KernelArgument::constant(2.0f32))
        .with(KernelArgument::buffer(&x, AccessMode::Read))
        .with(KernelArgument::buffer(&y, AccessMode::ReadWrite));
    ctx.run(&axpy, KernelRange::new_1d(4), &args).unwrap();

    assert_eq!(ctx.read(&y).unwrap(), vec![12.0, 24.0, 36.0, 48.0]);
}

#[test]
fn test_nearest_centroid_labels() {
    let ctx = cpu_context();
    let program = ctx
        .build_program("builtins", dalrt::runtime::cpu::BUILTIN_SOURCE)
        .unwrap();
    let kernel = ctx.kernel(&program, "nearest_centroid_f32").unwrap();

    let data = ctx
        .buffer(&[0.0f32, 0.1, 9.8, 10.0, 0.2, -0.1, 10.3, 9.9])
        .unwrap();
    let centroids = ctx.buffer(&[0.0f32, 0.0, 10.0, 10.0]).unwrap();
    let labels = ctx.zeros::<i32>(4).unwrap();
    let args = KernelArguments::new()
        .with(KernelArgument::buffer(&data, AccessMode::Read))
        .with(KernelArgument::buffer(&centroids, AccessMode::Read))
        .with(KernelArgument::buffer(&labels, AccessMode::Write))
        .with(KernelArgument::constant(2u32))
        .with(KernelArgument::constant(2u32));
    ctx.run(&kernel, KernelRange::new_1d(4), &args).unwrap();

    assert_eq!(ctx.read(&labels).unwrap(), vec![0, 1, 0, 1]);
}

#[test]
fn test_host_target_is_rejected_without_submission() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = Kernel::new(ExecutionTarget::Host, &program, "write_constant").unwrap();

    let out = ctx.zeros::<i32>(8).unwrap();
    let args = KernelArguments::new()
        .with(KernelArgument::buffer(&out, AccessMode::Write))
        .with(KernelArgument::constant(7i32));

    let before = ctx.queue().submitted();
    let err = ctx.run(&kernel, KernelRange::new_1d(8), &args).unwrap_err();

    assert!(matches!(err, Error::MethodNotImplemented { .. }));
    assert_eq!(ctx.queue().submitted(), before);
    assert_eq!(ctx.scheduler().stats().rejected(), 1);
    assert_eq!(ctx.read(&out).unwrap(), vec![0; 8]);
}

#[test]
fn test_kernel_fault_becomes_error() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = ctx.kernel(&program, "always_fails").unwrap();

    let out = ctx.zeros::<i32>(1).unwrap();
    let args = KernelArguments::new().with(KernelArgument::buffer(&out, AccessMode::Write));
    let err = ctx.run(&kernel, KernelRange::new_1d(1), &args).unwrap_err();

    match err {
        Error::DeviceExecution { backend, reason } => {
            assert_eq!(backend, "cpu");
            assert!(reason.contains("injected failure"), "{}", reason);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ctx.scheduler().stats().failed(), 1);
}

#[test]
fn test_kernel_panic_is_contained() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let panics = ctx.kernel(&program, "panics").unwrap();
    let write = ctx.kernel(&program, "write_constant").unwrap();

    let out = ctx.zeros::<i32>(4).unwrap();
    let args = KernelArguments::new().with(KernelArgument::buffer(&out, AccessMode::Write));
    let err = ctx.run(&panics, KernelRange::new_1d(4), &args).unwrap_err();
    assert!(err.to_string().contains("kernel exploded"), "{}", err);

    // The queue keeps working after a panicking kernel.
    let args = KernelArguments::new()
        .with(KernelArgument::buffer(&out, AccessMode::Write))
        .with(KernelArgument::constant(3i32));
    ctx.run(&write, KernelRange::new_1d(4), &args).unwrap();
    assert_eq!(ctx.read(&out).unwrap(), vec![3; 4]);
}

#[test]
fn test_argument_type_mismatch_is_a_device_fault() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = ctx.kernel(&program, "write_constant").unwrap();

    let out = ctx.zeros::<i32>(4).unwrap();
    let args = KernelArguments::new()
        .with(KernelArgument::buffer(&out, AccessMode::Write))
        .with(KernelArgument::constant(1.5f32));
    let err = ctx.run(&kernel, KernelRange::new_1d(4), &args).unwrap_err();
    assert!(matches!(err, Error::DeviceExecution { .. }));
}

#[test]
fn test_read_only_buffer_cannot_be_written() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = ctx.kernel(&program, "write_constant").unwrap();

    let out = ctx.zeros::<i32>(4).unwrap();
    let args = KernelArguments::new()
        .with(KernelArgument::buffer(&out, AccessMode::Read))
        .with(KernelArgument::constant(1i32));
    let err = ctx.run(&kernel, KernelRange::new_1d(4), &args).unwrap_err();
    assert!(err.to_string().contains("read-only"), "{}", err);
    assert_eq!(ctx.read(&out).unwrap(), vec![0; 4]);
}

#[test]
fn test_aliased_writable_buffer_is_rejected() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = ctx.kernel(&program, "copy_2d").unwrap();

    let buf = ctx.zeros::<f32>(4).unwrap();
    let args = KernelArguments::new()
        .with(KernelArgument::buffer(&buf, AccessMode::Read))
        .with(KernelArgument::buffer(&buf, AccessMode::Write));
    let err = ctx.run(&kernel, KernelRange::new_2d(2, 2), &args).unwrap_err();
    assert!(matches!(err, Error::DeviceExecution { .. }));
}

#[test]
fn test_buffers_released_after_completion() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = ctx.kernel(&program, "write_constant").unwrap();

    let out = ctx.zeros::<i32>(16).unwrap();
    let baseline = out.raw().ref_count();
    let args = KernelArguments::new()
        .with(KernelArgument::buffer(&out, AccessMode::Write))
        .with(KernelArgument::constant(1i32));
    let with_args = out.raw().ref_count();
    assert!(with_args > baseline);

    ctx.run(&kernel, KernelRange::new_1d(16), &args).unwrap();
    assert_eq!(out.raw().ref_count(), with_args);

    drop(args);
    assert_eq!(out.raw().ref_count(), baseline);
}

#[test]
fn test_submission_holds_buffer_references_while_running() {
    init_tracing();
    let raw = CpuBuffer::new(16 * 4).unwrap();
    let seen = Arc::new(AtomicUsize::new(0));

    let observed = raw.clone();
    let seen_in_kernel = seen.clone();
    let registry = test_registry().with("observe", move |_| {
        seen_in_kernel.store(observed.ref_count(), Ordering::SeqCst);
        Ok(())
    });
    let queue = CpuQueue::new(CpuContext::new(CpuDevice::new(), registry)).unwrap();
    let ctx = ExecutionContext::<CpuRuntime>::new(queue);
    let program = ctx
        .build_program("observe", "__kernel void observe(__global int* out) {}")
        .unwrap();
    let kernel = ctx.kernel(&program, "observe").unwrap();

    let out = DeviceBuffer::<CpuRuntime, i32>::from_raw(raw.clone(), 16).unwrap();
    let args = KernelArguments::new().with(KernelArgument::buffer(&out, AccessMode::Write));
    let enqueued = raw.ref_count();

    ctx.run(&kernel, KernelRange::new_1d(16), &args).unwrap();

    // One reference kept by the submission's storage, one by the bound argument.
    assert_eq!(seen.load(Ordering::SeqCst), enqueued + 2);
    assert_eq!(raw.ref_count(), enqueued);
}

#[test]
fn test_opposite_buffer_order_across_queues_completes() {
    let ctx = cpu_context();
    let x = ctx.buffer(&[1.0f32; 4]).unwrap();
    let y = ctx.buffer(&[2.0f32; 4]).unwrap();

    let (tx, rx) = mpsc::channel();
    type Bound = Vec<(DeviceBuffer<CpuRuntime, f32>, AccessMode)>;
    let launch = |label: &'static str, kernel: &'static str, bufs: Bound| {
        let tx = tx.clone();
        thread::spawn(move || {
            let ctx = cpu_context();
            let program = ctx.build_program("test", TEST_SOURCE).unwrap();
            let kernel = ctx.kernel(&program, kernel).unwrap();
            let args = bufs.iter().fold(KernelArguments::new(), |args, (buf, access)| {
                args.with(KernelArgument::buffer(buf, *access))
            });
            let ok = ctx.run(&kernel, KernelRange::new_1d(4), &args).is_ok();
            let _ = tx.send((label, ok));
        });
    };

    // Keep `y` locked so both launches below are waiting on it at once.
    launch("hold", "hold", vec![(y.clone(), AccessMode::Write)]);
    thread::sleep(Duration::from_millis(50));
    launch(
        "y+=x",
        "accumulate",
        vec![(y.clone(), AccessMode::Write), (x.clone(), AccessMode::Read)],
    );
    thread::sleep(Duration::from_millis(50));
    launch(
        "x+=y",
        "accumulate",
        vec![(x.clone(), AccessMode::Write), (y.clone(), AccessMode::Read)],
    );

    let mut done = Vec::new();
    for _ in 0..3 {
        let (label, ok) = rx
            .recv_timeout(HOLD_TIME + Duration::from_secs(5))
            .unwrap_or_else(|_| panic!("launches still blocked after {:?}", done));
        assert!(ok, "{} failed", label);
        done.push(label);
    }

    // Both accumulations ran exactly once, in either order.
    let (xs, ys) = (ctx.read(&x).unwrap(), ctx.read(&y).unwrap());
    let y_first = xs == vec![4.0; 4] && ys == vec![3.0; 4];
    let x_first = xs == vec![3.0; 4] && ys == vec![5.0; 4];
    assert!(y_first || x_first, "x = {:?}, y = {:?}", xs, ys);
}

#[test]
fn test_from_raw_rejects_overflowing_length() {
    let raw = CpuBuffer::new(16).unwrap();
    // 2^61 elements of 8 bytes wrap to zero bytes if multiplied unchecked.
    let wraps_to_zero = (usize::MAX >> 3) + 1;
    assert!(DeviceBuffer::<CpuRuntime, f64>::from_raw(raw.clone(), wraps_to_zero).is_err());
    assert_eq!(
        DeviceBuffer::<CpuRuntime, f64>::from_raw(raw, 2)
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn test_buffers_released_after_failure() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = ctx.kernel(&program, "panics").unwrap();

    let out = ctx.zeros::<i32>(16).unwrap();
    let args = KernelArguments::new().with(KernelArgument::buffer(&out, AccessMode::Write));
    let with_args = out.raw().ref_count();

    assert!(ctx.run(&kernel, KernelRange::new_1d(16), &args).is_err());
    assert_eq!(out.raw().ref_count(), with_args);
}

#[test]
#[should_panic(expected = "local kernel arguments are not supported")]
fn test_local_argument_panics() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = ctx.kernel(&program, "write_constant").unwrap();

    let args = KernelArguments::new().with(KernelArgument::local::<i32>(64));
    let _ = ctx.run(&kernel, KernelRange::new_1d(64), &args);
}

#[test]
fn test_two_dimensional_pass_through() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = ctx.kernel(&program, "copy_2d").unwrap();

    let data: Vec<f32> = (0..12).map(|i| i as f32).collect();
    let src = ctx.buffer(&data).unwrap();
    let dst = ctx.zeros::<f32>(12).unwrap();
    let args = KernelArguments::new()
        .with(KernelArgument::buffer(&src, AccessMode::Read))
        .with(KernelArgument::buffer(&dst, AccessMode::Write));
    ctx.run(&kernel, KernelRange::new_2d(3, 4), &args).unwrap();

    assert_eq!(ctx.read(&dst).unwrap(), data);
}

#[test]
fn test_tiled_range_reaches_kernel() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = ctx.kernel(&program, "record_shape").unwrap();

    let out = ctx.zeros::<u32>(4).unwrap();
    let args = KernelArguments::new().with(KernelArgument::buffer(&out, AccessMode::Write));
    let range = KernelNdRange::new(KernelRange::new_2d(8, 4), KernelRange::new_2d(4, 2)).unwrap();
    ctx.run(&kernel, range, &args).unwrap();

    assert_eq!(ctx.read(&out).unwrap(), vec![2, 8, 4, 1]);
}

#[test]
fn test_reversed_axis_order_override() {
    let context = CpuContext::new(CpuDevice::new(), test_registry());
    let queue = CpuQueue::new(context).unwrap();
    let config = ContextConfig {
        axis_order: Some(AxisOrder::Reversed),
        ..Default::default()
    };
    let ctx = ExecutionContext::<CpuRuntime>::with_config(queue, config);
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = ctx.kernel(&program, "record_shape").unwrap();

    let out = ctx.zeros::<u32>(4).unwrap();
    let args = KernelArguments::new().with(KernelArgument::buffer(&out, AccessMode::Write));
    ctx.run(&kernel, KernelRange::new_3d(2, 3, 5), &args).unwrap();

    assert_eq!(ctx.read(&out).unwrap(), vec![3, 5, 3, 2]);
}

#[test]
fn test_fast_path_kernel() {
    let ctx = cpu_context();
    let options = CompileOptions::new().fast_path(true);
    let program = ctx
        .build_program_with("test-fast", TEST_SOURCE, &options)
        .unwrap();
    assert!(program.fast_module().is_some());

    let kernel = ctx.kernel(&program, "write_constant").unwrap();
    assert!(kernel.is_fast_path());

    let out = ctx.zeros::<i32>(5).unwrap();
    let args = KernelArguments::new()
        .with(KernelArgument::buffer(&out, AccessMode::Write))
        .with(KernelArgument::constant(-9i32));
    ctx.run(&kernel, KernelRange::new_1d(5), &args).unwrap();
    assert_eq!(ctx.read(&out).unwrap(), vec![-9; 5]);
}

#[test]
fn test_kernel_from_other_context_fails() {
    let a = cpu_context();
    let b = cpu_context();
    let program = a.build_program("test", TEST_SOURCE).unwrap();
    let kernel = a.kernel(&program, "write_constant").unwrap();

    let out = b.zeros::<i32>(2).unwrap();
    let args = KernelArguments::new()
        .with(KernelArgument::buffer(&out, AccessMode::Write))
        .with(KernelArgument::constant(1i32));
    let err = b.run(&kernel, KernelRange::new_1d(2), &args).unwrap_err();
    assert!(matches!(err, Error::DeviceExecution { .. }));
    assert_eq!(b.queue().submitted(), 0);
}

#[test]
fn test_scheduler_clones_share_stats() {
    let ctx = cpu_context();
    let program = ctx.build_program("test", TEST_SOURCE).unwrap();
    let kernel = ctx.kernel(&program, "write_constant").unwrap();
    let scheduler = ctx.scheduler().clone();

    let out = ctx.zeros::<i32>(1).unwrap();
    let args = KernelArguments::new()
        .with(KernelArgument::buffer(&out, AccessMode::Write))
        .with(KernelArgument::constant(1i32));
    kernel.schedule(&scheduler, KernelRange::new_1d(1), &args).unwrap();

    assert_eq!(ctx.scheduler().stats().completed(), 1);
}
