//! Kernel scheduler
//!
//! [`KernelScheduler`] submits one kernel launch at a time to a shared queue
//! and blocks until the device reports completion.
//!
//! # Protocol
//!
//! ```text
//! schedule(kernel, range, args)
//!   ├── target == Host      -> Err(MethodNotImplemented), nothing submitted
//!   ├── range -> LaunchShape (native axis order, dims 1..=3)
//!   ├── resolve executable against the queue's context
//!   ├── bind args 0..N-1 into a command group (buffers kept in storage)
//!   └── failure boundary:
//!         submit -> wait
//!         device faults and panics become Error::DeviceExecution
//! ```
//!
//! Buffers bound during one call live in that call's [`BufferStorage`],
//! which is dropped only after the wait returns.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::args::{BoundArgument, KernelArgument, KernelArguments};
use super::kernel::{ExecutionTarget, Kernel};
use super::range::{AxisOrder, LaunchRange, LaunchShape, launch_shape};
use super::{Runtime, RuntimeQueue};
use crate::error::{Error, Status};

/// Scheduler configuration
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Axis order used when converting ranges to native form
    pub axis_order: AxisOrder,
}

impl SchedulerConfig {
    /// Configuration matching the backend's native conventions
    pub fn native<R: Runtime>() -> Self {
        Self {
            axis_order: R::AXIS_ORDER,
        }
    }

    /// Override the axis order
    pub fn with_axis_order(mut self, axis_order: AxisOrder) -> Self {
        self.axis_order = axis_order;
        self
    }
}

/// Counters of scheduling outcomes
#[derive(Debug, Default)]
pub struct SchedulerStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl SchedulerStats {
    /// Launches handed to the queue
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Launches that completed successfully
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Launches that failed after target dispatch
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Launches rejected before anything was submitted (host target)
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Buffers referenced by one in-flight submission
pub(crate) struct BufferStorage<R: Runtime> {
    buffers: Vec<R::Buffer>,
}

impl<R: Runtime> BufferStorage<R> {
    fn with_capacity(n: usize) -> Self {
        Self {
            buffers: Vec::with_capacity(n),
        }
    }

    fn add(&mut self, buffer: &R::Buffer) -> R::Buffer {
        self.buffers.push(buffer.clone());
        buffer.clone()
    }

    fn len(&self) -> usize {
        self.buffers.len()
    }
}

/// Arguments recorded for one launch, in parameter order
struct CommandGroup<R: Runtime> {
    bound: Vec<BoundArgument<R>>,
}

impl<R: Runtime> CommandGroup<R> {
    fn with_capacity(n: usize) -> Self {
        Self {
            bound: Vec::with_capacity(n),
        }
    }

    fn set_arg(&mut self, index: usize, arg: BoundArgument<R>) {
        assert_eq!(index, self.bound.len(), "kernel arguments must be bound in order");
        self.bound.push(arg);
    }
}

fn bind_argument<R: Runtime>(
    group: &mut CommandGroup<R>,
    storage: &mut BufferStorage<R>,
    index: usize,
    arg: &KernelArgument<R>,
) {
    let bound = match arg {
        KernelArgument::Buffer {
            buffer,
            dtype,
            access,
        } => BoundArgument::Buffer {
            buffer: storage.add(buffer),
            dtype: *dtype,
            access: *access,
        },
        KernelArgument::Local { .. } => panic!("local kernel arguments are not supported"),
        KernelArgument::Constant(value) => BoundArgument::Scalar(*value),
    };
    group.set_arg(index, bound);
}

/// Submits kernels to a shared queue and waits for each to complete
pub struct KernelScheduler<R: Runtime> {
    queue: R::Queue,
    config: SchedulerConfig,
    stats: Arc<SchedulerStats>,
}

impl<R: Runtime> KernelScheduler<R> {
    /// Scheduler on `queue` with the backend's native configuration
    pub fn new(queue: &R::Queue) -> Self {
        Self::with_config(queue, SchedulerConfig::native::<R>())
    }

    /// Scheduler on `queue` with an explicit configuration
    pub fn with_config(queue: &R::Queue, config: SchedulerConfig) -> Self {
        Self {
            queue: queue.clone(),
            config,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    /// Queue this scheduler submits to
    pub fn queue(&self) -> &R::Queue {
        &self.queue
    }

    /// Active configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Outcome counters
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Launch `kernel` over `range` with `args` and block until it completes.
    ///
    /// # Panics
    ///
    /// Panics if `args` contains a local (work-group private) buffer.
    pub fn schedule(
        &self,
        kernel: &Kernel<R>,
        range: impl Into<LaunchRange>,
        args: &KernelArguments<R>,
    ) -> Status {
        if kernel.target() == ExecutionTarget::Host {
            SchedulerStats::bump(&self.stats.rejected);
            tracing::debug!(kernel = kernel.name(), "host kernels are not scheduled on devices");
            return Err(Error::MethodNotImplemented {
                method: "host kernel scheduling",
            });
        }

        let range = range.into();
        let result = self.schedule_on_device(kernel, &range, args);
        match &result {
            Ok(()) => SchedulerStats::bump(&self.stats.completed),
            Err(err) => {
                SchedulerStats::bump(&self.stats.failed);
                tracing::debug!(kernel = kernel.name(), error = %err, "kernel launch failed");
            }
        }
        result
    }

    fn schedule_on_device(
        &self,
        kernel: &Kernel<R>,
        range: &LaunchRange,
        args: &KernelArguments<R>,
    ) -> Status {
        let order = self.config.axis_order;
        let shape: LaunchShape = match range.dimensions() {
            1 => launch_shape::<1>(range, order),
            2 => launch_shape::<2>(range, order),
            3 => launch_shape::<3>(range, order),
            dims => unreachable!("kernel ranges have 1 to 3 dimensions, got {}", dims),
        };

        let executable = kernel
            .resolve(self.queue.context())
            .map_err(|fault| Error::device(R::name(), fault))?;

        let mut storage = BufferStorage::<R>::with_capacity(args.len());
        let mut group = CommandGroup::<R>::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            bind_argument(&mut group, &mut storage, index, arg);
        }

        tracing::trace!(
            runtime = R::name(),
            kernel = kernel.name(),
            ?shape,
            args = args.len(),
            buffers = storage.len(),
            "submitting kernel"
        );

        let bound = group.bound;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let event = R::submit(&self.queue, &executable, shape, bound)?;
            SchedulerStats::bump(&self.stats.submitted);
            R::wait(event)
        }));

        // Storage outlives the wait on every path.
        drop(storage);

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(fault)) => Err(Error::device(R::name(), fault)),
            Err(payload) => Err(Error::DeviceExecution {
                backend: R::name(),
                reason: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl<R: Runtime> Clone for KernelScheduler<R> {
    /// Clones share the queue and the outcome counters
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            config: self.config,
            stats: self.stats.clone(),
        }
    }
}

impl<R: Runtime> fmt::Debug for KernelScheduler<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelScheduler")
            .field("runtime", &R::name())
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic during submission: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic during submission: {}", s)
    } else {
        "panic during submission".to_string()
    }
}
