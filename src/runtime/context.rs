//! Execution context: queue, scheduler and program cache
//!
//! An [`ExecutionContext`] is what algorithm code holds on to. It bundles the
//! shared queue, a [`KernelScheduler`] on that queue, and a [`KernelFactory`]
//! that builds each program once per (name, options) pair. The cache is
//! scoped to the context; nothing is registered process-wide.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

use super::args::KernelArguments;
use super::buffer::DeviceBuffer;
use super::kernel::{ExecutionTarget, Kernel};
use super::program::{CompileOptions, Program};
use super::range::{AxisOrder, LaunchRange};
use super::scheduler::{KernelScheduler, SchedulerConfig};
use super::{Runtime, RuntimeQueue};
use crate::dtype::Element;
use crate::error::{Result, Status};

/// Execution context configuration
#[derive(Clone, Debug, Default)]
pub struct ContextConfig {
    /// Axis order override; `None` uses the backend's native order
    pub axis_order: Option<AxisOrder>,
    /// Options applied to programs built without explicit options
    pub compile: CompileOptions,
}

impl ContextConfig {
    fn scheduler<R: Runtime>(&self) -> SchedulerConfig {
        let config = SchedulerConfig::native::<R>();
        match self.axis_order {
            Some(order) => config.with_axis_order(order),
            None => config,
        }
    }
}

type ProgramKey = (String, CompileOptions);

/// Builds programs on demand and caches them per context
pub struct KernelFactory<R: Runtime> {
    context: R::Context,
    device: R::Device,
    programs: Mutex<HashMap<ProgramKey, Program<R>>>,
}

impl<R: Runtime> KernelFactory<R> {
    /// Factory building programs for `queue`'s context and device
    pub fn new(queue: &R::Queue) -> Self {
        Self {
            context: queue.context().clone(),
            device: queue.device().clone(),
            programs: Mutex::new(HashMap::new()),
        }
    }

    /// Cached program for (`name`, `options`), compiling `source` on a miss.
    ///
    /// Failed builds are not cached.
    pub fn get_or_build(
        &self,
        name: &str,
        source: &str,
        options: &CompileOptions,
    ) -> Result<Program<R>> {
        let key = (name.to_string(), options.clone());
        let mut programs = self.programs.lock();
        if let Some(program) = programs.get(&key) {
            return Ok(program.clone());
        }

        let program = Program::compile_with(&self.context, &self.device, name, source, options)?;
        programs.insert(key, program.clone());
        Ok(program)
    }

    /// Number of cached programs
    pub fn len(&self) -> usize {
        self.programs.lock().len()
    }

    /// True if no program has been cached
    pub fn is_empty(&self) -> bool {
        self.programs.lock().is_empty()
    }

    /// Drop every cached program
    pub fn clear(&self) {
        self.programs.lock().clear();
    }
}

impl<R: Runtime> fmt::Debug for KernelFactory<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelFactory")
            .field("runtime", &R::name())
            .field("programs", &self.len())
            .finish()
    }
}

/// Queue, scheduler and program cache for one device
pub struct ExecutionContext<R: Runtime> {
    queue: R::Queue,
    scheduler: KernelScheduler<R>,
    factory: KernelFactory<R>,
    config: ContextConfig,
}

impl<R: Runtime> ExecutionContext<R> {
    /// Context on `queue` with default configuration
    pub fn new(queue: R::Queue) -> Self {
        Self::with_config(queue, ContextConfig::default())
    }

    /// Context on `queue` with an explicit configuration
    pub fn with_config(queue: R::Queue, config: ContextConfig) -> Self {
        let scheduler = KernelScheduler::with_config(&queue, config.scheduler::<R>());
        let factory = KernelFactory::new(&queue);
        Self {
            queue,
            scheduler,
            factory,
            config,
        }
    }

    /// Shared queue
    pub fn queue(&self) -> &R::Queue {
        &self.queue
    }

    /// Scheduler on the shared queue
    pub fn scheduler(&self) -> &KernelScheduler<R> {
        &self.scheduler
    }

    /// Program cache
    pub fn factory(&self) -> &KernelFactory<R> {
        &self.factory
    }

    /// Build (or fetch) a program with the context's default options
    pub fn build_program(&self, name: &str, source: &str) -> Result<Program<R>> {
        self.factory.get_or_build(name, source, &self.config.compile)
    }

    /// Build (or fetch) a program with explicit options
    pub fn build_program_with(
        &self,
        name: &str,
        source: &str,
        options: &CompileOptions,
    ) -> Result<Program<R>> {
        self.factory.get_or_build(name, source, options)
    }

    /// Device kernel `name` from `program`
    pub fn kernel(&self, program: &Program<R>, name: &str) -> Result<Kernel<R>> {
        Kernel::new(ExecutionTarget::Device, program, name)
    }

    /// Schedule `kernel` and wait for it
    pub fn run(
        &self,
        kernel: &Kernel<R>,
        range: impl Into<LaunchRange>,
        args: &KernelArguments<R>,
    ) -> Status {
        self.scheduler.schedule(kernel, range, args)
    }

    /// Upload `data` into a new device buffer
    pub fn buffer<T: Element>(&self, data: &[T]) -> Result<DeviceBuffer<R, T>> {
        DeviceBuffer::from_slice(&self.queue, data)
    }

    /// Allocate a zeroed device buffer
    pub fn zeros<T: Element>(&self, len: usize) -> Result<DeviceBuffer<R, T>> {
        DeviceBuffer::zeros(&self.queue, len)
    }

    /// Read a device buffer back to the host
    pub fn read<T: Element>(&self, buffer: &DeviceBuffer<R, T>) -> Result<Vec<T>> {
        buffer.to_vec(&self.queue)
    }

    /// Wait for everything submitted to the queue
    pub fn synchronize(&self) -> Result<()> {
        self.queue.synchronize()
    }
}

impl<R: Runtime> fmt::Debug for ExecutionContext<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("runtime", &R::name())
            .field("scheduler", &self.scheduler)
            .field("factory", &self.factory)
            .finish()
    }
}
