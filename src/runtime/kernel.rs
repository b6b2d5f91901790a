//! Kernels bound to compiled programs
//!
//! A [`Kernel`] names one entry point of a [`Program`] and the execution
//! target it is meant for. Device kernels resolve their native entry point
//! once, at construction:
//!
//! ```text
//! Program ──(fast module present)──> KernelEntry::FastPath(executable)
//!    │
//!    └──(otherwise)─────────────────> KernelEntry::Native(kernel handle)
//!                                        │
//!                                        └─ resolved per schedule against
//!                                           the queue's context
//! ```
//!
//! Kernels hold a reference to their program; programs never reference
//! kernels, so the ownership graph has no cycles.

use std::fmt;
use std::sync::Arc;

use super::Runtime;
use super::args::KernelArguments;
use super::handle::ResourceRef;
use super::program::Program;
use super::range::LaunchRange;
use super::scheduler::KernelScheduler;
use crate::error::{Error, Status};

/// Execution class a kernel is built for
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExecutionTarget {
    /// Runs on the queue's device
    #[default]
    Device,
    /// Runs on host threads; not executable by the device scheduler
    Host,
}

pub(crate) enum KernelEntry<R: Runtime> {
    Native(ResourceRef<R::KernelHandle>),
    FastPath(R::Executable),
}

impl<R: Runtime> Clone for KernelEntry<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Native(handle) => Self::Native(handle.clone()),
            Self::FastPath(executable) => Self::FastPath(executable.clone()),
        }
    }
}

/// One entry point of a compiled program
pub struct Kernel<R: Runtime> {
    name: Arc<str>,
    target: ExecutionTarget,
    program: Program<R>,
    entry: KernelEntry<R>,
}

impl<R: Runtime> Kernel<R> {
    /// Resolve kernel `name` from `program`.
    ///
    /// Programs compiled with a fast-path module resolve through it;
    /// otherwise a native kernel object is created.
    pub fn new(target: ExecutionTarget, program: &Program<R>, name: &str) -> crate::error::Result<Self> {
        let entry = match program.fast_module() {
            Some(module) => KernelEntry::FastPath(
                R::fast_kernel(module, name).map_err(|code| Error::compile(program.name(), code))?,
            ),
            None => KernelEntry::Native(
                R::create_kernel(program.handle(), name)
                    .map_err(|code| Error::compile(program.name(), code))?,
            ),
        };
        tracing::trace!(
            runtime = R::name(),
            program = program.name(),
            kernel = name,
            ?target,
            "kernel resolved"
        );
        Ok(Self {
            name: name.into(),
            target,
            program: program.clone(),
            entry,
        })
    }

    /// Entry point name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execution target
    pub fn target(&self) -> ExecutionTarget {
        self.target
    }

    /// Program the kernel belongs to
    pub fn program(&self) -> &Program<R> {
        &self.program
    }

    /// True if the kernel dispatches through the program's fast-path module
    pub fn is_fast_path(&self) -> bool {
        matches!(self.entry, KernelEntry::FastPath(_))
    }

    /// Schedule this kernel on `scheduler`
    pub fn schedule(
        &self,
        scheduler: &KernelScheduler<R>,
        range: impl Into<LaunchRange>,
        args: &KernelArguments<R>,
    ) -> Status {
        scheduler.schedule(self, range, args)
    }

    /// Launchable form of the kernel against `context`
    pub(crate) fn resolve(&self, context: &R::Context) -> Result<R::Executable, R::Fault> {
        match &self.entry {
            KernelEntry::Native(handle) => R::resolve_kernel(handle, context),
            KernelEntry::FastPath(executable) => Ok(executable.clone()),
        }
    }
}

impl<R: Runtime> Clone for Kernel<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            target: self.target,
            program: self.program.clone(),
            entry: self.entry.clone(),
        }
    }
}

impl<R: Runtime> fmt::Debug for Kernel<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("program", &self.program.name())
            .field("fast_path", &self.is_fast_path())
            .finish()
    }
}
