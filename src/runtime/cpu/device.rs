//! CPU device and context

use std::fmt;
use std::sync::Arc;

use super::kernels::KernelRegistry;
use crate::runtime::Device;

/// CPU device (the host CPU presented as an OpenCL-style device)
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CpuDevice {
    id: usize,
}

impl CpuDevice {
    /// Create the default CPU device
    pub fn new() -> Self {
        Self { id: 0 }
    }

    /// Create a CPU device with an explicit id
    ///
    /// Distinct ids behave as distinct devices, which lets callers exercise
    /// device/context mismatch paths.
    pub fn with_id(id: usize) -> Self {
        Self { id }
    }
}

impl Device for CpuDevice {
    fn id(&self) -> usize {
        self.id
    }

    fn name(&self) -> String {
        format!("cpu:{}", self.id)
    }
}

/// CPU device context
///
/// The context owns the registry of native kernel implementations that
/// program builds link against. Clones share the same context.
#[derive(Clone)]
pub struct CpuContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    device: CpuDevice,
    registry: KernelRegistry,
}

impl CpuContext {
    /// Context on `device` linking against `registry`
    pub fn new(device: CpuDevice, registry: KernelRegistry) -> Self {
        Self {
            inner: Arc::new(ContextInner { device, registry }),
        }
    }

    /// Context on the default device with the builtin kernels
    pub fn with_builtins() -> Self {
        Self::new(CpuDevice::new(), KernelRegistry::with_builtins())
    }

    /// Device the context was created for
    pub fn device(&self) -> &CpuDevice {
        &self.inner.device
    }

    /// Kernel implementations available to programs
    pub fn registry(&self) -> &KernelRegistry {
        &self.inner.registry
    }

    /// True if both values refer to the same context
    pub fn is_same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuContext")
            .field("device", &self.inner.device)
            .field("kernels", &self.inner.registry.len())
            .finish()
    }
}
