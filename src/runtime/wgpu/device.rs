//! WebGPU device implementation.
//!
//! `WgpuDevice` identifies a WebGPU adapter and caches its properties.
//!
//! # Thread Safety
//!
//! `WgpuDevice` is `Clone` and `Send + Sync`. The underlying adapter info
//! is cached on construction.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use wgpu::{Adapter, Backend, Limits};

use crate::dtype::DType;
use crate::error::{Error, Result};

/// Error type for WebGPU operations.
///
/// Setup failures (adapter, device) are converted to [`Error`] right away;
/// the remaining variants are device faults raised while a kernel is bound,
/// submitted or awaited.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WgpuError {
    /// No suitable GPU adapter found.
    #[error("No suitable WebGPU adapter found")]
    NoAdapter,
    /// Device request failed.
    #[error("WebGPU device error: {0}")]
    DeviceError(String),
    /// Buffer operation failed.
    #[error("WebGPU buffer error: {0}")]
    BufferError(String),
    /// Kernel handle is null or its program lives on another device.
    #[error("invalid kernel object")]
    InvalidKernel,
    /// Argument count differs from the shader's bindings.
    #[error("shader declares {expected} bindings, {got} arguments were bound")]
    ArgumentCount {
        /// Bindings in group 0
        expected: usize,
        /// Bound arguments
        got: usize,
    },
    /// Argument access mode conflicts with its binding.
    #[error("argument {index} is bound read-only but the shader writes it")]
    AccessMismatch {
        /// Argument index
        index: usize,
    },
    /// Scalar type WGSL cannot represent.
    #[error("argument {index}: scalar type {dtype} is not supported by WGSL")]
    UnsupportedScalar {
        /// Argument index
        index: usize,
        /// Scalar type
        dtype: DType,
    },
    /// Tiled range local size differs from the entry point's workgroup size.
    #[error("axis {axis}: local size {local} differs from @workgroup_size {workgroup}")]
    WorkgroupMismatch {
        /// Native axis
        axis: usize,
        /// Requested local size
        local: usize,
        /// Declared workgroup size
        workgroup: u32,
    },
    /// Tiled range global size is not a multiple of the local size.
    #[error("axis {axis}: global size {global} is not a multiple of local size {local}")]
    NonUniformRange {
        /// Native axis
        axis: usize,
        /// Global size
        global: usize,
        /// Local size
        local: usize,
    },
    /// Too many workgroups on one axis.
    #[error("axis {axis}: {groups} workgroups exceed the device limit of {limit}")]
    DispatchTooLarge {
        /// Native axis
        axis: usize,
        /// Requested workgroups
        groups: usize,
        /// Device limit
        limit: u32,
    },
    /// Waiting for a submission failed.
    #[error("WebGPU poll failed: {0}")]
    Poll(String),
}

/// Cached adapter information for a WebGPU device.
#[derive(Clone)]
pub(crate) struct AdapterInfo {
    /// Adapter name (e.g., "NVIDIA GeForce RTX 4090")
    name: String,
    /// PCI vendor id
    vendor: u32,
    /// PCI device id
    device: u32,
    /// Backend type (Vulkan, Metal, DX12, etc.)
    backend: Backend,
    /// Device limits
    limits: Limits,
}

impl AdapterInfo {
    fn from_adapter(adapter: &Adapter) -> Arc<Self> {
        let info = adapter.get_info();
        Arc::new(Self {
            name: info.name,
            vendor: info.vendor,
            device: info.device,
            backend: info.backend,
            limits: adapter.limits(),
        })
    }
}

/// WebGPU device identifier.
///
/// Represents a specific GPU device. The device index maps to the order
/// of adapters returned by WebGPU enumeration.
///
/// # Example
///
/// ```ignore
/// let device = WgpuDevice::new(0);  // First GPU
/// println!("Device: {}", device.name());
/// ```
#[derive(Clone)]
pub struct WgpuDevice {
    /// Device index (adapter order)
    pub(crate) index: usize,
    /// Cached adapter info (lazily populated)
    info: Option<Arc<AdapterInfo>>,
}

impl WgpuDevice {
    /// Create a device identifier for the specified adapter index.
    ///
    /// This does not initialize the GPU - that happens when
    /// `WgpuContext::new` is called.
    pub fn new(index: usize) -> Self {
        Self { index, info: None }
    }

    /// Create a device with cached adapter info.
    pub(crate) fn with_info(index: usize, info: Arc<AdapterInfo>) -> Self {
        Self {
            index,
            info: Some(info),
        }
    }

    /// Find the first adapter with the given PCI vendor and device ids.
    pub fn find(vendor: u32, device: u32) -> Result<Self> {
        let adapters = pollster::block_on(enumerate_adapters());
        adapters
            .iter()
            .enumerate()
            .map(|(index, adapter)| (index, AdapterInfo::from_adapter(adapter)))
            .find(|(_, info)| info.vendor == vendor && info.device == device)
            .map(|(index, info)| Self::with_info(index, info))
            .ok_or_else(|| Error::DeviceNotFound {
                backend: "wgpu",
                selector: format!("vendor {:#06x}, device {:#06x}", vendor, device),
            })
    }

    /// Get the adapter name.
    ///
    /// Returns "unknown" if the device hasn't been initialized yet.
    pub fn adapter_name(&self) -> String {
        self.info
            .as_ref()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// PCI `(vendor, device)` ids, if the device has been initialized.
    pub fn pci_ids(&self) -> Option<(u32, u32)> {
        self.info.as_ref().map(|i| (i.vendor, i.device))
    }

    /// Get the backend type (Vulkan, Metal, DX12, etc.).
    ///
    /// Returns `None` if the device hasn't been initialized yet.
    pub fn backend(&self) -> Option<Backend> {
        self.info.as_ref().map(|i| i.backend)
    }

    /// Get device limits.
    ///
    /// Returns default limits if the device hasn't been initialized yet.
    pub fn limits(&self) -> Limits {
        self.info
            .as_ref()
            .map(|i| i.limits.clone())
            .unwrap_or_default()
    }

    /// Get maximum number of workgroups per dispatch dimension.
    pub fn max_workgroups_per_dimension(&self) -> u32 {
        self.limits().max_compute_workgroups_per_dimension
    }
}

impl super::super::Device for WgpuDevice {
    fn id(&self) -> usize {
        self.index
    }

    fn name(&self) -> String {
        format!("wgpu:{}", self.index)
    }
}

impl fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("index", &self.index)
            .field("adapter", &self.adapter_name())
            .field("backend", &self.backend())
            .finish()
    }
}

// ============================================================================
// Adapter Discovery
// ============================================================================

async fn enumerate_adapters() -> Vec<Adapter> {
    let instance = wgpu::Instance::default();
    instance.enumerate_adapters(wgpu::Backends::all()).await
}

/// Query adapter information for a device index.
///
/// This is an async operation that requests a WebGPU adapter.
pub(crate) async fn query_adapter_info(
    index: usize,
) -> std::result::Result<(Adapter, Arc<AdapterInfo>), WgpuError> {
    let mut adapters = enumerate_adapters().await;

    if index >= adapters.len() {
        return Err(WgpuError::NoAdapter);
    }

    let adapter = adapters.swap_remove(index);
    let info = AdapterInfo::from_adapter(&adapter);
    Ok((adapter, info))
}

/// Query adapter information synchronously using pollster.
pub(crate) fn query_adapter_info_blocking(
    index: usize,
) -> std::result::Result<(Adapter, Arc<AdapterInfo>), WgpuError> {
    pollster::block_on(query_adapter_info(index))
}

// ============================================================================
// Tests
// ============================================================================
