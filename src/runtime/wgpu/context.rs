//! WebGPU context, queue and buffers.
//!
//! `WgpuContext` owns the WebGPU device and queue. A `WgpuQueue` is the
//! in-order submission view of a context; WebGPU exposes a single queue per
//! device, so every `WgpuQueue` of a context submits into the same one.
//!
//! # Thread Safety
//!
//! All types here are `Clone`; the underlying wgpu::Device and wgpu::Queue
//! are already `Send + Sync`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use wgpu::{Buffer, BufferDescriptor, BufferUsages};

use super::WgpuRuntime;
use super::device::{WgpuDevice, WgpuError, query_adapter_info_blocking};
use crate::error::{Error, Result};
use crate::runtime::RuntimeQueue;

/// Upper bound on waiting for a staging buffer to map
pub(crate) const READBACK_TIMEOUT: Duration = Duration::from_secs(60);

/// What a blocking device poll is waiting for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WaitFor {
    /// Submitted kernels; these run for as long as they need
    Completion,
    /// A staging buffer mapping for readback
    Readback,
}

impl WaitFor {
    pub(crate) fn timeout(self) -> Option<Duration> {
        match self {
            Self::Completion => None,
            Self::Readback => Some(READBACK_TIMEOUT),
        }
    }
}

/// Copy sizes and buffer sizes must be multiples of this
const COPY_ALIGNMENT: usize = wgpu::COPY_BUFFER_ALIGNMENT as usize;

pub(crate) fn align_copy(size: usize) -> usize {
    size.div_ceil(COPY_ALIGNMENT) * COPY_ALIGNMENT
}

// ============================================================================
// WgpuContext
// ============================================================================

/// WebGPU device context.
///
/// Programs are built against a context and may only be launched on queues
/// of the same context.
#[derive(Clone)]
pub struct WgpuContext {
    /// GPU device identifier, with adapter info
    device: WgpuDevice,
    /// WebGPU device handle
    wgpu_device: Arc<wgpu::Device>,
    /// WebGPU queue for command submission
    queue: Arc<wgpu::Queue>,
}

impl WgpuContext {
    /// Create a context for a device.
    ///
    /// This initializes the WebGPU device and queue.
    ///
    /// # Errors
    ///
    /// - `DeviceNotFound` if no adapter has the device's index
    /// - `DeviceExecution` if device creation fails
    pub fn new(device: WgpuDevice) -> Result<Self> {
        let (adapter, info) = query_adapter_info_blocking(device.index).map_err(|e| match e {
            WgpuError::NoAdapter => Error::DeviceNotFound {
                backend: "wgpu",
                selector: format!("adapter index {}", device.index),
            },
            other => Error::device("wgpu", other),
        })?;

        let (wgpu_device, queue) = pollster::block_on(async {
            adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("dalrt WebGPU Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                    experimental_features: wgpu::ExperimentalFeatures::default(),
                })
                .await
        })
        .map_err(|e| Error::device("wgpu", WgpuError::DeviceError(format!("{:?}", e))))?;

        tracing::debug!(
            device = device.index,
            adapter = %WgpuDevice::with_info(device.index, info.clone()).adapter_name(),
            "wgpu context created"
        );

        Ok(Self {
            device: WgpuDevice::with_info(device.index, info),
            wgpu_device: Arc::new(wgpu_device),
            queue: Arc::new(queue),
        })
    }

    /// Device this context was created for
    pub fn device(&self) -> &WgpuDevice {
        &self.device
    }

    /// Get reference to the WebGPU device.
    #[inline]
    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.wgpu_device
    }

    /// Get reference to the WebGPU queue.
    #[inline]
    pub fn wgpu_queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// True if both values refer to the same context
    pub fn is_same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.wgpu_device, &other.wgpu_device)
    }

    /// Create a storage buffer for kernel data.
    ///
    /// Storage buffers can be read/written by compute shaders.
    pub(crate) fn create_storage_buffer(&self, label: &str, size: u64) -> Buffer {
        self.wgpu_device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    /// Create a staging buffer for CPU readback.
    pub(crate) fn create_staging_buffer(&self, label: &str, size: u64) -> Buffer {
        self.wgpu_device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Block until `submission` (or all work, if `None`) has completed.
    pub(crate) fn poll_wait(
        &self,
        submission: Option<wgpu::SubmissionIndex>,
        wait: WaitFor,
    ) -> std::result::Result<(), WgpuError> {
        self.wgpu_device
            .poll(wgpu::PollType::Wait {
                submission_index: submission,
                timeout: wait.timeout(),
            })
            .map(|_| ())
            .map_err(|e| WgpuError::Poll(e.to_string()))
    }

    /// Read a mapped staging buffer back to CPU (blocking).
    fn read_staging(&self, staging: &Buffer, output: &mut [u8]) -> Result<()> {
        let slice = staging.slice(..);

        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        self.poll_wait(None, WaitFor::Readback)
            .map_err(|e| Error::device("wgpu", e))?;

        let map_result = receiver.recv().map_err(|_| {
            Error::device(
                "wgpu",
                WgpuError::BufferError("map_async callback was not invoked".into()),
            )
        })?;
        map_result.map_err(|e| Error::device("wgpu", WgpuError::BufferError(e.to_string())))?;

        {
            let data = slice.get_mapped_range();
            output.copy_from_slice(&data[..output.len()]);
        }

        staging.unmap();
        Ok(())
    }
}

impl fmt::Debug for WgpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuContext")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WgpuBuffer
// ============================================================================

/// Storage buffer on a WebGPU device.
///
/// Clones share the allocation; it is released when the last clone drops.
#[derive(Clone)]
pub struct WgpuBuffer {
    raw: Arc<Buffer>,
    len: usize,
}

impl WgpuBuffer {
    pub(crate) fn new(context: &WgpuContext, len: usize) -> Self {
        // Zero-sized bindings are invalid; keep one aligned word.
        let size = align_copy(len.max(1));
        let raw = context.create_storage_buffer("dalrt storage buffer", size as u64);
        Self {
            raw: Arc::new(raw),
            len,
        }
    }

    /// Requested size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of live references to the allocation
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.raw)
    }

    /// Underlying WebGPU buffer
    pub fn raw(&self) -> &Buffer {
        &self.raw
    }

    pub(crate) fn raw_arc(&self) -> Arc<Buffer> {
        self.raw.clone()
    }

    pub(crate) fn write(&self, context: &WgpuContext, data: &[u8]) -> Result<()> {
        self.check_range(data.len())?;
        if data.len() % COPY_ALIGNMENT == 0 {
            context.wgpu_queue().write_buffer(&self.raw, 0, data);
        } else {
            let mut padded = vec![0u8; align_copy(data.len())];
            padded[..data.len()].copy_from_slice(data);
            // Keep the bytes past `data` that share its last word.
            if padded.len() <= self.len {
                let mut tail = [0u8; COPY_ALIGNMENT];
                let start = padded.len() - COPY_ALIGNMENT;
                self.read(context, start, &mut tail)?;
                let keep = data.len() - start;
                padded[data.len()..].copy_from_slice(&tail[keep..]);
            }
            context.wgpu_queue().write_buffer(&self.raw, 0, &padded);
        }
        Ok(())
    }

    pub(crate) fn read(&self, context: &WgpuContext, offset: usize, out: &mut [u8]) -> Result<()> {
        self.check_range(offset + out.len())?;
        if out.is_empty() {
            return Ok(());
        }
        let size = align_copy(out.len()) as u64;
        let staging = context.create_staging_buffer("dalrt staging buffer", size);
        let mut encoder =
            context
                .wgpu_device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("dalrt readback"),
                });
        encoder.copy_buffer_to_buffer(&self.raw, offset as u64, &staging, 0, size);
        context
            .wgpu_queue()
            .submit(std::iter::once(encoder.finish()));
        context.read_staging(&staging, out)
    }

    fn check_range(&self, end: usize) -> Result<()> {
        if end > self.len {
            return Err(Error::InvalidArgument {
                arg: "buffer",
                reason: format!("access of {} bytes exceeds buffer of {} bytes", end, self.len),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for WgpuBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuBuffer").field("len", &self.len).finish()
    }
}

// ============================================================================
// WgpuQueue
// ============================================================================

/// In-order submission queue of a WebGPU context
#[derive(Clone, Debug)]
pub struct WgpuQueue {
    context: WgpuContext,
}

impl WgpuQueue {
    /// Queue submitting into `context`
    pub fn new(context: WgpuContext) -> Self {
        Self { context }
    }

    /// Create a context for `device` and return its queue
    pub fn for_device(device: WgpuDevice) -> Result<Self> {
        WgpuContext::new(device).map(Self::new)
    }
}

impl RuntimeQueue<WgpuRuntime> for WgpuQueue {
    fn context(&self) -> &WgpuContext {
        &self.context
    }

    fn device(&self) -> &WgpuDevice {
        self.context.device()
    }

    fn synchronize(&self) -> Result<()> {
        self.context
            .poll_wait(None, WaitFor::Completion)
            .map_err(|e| Error::device("wgpu", e))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Device;

    #[test]
    fn test_align_copy() {
        assert_eq!(align_copy(0), 0);
        assert_eq!(align_copy(1), 4);
        assert_eq!(align_copy(4), 4);
        assert_eq!(align_copy(13), 16);
    }

    #[test]
    fn test_only_readback_waits_are_bounded() {
        assert_eq!(WaitFor::Completion.timeout(), None);
        assert_eq!(WaitFor::Readback.timeout(), Some(READBACK_TIMEOUT));
    }

    #[test]
    fn test_wgpu_context_creation() {
        match WgpuContext::new(WgpuDevice::new(0)) {
            Ok(context) => {
                assert_eq!(context.device().id(), 0);
                assert!(context.is_same(&context.clone()));
            }
            Err(e) => {
                println!("No GPU available, skipping test: {}", e);
            }
        }
    }

    #[test]
    fn test_unaligned_write_keeps_neighbours() {
        let Ok(context) = WgpuContext::new(WgpuDevice::new(0)) else {
            println!("No GPU available, skipping test");
            return;
        };
        let buffer = WgpuBuffer::new(&context, 8);
        buffer.write(&context, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        buffer.write(&context, &[9, 9]).unwrap();

        let mut out = [0u8; 8];
        buffer.read(&context, 0, &mut out).unwrap();
        assert_eq!(out, [9, 9, 3, 4, 5, 6, 7, 8]);
    }
}
