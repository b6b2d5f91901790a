//! In-order command queue for the CPU device
//!
//! Each queue owns one worker thread. Submissions are closures executed in
//! FIFO order; completion is reported through a per-submission event.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;

use super::device::{CpuContext, CpuDevice};
use super::fault::CpuFault;
use super::runtime::CpuRuntime;
use crate::error::{Error, Result};
use crate::runtime::{Device, RuntimeQueue};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Completion handle of one CPU submission
#[derive(Debug)]
pub struct CpuEvent {
    done: mpsc::Receiver<std::result::Result<(), CpuFault>>,
}

impl CpuEvent {
    pub(crate) fn wait(self) -> std::result::Result<(), CpuFault> {
        self.done.recv().unwrap_or(Err(CpuFault::QueueClosed))
    }
}

/// In-order submission queue of a CPU context
///
/// Clones share the worker thread. The worker exits once the last clone is
/// dropped and the already-submitted work has drained.
#[derive(Clone)]
pub struct CpuQueue {
    context: CpuContext,
    inner: Arc<QueueInner>,
}

struct QueueInner {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    submitted: AtomicU64,
}

impl CpuQueue {
    /// Start a queue on `context`
    pub fn new(context: CpuContext) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = std::thread::Builder::new()
            .name(format!("dalrt-cpu{}-queue", context.device().id()))
            .spawn(move || {
                for job in receiver {
                    job();
                }
            })
            .map_err(|e| Error::Internal(format!("failed to start cpu queue worker: {}", e)))?;
        Ok(Self {
            context,
            inner: Arc::new(QueueInner {
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
                submitted: AtomicU64::new(0),
            }),
        })
    }

    /// Number of kernel submissions accepted by the worker
    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Relaxed)
    }

    /// Enqueue `work`; its result completes the returned event
    pub(crate) fn enqueue<F>(&self, work: F) -> std::result::Result<CpuEvent, CpuFault>
    where
        F: FnOnce() -> std::result::Result<(), CpuFault> + Send + 'static,
    {
        let event = self.push(work)?;
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(event)
    }

    fn push<F>(&self, work: F) -> std::result::Result<CpuEvent, CpuFault>
    where
        F: FnOnce() -> std::result::Result<(), CpuFault> + Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            // The receiver may be gone if the submitter stopped waiting.
            let _ = done_tx.send(work());
        });
        let sender = self.inner.sender.lock();
        sender
            .as_ref()
            .ok_or(CpuFault::QueueClosed)?
            .send(job)
            .map_err(|_| CpuFault::QueueClosed)?;
        Ok(CpuEvent { done: done_rx })
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        drop(self.sender.get_mut().take());
        if let Some(worker) = self.worker.get_mut().take() {
            if worker.thread().id() == std::thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                tracing::warn!("cpu queue worker exited with a panic");
            }
        }
    }
}

impl RuntimeQueue<CpuRuntime> for CpuQueue {
    fn context(&self) -> &CpuContext {
        &self.context
    }

    fn device(&self) -> &CpuDevice {
        self.context.device()
    }

    fn synchronize(&self) -> Result<()> {
        self.push(|| Ok(()))
            .and_then(CpuEvent::wait)
            .map_err(|fault| Error::device("cpu", fault))
    }
}

impl fmt::Debug for CpuQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuQueue")
            .field("device", self.context.device())
            .field("submitted", &self.submitted())
            .finish()
    }
}
