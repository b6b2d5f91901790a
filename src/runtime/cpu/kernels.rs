//! Native kernel implementations for the CPU device
//!
//! Program builds on the CPU device link each `__kernel` declaration found in
//! the source text against a [`KernelRegistry`]. The registry ships with a
//! few builtin kernels whose OpenCL C declarations are in [`BUILTIN_SOURCE`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::fault::CpuFault;
use super::invocation::CpuInvocation;
use crate::algorithm::blocking::{CacheInfo, kmeans_block_size};

/// Native kernel entry point
pub type CpuKernelFn = Arc<dyn Fn(&mut CpuInvocation<'_>) -> Result<(), CpuFault> + Send + Sync>;

/// OpenCL C declarations of the builtin kernels
pub const BUILTIN_SOURCE: &str = r#"
/* Builtin kernels of the CPU device. */

__kernel void fill_f32(__global float* out, float value)
{
    out[get_global_id(0)] = value;
}

__kernel void axpy_f32(float a, __global const float* x, __global float* y)
{
    const size_t i = get_global_id(0);
    y[i] = a * x[i] + y[i];
}

__kernel void nearest_centroid_f32(__global const float* data,
                                   __global const float* centroids,
                                   __global int* labels,
                                   uint dim,
                                   uint clusters)
{
    const size_t row = get_global_id(0);
    float best = INFINITY;
    int label = -1;
    for (uint c = 0; c < clusters; c++) {
        float dist = 0.0f;
        for (uint j = 0; j < dim; j++) {
            const float d = data[row * dim + j] - centroids[c * dim + j];
            dist += d * d;
        }
        if (dist < best) { best = dist; label = (int)c; }
    }
    labels[row] = label;
}
"#;

/// Kernel implementations a CPU context links programs against
#[derive(Clone, Default)]
pub struct KernelRegistry {
    kernels: HashMap<String, CpuKernelFn>,
}

impl KernelRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the builtin kernels
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register("fill_f32", fill_f32)
            .register("axpy_f32", axpy_f32)
            .register("nearest_centroid_f32", nearest_centroid_f32);
        registry
    }

    /// Register (or replace) the implementation of kernel `name`
    pub fn register<F>(&mut self, name: impl Into<String>, kernel: F) -> &mut Self
    where
        F: Fn(&mut CpuInvocation<'_>) -> Result<(), CpuFault> + Send + Sync + 'static,
    {
        self.kernels.insert(name.into(), Arc::new(kernel));
        self
    }

    /// Builder-style [`register`](Self::register)
    pub fn with<F>(mut self, name: impl Into<String>, kernel: F) -> Self
    where
        F: Fn(&mut CpuInvocation<'_>) -> Result<(), CpuFault> + Send + Sync + 'static,
    {
        self.register(name, kernel);
        self
    }

    /// Implementation of kernel `name`
    pub fn get(&self, name: &str) -> Option<&CpuKernelFn> {
        self.kernels.get(name)
    }

    /// True if kernel `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    /// Number of registered kernels
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    /// True if no kernel is registered
    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

impl fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.kernels.keys().collect();
        names.sort();
        f.debug_struct("KernelRegistry").field("kernels", &names).finish()
    }
}

// ============================================================================
// Builtins
// ============================================================================

fn ensure_len(index: usize, len: usize, needed: usize) -> Result<(), CpuFault> {
    if len < needed {
        return Err(CpuFault::OutOfBounds { index, len, needed });
    }
    Ok(())
}

fn fill_f32(inv: &mut CpuInvocation<'_>) -> Result<(), CpuFault> {
    let n = inv.global_len();
    let mut args = inv.args();
    let out = args.output::<f32>()?;
    let value = args.scalar::<f32>()?;
    ensure_len(0, out.len(), n)?;
    out[..n].fill(value);
    Ok(())
}

fn axpy_f32(inv: &mut CpuInvocation<'_>) -> Result<(), CpuFault> {
    let n = inv.global_len();
    let mut args = inv.args();
    let a = args.scalar::<f32>()?;
    let x = args.input::<f32>()?;
    let y = args.output::<f32>()?;
    ensure_len(1, x.len(), n)?;
    ensure_len(2, y.len(), n)?;
    for (yi, xi) in y[..n].iter_mut().zip(&x[..n]) {
        *yi += a * xi;
    }
    Ok(())
}

fn nearest_centroid_f32(inv: &mut CpuInvocation<'_>) -> Result<(), CpuFault> {
    let rows = inv.global_size(0);
    let mut args = inv.args();
    let data = args.input::<f32>()?;
    let centroids = args.input::<f32>()?;
    let labels = args.output::<i32>()?;
    let dim = args.scalar::<u32>()? as usize;
    let clusters = args.scalar::<u32>()? as usize;

    if clusters == 0 || dim == 0 {
        return Err(CpuFault::kernel("nearest_centroid_f32 needs at least one cluster and one feature"));
    }
    let (Some(data_len), Some(centroid_len)) = (rows.checked_mul(dim), clusters.checked_mul(dim))
    else {
        return Err(CpuFault::kernel("nearest_centroid_f32 input size overflows"));
    };
    ensure_len(0, data.len(), data_len)?;
    ensure_len(1, centroids.len(), centroid_len)?;
    ensure_len(2, labels.len(), rows)?;

    let block = kmeans_block_size::<f32>(rows, dim, clusters, &CacheInfo::default()).max(1);
    let labels = &mut labels[..rows];

    #[cfg(feature = "rayon")]
    labels
        .par_chunks_mut(block)
        .enumerate()
        .for_each(|(b, chunk)| assign_rows(data, centroids, dim, clusters, b * block, chunk));

    #[cfg(not(feature = "rayon"))]
    for (b, chunk) in labels.chunks_mut(block).enumerate() {
        assign_rows(data, centroids, dim, clusters, b * block, chunk);
    }

    Ok(())
}

fn assign_rows(
    data: &[f32],
    centroids: &[f32],
    dim: usize,
    clusters: usize,
    first_row: usize,
    labels: &mut [i32],
) {
    for (offset, label) in labels.iter_mut().enumerate() {
        let row = &data[(first_row + offset) * dim..][..dim];
        let mut best = f32::INFINITY;
        let mut best_label = -1i32;
        for c in 0..clusters {
            let centroid = &centroids[c * dim..][..dim];
            let dist: f32 = row
                .iter()
                .zip(centroid)
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            if dist < best {
                best = dist;
                best_label = c as i32;
            }
        }
        *label = best_label;
    }
}
