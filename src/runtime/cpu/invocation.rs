//! Kernel invocation on the CPU device
//!
//! A kernel implementation receives a [`CpuInvocation`]: the launch geometry,
//! the program's compile-time defines, and the bound argument slots. Buffer
//! slots are locked for the whole launch, shared for read-only access and
//! exclusive otherwise.

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use super::buffer::CpuBuffer;
use super::fault::CpuFault;
use super::runtime::CpuRuntime;
use crate::dtype::{DType, Element, Scalar};
use crate::runtime::BoundArgument;
use crate::runtime::program::CompileOptions;
use crate::runtime::range::LaunchShape;

enum Slot<'a> {
    Shared {
        dtype: DType,
        len_bytes: usize,
        words: RwLockReadGuard<'a, Vec<u64>>,
    },
    Exclusive {
        dtype: DType,
        len_bytes: usize,
        words: RwLockWriteGuard<'a, Vec<u64>>,
    },
    Scalar(Scalar),
}

/// One kernel launch as seen by a kernel implementation
pub struct CpuInvocation<'a> {
    shape: LaunchShape,
    options: &'a CompileOptions,
    slots: Vec<Slot<'a>>,
}

impl<'a> CpuInvocation<'a> {
    /// Lock the buffers of `args` and build the invocation.
    ///
    /// A buffer bound with write access must not be bound to any other
    /// argument of the same launch. Locks are taken in allocation address
    /// order so launches on different queues sharing buffers cannot deadlock.
    pub(crate) fn bind(
        shape: LaunchShape,
        options: &'a CompileOptions,
        args: &'a [BoundArgument<CpuRuntime>],
    ) -> Result<Self, CpuFault> {
        check_aliasing(args)?;

        let mut order: Vec<(usize, &'a CpuBuffer, DType, bool)> = args
            .iter()
            .enumerate()
            .filter_map(|(index, arg)| match arg {
                BoundArgument::Buffer {
                    buffer,
                    dtype,
                    access,
                } => Some((index, buffer, *dtype, access.is_write())),
                BoundArgument::Scalar(_) => None,
            })
            .collect();
        order.sort_by_key(|(_, buffer, ..)| buffer.addr());

        let mut slots: Vec<Option<Slot<'a>>> = args
            .iter()
            .map(|arg| match arg {
                BoundArgument::Scalar(value) => Some(Slot::Scalar(*value)),
                BoundArgument::Buffer { .. } => None,
            })
            .collect();
        for (index, buffer, dtype, writes) in order {
            slots[index] = Some(if writes {
                Slot::Exclusive {
                    dtype,
                    len_bytes: buffer.len(),
                    words: buffer.lock_exclusive(),
                }
            } else {
                Slot::Shared {
                    dtype,
                    len_bytes: buffer.len(),
                    words: buffer.lock_shared(),
                }
            });
        }

        Ok(Self {
            shape,
            options,
            slots: slots.into_iter().flatten().collect(),
        })
    }

    /// Launch geometry in native axis order
    pub fn shape(&self) -> &LaunchShape {
        &self.shape
    }

    /// Global size of native axis `axis` (1 for unused axes)
    pub fn global_size(&self, axis: usize) -> usize {
        self.shape.global.get(axis).copied().unwrap_or(1)
    }

    /// Total number of work items
    pub fn global_len(&self) -> usize {
        self.shape.global_len()
    }

    /// Value of a `-D` define from the program's build options
    pub fn define(&self, name: &str) -> Option<&str> {
        self.options.define_value(name)
    }

    /// Number of bound arguments
    pub fn arg_count(&self) -> usize {
        self.slots.len()
    }

    /// Sequential accessor over the argument slots
    pub fn args(&mut self) -> CpuArgs<'_, 'a> {
        let bound = self.slots.len();
        CpuArgs {
            slots: self.slots.iter_mut(),
            index: 0,
            bound,
        }
    }
}

fn check_aliasing(args: &[BoundArgument<CpuRuntime>]) -> Result<(), CpuFault> {
    let buffers: Vec<(usize, &CpuBuffer, bool)> = args
        .iter()
        .enumerate()
        .filter_map(|(index, arg)| match arg {
            BoundArgument::Buffer { buffer, access, .. } => {
                Some((index, buffer, access.is_write()))
            }
            BoundArgument::Scalar(_) => None,
        })
        .collect();
    for (i, (index, buffer, writes)) in buffers.iter().enumerate() {
        for (_, other, other_writes) in &buffers[i + 1..] {
            if (*writes || *other_writes) && buffer.ptr_eq(other) {
                return Err(CpuFault::BufferAliasing { index: *index });
            }
        }
    }
    Ok(())
}

/// Hands out argument slots in index order
pub struct CpuArgs<'s, 'a> {
    slots: std::slice::IterMut<'s, Slot<'a>>,
    index: usize,
    bound: usize,
}

impl<'s, 'a> CpuArgs<'s, 'a> {
    fn next_slot(&mut self) -> Result<(usize, &'s mut Slot<'a>), CpuFault> {
        let index = self.index;
        let slot = self.slots.next().ok_or(CpuFault::MissingArgument {
            index,
            bound: self.bound,
        })?;
        self.index += 1;
        Ok((index, slot))
    }

    /// Next argument as a read-only buffer of `T`
    pub fn input<T: Element>(&mut self) -> Result<&'s [T], CpuFault> {
        let (index, slot) = self.next_slot()?;
        let (dtype, len_bytes, words): (DType, usize, &'s [u64]) = match slot {
            Slot::Shared {
                dtype,
                len_bytes,
                words,
            } => (*dtype, *len_bytes, &words[..]),
            Slot::Exclusive {
                dtype,
                len_bytes,
                words,
            } => (*dtype, *len_bytes, &words[..]),
            Slot::Scalar(_) => {
                return Err(CpuFault::ArgumentKind {
                    index,
                    expected: "buffer",
                });
            }
        };
        check_dtype::<T>(index, dtype)?;
        let bytes = &bytemuck::cast_slice::<u64, u8>(words)[..whole_elements::<T>(len_bytes)];
        bytemuck::try_cast_slice(bytes).map_err(|_| CpuFault::ArgumentKind {
            index,
            expected: "aligned buffer",
        })
    }

    /// Next argument as a writable buffer of `T`
    pub fn output<T: Element>(&mut self) -> Result<&'s mut [T], CpuFault> {
        let (index, slot) = self.next_slot()?;
        let (dtype, len_bytes, words) = match slot {
            Slot::Exclusive {
                dtype,
                len_bytes,
                words,
            } => (*dtype, *len_bytes, words),
            Slot::Shared { .. } => return Err(CpuFault::ReadOnly { index }),
            Slot::Scalar(_) => {
                return Err(CpuFault::ArgumentKind {
                    index,
                    expected: "buffer",
                });
            }
        };
        check_dtype::<T>(index, dtype)?;
        let len = whole_elements::<T>(len_bytes);
        let bytes = &mut bytemuck::cast_slice_mut::<u64, u8>(&mut words[..])[..len];
        bytemuck::try_cast_slice_mut(bytes).map_err(|_| CpuFault::ArgumentKind {
            index,
            expected: "aligned buffer",
        })
    }

    /// Next argument as a scalar of `T`
    pub fn scalar<T: Element>(&mut self) -> Result<T, CpuFault> {
        let (index, slot) = self.next_slot()?;
        match slot {
            Slot::Scalar(value) => value.get::<T>().ok_or(CpuFault::ArgumentType {
                index,
                expected: T::DTYPE,
                got: value.dtype(),
            }),
            _ => Err(CpuFault::ArgumentKind {
                index,
                expected: "scalar",
            }),
        }
    }
}

fn check_dtype<T: Element>(index: usize, got: DType) -> Result<(), CpuFault> {
    if got == T::DTYPE {
        Ok(())
    } else {
        Err(CpuFault::ArgumentType {
            index,
            expected: T::DTYPE,
            got,
        })
    }
}

/// Byte length of the whole `T` elements that fit in `len_bytes`
fn whole_elements<T>(len_bytes: usize) -> usize {
    let size = std::mem::size_of::<T>();
    len_bytes / size * size
}
