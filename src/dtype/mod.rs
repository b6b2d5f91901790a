//! Data type system for kernel arguments
//!
//! `DType` is the runtime tag that travels with every buffer and scalar
//! kernel argument, and `Scalar` is the by-value payload of a constant
//! argument. The [`Element`] trait connects both to Rust's type system.

mod element;

pub use element::Element;

use std::fmt;

/// Element types that can cross the kernel argument boundary
///
/// # Discriminant Values
///
/// Discriminants are stable and grouped by kind:
/// - Floats: 0-9 (F64=0, F32=1)
/// - Signed ints: 10-19 (I64=10, I32=11)
/// - Unsigned ints: 20-29 (U64=20, U32=21)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u8)]
pub enum DType {
    /// 64-bit floating point
    F64 = 0,
    /// 32-bit floating point (most common)
    F32 = 1,
    /// 64-bit signed integer
    I64 = 10,
    /// 32-bit signed integer
    I32 = 11,
    /// 64-bit unsigned integer
    U64 = 20,
    /// 32-bit unsigned integer
    U32 = 21,
}

impl DType {
    /// Size of one element in bytes
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::F64 | Self::I64 | Self::U64 => 8,
            Self::F32 | Self::I32 | Self::U32 => 4,
        }
    }

    /// Returns true if this is a floating point type
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F64 | Self::F32)
    }

    /// Short name for display (e.g., "f32", "i64")
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::F64 => "f64",
            Self::F32 => "f32",
            Self::I64 => "i64",
            Self::I32 => "i32",
            Self::U64 => "u64",
            Self::U32 => "u32",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A scalar constant passed to a kernel by value
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Scalar {
    /// 64-bit float
    F64(f64),
    /// 32-bit float
    F32(f32),
    /// 64-bit signed integer
    I64(i64),
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit unsigned integer
    U64(u64),
    /// 32-bit unsigned integer
    U32(u32),
}

impl Scalar {
    /// Runtime type tag of the value
    pub const fn dtype(&self) -> DType {
        match self {
            Self::F64(_) => DType::F64,
            Self::F32(_) => DType::F32,
            Self::I64(_) => DType::I64,
            Self::I32(_) => DType::I32,
            Self::U64(_) => DType::U64,
            Self::U32(_) => DType::U32,
        }
    }

    /// Extract the value as `T`, if the tags match
    #[inline]
    pub fn get<T: Element>(&self) -> Option<T> {
        T::from_scalar(*self)
    }

    /// Little-endian bytes of the value, as a device would receive them
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Self::F64(v) => v.to_le_bytes().to_vec(),
            Self::F32(v) => v.to_le_bytes().to_vec(),
            Self::I64(v) => v.to_le_bytes().to_vec(),
            Self::I32(v) => v.to_le_bytes().to_vec(),
            Self::U64(v) => v.to_le_bytes().to_vec(),
            Self::U32(v) => v.to_le_bytes().to_vec(),
        }
    }
}

impl<T: Element> From<T> for Scalar {
    fn from(value: T) -> Self {
        value.into_scalar()
    }
}
