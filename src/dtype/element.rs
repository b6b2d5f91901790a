//! Element trait for mapping Rust types to DType

use super::{DType, Scalar};
use bytemuck::{Pod, Zeroable};

/// Trait for types that can be stored in device buffers or passed as scalars
///
/// This trait connects Rust's type system to the runtime's dtype tags.
///
/// # Bounds
/// - `Copy + Send + Sync + 'static` - values are moved freely between threads
/// - `Pod + Zeroable` - safe reinterpretation of device bytes (bytemuck)
/// - `PartialEq + Debug` - comparisons in tests and diagnostics
pub trait Element:
    Copy + Send + Sync + Pod + Zeroable + PartialEq + std::fmt::Debug + 'static
{
    /// The corresponding DType for this Rust type
    const DTYPE: DType;

    /// Wrap the value in its scalar tag
    fn into_scalar(self) -> Scalar;

    /// Unwrap a scalar whose tag is `Self::DTYPE`
    fn from_scalar(scalar: Scalar) -> Option<Self>;
}

macro_rules! impl_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$variant;

                #[inline]
                fn into_scalar(self) -> Scalar {
                    Scalar::$variant(self)
                }

                #[inline]
                fn from_scalar(scalar: Scalar) -> Option<Self> {
                    match scalar {
                        Scalar::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_element! {
    f64 => F64,
    f32 => F32,
    i64 => I64,
    i32 => I32,
    u64 => U64,
    u32 => U32,
}
