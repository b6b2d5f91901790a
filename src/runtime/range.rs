//! Kernel iteration ranges and their conversion to native device ranges
//!
//! A [`KernelRange`] describes a 1-3 dimensional index space in the
//! library's axis convention (axes listed outermost first). A
//! [`KernelNdRange`] pairs a global range with a local (work-group) range of
//! the same dimensionality.
//!
//! Device APIs disagree about which axis varies fastest, so conversion to the
//! native form takes an explicit [`AxisOrder`]:
//!
//! ```text
//! declared (a, b, c)
//!   AxisOrder::Declared  ->  native (a, b, c)
//!   AxisOrder::Reversed  ->  native (c, b, a)
//! ```
//!
//! Tiled ranges apply the same permutation to the global and local parts so
//! their axes stay paired.

use crate::error::{Error, Result};

/// Maximum number of axes a kernel range may have
pub const MAX_DIMENSIONS: usize = 3;

/// Axis order expected by a device backend
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum AxisOrder {
    /// Native axes follow the declared order
    #[default]
    Declared,
    /// Native axes are the declared axes reversed (last declared axis first)
    Reversed,
}

/// Flat iteration range with 1-3 axes
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct KernelRange {
    upper: [usize; MAX_DIMENSIONS],
    dims: usize,
}

impl KernelRange {
    /// One-dimensional range `[0, x)`
    pub const fn new_1d(x: usize) -> Self {
        Self {
            upper: [x, 1, 1],
            dims: 1,
        }
    }

    /// Two-dimensional range `[0, x) x [0, y)`
    pub const fn new_2d(x: usize, y: usize) -> Self {
        Self {
            upper: [x, y, 1],
            dims: 2,
        }
    }

    /// Three-dimensional range `[0, x) x [0, y) x [0, z)`
    pub const fn new_3d(x: usize, y: usize, z: usize) -> Self {
        Self {
            upper: [x, y, z],
            dims: 3,
        }
    }

    /// Build a range from a slice of 1-3 upper bounds
    pub fn from_slice(upper: &[usize]) -> Result<Self> {
        match *upper {
            [x] => Ok(Self::new_1d(x)),
            [x, y] => Ok(Self::new_2d(x, y)),
            [x, y, z] => Ok(Self::new_3d(x, y, z)),
            _ => Err(Error::InvalidArgument {
                arg: "range",
                reason: format!(
                    "expected 1 to {} dimensions, got {}",
                    MAX_DIMENSIONS,
                    upper.len()
                ),
            }),
        }
    }

    /// Number of axes (1, 2 or 3)
    #[inline]
    pub const fn dimensions(&self) -> usize {
        self.dims
    }

    /// Upper bound of a declared axis
    ///
    /// # Panics
    ///
    /// Panics if `axis >= self.dimensions()`.
    #[inline]
    pub fn upper(&self, axis: usize) -> usize {
        assert!(
            axis < self.dims,
            "axis {} out of range for {}-dimensional kernel range",
            axis,
            self.dims
        );
        self.upper[axis]
    }

    /// Declared upper bounds
    #[inline]
    pub fn as_slice(&self) -> &[usize] {
        &self.upper[..self.dims]
    }

    /// Total number of work items
    pub fn len(&self) -> usize {
        self.as_slice().iter().product()
    }

    /// True if any axis is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tiled iteration range: a global range split into local work-groups
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct KernelNdRange {
    global: KernelRange,
    local: KernelRange,
}

impl KernelNdRange {
    /// Pair a global and a local range of equal dimensionality
    pub fn new(global: KernelRange, local: KernelRange) -> Result<Self> {
        if global.dimensions() != local.dimensions() {
            return Err(Error::InvalidArgument {
                arg: "local",
                reason: format!(
                    "local range has {} dimensions but global range has {}",
                    local.dimensions(),
                    global.dimensions()
                ),
            });
        }
        Ok(Self { global, local })
    }

    /// Global range
    #[inline]
    pub fn global(&self) -> &KernelRange {
        &self.global
    }

    /// Local (work-group) range
    #[inline]
    pub fn local(&self) -> &KernelRange {
        &self.local
    }

    /// Number of axes (1, 2 or 3)
    #[inline]
    pub fn dimensions(&self) -> usize {
        self.global.dimensions()
    }
}

/// Either kind of range accepted by the scheduler
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LaunchRange {
    /// Flat range; the device picks the work-group shape
    Flat(KernelRange),
    /// Tiled range with an explicit work-group shape
    Tiled(KernelNdRange),
}

impl LaunchRange {
    /// Number of axes (1, 2 or 3)
    pub fn dimensions(&self) -> usize {
        match self {
            Self::Flat(range) => range.dimensions(),
            Self::Tiled(range) => range.dimensions(),
        }
    }
}

impl From<KernelRange> for LaunchRange {
    fn from(range: KernelRange) -> Self {
        Self::Flat(range)
    }
}

impl From<KernelNdRange> for LaunchRange {
    fn from(range: KernelNdRange) -> Self {
        Self::Tiled(range)
    }
}

// ============================================================================
// Native ranges
// ============================================================================

/// Range in the device's native axis order
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NativeRange<const D: usize>(pub [usize; D]);

/// Tiled range in the device's native axis order
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NativeNdRange<const D: usize> {
    /// Global sizes
    pub global: NativeRange<D>,
    /// Work-group sizes
    pub local: NativeRange<D>,
}

/// Convert a flat range to its native `D`-dimensional form.
///
/// # Panics
///
/// Panics if `range.dimensions() != D`; callers dispatch on the range's
/// dimensionality before converting.
pub fn to_native_range<const D: usize>(range: &KernelRange, order: AxisOrder) -> NativeRange<D> {
    assert_eq!(
        range.dimensions(),
        D,
        "unexpected number of dimensions for native range"
    );
    let mut native = [0usize; D];
    for (axis, slot) in native.iter_mut().enumerate() {
        let declared = match order {
            AxisOrder::Declared => axis,
            AxisOrder::Reversed => D - 1 - axis,
        };
        *slot = range.upper(declared);
    }
    NativeRange(native)
}

/// Convert a tiled range to its native `D`-dimensional form.
///
/// The same permutation is applied to the global and local parts.
pub fn to_native_nd_range<const D: usize>(
    range: &KernelNdRange,
    order: AxisOrder,
) -> NativeNdRange<D> {
    NativeNdRange {
        global: to_native_range::<D>(range.global(), order),
        local: to_native_range::<D>(range.local(), order),
    }
}

/// Dimension-erased launch geometry handed to a backend.
///
/// Unused trailing axes are padded with 1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LaunchShape {
    /// Number of native axes
    pub dims: usize,
    /// Global sizes, native order
    pub global: [usize; MAX_DIMENSIONS],
    /// Work-group sizes, native order, if the range was tiled
    pub local: Option<[usize; MAX_DIMENSIONS]>,
}

impl LaunchShape {
    /// Total number of work items
    pub fn global_len(&self) -> usize {
        self.global.iter().product()
    }
}

fn pad<const D: usize>(axes: [usize; D]) -> [usize; MAX_DIMENSIONS] {
    let mut padded = [1usize; MAX_DIMENSIONS];
    padded[..D].copy_from_slice(&axes);
    padded
}

impl<const D: usize> From<NativeRange<D>> for LaunchShape {
    fn from(range: NativeRange<D>) -> Self {
        Self {
            dims: D,
            global: pad(range.0),
            local: None,
        }
    }
}

impl<const D: usize> From<NativeNdRange<D>> for LaunchShape {
    fn from(range: NativeNdRange<D>) -> Self {
        Self {
            dims: D,
            global: pad(range.global.0),
            local: Some(pad(range.local.0)),
        }
    }
}

/// Convert a launch range with `D` axes into a launch shape
pub(crate) fn launch_shape<const D: usize>(range: &LaunchRange, order: AxisOrder) -> LaunchShape {
    match range {
        LaunchRange::Flat(r) => to_native_range::<D>(r, order).into(),
        LaunchRange::Tiled(r) => to_native_nd_range::<D>(r, order).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_rejects_bad_dimensionality() {
        assert!(KernelRange::from_slice(&[]).is_err());
        assert!(KernelRange::from_slice(&[1, 2, 3, 4]).is_err());
        assert_eq!(KernelRange::from_slice(&[4, 5]).unwrap(), KernelRange::new_2d(4, 5));
    }

    #[test]
    fn test_nd_range_requires_matching_dims() {
        let err = KernelNdRange::new(KernelRange::new_2d(8, 8), KernelRange::new_1d(4));
        assert!(err.is_err());
    }

    #[test]
    fn test_one_dim_is_order_independent() {
        let r = KernelRange::new_1d(9);
        assert_eq!(to_native_range::<1>(&r, AxisOrder::Declared), NativeRange([9]));
        assert_eq!(to_native_range::<1>(&r, AxisOrder::Reversed), NativeRange([9]));
    }

    #[test]
    #[should_panic(expected = "unexpected number of dimensions")]
    fn test_dimension_mismatch_panics() {
        let _ = to_native_range::<3>(&KernelRange::new_2d(1, 2), AxisOrder::Declared);
    }

    #[test]
    fn test_launch_shape_padding() {
        let shape: LaunchShape = NativeRange([6, 7]).into();
        assert_eq!(shape.global, [6, 7, 1]);
        assert_eq!(shape.local, None);
        assert_eq!(shape.global_len(), 42);
    }
}
