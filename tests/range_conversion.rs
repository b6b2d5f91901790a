//! Conversion of declared ranges into native axis order

use dalrt::runtime::range::{to_native_nd_range, to_native_range};
use dalrt::runtime::{AxisOrder, KernelNdRange, KernelRange, LaunchRange, NativeRange};

#[test]
fn test_declared_order_is_identity() {
    let r = KernelRange::new_3d(2, 3, 4);
    assert_eq!(to_native_range::<3>(&r, AxisOrder::Declared), NativeRange([2, 3, 4]));
}

#[test]
fn test_reversed_order() {
    let r2 = KernelRange::new_2d(640, 480);
    assert_eq!(to_native_range::<2>(&r2, AxisOrder::Reversed), NativeRange([480, 640]));

    let r3 = KernelRange::new_3d(2, 3, 4);
    assert_eq!(to_native_range::<3>(&r3, AxisOrder::Reversed), NativeRange([4, 3, 2]));
}

#[test]
fn test_nd_range_permutes_global_and_local_together() {
    let range = KernelNdRange::new(KernelRange::new_2d(64, 32), KernelRange::new_2d(16, 8)).unwrap();
    let native = to_native_nd_range::<2>(&range, AxisOrder::Reversed);
    assert_eq!(native.global, NativeRange([32, 64]));
    assert_eq!(native.local, NativeRange([8, 16]));
}

#[test]
fn test_empty_axis_is_preserved() {
    let r = KernelRange::new_2d(0, 7);
    assert!(r.is_empty());
    assert_eq!(to_native_range::<2>(&r, AxisOrder::Reversed), NativeRange([7, 0]));
}

#[test]
fn test_launch_range_dimensions() {
    let flat: LaunchRange = KernelRange::new_2d(4, 4).into();
    assert_eq!(flat.dimensions(), 2);

    let tiled: LaunchRange =
        KernelNdRange::new(KernelRange::new_3d(8, 8, 8), KernelRange::new_3d(2, 2, 2))
            .unwrap()
            .into();
    assert_eq!(tiled.dimensions(), 3);
}

#[test]
fn test_from_slice_round_trip_of_bounds() {
    let r = KernelRange::from_slice(&[5, 6, 7]).unwrap();
    assert_eq!(r.as_slice(), &[5, 6, 7]);
    assert_eq!(r.len(), 210);
    assert!(KernelRange::from_slice(&[]).is_err());
}
