//! Reference-counted native handles
//!
//! Device APIs hand out opaque handles (devices, contexts, programs, kernels)
//! whose lifetime is governed by explicit retain/release calls. `ResourceRef`
//! owns exactly one reference to such a handle:
//!
//! - `Clone` retains the handle
//! - moving transfers ownership (use [`ResourceRef::take`] to move out of a
//!   place and leave it empty)
//! - `Drop` releases the handle
//!
//! Release failures during cleanup are logged and otherwise ignored, so
//! dropping a `ResourceRef` never panics.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::NativeCode;

/// Retain/release operations for one kind of native handle.
///
/// # Safety
///
/// Implementors guarantee that a raw handle obtained from the native API may
/// be retained, released and used from any thread, and that `retain` and
/// `release` are exactly paired reference count operations on it.
pub unsafe trait RefCounted {
    /// Raw handle value
    type Raw: Copy;

    /// Human-readable kind, used in diagnostics
    const KIND: &'static str;

    /// Increment the handle's reference count.
    ///
    /// # Safety
    ///
    /// `raw` must be a live handle of this kind.
    unsafe fn retain(raw: Self::Raw) -> Result<(), NativeCode>;

    /// Decrement the handle's reference count, destroying it at zero.
    ///
    /// # Safety
    ///
    /// `raw` must be a live handle of this kind, and the caller must give up
    /// the reference being released.
    unsafe fn release(raw: Self::Raw) -> Result<(), NativeCode>;
}

/// Owning wrapper around one reference to a native handle
pub struct ResourceRef<K: RefCounted> {
    raw: Option<K::Raw>,
    _kind: PhantomData<K>,
}

// SAFETY: `RefCounted` implementors guarantee their handles are thread-safe.
unsafe impl<K: RefCounted> Send for ResourceRef<K> {}
// SAFETY: see above; `ResourceRef` exposes no interior mutability.
unsafe impl<K: RefCounted> Sync for ResourceRef<K> {}

impl<K: RefCounted> ResourceRef<K> {
    /// Create an empty reference
    pub const fn null() -> Self {
        Self {
            raw: None,
            _kind: PhantomData,
        }
    }

    /// Take ownership of one reference to `raw`.
    ///
    /// # Safety
    ///
    /// `raw` must be a live handle whose reference the caller owns and hands
    /// over to the returned wrapper.
    pub unsafe fn from_raw(raw: K::Raw) -> Self {
        Self {
            raw: Some(raw),
            _kind: PhantomData,
        }
    }

    /// Current handle, if any
    #[inline]
    pub fn get(&self) -> Option<K::Raw> {
        self.raw
    }

    /// True if no handle is held
    #[inline]
    pub fn is_null(&self) -> bool {
        self.raw.is_none()
    }

    /// Release the held handle (if any) and take ownership of `raw`.
    ///
    /// # Safety
    ///
    /// If `raw` is `Some`, the same contract as [`ResourceRef::from_raw`]
    /// applies.
    pub unsafe fn reset(&mut self, raw: Option<K::Raw>) {
        let previous = std::mem::replace(&mut self.raw, raw);
        if let Some(previous) = previous {
            // SAFETY: `previous` was owned by this wrapper.
            release_quietly::<K>(previous);
        }
    }

    /// Release the held handle (if any) and leave the reference empty
    pub fn clear(&mut self) {
        // SAFETY: resetting to `None` hands no new handle to the wrapper.
        unsafe { self.reset(None) }
    }

    /// Give up ownership of the handle without releasing it
    ///
    /// The caller becomes responsible for the returned reference.
    #[must_use = "the returned handle still owns a reference"]
    pub fn release(&mut self) -> Option<K::Raw> {
        self.raw.take()
    }

    /// Move the handle out, leaving this reference empty
    pub fn take(&mut self) -> Self {
        Self {
            raw: self.raw.take(),
            _kind: PhantomData,
        }
    }

    /// Exchange handles with `other`
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.raw, &mut other.raw);
    }
}

fn release_quietly<K: RefCounted>(raw: K::Raw) {
    // SAFETY: callers only pass handles they owned a reference to.
    if let Err(code) = unsafe { K::release(raw) } {
        tracing::warn!(kind = K::KIND, %code, "ignoring failed handle release");
    }
}

impl<K: RefCounted> Clone for ResourceRef<K> {
    fn clone(&self) -> Self {
        if let Some(raw) = self.raw {
            // SAFETY: `raw` is live while `self` holds a reference to it.
            if let Err(code) = unsafe { K::retain(raw) } {
                tracing::warn!(kind = K::KIND, %code, "ignoring failed handle retain");
            }
        }
        Self {
            raw: self.raw,
            _kind: PhantomData,
        }
    }
}

impl<K: RefCounted> Drop for ResourceRef<K> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<K: RefCounted> Default for ResourceRef<K> {
    fn default() -> Self {
        Self::null()
    }
}

impl<K: RefCounted> fmt::Debug for ResourceRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRef")
            .field("kind", &K::KIND)
            .field("null", &self.is_null())
            .finish()
    }
}

// ============================================================================
// Arc-backed handles
// ============================================================================

/// Handle kind for native objects implemented in Rust and counted by `Arc`.
///
/// The raw handle is the pointer produced by `Arc::into_raw`; retain and
/// release map onto the strong count.
pub struct ArcRef<T>(PhantomData<fn() -> T>);

// SAFETY: retain/release are `Arc` strong count operations, and `T` is
// required to be `Send + Sync` so the object may be shared across threads.
unsafe impl<T: Send + Sync> RefCounted for ArcRef<T> {
    type Raw = NonNull<T>;

    const KIND: &'static str = "arc";

    unsafe fn retain(raw: NonNull<T>) -> Result<(), NativeCode> {
        // SAFETY: caller guarantees `raw` came from `Arc::into_raw` and is live.
        unsafe { Arc::increment_strong_count(raw.as_ptr()) };
        Ok(())
    }

    unsafe fn release(raw: NonNull<T>) -> Result<(), NativeCode> {
        // SAFETY: caller gives up one strong reference obtained from `Arc`.
        unsafe { Arc::decrement_strong_count(raw.as_ptr()) };
        Ok(())
    }
}

impl<T: Send + Sync> ResourceRef<ArcRef<T>> {
    /// Wrap an `Arc`, transferring its strong reference to the wrapper
    pub fn from_arc(object: Arc<T>) -> Self {
        let raw = NonNull::new(Arc::into_raw(object).cast_mut());
        Self {
            raw,
            _kind: PhantomData,
        }
    }

    /// Borrow the native object
    pub fn object(&self) -> Option<&T> {
        // SAFETY: the wrapper holds a strong reference, so the allocation is
        // live for at least as long as `&self`.
        self.raw.map(|raw| unsafe { raw.as_ref() })
    }

    /// Obtain a new `Arc` to the native object
    pub fn to_arc(&self) -> Option<Arc<T>> {
        self.raw.map(|raw| {
            // SAFETY: `raw` is live; the retained count is handed to the new `Arc`.
            unsafe {
                Arc::increment_strong_count(raw.as_ptr());
                Arc::from_raw(raw.as_ptr())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_arc_ref_counts() {
        let object = Arc::new(7u32);
        let weak = Arc::downgrade(&object);

        let a = ResourceRef::<ArcRef<u32>>::from_arc(object);
        assert_eq!(weak.strong_count(), 1);

        let b = a.clone();
        assert_eq!(weak.strong_count(), 2);
        assert_eq!(b.object(), Some(&7));

        drop(a);
        assert_eq!(weak.strong_count(), 1);
        drop(b);
        assert_eq!(weak.strong_count(), 0);
    }

    #[test]
    fn test_take_leaves_source_null() {
        let mut a = ResourceRef::<ArcRef<u32>>::from_arc(Arc::new(1));
        let b = a.take();
        assert!(a.is_null());
        assert!(!b.is_null());
        assert!(a.object().is_none());
    }

    #[test]
    fn test_to_arc_shares_object() {
        let a = ResourceRef::<ArcRef<String>>::from_arc(Arc::new("program".to_string()));
        let arc = a.to_arc().unwrap();
        assert_eq!(Arc::strong_count(&arc), 2);
        drop(a);
        assert_eq!(Arc::strong_count(&arc), 1);
    }

    static RELEASES: AtomicUsize = AtomicUsize::new(0);

    struct FailingRelease;

    unsafe impl RefCounted for FailingRelease {
        type Raw = u32;
        const KIND: &'static str = "failing";

        unsafe fn retain(_raw: u32) -> Result<(), NativeCode> {
            Err(NativeCode::INVALID_KERNEL)
        }

        unsafe fn release(_raw: u32) -> Result<(), NativeCode> {
            RELEASES.fetch_add(1, Ordering::SeqCst);
            Err(NativeCode::INVALID_KERNEL)
        }
    }

    #[test]
    fn test_release_errors_are_ignored() {
        let before = RELEASES.load(Ordering::SeqCst);
        {
            let a = unsafe { ResourceRef::<FailingRelease>::from_raw(3) };
            let _b = a.clone();
        }
        assert_eq!(RELEASES.load(Ordering::SeqCst) - before, 2);
    }
}
