use std::{fmt, marker::PhantomData, ptr::NonNull};

use crate::{Address, Shared, control::ControlBlock};

/// A non-owning handle to an object managed by [Shared]
///
/// A `Weak` keeps the control block alive, but not the object. [Weak::lock] attempts to promote
/// the handle to a `Shared`, which only succeeds while the object is alive.
///
/// # Examples
///
/// ```
/// use sharc::{Shared, Weak};
///
/// let shared = Shared::new(1);
/// let weak = Shared::downgrade(&shared);
/// assert_eq!(weak.use_count(), 1);
/// assert_eq!(weak.lock().as_deref(), Some(&1));
///
/// drop(shared);
/// assert!(weak.expired());
/// assert!(weak.lock().is_none());
/// ```
pub struct Weak<T: ?Sized> {
    inner: Option<WeakInner<T>>,
    _observed: PhantomData<T>,
}

struct WeakInner<T: ?Sized> {
    ptr: NonNull<T>,
    block: NonNull<ControlBlock>,
}

impl<T: ?Sized> Clone for WeakInner<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for WeakInner<T> {}

impl<T: ?Sized> WeakInner<T> {
    fn control(&self) -> &ControlBlock {
        // Safety: the owning Weak's weak unit keeps the block alive
        unsafe { self.block.as_ref() }
    }
}

// Safety: a Weak can only be promoted to a Shared, see the Send and Sync impls for Shared
unsafe impl<T: ?Sized + Send + Sync> Send for Weak<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for Weak<T> {}

impl<T: ?Sized> Weak<T> {
    /// Makes an empty handle that doesn't observe any object
    ///
    /// Empty handles are always expired.
    pub const fn new() -> Self {
        Self {
            inner: None,
            _observed: PhantomData,
        }
    }

    /// Makes a handle from its parts without touching the counters
    ///
    /// # Safety
    ///
    /// The caller must transfer ownership of one weak unit in `block` to the new handle.
    pub(crate) unsafe fn from_parts(ptr: NonNull<T>, block: NonNull<ControlBlock>) -> Self {
        Self {
            inner: Some(WeakInner { ptr, block }),
            _observed: PhantomData,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    pub(crate) fn block(&self) -> Option<NonNull<ControlBlock>> {
        self.inner.map(|inner| inner.block)
    }

    /// Attempts to make a [Shared] handle to the object
    ///
    /// `None` is returned if the object has been destroyed, or if its last strong handle is being
    /// dropped concurrently. A successful promotion keeps the object alive until the returned
    /// handle is dropped.
    pub fn lock(&self) -> Option<Shared<T>> {
        let inner = self.inner?;
        if inner.control().try_increment_strong_if_nonzero() {
            // Safety: the strong count was incremented on behalf of the new handle
            Some(unsafe { Shared::from_parts(inner.ptr, inner.block) })
        } else {
            None
        }
    }

    /// Returns true if the object has been destroyed, or if the handle is empty
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Returns the number of strong handles to the object
    ///
    /// Zero is returned for empty handles. The result is only advisory.
    pub fn use_count(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| inner.control().strong_count())
    }

    /// Releases the handle's weak reference, leaving the handle empty
    pub fn reset(&mut self) {
        if let Some(inner) = self.inner.take() {
            // Safety: the handle owned one weak unit, which is released here
            unsafe { ControlBlock::decrement_weak(inner.block) }
        }
    }

    /// Returns true if the two handles point to the same address
    ///
    /// Two empty handles are considered equal.
    pub fn ptr_eq<U: ?Sized>(&self, other: &Weak<U>) -> bool {
        self.address() == other.address()
    }

    /// Returns the address of the observed object, or a null address if the handle is empty
    ///
    /// The address remains available after the object has been destroyed.
    pub fn address(&self) -> Address {
        match &self.inner {
            Some(inner) => inner.ptr.as_ptr().into(),
            None => std::ptr::null::<u8>().into(),
        }
    }

    /// Converts the handle by applying a function to the object pointer
    ///
    /// An empty handle stays empty. The [upcast](crate::upcast) macro provides a safe way to make
    /// unsizing conversions.
    ///
    /// # Safety
    ///
    /// The returned pointer must be valid for reads whenever the object is alive, with the same
    /// requirements as [Shared::alias_raw].
    pub unsafe fn map_raw<U: ?Sized, F>(mut self, f: F) -> Weak<U>
    where
        F: FnOnce(NonNull<T>) -> NonNull<U>,
    {
        match self.inner.take() {
            // Safety: the weak unit moves from `self` to the new handle
            Some(inner) => unsafe { Weak::from_parts(f(inner.ptr), inner.block) },
            None => Weak::new(),
        }
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    fn clone(&self) -> Self {
        match self.inner {
            Some(inner) => {
                inner.control().increment_weak();
                // Safety: the weak count was incremented on behalf of the new handle
                unsafe { Self::from_parts(inner.ptr, inner.block) }
            }
            None => Self::new(),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        match (&mut self.inner, &source.inner) {
            (Some(inner), Some(source_inner)) if inner.block == source_inner.block => {
                inner.ptr = source_inner.ptr;
            }
            _ => *self = source.clone(),
        }
    }
}

impl<T: ?Sized> Default for Weak<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> From<&Shared<T>> for Weak<T> {
    fn from(shared: &Shared<T>) -> Self {
        Shared::downgrade(shared)
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Weak)")
    }
}
