use std::ptr::NonNull;

/// A destruction policy for objects that are adopted by a [Shared](crate::Shared) handle
///
/// The deleter is stored in the control block and invoked once with the adopted pointer when
/// the last strong handle is dropped. Any `FnOnce(NonNull<T>)` closure can be used as a deleter.
pub trait Deleter<T: ?Sized> {
    /// Destroys the object behind `ptr` and releases its memory
    ///
    /// # Safety
    ///
    /// `ptr` must be the pointer that this deleter was paired with, and the object must not be
    /// accessed again after the call.
    unsafe fn delete(self, ptr: NonNull<T>);
}

impl<T: ?Sized, F> Deleter<T> for F
where
    F: FnOnce(NonNull<T>),
{
    unsafe fn delete(self, ptr: NonNull<T>) {
        self(ptr)
    }
}

/// The default deleter, used for pointers that were allocated by a [Box]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    unsafe fn delete(self, ptr: NonNull<T>) {
        // Safety: the pointer was produced by Box::into_raw (see `Unique for Box`)
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

/// A single-owner pointer that can hand its contents over to a [Shared](crate::Shared) handle
///
/// Converting a `Unique` is a one-way transfer of ownership: the source is consumed and the
/// returned pointer and deleter become the only way to reach the object.
///
/// # Safety
///
/// [Shared::from_unique](crate::Shared::from_unique) trusts the returned parts without
/// checking them. Implementations must guarantee that:
///
/// - the pointer refers to a valid object that nothing else owns or borrows once
///   `into_raw_parts` returns,
/// - the object stays valid until the deleter is called with the pointer,
/// - calling the deleter once with the pointer is the correct way to destroy the object.
///
/// The trait can't be implemented without `unsafe`:
///
/// ```compile_fail
/// use sharc::{DefaultDelete, Unique};
/// use std::ptr::NonNull;
///
/// struct Borrowed<'a>(&'a u32);
///
/// impl Unique<u32> for Borrowed<'_> {
///     type Deleter = DefaultDelete;
///
///     fn into_raw_parts(self) -> Option<(NonNull<u32>, DefaultDelete)> {
///         Some((NonNull::from(self.0), DefaultDelete))
///     }
/// }
/// ```
///
/// Deleters are stored in the control block, so they can't borrow from the caller's scope:
///
/// ```compile_fail
/// use sharc::Shared;
/// use std::ptr::NonNull;
///
/// let log = vec![1];
/// let ptr = NonNull::from(Box::leak(Box::new(0_u32)));
/// let shared = unsafe {
///     Shared::from_raw_with_deleter(ptr, |ptr: NonNull<u32>| {
///         let _ = log.len();
///         drop(unsafe { Box::from_raw(ptr.as_ptr()) });
///     })
/// };
/// drop(log);
/// drop(shared);
/// ```
pub unsafe trait Unique<T: ?Sized> {
    /// The destruction policy that comes along with the pointer
    type Deleter: Deleter<T> + Send + 'static;

    /// Extracts the raw pointer and its deleter, or `None` if nothing is owned
    fn into_raw_parts(self) -> Option<(NonNull<T>, Self::Deleter)>;
}

// Safety: Box::leak gives up ownership of a Box allocation, which DefaultDelete frees
unsafe impl<T: ?Sized> Unique<T> for Box<T> {
    type Deleter = DefaultDelete;

    fn into_raw_parts(self) -> Option<(NonNull<T>, DefaultDelete)> {
        Some((NonNull::from(Box::leak(self)), DefaultDelete))
    }
}

// Safety: see the impl for Box
unsafe impl<T: ?Sized> Unique<T> for Option<Box<T>> {
    type Deleter = DefaultDelete;

    fn into_raw_parts(self) -> Option<(NonNull<T>, DefaultDelete)> {
        self.and_then(Unique::into_raw_parts)
    }
}
