use std::{cell::UnsafeCell, fmt, ptr::NonNull};

use crate::{Error, Result, Shared, Weak, control::ControlBlock};

/// A self-reference that lets an object produce [Shared] handles to itself
///
/// The self-reference is embedded in the object, and gets linked when the object is first owned
/// by a `Shared` that was made with one of the `_linked` constructors, e.g.
/// [Shared::new_linked]. Until then, requests for handles fail with [Error::NotYetOwned].
///
/// The object only keeps a weak reference to itself, so it doesn't keep itself alive.
///
/// Cloning a `SelfRef` produces an unlinked self-reference, the clone of an object is a
/// different object that will need its own owner. For the same reason, `clone_from` leaves the
/// destination's self-reference untouched.
pub struct SelfRef<T: ?Sized> {
    weak: UnsafeCell<Weak<T>>,
}

// Safety: the inner Weak is only written in `link`, before the object can be reached from
// other threads.
unsafe impl<T: ?Sized + Send + Sync> Sync for SelfRef<T> {}

impl<T: ?Sized> SelfRef<T> {
    /// Makes an unlinked self-reference
    pub const fn new() -> Self {
        Self {
            weak: UnsafeCell::new(Weak::new()),
        }
    }

    fn get(&self) -> &Weak<T> {
        // Safety: see `link`
        unsafe { &*self.weak.get() }
    }

    /// Links the self-reference to the object's first owner
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the object while the link is made.
    pub(crate) unsafe fn link(&self, weak: Weak<T>) {
        // Safety: upheld by the caller
        unsafe { *self.weak.get() = weak };
    }

    /// Returns true if the self-reference has been linked to an owner
    pub fn is_linked(&self) -> bool {
        !self.get().is_empty()
    }

    pub(crate) fn is_linked_to(&self, block: NonNull<ControlBlock>) -> bool {
        self.get().block() == Some(block)
    }

    /// Makes a new strong handle to the object
    ///
    /// Fails with [Error::NotYetOwned] if the self-reference hasn't been linked, and with
    /// [Error::Expired] if the object is being destroyed.
    pub fn shared(&self) -> Result<Shared<T>> {
        let weak = self.get();
        if weak.is_empty() {
            return Err(Error::NotYetOwned);
        }
        Shared::try_from_weak(weak)
    }

    /// Makes a new weak handle to the object
    ///
    /// Fails with [Error::NotYetOwned] if the self-reference hasn't been linked.
    pub fn weak(&self) -> Result<Weak<T>> {
        let weak = self.get();
        if weak.is_empty() {
            Err(Error::NotYetOwned)
        } else {
            Ok(weak.clone())
        }
    }
}

impl<T: ?Sized> Default for SelfRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for SelfRef<T> {
    fn clone(&self) -> Self {
        Self::new()
    }

    fn clone_from(&mut self, _source: &Self) {}
}

impl<T: ?Sized> fmt::Debug for SelfRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfRef")
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// Implemented by types that can produce [Shared] handles to themselves
///
/// Implementors embed a [SelfRef] and return it from [SharedFromSelf::self_ref]. The
/// self-reference is linked when a new owner is made with one of the `_linked` functions:
///
/// - [Shared::new_linked], [Shared::from_box_linked], [Shared::from_unique_linked] and
///   [Shared::from_raw_linked] for new objects.
/// - [Shared::reset_linked] and [Shared::reset_raw_linked] when a handle switches objects.
/// - [Shared::make_mut_linked] when a shared object is cloned on write.
///
/// The other ways of making an owner leave the self-reference unlinked, and the object then
/// reports [Error::NotYetOwned] for the rest of its life. These are [Shared::new],
/// [Shared::from_unique], [Shared::from_raw], [Shared::from_raw_with_deleter],
/// [Shared::reset], [Shared::reset_raw], [Shared::make_mut], and the `From<T>`,
/// `From<Box<T>>` and `Default` impls of `Shared`.
///
/// # Examples
///
/// ```
/// use sharc::{Error, SelfRef, Shared, SharedFromSelf};
///
/// #[derive(Debug, Default)]
/// struct Session {
///     self_ref: SelfRef<Session>,
/// }
///
/// impl SharedFromSelf for Session {
///     fn self_ref(&self) -> &SelfRef<Self> {
///         &self.self_ref
///     }
/// }
///
/// let unowned = Session::default();
/// assert_eq!(unowned.shared_from_self().unwrap_err(), Error::NotYetOwned);
///
/// let session = Shared::new_linked(Session::default());
/// let other = session.shared_from_self().unwrap();
/// assert_eq!(Shared::use_count(&session), 2);
/// # drop(other);
/// ```
pub trait SharedFromSelf {
    /// Returns the self-reference embedded in the object
    fn self_ref(&self) -> &SelfRef<Self>;

    /// Makes a new strong handle to the object
    ///
    /// See [SelfRef::shared].
    fn shared_from_self(&self) -> Result<Shared<Self>> {
        self.self_ref().shared()
    }

    /// Makes a new weak handle to the object
    ///
    /// See [SelfRef::weak].
    fn weak_from_self(&self) -> Result<Weak<Self>> {
        self.self_ref().weak()
    }
}
