use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem::ManuallyDrop,
    ops::Deref,
    ptr::NonNull,
};

use crate::{
    Address, DefaultDelete, Deleter, Error, Result, SharedFromSelf, Unique, Weak,
    control::{ControlBlock, ObjBlock, PtrBlock},
};

/// Converts a `Shared` or `Weak` handle into a handle to a type that the pointee unsizes into
///
/// Custom unsized coercions aren't available on stable Rust, so the coercion from a concrete type
/// to a trait object (or from an array to a slice) needs to be performed on the inner pointer.
/// This macro takes care of that at the call site. The handle is moved, so reference counts are
/// unchanged. Incompatible conversions fail to compile.
///
/// # Examples
///
/// ```
/// use sharc::{Shared, upcast};
/// use std::fmt::Display;
///
/// let number = Shared::new(42);
/// let display = upcast!(number.clone(), dyn Display);
///
/// assert_eq!(display.to_string(), "42");
/// assert_eq!(Shared::use_count(&number), 2);
/// ```
#[macro_export]
macro_rules! upcast {
    ($handle:expr, $ty:ty) => {{
        let handle = $handle;
        // Safety: the closure only performs an unsizing coercion, the address is unchanged
        unsafe {
            $crate::__private::Upcast::upcast_with(handle, |ptr| {
                let ptr: ::core::ptr::NonNull<$ty> = ptr;
                ptr
            })
        }
    }};
}

/// A thread-safe reference-counted pointer to a shared object
///
/// `Shared` is similar to [std::sync::Arc], with some differences:
///
/// - Objects can be allocated together with their control block ([Shared::new]), or adopted
///   from an existing allocation along with a custom [Deleter] ([Shared::from_raw_with_deleter]).
///   The deleter is captured at creation, so upcasting never loses track of how to destroy the
///   object.
/// - A handle can alias another handle's object, sharing its lifetime while pointing at a
///   sub-object ([Shared::alias]).
/// - Objects that implement [SharedFromSelf] can produce new handles to themselves.
/// - Handles compare by the address of the object they point to rather than by value.
///
/// Like `Arc`, the associated functions take `this` as an explicit argument to avoid clashing
/// with methods on the pointee.
pub struct Shared<T: ?Sized> {
    ptr: NonNull<T>,
    block: NonNull<ControlBlock>,
    _owned: PhantomData<T>,
}

// Safety: the counters are atomic, and the pointee can only be shared when it's Send + Sync
unsafe impl<T: ?Sized + Send + Sync> Send for Shared<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for Shared<T> {}

impl<T> Shared<T> {
    /// Moves the value into a new allocation that also holds the control block
    ///
    /// This is the preferred way to make a `Shared`, only one allocation is needed. The
    /// self-reference of a [SharedFromSelf] type isn't linked, see [Shared::new_linked].
    ///
    /// # Examples
    ///
    /// ```
    /// use sharc::Shared;
    ///
    /// let shared = Shared::new(String::from("hello"));
    /// assert_eq!(*shared, "hello");
    /// assert_eq!(Shared::use_count(&shared), 1);
    /// ```
    pub fn new(value: T) -> Self {
        let (block, ptr) = ObjBlock::allocate(value);
        // Safety: the block starts with a strong count of 1, which is handed to the new handle
        unsafe { Self::from_parts(ptr, block) }
    }

    /// Moves the value into a new allocation and links its self-reference to the new handle
    ///
    /// # Examples
    ///
    /// ```
    /// use sharc::{SelfRef, Shared, SharedFromSelf};
    ///
    /// #[derive(Default)]
    /// struct Node {
    ///     self_ref: SelfRef<Node>,
    /// }
    ///
    /// impl SharedFromSelf for Node {
    ///     fn self_ref(&self) -> &SelfRef<Self> {
    ///         &self.self_ref
    ///     }
    /// }
    ///
    /// let node = Shared::new_linked(Node::default());
    /// let again = node.shared_from_self().unwrap();
    /// assert!(Shared::ptr_eq(&node, &again));
    /// ```
    pub fn new_linked(value: T) -> Self
    where
        T: SharedFromSelf,
    {
        let result = Self::new(value);
        Self::link_self(&result);
        result
    }
}

impl<T: Clone> Shared<T> {
    /// Makes a mutable reference into the shared object
    ///
    /// If the handle is the only reference to the object (with no weak handles), then the
    /// reference is returned directly. Otherwise the object is cloned into a new allocation that
    /// this handle switches to, and a reference to the clone is returned.
    ///
    /// The clone's self-reference isn't linked, [Shared::make_mut_linked] should be used for
    /// types that implement [SharedFromSelf].
    ///
    /// See also: [std::sync::Arc::make_mut]
    pub fn make_mut(this: &mut Self) -> &mut T {
        if !Self::control(this).is_unique(0) {
            *this = Self::new(T::clone(&**this));
        }
        // Safety: the handle is now the only reference to the object
        unsafe { this.ptr.as_mut() }
    }

    /// Makes a mutable reference into the shared object, keeping its self-reference linked
    ///
    /// The object's own self-reference doesn't count against uniqueness. When the object is
    /// shared, the clone is allocated with [Shared::new_linked]. An unlinked object that is
    /// uniquely owned gets linked to this handle.
    pub fn make_mut_linked(this: &mut Self) -> &mut T
    where
        T: SharedFromSelf,
    {
        let linked = this.self_ref().is_linked_to(this.block);
        if !Self::control(this).is_unique(usize::from(linked)) {
            *this = Self::new_linked(T::clone(&**this));
        } else if !linked {
            Self::link_self(this);
        }
        // Safety: the only other reference to the object is its own self-reference, which can't
        // be reached while the object is mutably borrowed.
        unsafe { this.ptr.as_mut() }
    }
}

impl<T: ?Sized> Shared<T> {
    /// Makes a handle from its parts without touching the counters
    ///
    /// # Safety
    ///
    /// The caller must transfer ownership of one strong reference in `block` to the new handle,
    /// and `ptr` must remain valid for as long as the block's object is alive.
    pub(crate) unsafe fn from_parts(ptr: NonNull<T>, block: NonNull<ControlBlock>) -> Self {
        Self {
            ptr,
            block,
            _owned: PhantomData,
        }
    }

    fn control(this: &Self) -> &ControlBlock {
        // Safety: the handle's strong reference keeps the block alive
        unsafe { this.block.as_ref() }
    }

    /// Adopts a pointer that was produced by [Box::into_raw] (or [Box::leak])
    ///
    /// The object will be dropped and its memory freed with [DefaultDelete].
    ///
    /// # Safety
    ///
    /// The pointer must come from a `Box<T>` that is no longer owned by anything else. In
    /// particular, adopting the same pointer twice results in a double free.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        // Safety: upheld by the caller
        unsafe { Self::from_raw_with_deleter(ptr, DefaultDelete) }
    }

    /// Adopts a pointer along with the deleter that will destroy it
    ///
    /// A new control block is allocated for the pointer, the object itself is left where it is.
    /// The deleter is stored in the control block, so it can't borrow from the caller's scope.
    ///
    /// # Examples
    ///
    /// ```
    /// use sharc::Shared;
    /// use std::ptr::NonNull;
    ///
    /// let ptr = NonNull::from(Box::leak(Box::new(99)));
    /// let deleter = |ptr: NonNull<i32>| drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    /// let shared = unsafe { Shared::from_raw_with_deleter(ptr, deleter) };
    /// assert_eq!(*shared, 99);
    /// ```
    ///
    /// # Safety
    ///
    /// `ptr` must point to a valid object that nothing else owns, and it must be valid to pass it
    /// to `deleter` once the last strong handle is dropped.
    pub unsafe fn from_raw_with_deleter<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        D: Deleter<T> + Send + 'static,
    {
        let block = PtrBlock::allocate(ptr, deleter);
        // Safety: the new block's strong reference is handed to the new handle
        unsafe { Self::from_parts(ptr, block) }
    }

    /// Takes ownership of the contents of a single-owner pointer
    ///
    /// The source is consumed, and its deleter moves into the new control block. `None` is
    /// returned when the source didn't own anything.
    ///
    /// # Examples
    ///
    /// ```
    /// use sharc::Shared;
    ///
    /// let shared = Shared::from_unique(Some(Box::new(1))).unwrap();
    /// assert_eq!(Shared::use_count(&shared), 1);
    ///
    /// assert!(Shared::<i32>::from_unique(None::<Box<i32>>).is_none());
    /// ```
    pub fn from_unique<U>(unique: U) -> Option<Self>
    where
        U: Unique<T>,
    {
        let (ptr, deleter) = unique.into_raw_parts()?;
        // Safety: the contract of the unsafe Unique trait guarantees that the pointer and deleter
        // belong together, and that the source has given up its ownership.
        Some(unsafe { Self::from_raw_with_deleter(ptr, deleter) })
    }

    /// Takes ownership of a boxed object and links its self-reference to the new handle
    pub fn from_box_linked(boxed: Box<T>) -> Self
    where
        T: SharedFromSelf,
    {
        let result = Self::from(boxed);
        Self::link_self(&result);
        result
    }

    /// Takes ownership of a single-owner pointer's object and links its self-reference
    pub fn from_unique_linked<U>(unique: U) -> Option<Self>
    where
        T: SharedFromSelf,
        U: Unique<T>,
    {
        let result = Self::from_unique(unique)?;
        Self::link_self(&result);
        Some(result)
    }

    /// Adopts a pointer with a deleter, and links the object's self-reference to the new handle
    ///
    /// # Safety
    ///
    /// See [Shared::from_raw_with_deleter]. Additionally, no other thread may access the object
    /// while the call is in progress.
    pub unsafe fn from_raw_linked<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        T: SharedFromSelf,
        D: Deleter<T> + Send + 'static,
    {
        // Safety: upheld by the caller
        let result = unsafe { Self::from_raw_with_deleter(ptr, deleter) };
        Self::link_self(&result);
        result
    }

    fn link_self(this: &Self)
    where
        T: SharedFromSelf,
    {
        log::trace!("sharc: linking self-reference at {:p}", this.ptr);
        // Safety: `this` was created by the caller moments ago, so nothing else can reach the
        // object yet.
        unsafe { this.self_ref().link(Self::downgrade(this)) }
    }

    /// Promotes a weak handle, failing with [Error::Expired] if the object has been destroyed
    ///
    /// Unlike [Weak::lock], an expired object is treated as an error.
    pub fn try_from_weak(weak: &Weak<T>) -> Result<Self> {
        weak.lock().ok_or_else(|| {
            log::trace!("sharc: promotion failed, the object has expired");
            Error::Expired
        })
    }

    /// Makes a new weak handle to the object
    pub fn downgrade(this: &Self) -> Weak<T> {
        Self::control(this).increment_weak();
        // Safety: the weak count was incremented on behalf of the new handle
        unsafe { Weak::from_parts(this.ptr, this.block) }
    }

    /// Returns the number of strong handles that share ownership of the object
    ///
    /// Other threads may be adding or dropping handles, so the result is only advisory.
    pub fn use_count(this: &Self) -> usize {
        Self::control(this).strong_count()
    }

    /// Returns the number of weak handles that observe the object
    ///
    /// Other threads may be adding or dropping handles, so the result is only advisory.
    pub fn weak_count(this: &Self) -> usize {
        // One weak unit is held on behalf of the strong handles
        Self::control(this).weak_count().saturating_sub(1)
    }

    /// Returns true if the two handles point to the same address
    ///
    /// Handles to different sub-objects of a shared object compare as unequal, see
    /// [Shared::owner_eq] for a comparison of ownership.
    pub fn ptr_eq<U: ?Sized>(this: &Self, other: &Shared<U>) -> bool {
        Shared::address(this) == Shared::address(other)
    }

    /// Returns true if the two handles share a control block
    pub fn owner_eq<U: ?Sized>(this: &Self, other: &Shared<U>) -> bool {
        this.block == other.block
    }

    /// Returns the address of the object
    pub fn address(this: &Self) -> Address {
        this.ptr.as_ptr().into()
    }

    /// Returns a raw pointer to the object
    pub fn as_ptr(this: &Self) -> *const T {
        this.ptr.as_ptr()
    }

    /// Returns a mutable reference to the object if the handle is its only reference
    ///
    /// `None` is returned if any other strong or weak handles share the control block. A linked
    /// self-reference counts as a weak handle, see [Shared::make_mut_linked].
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        if Self::control(this).is_unique(0) {
            // Safety: no other handle can reach the object
            Some(unsafe { this.ptr.as_mut() })
        } else {
            None
        }
    }

    /// Makes a handle to a part of the object that shares ownership with `this`
    ///
    /// The whole object stays alive for as long as the returned handle exists.
    ///
    /// # Examples
    ///
    /// ```
    /// use sharc::Shared;
    ///
    /// let pair = Shared::new((1, String::from("two")));
    /// let second = Shared::alias(&pair, |(_, second)| second);
    /// drop(pair);
    ///
    /// assert_eq!(*second, "two");
    /// assert_eq!(Shared::use_count(&second), 1);
    /// ```
    pub fn alias<U: ?Sized, F>(this: &Self, f: F) -> Shared<U>
    where
        T: Send + Sync,
        F: FnOnce(&T) -> &U,
    {
        let ptr = NonNull::from(f(&**this));
        Self::control(this).increment_strong();
        // Safety: the strong count was incremented on behalf of the new handle, and the part
        // lives as long as the object.
        unsafe { Shared::from_parts(ptr, this.block) }
    }

    /// Converts the handle into a handle to a part of the object
    ///
    /// Ownership moves to the returned handle, the counters are unchanged.
    pub fn map<U: ?Sized, F>(this: Self, f: F) -> Shared<U>
    where
        T: Send + Sync,
        F: FnOnce(&T) -> &U,
    {
        let ptr = NonNull::from(f(&*this));
        let this = ManuallyDrop::new(this);
        // Safety: the strong reference held by `this` moves to the new handle
        unsafe { Shared::from_parts(ptr, this.block) }
    }

    /// Converts the handle into a handle to an optional part of the object
    ///
    /// If the closure returns `None` then the original handle is returned as the error.
    pub fn filter_map<U: ?Sized, F>(this: Self, f: F) -> std::result::Result<Shared<U>, Self>
    where
        T: Send + Sync,
        F: FnOnce(&T) -> Option<&U>,
    {
        match f(&*this).map(NonNull::from) {
            Some(ptr) => {
                let this = ManuallyDrop::new(this);
                // Safety: the strong reference held by `this` moves to the new handle
                Ok(unsafe { Shared::from_parts(ptr, this.block) })
            }
            None => Err(this),
        }
    }

    /// Makes a handle that shares ownership with `this` while pointing at an arbitrary address
    ///
    /// # Safety
    ///
    /// `ptr` must remain valid for reads for as long as the object owned by `this` is alive.
    /// The returned handle may be sent to other threads if `U` allows it, so the caller must
    /// also make sure that destroying the owned object on another thread is sound.
    pub unsafe fn alias_raw<U: ?Sized>(this: &Self, ptr: NonNull<U>) -> Shared<U> {
        Self::control(this).increment_strong();
        // Safety: upheld by the caller, the new strong reference belongs to the new handle
        unsafe { Shared::from_parts(ptr, this.block) }
    }

    /// Converts the handle by applying a function to the object pointer
    ///
    /// The [upcast] macro provides a safe way to make unsizing conversions.
    ///
    /// # Safety
    ///
    /// See [Shared::alias_raw], the same requirements apply to the pointer returned by `f`.
    pub unsafe fn map_raw<U: ?Sized, F>(this: Self, f: F) -> Shared<U>
    where
        F: FnOnce(NonNull<T>) -> NonNull<U>,
    {
        let this = ManuallyDrop::new(this);
        // Safety: upheld by the caller, the strong reference moves to the new handle
        unsafe { Shared::from_parts(f(this.ptr), this.block) }
    }

    /// Releases the current object and takes ownership of a boxed object
    ///
    /// If `this` was the last strong handle to its previous object then the object is destroyed.
    /// See [Shared::reset_linked] for types that implement [SharedFromSelf].
    pub fn reset(this: &mut Self, boxed: Box<T>) {
        *this = Self::from(boxed);
    }

    /// Releases the current object, takes ownership of a boxed object, and links its
    /// self-reference to this handle
    pub fn reset_linked(this: &mut Self, boxed: Box<T>)
    where
        T: SharedFromSelf,
    {
        *this = Self::from_box_linked(boxed);
    }

    /// Releases the current object and adopts a pointer along with the deleter that will destroy it
    ///
    /// # Safety
    ///
    /// See [Shared::from_raw_with_deleter].
    pub unsafe fn reset_raw<D>(this: &mut Self, ptr: NonNull<T>, deleter: D)
    where
        D: Deleter<T> + Send + 'static,
    {
        // Safety: upheld by the caller
        *this = unsafe { Self::from_raw_with_deleter(ptr, deleter) };
    }

    /// Releases the current object, adopts a pointer with a deleter, and links the new object's
    /// self-reference to this handle
    ///
    /// # Safety
    ///
    /// See [Shared::from_raw_linked].
    pub unsafe fn reset_raw_linked<D>(this: &mut Self, ptr: NonNull<T>, deleter: D)
    where
        T: SharedFromSelf,
        D: Deleter<T> + Send + 'static,
    {
        // Safety: upheld by the caller
        *this = unsafe { Self::from_raw_linked(ptr, deleter) };
    }
}

impl<T: ?Sized> Drop for Shared<T> {
    fn drop(&mut self) {
        // Safety: the handle owns one strong reference, which is released here
        unsafe { ControlBlock::decrement_strong(self.block) }
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self::control(self).increment_strong();
        // Safety: the strong count was incremented on behalf of the new handle
        unsafe { Self::from_parts(self.ptr, self.block) }
    }

    fn clone_from(&mut self, source: &Self) {
        if self.block == source.block {
            // Both handles already hold a reference in the same block
            self.ptr = source.ptr;
        } else {
            *self = source.clone();
        }
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the object is alive while a strong handle exists
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ?Sized> AsRef<T> for Shared<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for Shared<T> {
    fn from(boxed: Box<T>) -> Self {
        let ptr = NonNull::from(Box::leak(boxed));
        // Safety: the pointer comes from a Box that has been given up
        unsafe { Self::from_raw(ptr) }
    }
}

impl<T: ?Sized> TryFrom<&Weak<T>> for Shared<T> {
    type Error = Error;

    fn try_from(weak: &Weak<T>) -> Result<Self> {
        Self::try_from_weak(weak)
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<Shared<U>> for Shared<T> {
    fn eq(&self, other: &Shared<U>) -> bool {
        Shared::ptr_eq(self, other)
    }
}

impl<T: ?Sized> Eq for Shared<T> {}

impl<T: ?Sized, U: ?Sized> PartialOrd<Shared<U>> for Shared<T> {
    fn partial_cmp(&self, other: &Shared<U>) -> Option<Ordering> {
        Some(Shared::address(self).cmp(&Shared::address(other)))
    }
}

impl<T: ?Sized> Ord for Shared<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        Shared::address(self).cmp(&Shared::address(other))
    }
}

impl<T: ?Sized> Hash for Shared<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Shared::address(self).hash(state)
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T: ?Sized> fmt::Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.ptr, f)
    }
}
