//! Control blocks shared by every handle in an ownership group
//!
//! A control block starts with a [ControlBlock] header holding the strong and weak counters,
//! followed by whatever the variant needs to destroy the managed object:
//!
//! - [PtrBlock] owns a separately allocated object through a pointer and a [Deleter].
//! - [ObjBlock] stores the object inline, so that a single allocation holds both.
//!
//! The counter protocol is implemented once on the header. Variants only provide the two
//! functions in their [ControlVTable], which are selected when the block is allocated while
//! the concrete type is still known.

use std::{
    cell::UnsafeCell,
    hint,
    mem::{ManuallyDrop, MaybeUninit},
    process,
    ptr::{self, NonNull},
    sync::atomic::{self, AtomicUsize, Ordering},
};

use crate::Deleter;

/// Counts above this value abort the process rather than risking an overflow
pub(crate) const MAX_REFCOUNT: usize = isize::MAX as usize;

// Stored in the weak count while `ControlBlock::is_unique` inspects the strong count
const WEAK_LOCKED: usize = usize::MAX;

/// The operations that a control block variant provides to the shared header
pub(crate) struct ControlVTable {
    /// Destroys the managed object, leaving the block's memory in place
    destroy: unsafe fn(NonNull<ControlBlock>),
    /// Frees the block itself
    deallocate: unsafe fn(NonNull<ControlBlock>),
}

/// The header at the start of every control block
#[repr(C)]
pub(crate) struct ControlBlock {
    strong: AtomicUsize,
    // The number of weak handles, plus one while any strong handles remain
    weak: AtomicUsize,
    vtable: &'static ControlVTable,
}

impl ControlBlock {
    fn new(vtable: &'static ControlVTable) -> Self {
        Self {
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            vtable,
        }
    }

    /// Returns the current number of strong handles
    ///
    /// The result is only advisory, other threads may be modifying the count concurrently.
    pub(crate) fn strong_count(&self) -> usize {
        self.strong.load(Ordering::Relaxed)
    }

    /// Returns the current weak count, including the unit held by the strong group
    pub(crate) fn weak_count(&self) -> usize {
        match self.weak.load(Ordering::Relaxed) {
            // Locked by `is_unique`, which only succeeds when no extra weak handles exist
            WEAK_LOCKED => 1,
            count => count,
        }
    }

    /// Returns true if the caller holds the only strong reference, and the only weak references
    /// are the strong group's unit and `self_links` self-references inside the object
    ///
    /// The weak count is locked while the strong count is read, so that a weak handle can't be
    /// made from another strong handle and survive it in between the two loads.
    pub(crate) fn is_unique(&self, self_links: usize) -> bool {
        let expected = 1 + self_links;
        if self
            .weak
            .compare_exchange(expected, WEAK_LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        let unique = self.strong.load(Ordering::Acquire) == 1;

        // Synchronizes with the acquire in `increment_weak`
        self.weak.store(expected, Ordering::Release);
        unique
    }

    /// Adds a strong reference on behalf of a handle that already holds one
    pub(crate) fn increment_strong(&self) {
        // The caller already holds a reference, so there's nothing to synchronize with.
        let old = self.strong.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            process::abort();
        }
    }

    /// Adds a weak reference on behalf of a handle that already holds a reference
    ///
    /// Spins while the weak count is locked by `is_unique`.
    pub(crate) fn increment_weak(&self) {
        let mut current = self.weak.load(Ordering::Relaxed);
        loop {
            if current == WEAK_LOCKED {
                hint::spin_loop();
                current = self.weak.load(Ordering::Relaxed);
                continue;
            }
            if current > MAX_REFCOUNT {
                process::abort();
            }
            match self.weak.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Adds a strong reference unless the strong count has already reached zero
    ///
    /// Returns false if the managed object has been (or is being) destroyed. A count of zero is
    /// never incremented, which rules out resurrecting an object during its destruction.
    pub(crate) fn try_increment_strong_if_nonzero(&self) -> bool {
        let mut current = self.strong.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            if current > MAX_REFCOUNT {
                process::abort();
            }
            match self.strong.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Releases a strong reference, destroying the managed object when it was the last one
    ///
    /// # Safety
    ///
    /// `this` must point to a live block, and the caller must own one strong reference, which
    /// is consumed by the call. The block may have been freed when this returns.
    pub(crate) unsafe fn decrement_strong(this: NonNull<Self>) {
        // Safety: the caller's strong reference keeps the block's weak unit alive
        let block = unsafe { this.as_ref() };
        if block.strong.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }

        // Synchronizes with the release decrements of every other owner, so that the
        // destruction observes all of their writes to the object.
        atomic::fence(Ordering::Acquire);

        // Safety: the strong count has reached zero, so this is the only call to destroy
        unsafe { (block.vtable.destroy)(this) };
        // Safety: the strong group's weak unit is released here
        unsafe { Self::decrement_weak(this) };
    }

    /// Releases a weak reference, freeing the block when it was the last one
    ///
    /// # Safety
    ///
    /// `this` must point to a live block, and the caller must own one weak unit, which is
    /// consumed by the call. The block may have been freed when this returns.
    pub(crate) unsafe fn decrement_weak(this: NonNull<Self>) {
        // Safety: the caller's weak unit keeps the block alive
        let block = unsafe { this.as_ref() };
        if block.weak.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        log::trace!("sharc: freeing control block at {:p}", this);
        // Safety: the weak count has reached zero, so no other handle refers to the block
        unsafe { (block.vtable.deallocate)(this) };
    }
}

/// A control block that owns a separately allocated object
#[repr(C)]
pub(crate) struct PtrBlock<T: ?Sized, D> {
    header: ControlBlock,
    ptr: NonNull<T>,
    deleter: UnsafeCell<ManuallyDrop<D>>,
}

impl<T: ?Sized, D: Deleter<T>> PtrBlock<T, D> {
    const VTABLE: ControlVTable = ControlVTable {
        destroy: Self::destroy,
        deallocate: Self::deallocate,
    };

    /// Allocates a block that will pass `ptr` to `deleter` when the strong count reaches zero
    pub(crate) fn allocate(ptr: NonNull<T>, deleter: D) -> NonNull<ControlBlock> {
        let block = Box::new(Self {
            header: ControlBlock::new(&Self::VTABLE),
            ptr,
            deleter: UnsafeCell::new(ManuallyDrop::new(deleter)),
        });
        NonNull::from(Box::leak(block)).cast()
    }

    unsafe fn destroy(header: NonNull<ControlBlock>) {
        let this = header.cast::<Self>().as_ptr();
        // Safety: destroy is only called once, after the last strong handle is gone, so
        // nothing else is accessing the deleter.
        unsafe {
            let deleter = ManuallyDrop::take(&mut *(*this).deleter.get());
            deleter.delete((*this).ptr);
        }
    }

    unsafe fn deallocate(header: NonNull<ControlBlock>) {
        // Safety: the block was allocated as a Box<Self> in `allocate`. The deleter was
        // already taken by `destroy`, and the ManuallyDrop wrapper prevents a second drop.
        drop(unsafe { Box::from_raw(header.cast::<Self>().as_ptr()) });
    }
}

/// A control block that stores its object inline
#[repr(C)]
pub(crate) struct ObjBlock<T> {
    header: ControlBlock,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> ObjBlock<T> {
    const VTABLE: ControlVTable = ControlVTable {
        destroy: Self::destroy,
        deallocate: Self::deallocate,
    };

    /// Allocates a block with `value` moved into its inline storage
    ///
    /// Returns the header along with a pointer to the stored value.
    pub(crate) fn allocate(value: T) -> (NonNull<ControlBlock>, NonNull<T>) {
        let block = Box::into_raw(Box::new(Self {
            header: ControlBlock::new(&Self::VTABLE),
            value: UnsafeCell::new(MaybeUninit::new(value)),
        }));

        // Safety: `block` comes from Box::into_raw so it's non-null. The value pointer is
        // derived from it, which keeps it valid for the lifetime of the allocation.
        unsafe {
            let value = UnsafeCell::raw_get(ptr::addr_of!((*block).value)).cast::<T>();
            (
                NonNull::new_unchecked(block).cast(),
                NonNull::new_unchecked(value),
            )
        }
    }

    unsafe fn destroy(header: NonNull<ControlBlock>) {
        let this = header.cast::<Self>().as_ptr();
        // Safety: the value was initialized in `allocate` and is dropped only here
        unsafe {
            let value = UnsafeCell::raw_get(ptr::addr_of!((*this).value)).cast::<T>();
            ptr::drop_in_place(value);
        }
    }

    unsafe fn deallocate(header: NonNull<ControlBlock>) {
        // Safety: the block was allocated as a Box<Self>, and MaybeUninit won't drop the value
        // a second time.
        drop(unsafe { Box::from_raw(header.cast::<Self>().as_ptr()) });
    }
}
