//! Thread-safe shared and weak pointers with deferred deletion
//!
//! [Shared] is a reference-counted pointer, and [Weak] is a non-owning handle that can be
//! promoted back into a `Shared` while the object is alive. Both handles refer to a control
//! block that holds a strong and a weak counter:
//!
//! - The object is destroyed when the last `Shared` is dropped.
//! - The control block is freed when the last `Weak` is dropped, or together with the object
//!   if no `Weak` handles remain.
//!
//! Objects can be allocated together with their control block ([Shared::new]), or adopted from
//! an existing allocation along with a custom [Deleter]. Types that implement [SharedFromSelf]
//! can produce handles to themselves once they're owned.
//!
//! Reference cycles made from `Shared` handles are never collected, `Weak` handles should be used
//! to break them.

#![warn(missing_docs)]

mod address;
mod control;
mod deleter;
mod error;
mod self_ref;
mod shared;
mod weak;

pub use crate::{
    address::Address,
    deleter::{DefaultDelete, Deleter, Unique},
    error::{Error, Result},
    self_ref::{SelfRef, SharedFromSelf},
    shared::Shared,
    weak::Weak,
};

#[doc(hidden)]
pub mod __private {
    use std::ptr::NonNull;

    use crate::{Shared, Weak};

    /// Used by the `upcast!` macro to convert both kinds of handle
    pub trait Upcast {
        type Target: ?Sized;
        type Output<U: ?Sized>;

        /// # Safety
        ///
        /// See [Shared::map_raw] and [Weak::map_raw]
        unsafe fn upcast_with<U: ?Sized, F>(self, f: F) -> Self::Output<U>
        where
            F: FnOnce(NonNull<Self::Target>) -> NonNull<U>;
    }

    impl<T: ?Sized> Upcast for Shared<T> {
        type Target = T;
        type Output<U: ?Sized> = Shared<U>;

        unsafe fn upcast_with<U: ?Sized, F>(self, f: F) -> Shared<U>
        where
            F: FnOnce(NonNull<T>) -> NonNull<U>,
        {
            // Safety: upheld by the caller
            unsafe { Shared::map_raw(self, f) }
        }
    }

    impl<T: ?Sized> Upcast for Weak<T> {
        type Target = T;
        type Output<U: ?Sized> = Weak<U>;

        unsafe fn upcast_with<U: ?Sized, F>(self, f: F) -> Weak<U>
        where
            F: FnOnce(NonNull<T>) -> NonNull<U>,
        {
            // Safety: upheld by the caller
            unsafe { self.map_raw(f) }
        }
    }
}
