use std::{
    fmt,
    hash::{Hash, Hasher},
};

/// A wrapper for comparing and hashing the addresses of shared objects
///
/// Metadata of wide pointers is discarded, so a `Shared<dyn Trait>` and the `Shared<T>` it was
/// upcast from have the same address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Address(*const u8);

impl Address {
    /// Returns true if the address is null
    ///
    /// Only empty weak handles have a null address.
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

impl<T: ?Sized> From<*const T> for Address {
    fn from(pointer: *const T) -> Self {
        Self(pointer as *const u8)
    }
}

impl<T: ?Sized> From<*mut T> for Address {
    fn from(pointer: *mut T) -> Self {
        Self(pointer as *const u8)
    }
}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.0 as *const () as usize);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
