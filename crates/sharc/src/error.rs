use thiserror::Error;

/// The errors that can be returned when materializing a [Shared](crate::Shared) handle
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The object behind a weak handle has already been destroyed
    ///
    /// [Weak::lock](crate::Weak::lock) can be used instead when an expired object isn't an error.
    #[error("the shared object has already been destroyed")]
    Expired,
    /// A self-reference was requested before any shared handle took ownership of the object
    #[error("the object isn't owned by a shared handle yet")]
    NotYetOwned,
}

/// The Result type used by sharc
pub type Result<T> = std::result::Result<T, Error>;
