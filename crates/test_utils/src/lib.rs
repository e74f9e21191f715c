//! Testing utilities for sharc

#![warn(missing_docs)]

mod allocation;
mod live_counter;

pub use allocation::{AllocationTracker, CountingAllocator, live_allocations};
pub use live_counter::{LiveCounter, Tracked};
