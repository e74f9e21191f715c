use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::Cell,
};

thread_local! {
    static LIVE_ALLOCATIONS: Cell<isize> = const { Cell::new(0) };
}

fn adjust_live_allocations(delta: isize) {
    // Allocations made while the thread is being torn down aren't counted
    let _ = LIVE_ALLOCATIONS.try_with(|live| live.set(live.get() + delta));
}

/// A global allocator that counts the live allocations made by each thread
///
/// Counting per thread keeps the results of tests that run in parallel apart from each other.
/// Memory that is freed by a different thread than the one that allocated it shows up as an
/// allocation on one thread and a deallocation on the other.
///
/// ```ignore
/// #[global_allocator]
/// static ALLOCATOR: CountingAllocator = CountingAllocator;
/// ```
pub struct CountingAllocator;

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let result = unsafe { System.alloc(layout) };
        if !result.is_null() {
            adjust_live_allocations(1);
        }
        result
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let result = unsafe { System.alloc_zeroed(layout) };
        if !result.is_null() {
            adjust_live_allocations(1);
        }
        result
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        adjust_live_allocations(-1);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        unsafe { System.realloc(ptr, layout, new_size) }
    }
}

/// Returns the number of live allocations made by the current thread
///
/// The count is only maintained when [CountingAllocator] is installed as the global allocator.
pub fn live_allocations() -> isize {
    LIVE_ALLOCATIONS.with(Cell::get)
}

/// Tracks the allocations made by the current thread since the tracker was started
#[derive(Debug)]
pub struct AllocationTracker {
    baseline: isize,
}

impl AllocationTracker {
    /// Starts tracking from the current number of live allocations
    pub fn start() -> Self {
        Self {
            baseline: live_allocations(),
        }
    }

    /// Returns the number of allocations that have been made and not yet freed
    pub fn live(&self) -> isize {
        live_allocations() - self.baseline
    }
}
