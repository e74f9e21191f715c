use std::sync::{
    Arc,
    atomic::{AtomicIsize, AtomicUsize, Ordering},
};

#[derive(Debug, Default)]
struct Counts {
    live: AtomicIsize,
    dropped: AtomicUsize,
}

/// Counts the [Tracked] values that are currently alive
///
/// Clones of a counter share their counts.
#[derive(Clone, Debug, Default)]
pub struct LiveCounter(Arc<Counts>);

impl LiveCounter {
    /// Makes a new counter with no live values
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a new tracked value with the given payload
    pub fn track(&self, value: i64) -> Tracked {
        self.0.live.fetch_add(1, Ordering::SeqCst);
        Tracked {
            value,
            counter: self.clone(),
        }
    }

    /// Returns the number of tracked values that are alive
    pub fn live(&self) -> isize {
        self.0.live.load(Ordering::SeqCst)
    }

    /// Returns the number of tracked values that have been dropped
    pub fn dropped(&self) -> usize {
        self.0.dropped.load(Ordering::SeqCst)
    }
}

/// A value that updates its [LiveCounter] when it's dropped
#[derive(Debug)]
pub struct Tracked {
    /// The payload
    pub value: i64,
    counter: LiveCounter,
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        self.counter.track(self.value)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.counter.0.live.fetch_sub(1, Ordering::SeqCst);
        self.counter.0.dropped.fetch_add(1, Ordering::SeqCst);
    }
}
