//! Commit-counter validated memo
//!
//! Holds one `(counter, value)` pair. The value was computed while the global
//! commit counter was `counter`; it stays valid while `counter` is at least
//! the current global counter, i.e. until the next commit.
//!
//! Computing the value happens outside the memo. Only `publish` takes the
//! lock, and it never replaces a newer entry with an older one.

use parking_lot::Mutex;
use revstore_core::Wcn;

/// Single-entry memo keyed by the global commit counter
#[derive(Debug)]
pub struct CounterMemo<T> {
    entry: Mutex<Option<(Wcn, T)>>,
}

impl<T> Default for CounterMemo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CounterMemo<T> {
    /// Create an empty memo
    pub const fn new() -> Self {
        CounterMemo {
            entry: parking_lot::const_mutex(None),
        }
    }

    /// Forget the memoized value
    pub fn invalidate(&self) {
        *self.entry.lock() = None;
    }

    /// Counter of the memoized value, if any
    pub fn counter(&self) -> Option<Wcn> {
        self.entry.lock().as_ref().map(|(c, _)| *c)
    }
}

impl<T: Clone> CounterMemo<T> {
    /// Memoized value, if it is still valid at `current`
    pub fn get(&self, current: Wcn) -> Option<T> {
        match &*self.entry.lock() {
            Some((counter, value)) if *counter >= current => Some(value.clone()),
            _ => None,
        }
    }

    /// Store `value` computed at `counter`, unless a newer value is present
    ///
    /// Returns `true` if the memo now holds `value`.
    pub fn publish(&self, counter: Wcn, value: T) -> bool {
        let mut entry = self.entry.lock();
        match &*entry {
            Some((existing, _)) if *existing > counter => false,
            _ => {
                *entry = Some((counter, value));
                true
            }
        }
    }
}
