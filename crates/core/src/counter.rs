//! Global static-initializer counter
//!
//! Multiple compilers may run in parallel provided they share only
//! immutable inputs and a thread-safe atomic counter for the global
//! static-initializer counter, which is the only piece of state crossing
//! compiler boundaries. Everything else a `Compiler` touches is owned
//! exclusively by that `Compiler`.
//!
//! Open question: we widen this counter to `u64` since nothing in
//! the front end needs it to match a 32-bit runtime object id, and a 64-bit
//! atomic counter costs nothing extra on any target this compiler runs on.
//! Decision recorded in DESIGN.md.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cloneable handle to one shared counter. Construct one and pass clones to
/// every `Compiler` that should share a numbering space (e.g. all
/// translation units of one program) so global-initializer numbering stays
/// monotonic across the whole program.
#[derive(Clone, Default)]
pub struct GlobalCounter(Arc<AtomicU64>);

impl GlobalCounter {
    pub fn new() -> Self {
        GlobalCounter(Arc::new(AtomicU64::new(0)))
    }

    /// Reserve and return the next counter value. Used both for `__init$N`
    /// chain numbering (codegen driver) and for the `__COUNTER__` macro.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_increments_monotonically() {
        let counter = GlobalCounter::new();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
    }

    #[test]
    fn shared_clone_sees_same_sequence() {
        let counter = GlobalCounter::new();
        let clone = counter.clone();
        assert_eq!(counter.next(), 0);
        assert_eq!(clone.next(), 1);
        assert_eq!(counter.next(), 2);
    }
}
