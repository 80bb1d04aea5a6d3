//! Bucket allocator for AST nodes and scopes
//!
//! Pools allocations per node kind so that deletion of a translation unit
//! is a single pass over a handful of buckets instead of millions of
//! individual frees. `bumpalo` already gives us that shape: one arena per
//! `Compiler`, freed in one shot when the `Compiler` is dropped.
//! `BucketAllocator` is a thin, typed front door over a shared `bumpalo::Bump`
//! so call sites read as "allocate a T" rather than juggling raw bytes.
//!
//! Deliberately does not reach for a global pool guarded by a mutex: each
//! `Compiler` owns its own arena, so there is no cross-instance contention
//! and no global mutable singleton to avoid.

use bumpalo::Bump;
use std::cell::RefCell;

/// Per-`Compiler` bump arena. Not `Sync` — a `Compiler` is single-threaded
/// and a `BucketAllocator` must never be shared across one.
pub struct BucketAllocator {
    bump: Bump,
    /// Count of allocations made, for diagnostics (`--stats` in the CLI).
    allocations: RefCell<usize>,
}

impl BucketAllocator {
    pub fn new() -> Self {
        BucketAllocator {
            bump: Bump::new(),
            allocations: RefCell::new(0),
        }
    }

    pub fn with_capacity(bytes: usize) -> Self {
        BucketAllocator {
            bump: Bump::with_capacity(bytes),
            allocations: RefCell::new(0),
        }
    }

    /// Allocate `value` in the arena and return a reference tied to the
    /// allocator's lifetime.
    pub fn alloc<T>(&self, value: T) -> &T {
        *self.allocations.borrow_mut() += 1;
        self.bump.alloc(value)
    }

    /// Allocate a `Vec`'s worth of `T` contiguously.
    pub fn alloc_slice_copy<T: Copy>(&self, values: &[T]) -> &[T] {
        *self.allocations.borrow_mut() += values.len();
        self.bump.alloc_slice_copy(values)
    }

    pub fn allocation_count(&self) -> usize {
        *self.allocations.borrow()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bump.allocated_bytes()
    }

    /// Release every allocation made so far. Any outstanding `&T` borrowed
    /// from this allocator must already be gone; enforced by the borrow
    /// checker since `reset` takes `&mut self`.
    pub fn reset(&mut self) {
        self.bump.reset();
        *self.allocations.borrow_mut() = 0;
    }
}

impl Default for BucketAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_stable_reference() {
        let arena = BucketAllocator::new();
        let a = arena.alloc(42i64);
        let b = arena.alloc(43i64);
        assert_eq!(*a, 42);
        assert_eq!(*b, 43);
        assert_eq!(arena.allocation_count(), 2);
    }

    #[test]
    fn reset_clears_allocation_count() {
        let mut arena = BucketAllocator::new();
        arena.alloc(1u32);
        arena.alloc(2u32);
        assert_eq!(arena.allocation_count(), 2);
        arena.reset();
        assert_eq!(arena.allocation_count(), 0);
    }
}
