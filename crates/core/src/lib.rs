//! Lethe Core: arena allocation and interning primitives
//!
//! Shared, language-agnostic foundations for the Lethe compiler front-end.
//! Everything here is free of AST/type knowledge so it can be depended on
//! by both the compiler and, eventually, tooling that only needs to intern
//! names or share the global static-initializer counter.
//!
//! # Modules
//!
//! - `arena`: per-node-kind bucket allocator backed by `bumpalo`
//! - `name`: interned string table (`Name`)
//! - `counter`: the one piece of state legitimately shared across
//!   `Compiler` instances — a thread-safe static-initializer
//!   counter

pub mod arena;
pub mod counter;
pub mod name;

pub use arena::BucketAllocator;
pub use counter::GlobalCounter;
pub use name::{Name, NameTable};
