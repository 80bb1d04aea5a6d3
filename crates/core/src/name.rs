//! Interned names
//!
//! Identifiers, file paths in `TokenLocation`, and mangled template names are
//! compared and hashed constantly during resolution. `Name` is a cheap `Copy`
//! handle into a `NameTable` so those comparisons are pointer/index
//! comparisons rather than string comparisons.

use std::collections::HashMap;
use std::fmt;

/// An interned string handle. Two `Name`s are equal iff they were interned
/// from equal strings in the same `NameTable`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(u32);

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.0)
    }
}

/// Owns the backing strings for every `Name` handed out. Lives as long as
/// the `Compiler` that owns it; never shared across `Compiler` instances
/// (each gets its own table, same as the arena).
#[derive(Default)]
pub struct NameTable {
    strings: Vec<Box<str>>,
    lookup: HashMap<Box<str>, Name>,
}

impl NameTable {
    pub fn new() -> Self {
        NameTable::default()
    }

    pub fn intern(&mut self, s: &str) -> Name {
        if let Some(&name) = self.lookup.get(s) {
            return name;
        }
        let id = Name(self.strings.len() as u32);
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.lookup.insert(boxed, id);
        id
    }

    pub fn resolve(&self, name: Name) -> &str {
        &self.strings[name.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_string_returns_same_handle() {
        let mut table = NameTable::new();
        let a = table.intern("foo");
        let b = table.intern("foo");
        assert_eq!(a, b);
        let c = table.intern("bar");
        assert_ne!(a, c);
    }

    #[test]
    fn resolve_round_trips() {
        let mut table = NameTable::new();
        let n = table.intern("Vec");
        assert_eq!(table.resolve(n), "Vec");
    }
}
