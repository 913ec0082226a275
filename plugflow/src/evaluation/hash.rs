//! Content hashes used as cache keys.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

const SECOND_LANE_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

/// A 128 bit digest describing "what a value would be" without producing it.
///
/// Two independent 64 bit lanes are fed with the same data so that accidental
/// collisions are vanishingly unlikely. The default (all zero) hash is the
/// "nothing appended" state and is never produced by `append()`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash {
    h1: u64,
    h2: u64,
}

impl ContentHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash of a single value.
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut h = Self::default();
        h.append(value);
        h
    }

    pub fn append<T: Hash + ?Sized>(&mut self, value: &T) -> &mut Self {
        let mut first = DefaultHasher::new();
        self.h1.hash(&mut first);
        value.hash(&mut first);

        let mut second = DefaultHasher::new();
        (self.h2 ^ SECOND_LANE_SALT).hash(&mut second);
        value.hash(&mut second);

        self.h1 = first.finish();
        self.h2 = second.finish();
        if self.is_null() {
            self.h2 = SECOND_LANE_SALT;
        }
        self
    }

    pub fn append_hash(&mut self, other: &ContentHash) -> &mut Self {
        self.append(&(other.h1, other.h2))
    }

    /// True if nothing has been appended.
    pub fn is_null(&self) -> bool {
        self.h1 == 0 && self.h2 == 0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.h1, self.h2)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appending_changes_null_hash() {
        let mut h = ContentHash::new();
        assert!(h.is_null());
        h.append(&0u8);
        assert!(!h.is_null());
    }

    #[test]
    fn order_of_appends_matters() {
        let mut a = ContentHash::new();
        a.append(&1i64).append(&2i64);
        let mut b = ContentHash::new();
        b.append(&2i64).append(&1i64);
        assert_ne!(a, b);
        assert_eq!(a, *ContentHash::new().append(&1i64).append(&2i64));
    }
}
