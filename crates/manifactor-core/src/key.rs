//! Variable keys.
//!
//! A [`Key`] is an opaque identifier for one optimization variable. Keys are
//! totally ordered; every block layout produced by the linearization core
//! iterates variables in key order, so the ordering is what makes the output
//! deterministic.

use std::fmt;

/// Unique identifier for an optimization variable.
///
/// Wraps a `u64`. The ordering of keys fixes the column order of Jacobian
/// blocks in linearized factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub u64);

impl Key {
    /// Creates a key from a raw index.
    pub const fn new(index: u64) -> Self {
        Key(index)
    }

    /// Returns the raw index.
    pub const fn index(self) -> u64 {
        self.0
    }
}

/// Creates a key from a single-character tag and an index.
///
/// The tag is packed into the high byte, so keys made with different tags
/// never collide and sort first by tag, then by index. Useful for labelling
/// variables by kind, e.g. `symbol('x', 3)` for the third pose.
///
/// # Panics
///
/// Panics if `tag` is not ASCII or `index` does not fit in 56 bits.
pub fn symbol(tag: char, index: u64) -> Key {
    assert!(tag.is_ascii(), "symbol tag must be ASCII: {tag:?}");
    assert!(index < (1 << 56), "symbol index out of range: {index}");
    Key(((tag as u64) << 56) | index)
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = (self.0 >> 56) as u8;
        if tag.is_ascii_graphic() {
            write!(f, "{}{}", tag as char, self.0 & ((1 << 56) - 1))
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for Key {
    fn from(index: u64) -> Self {
        Key(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        assert!(Key::new(1) < Key::new(2));
        assert!(symbol('x', 5) < symbol('y', 0));
        assert!(symbol('x', 1) < symbol('x', 2));
    }

    #[test]
    fn test_symbol_display() {
        assert_eq!(symbol('x', 42).to_string(), "x42");
        assert_eq!(Key::new(7).to_string(), "7");
    }

    #[test]
    #[should_panic(expected = "symbol index out of range")]
    fn test_symbol_index_overflow() {
        symbol('x', 1 << 56);
    }

    #[test]
    #[should_panic(expected = "symbol tag must be ASCII")]
    fn test_symbol_non_ascii_tag() {
        // A wide tag would keep only its low byte and could collide with
        // another tag's keys.
        symbol('λ', 0);
    }
}
