//! Grow-only set (G-Set) CRDT.
//!
//! Insert-only: no removal operation exists. Merge = set union.
//!
//! # Examples
//!
//! ```
//! use meld_crdt::GSet;
//!
//! let mut a = GSet::new();
//! a.add("x".to_string());
//!
//! let mut b = GSet::new();
//! b.add("y".to_string());
//!
//! a.merge(&b);
//! assert!(a.contains(&"x".to_string()) && a.contains(&"y".to_string()));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

/// An add-only set. Merge = union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GSet<T: Eq + Hash> {
    elements: HashSet<T>,
}

impl<T: Eq + Hash + Clone> GSet<T> {
    /// Create a new empty G-Set.
    pub fn new() -> Self {
        Self {
            elements: HashSet::new(),
        }
    }

    /// Insert an element. Returns true if it was not already present.
    pub fn add(&mut self, element: T) -> bool {
        self.elements.insert(element)
    }

    /// Pure membership query.
    pub fn contains(&self, element: &T) -> bool {
        self.elements.contains(element)
    }

    /// Iterate over all elements (unordered).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.elements.iter()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True if the set has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Merge with another G-Set: set union.
    pub fn merge(&mut self, other: &Self) {
        for element in &other.elements {
            self.elements.insert(element.clone());
        }
    }
}

impl<T: Eq + Hash + Clone> Default for GSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
