//! Insertion-ordered collection of unique values.
//!
//! Backs the key list of a list-view store between reading the key list
//! file and rewriting it.

use std::collections::HashSet;
use std::hash::Hash;

/// How duplicate checks are performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Companion hash set: O(1) amortized membership, twice the memory.
    #[default]
    Faster,
    /// Linear scan: O(n) membership, minimal memory.
    Smaller,
}

/// A container where insertion order is preserved and elements are unique.
#[derive(Clone, Debug)]
pub struct OrderedSet<T> {
    strategy: Strategy,
    elements: Vec<T>,
    /// Populated only with [`Strategy::Faster`].
    unique: Option<HashSet<T>>,
}

impl<T: Eq + Hash + Clone> OrderedSet<T> {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            elements: Vec::new(),
            unique: match strategy {
                Strategy::Faster => Some(HashSet::new()),
                Strategy::Smaller => None,
            },
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Append `value` unless it is already present.
    ///
    /// Returns whether the value was inserted.
    pub fn push_back(&mut self, value: T) -> bool {
        match &mut self.unique {
            Some(unique) => {
                if !unique.insert(value.clone()) {
                    return false;
                }
            }
            None => {
                if self.elements.contains(&value) {
                    return false;
                }
            }
        }
        self.elements.push(value);
        true
    }

    /// Remove `value`, returning whether it was present.
    pub fn erase(&mut self, value: &T) -> bool {
        if let Some(unique) = &mut self.unique {
            if !unique.remove(value) {
                return false;
            }
        }
        match self.elements.iter().position(|e| e == value) {
            Some(pos) => {
                self.elements.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, value: &T) -> bool {
        match &self.unique {
            Some(unique) => unique.contains(value),
            None => self.elements.contains(value),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element at `index` in insertion order.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.elements.get(index)
    }

    /// Position of `value` in insertion order.
    pub fn position(&self, value: &T) -> Option<usize> {
        if !self.contains(value) {
            return None;
        }
        self.elements.iter().position(|e| e == value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.elements.iter()
    }
}

impl<T: Eq + Hash + Clone> Default for OrderedSet<T> {
    fn default() -> Self {
        Self::new(Strategy::default())
    }
}

impl<T: Eq + Hash + Clone> FromIterator<T> for OrderedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::default();
        set.extend(iter);
        set
    }
}

impl<T: Eq + Hash + Clone> Extend<T> for OrderedSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push_back(value);
        }
    }
}

impl<'a, T> IntoIterator for &'a OrderedSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

impl<T> IntoIterator for OrderedSet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}
