//! Deduplicating accumulation of upstream number lists.

use std::collections::HashSet;

/// Numbers merged from any number of upstream responses.
///
/// Holds the set of values seen so far together with the sequence they were
/// first seen in. A value is in `numbers` iff it is in `seen`, exactly once.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MergedNumbers {
    seen: HashSet<i64>,
    numbers: Vec<i64>,
}

impl MergedNumbers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends every value of `list` that has not been seen yet, in order.
    ///
    /// Existing values are never removed or reordered, so merging the same
    /// list again is a no-op.
    pub fn merge(&mut self, list: &[i64]) {
        for &value in list {
            if self.seen.insert(value) {
                self.numbers.push(value);
            }
        }
    }

    /// Values in first-seen order.
    pub fn as_slice(&self) -> &[i64] {
        &self.numbers
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    /// Consumes the merge and returns the values in ascending order.
    pub fn into_sorted(self) -> Vec<i64> {
        let mut numbers = self.numbers;
        numbers.sort_unstable();
        numbers
    }
}

/// Seeds a merge from an existing sequence, collapsing duplicates.
impl From<Vec<i64>> for MergedNumbers {
    fn from(numbers: Vec<i64>) -> Self {
        let mut merged = MergedNumbers::new();
        merged.merge(&numbers);
        merged
    }
}
