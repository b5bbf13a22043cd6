//! Bounded histories
//!
//! Fixed-capacity append/replace buffers for peak events and raw entries.

use std::collections::vec_deque::{self, VecDeque};

/// Default capacity of both histories.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Where a newly appended item goes, which decides what gets evicted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ordering {
    /// prepend; the oldest item sits at the back and falls off first
    NewestFirst,
    /// append; the oldest item sits at the front and falls off first
    NewestLast,
}

/// Append/replace-only buffer capped at `capacity` items.
#[derive(Clone, Debug)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
    ordering: Ordering,
}

impl<T: Clone> BoundedHistory<T> {
    pub fn new(capacity: usize, ordering: Ordering) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            ordering,
        }
    }

    /// Peak-event history: newest first.
    pub fn newest_first(capacity: usize) -> Self {
        Self::new(capacity, Ordering::NewestFirst)
    }

    /// Raw-entry history: newest last.
    pub fn newest_last(capacity: usize) -> Self {
        Self::new(capacity, Ordering::NewestLast)
    }

    /// Add one item and evict down to capacity.
    pub fn append(&mut self, item: T) {
        match self.ordering {
            Ordering::NewestFirst => {
                self.items.push_front(item);
                self.items.truncate(self.capacity);
            }
            Ordering::NewestLast => {
                self.items.push_back(item);
                while self.items.len() > self.capacity {
                    self.items.pop_front();
                }
            }
        }
    }

    /// Swap in an authoritative batch as-is.
    ///
    /// The batch is not re-capped here; the next `append` brings the buffer
    /// back under capacity.
    pub fn replace(&mut self, items: Vec<T>) {
        self.items = items.into();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ordering(&self) -> Ordering {
        self.ordering
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    /// Full-sequence read in presentation order.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
