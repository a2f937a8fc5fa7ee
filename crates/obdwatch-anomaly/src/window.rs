//! Fixed-capacity sliding window of consecutive feature vectors

use crate::error::{AnomalyError, Result};
use std::collections::VecDeque;

/// FIFO buffer holding the most recent `capacity` items in arrival order.
/// Mutated by a single producer; readers work on `snapshot()` copies.
#[derive(Debug, Clone)]
pub struct WindowBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> WindowBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 1 {
            return Err(AnomalyError::Config(
                "window capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Append, evicting the oldest item when at capacity
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
