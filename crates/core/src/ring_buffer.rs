//! Fixed-capacity ring buffer for rolling market history.

use ringbuffer::{AllocRingBuffer, RingBuffer as _};

/// Fixed-capacity circular buffer indexed oldest-first.
///
/// Once full, every push overwrites the oldest element. Logical index 0 is
/// always the oldest retained element and `len() - 1` the newest, so
/// regressions can walk a window by position without copying it out.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    inner: AllocRingBuffer<T>,
}

impl<T: Copy> RingBuffer<T> {
    /// Creates an empty buffer. A zero capacity is raised to 1.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: AllocRingBuffer::new(capacity.max(1)),
        }
    }

    /// Appends `value`, returning the element it displaced if the buffer was full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.inner.is_full() {
            self.get(0)
        } else {
            None
        };
        self.inner.push(value);
        evicted
    }

    /// Element at logical position `index` (0 = oldest).
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        // AllocRingBuffer::get wraps around, so bound the index first
        if index >= self.inner.len() {
            return None;
        }
        self.inner.get(index).copied()
    }

    /// Most recently pushed element.
    #[must_use]
    pub fn last(&self) -> Option<T> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    /// Element `back` positions before the newest (0 = newest).
    #[must_use]
    pub fn from_back(&self, back: usize) -> Option<T> {
        self.len().checked_sub(back.checked_add(1)?).and_then(|i| self.get(i))
    }

    /// Iterates over all elements, oldest first.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = T> + DoubleEndedIterator + Clone + '_ {
        self.last_n(self.inner.len())
    }

    /// Iterates over the newest `n` elements (fewer if not available), oldest first.
    pub fn last_n(
        &self,
        n: usize,
    ) -> impl ExactSizeIterator<Item = T> + DoubleEndedIterator + Clone + '_ {
        let len = self.inner.len();
        let start = len.saturating_sub(n);
        (start..len).map(move |i| self.inner[i])
    }

    /// Number of retained elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if nothing has been pushed since creation or the last clear.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns true once the buffer holds `capacity` elements.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    /// Maximum number of retained elements.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Drops all elements.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
