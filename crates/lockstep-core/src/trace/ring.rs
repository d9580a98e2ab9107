//! Fixed-capacity circular history buffer.

/// Bounded ring of records that silently overwrites its oldest entry when full.
///
/// Capacity is fixed at construction; the buffer never grows past it and a
/// push never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    cursor: usize,
}

impl<T> RingBuffer<T> {
    /// Creates an empty ring holding at most `capacity` records.
    ///
    /// # Panics
    ///
    /// Panics when `capacity` is zero. Machine configurations are validated
    /// against this before any ring is built.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    /// Appends a record, overwriting the oldest one once the ring is full.
    pub fn push(&mut self, item: T) {
        if self.items.len() < self.capacity {
            self.items.push(item);
        } else {
            self.items[self.cursor] = item;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Returns `true` when no record has been pushed since creation or clear.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of valid records, never more than [`Self::capacity`].
    #[must_use]
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// Maximum number of records retained.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slot the next push will write.
    #[must_use]
    pub const fn write_cursor(&self) -> usize {
        self.cursor
    }

    /// Iterates valid records from oldest to newest.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &T> + '_ {
        let count = self.items.len();
        let start = (self.cursor + self.capacity - count) % self.capacity;
        (0..count).map(move |idx| &self.items[(start + idx) % self.capacity])
    }

    /// Visits valid records from oldest to newest.
    pub fn for_each_in_order<F: FnMut(&T)>(&self, visitor: F) {
        self.iter().for_each(visitor);
    }

    /// Most recently pushed record.
    #[must_use]
    pub fn newest(&self) -> Option<&T> {
        self.iter().last()
    }

    /// Drops every record and rewinds the cursor.
    pub fn clear(&mut self) {
        self.items.clear();
        self.cursor = 0;
    }
}

impl<'a, T> IntoIterator for &'a RingBuffer<T> {
    type Item = &'a T;
    type IntoIter = Box<dyn ExactSizeIterator<Item = &'a T> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::RingBuffer;

    #[test]
    fn new_ring_is_empty() {
        let ring: RingBuffer<u32> = RingBuffer::new(4);
        assert!(ring.is_empty());
        assert_eq!(ring.count(), 0);
        assert_eq!(ring.iter().count(), 0);
        assert_eq!(ring.newest(), None);
    }

    #[test]
    fn partial_fill_keeps_push_order() {
        let mut ring = RingBuffer::new(4);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(ring.write_cursor(), 2);
    }

    #[test]
    fn overflow_drops_the_oldest_record() {
        let mut ring = RingBuffer::new(16);
        for value in 0..17 {
            ring.push(value);
        }
        assert_eq!(ring.count(), 16);
        assert_eq!(
            ring.iter().copied().collect::<Vec<_>>(),
            (1..17).collect::<Vec<_>>()
        );
        assert_eq!(ring.newest(), Some(&16));
    }

    #[test]
    fn iteration_is_restartable() {
        let mut ring = RingBuffer::new(3);
        for value in 0..5 {
            ring.push(value);
        }
        let first: Vec<_> = ring.iter().collect();
        let second: Vec<_> = (&ring).into_iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn for_each_in_order_visits_oldest_first() {
        let mut ring = RingBuffer::new(2);
        ring.push('a');
        ring.push('b');
        ring.push('c');
        let mut seen = String::new();
        ring.for_each_in_order(|c| seen.push(*c));
        assert_eq!(seen, "bc");
    }

    #[test]
    fn clear_resets_cursor_and_count() {
        let mut ring = RingBuffer::new(2);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.write_cursor(), 0);
    }

    #[test]
    #[should_panic(expected = "capacity must be non-zero")]
    fn zero_capacity_is_rejected() {
        let _ = RingBuffer::<u8>::new(0);
    }

    proptest! {
        #[test]
        fn overflow_keeps_the_newest_capacity_records(capacity in 1_usize..32, extra in 1_usize..64) {
            let mut ring = RingBuffer::new(capacity);
            for value in 0..capacity + extra {
                ring.push(value);
            }
            prop_assert_eq!(ring.count(), capacity);
            prop_assert_eq!(
                ring.iter().copied().collect::<Vec<_>>(),
                (extra..capacity + extra).collect::<Vec<_>>()
            );
            prop_assert_eq!(ring.write_cursor(), (capacity + extra) % capacity);
        }
    }
}
