use std::iter::Chain;
use std::slice::Iter;

/// Fixed-capacity ring buffer
///
/// Items are written at the write index, which then advances modulo the
/// capacity. Once full, every push overwrites the oldest item.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    /// Slot storage, grows up to capacity then stays fixed
    slots: Vec<T>,

    /// Maximum capacity
    capacity: usize,

    /// Next slot to write
    write_index: usize,

    /// Number of live items (saturates at capacity)
    count: usize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer; a zero capacity is clamped to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            write_index: 0,
            count: 0,
        }
    }

    /// Push an item, returning the evicted item when the buffer was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.slots.len() < self.capacity {
            self.slots.push(item);
            None
        } else {
            Some(std::mem::replace(&mut self.slots[self.write_index], item))
        };

        self.write_index = (self.write_index + 1) % self.capacity;
        self.count = (self.count + 1).min(self.capacity);
        evicted
    }

    /// Iterate oldest to newest
    ///
    /// Before the first wrap the write index sits at the end of the filled
    /// prefix, so the cursor..end segment is empty and the prefix comes out
    /// as-is. After wrapping, cursor..end holds the oldest items.
    pub fn iter(&self) -> Chain<Iter<'_, T>, Iter<'_, T>> {
        let (head, tail) = self.slots.split_at(self.write_index);
        tail.iter().chain(head.iter())
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all items and rewind the write index
    pub fn clear(&mut self) {
        self.slots.clear();
        self.write_index = 0;
        self.count = 0;
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Clone all items oldest to newest
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// Clone the last N items, oldest first
    pub fn tail(&self, n: usize) -> Vec<T> {
        let start = self.count.saturating_sub(n);
        self.iter().skip(start).cloned().collect()
    }
}
