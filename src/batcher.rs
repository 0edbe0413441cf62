//! Fixed-size batching for write amortization.

/// Accumulates items and emits full batches of `capacity`. The caller must
/// `flush` at end of input or the tail batch is lost.
pub struct Batcher<T> {
    capacity: usize,
    buf: Vec<T>,
}

impl<T> Batcher<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Add one item; returns a full batch when the buffer reaches capacity.
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.buf.push(item);
        if self.buf.len() >= self.capacity {
            Some(std::mem::take(&mut self.buf))
        } else {
            None
        }
    }

    /// Drain the remaining partial batch, if any.
    pub fn flush(&mut self) -> Option<Vec<T>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}
