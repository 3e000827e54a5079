use std::collections::VecDeque;

use bytes::Bytes;

/// A capacity-bounded FIFO byte queue: the building block for every send and receive buffer a
/// virtual socket owns (§4.8). Bytes go in as discrete chunks (one per `write`/incoming segment)
/// but come out however the reader asks, including splitting a chunk across two reads.
#[derive(Debug)]
pub struct ByteQueue {
    chunks: VecDeque<Bytes>,
    len: usize,
    capacity: usize,
}

impl ByteQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            len: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.len)
    }

    /// Enqueue as many leading bytes of `data` as fit in the remaining capacity, returning how
    /// many bytes were accepted. Mirrors a short `write()`/`send()` return value.
    pub fn push(&mut self, data: Bytes) -> usize {
        let room = self.available();
        if room == 0 {
            return 0;
        }
        let accepted = data.slice(0..room.min(data.len()));
        let n = accepted.len();
        if n > 0 {
            self.len += n;
            self.chunks.push_back(accepted);
        }
        n
    }

    /// Dequeue up to `max` bytes, draining from the front. Returns an empty `Bytes` if the queue
    /// is empty (the caller, a socket `read`, maps that to `EWOULDBLOCK` rather than EOF).
    pub fn pop(&mut self, max: usize) -> Bytes {
        if max == 0 || self.is_empty() {
            return Bytes::new();
        }
        let mut out = Vec::with_capacity(max.min(self.len));
        while out.len() < max {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let take = (max - out.len()).min(front.len());
            out.extend_from_slice(&front[..take]);
            if take == front.len() {
                self.chunks.pop_front();
            } else {
                *front = front.slice(take..);
            }
            self.len -= take;
        }
        Bytes::from(out)
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_truncates_to_remaining_capacity() {
        let mut q = ByteQueue::new(4);
        assert_eq!(q.push(Bytes::from_static(b"hello")), 4);
        assert_eq!(q.len(), 4);
        assert_eq!(q.available(), 0);
    }

    #[test]
    fn pop_drains_across_chunk_boundaries() {
        let mut q = ByteQueue::new(100);
        q.push(Bytes::from_static(b"ab"));
        q.push(Bytes::from_static(b"cde"));
        assert_eq!(q.pop(4), Bytes::from_static(b"abcd"));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop(10), Bytes::from_static(b"e"));
        assert!(q.is_empty());
    }

    #[test]
    fn pop_on_empty_queue_returns_empty_not_panic() {
        let mut q = ByteQueue::new(10);
        assert_eq!(q.pop(5), Bytes::new());
    }
}
