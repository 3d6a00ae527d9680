//! A bounded single-producer/single-consumer buffer with a peek-or-pop
//! dequeue contract, so the consumer can refuse the head item and have it
//! stay put for retry (back-pressure without losing data).

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Bounded ring buffer guarding the single cross-thread handoff point between
/// a capture thread and the scheduler.
///
/// `enqueue` drops the new item and invokes `overflow` when the buffer is
/// full, rather than evicting the oldest item: a full buffer means the
/// consumer is behind, and silently discarding old audio would corrupt the
/// stream more than discarding the newest period.
///
/// `dequeue` hands the consumer a mutable reference to the head item via
/// `mover`; the item is only popped if `mover` returns `true`. This lets the
/// consumer say "I couldn't take this right now" (e.g. a client's socket
/// would block) and have the same item offered again next time.
pub struct RingBuffer<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be >= 1");
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Calls `fill` to produce a new item and pushes it to the back, unless
    /// the buffer is already at capacity, in which case `overflow` is called
    /// instead and `fill` is never invoked.
    pub fn enqueue(&self, fill: impl FnOnce() -> T, overflow: impl FnOnce()) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            drop(queue);
            overflow();
            return;
        }
        queue.push_back(fill());
    }

    /// Offers the head item to `mover`. If `mover` returns `true` the item is
    /// popped; if it returns `false` the item remains at the head for the
    /// next call. If the buffer is empty, `underflow` is called instead.
    pub fn dequeue(&self, mover: impl FnOnce(&mut T) -> bool, underflow: impl FnOnce()) {
        let mut queue = self.queue.lock();
        match queue.front_mut() {
            Some(head) => {
                if mover(head) {
                    queue.pop_front();
                }
            }
            None => {
                drop(queue);
                underflow();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_past_capacity_triggers_overflow_instead_of_evicting() {
        let ring: RingBuffer<u32> = RingBuffer::new(2);
        ring.enqueue(|| 1, || panic!("should not overflow"));
        ring.enqueue(|| 2, || panic!("should not overflow"));
        let mut overflowed = false;
        ring.enqueue(|| 3, || overflowed = true);
        assert!(overflowed);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn dequeue_on_empty_buffer_calls_underflow() {
        let ring: RingBuffer<u32> = RingBuffer::new(4);
        let mut underflowed = false;
        ring.dequeue(|_| true, || underflowed = true);
        assert!(underflowed);
    }

    #[test]
    fn refusing_the_head_item_leaves_it_in_place() {
        let ring: RingBuffer<u32> = RingBuffer::new(4);
        ring.enqueue(|| 7, || panic!("should not overflow"));

        ring.dequeue(|_| false, || panic!("should not underflow"));
        assert_eq!(ring.len(), 1);

        let mut seen = None;
        ring.dequeue(
            |v| {
                seen = Some(*v);
                true
            },
            || panic!("should not underflow"),
        );
        assert_eq!(seen, Some(7));
        assert!(ring.is_empty());
    }

    #[test]
    fn fifo_order_is_preserved() {
        let ring: RingBuffer<u32> = RingBuffer::new(4);
        for v in [1, 2, 3] {
            ring.enqueue(|| v, || panic!("should not overflow"));
        }
        let mut out = Vec::new();
        for _ in 0..3 {
            ring.dequeue(
                |v| {
                    out.push(*v);
                    true
                },
                || panic!("should not underflow"),
            );
        }
        assert_eq!(out, vec![1, 2, 3]);
    }
}
