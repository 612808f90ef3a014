//! Fixed-capacity single-producer/single-consumer byte queue.
//!
//! One slot is always left free so that `head == tail` unambiguously means
//! empty; a `RingBuffer<N>` therefore holds at most `N - 1` bytes.
//!
//! The queue can be used directly through `&mut self`, or [`RingBuffer::split`]
//! into a [`Producer`] and a [`Consumer`] that may live in different execution
//! contexts (typically a receive ISR and a task).

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Status bits reported by [`RingBuffer::status`].
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct RingStatus: u8 {
        const INITIALIZED = 1 << 0;
        /// A dequeue was rejected because nothing was queued.
        const EMPTY = 1 << 1;
        /// An enqueue was rejected because every usable slot was taken.
        const FULL = 1 << 2;
        /// At least half of the usable slots hold data.
        const HALF_FULL = 1 << 3;
    }
}

/// Ring buffer operation errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("ring buffer is full")]
    Full,
    #[error("ring buffer is empty")]
    Empty,
}

/// Byte queue with `N` slots of storage.
pub struct RingBuffer<const N: usize> {
    storage: UnsafeCell<[u8; N]>,
    /// Next slot to read.
    head: AtomicUsize,
    /// Next slot to write.
    tail: AtomicUsize,
    status: AtomicU8,
}

// SAFETY: a slot is written only by the single producer before `tail` is
// published and read only by the single consumer after observing it. The
// public API enforces one producer and one consumer through `&mut self` or
// the borrows held by `split`.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    /// Create an empty, initialized buffer.
    pub const fn new() -> Self {
        const { assert!(N >= 2, "a ring buffer needs at least two slots") };
        Self {
            storage: UnsafeCell::new([0; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            status: AtomicU8::new(RingStatus::INITIALIZED.bits()),
        }
    }

    /// Number of bytes the buffer can hold.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Append `value` at the tail.
    ///
    /// A full buffer is left untouched and raises [`RingStatus::FULL`].
    pub fn enqueue(&mut self, value: u8) -> Result<(), RingError> {
        self.push(value)
    }

    /// Remove the byte at the head.
    ///
    /// An empty buffer is left untouched and raises [`RingStatus::EMPTY`].
    pub fn dequeue(&mut self) -> Result<u8, RingError> {
        self.pop()
    }

    /// Read the byte at the head without consuming it.
    pub fn peek(&self) -> Option<u8> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: `head` is a published slot that the consumer has not
        // released yet, so the producer does not write it.
        Some(unsafe { (*self.storage.get())[head] })
    }

    /// Number of queued bytes.
    pub fn data_size(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (tail + N - head) % N
    }

    pub fn is_empty(&self) -> bool {
        self.data_size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.data_size() == N - 1
    }

    pub fn status(&self) -> RingStatus {
        RingStatus::from_bits_retain(self.status.load(Ordering::Acquire))
    }

    /// Drop all queued data and clear the status back to freshly initialized.
    pub fn reset(&mut self) {
        *self.head.get_mut() = 0;
        *self.tail.get_mut() = 0;
        *self.status.get_mut() = RingStatus::INITIALIZED.bits();
    }

    /// Split into a producer and a consumer half.
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let ring: &Self = self;
        (Producer { ring }, Consumer { ring })
    }

    fn push(&self, value: u8) -> Result<(), RingError> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) % N;
        if next == self.head.load(Ordering::Acquire) {
            self.raise(RingStatus::FULL);
            return Err(RingError::Full);
        }

        // SAFETY: slot `tail` is outside the published range, only the
        // producer writes it.
        unsafe { (*self.storage.get())[tail] = value };
        self.tail.store(next, Ordering::Release);

        self.clear(RingStatus::EMPTY);
        self.track_half_full();
        Ok(())
    }

    fn pop(&self) -> Result<u8, RingError> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            self.raise(RingStatus::EMPTY);
            return Err(RingError::Empty);
        }

        // SAFETY: slot `head` was published by the producer's release store.
        let value = unsafe { (*self.storage.get())[head] };
        self.head.store((head + 1) % N, Ordering::Release);

        self.clear(RingStatus::FULL);
        self.track_half_full();
        Ok(value)
    }

    fn track_half_full(&self) {
        if self.data_size() >= (N - 1) / 2 {
            self.raise(RingStatus::HALF_FULL);
        } else {
            self.clear(RingStatus::HALF_FULL);
        }
    }

    fn raise(&self, bits: RingStatus) {
        self.status.fetch_or(bits.bits(), Ordering::AcqRel);
    }

    fn clear(&self, bits: RingStatus) {
        self.status.fetch_and(!bits.bits(), Ordering::AcqRel);
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writing half of a split [`RingBuffer`].
pub struct Producer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
}

impl<const N: usize> Producer<'_, N> {
    pub fn enqueue(&mut self, value: u8) -> Result<(), RingError> {
        self.ring.push(value)
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }
}

/// Reading half of a split [`RingBuffer`].
pub struct Consumer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
}

impl<const N: usize> Consumer<'_, N> {
    pub fn dequeue(&mut self) -> Result<u8, RingError> {
        self.ring.pop()
    }

    pub fn peek(&self) -> Option<u8> {
        self.ring.peek()
    }

    pub fn data_size(&self) -> usize {
        self.ring.data_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_one_less_than_slots() {
        let mut rb = RingBuffer::<8>::new();
        for i in 0..7 {
            assert_eq!(rb.enqueue(i), Ok(()));
            assert_eq!(rb.data_size(), usize::from(i) + 1);
        }
        assert_eq!(rb.enqueue(99), Err(RingError::Full));
        assert!(rb.status().contains(RingStatus::FULL));
        assert_eq!(rb.data_size(), 7);
    }

    #[test]
    fn test_full_rejection_does_not_mutate() {
        let mut rb = RingBuffer::<4>::new();
        rb.enqueue(1).unwrap();
        rb.enqueue(2).unwrap();
        rb.enqueue(3).unwrap();
        assert_eq!(rb.enqueue(4), Err(RingError::Full));
        assert_eq!(rb.dequeue(), Ok(1));
        assert_eq!(rb.dequeue(), Ok(2));
        assert_eq!(rb.dequeue(), Ok(3));
        assert!(!rb.status().contains(RingStatus::FULL));
    }

    #[test]
    fn test_empty_dequeue_raises_status() {
        let mut rb = RingBuffer::<4>::new();
        assert_eq!(rb.status(), RingStatus::INITIALIZED);
        assert_eq!(rb.dequeue(), Err(RingError::Empty));
        assert!(rb.status().contains(RingStatus::EMPTY));
        assert_eq!(rb.data_size(), 0);

        rb.enqueue(5).unwrap();
        assert!(!rb.status().contains(RingStatus::EMPTY));
    }

    #[test]
    fn test_fifo_order_across_wrap() {
        let mut rb = RingBuffer::<5>::new();
        let mut expected = Vec::new();
        let mut seen = Vec::new();
        for round in 0u8..6 {
            for k in 0..3 {
                let value = round * 10 + k;
                rb.enqueue(value).unwrap();
                expected.push(value);
            }
            while let Ok(value) = rb.dequeue() {
                seen.push(value);
            }
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_half_full_tracking() {
        let mut rb = RingBuffer::<9>::new();
        for i in 0..3 {
            rb.enqueue(i).unwrap();
        }
        assert!(!rb.status().contains(RingStatus::HALF_FULL));
        rb.enqueue(3).unwrap();
        assert!(rb.status().contains(RingStatus::HALF_FULL));
        rb.dequeue().unwrap();
        assert!(!rb.status().contains(RingStatus::HALF_FULL));
    }

    #[test]
    fn test_peek_and_reset() {
        let mut rb = RingBuffer::<4>::new();
        assert_eq!(rb.peek(), None);
        rb.enqueue(42).unwrap();
        assert_eq!(rb.peek(), Some(42));
        assert_eq!(rb.data_size(), 1);
        rb.reset();
        assert_eq!(rb.data_size(), 0);
        assert_eq!(rb.status(), RingStatus::INITIALIZED);
    }

    #[test]
    fn test_split_across_threads() {
        let mut rb = RingBuffer::<16>::new();
        let (mut tx, mut rx) = rb.split();
        let received = std::thread::scope(|s| {
            s.spawn(move || {
                for value in 0..=200u8 {
                    while tx.enqueue(value).is_err() {
                        std::hint::spin_loop();
                    }
                }
            });
            let mut received = Vec::new();
            while received.len() < 201 {
                if let Ok(value) = rx.dequeue() {
                    received.push(value);
                }
            }
            received
        });
        assert_eq!(received, (0..=200u8).collect::<Vec<_>>());
    }
}
