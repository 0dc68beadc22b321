//! Bounded queue of encoded spans, limited by item count and total bytes.
//!
//! Producers call [`ByteBoundedQueue::offer`] from any thread; it takes the
//! lock briefly and never waits. A single drainer at a time calls
//! [`ByteBoundedQueue::drain_to`], which waits (asynchronously) for the
//! first item and then hands items to a [`SizedConsumer`] until the consumer
//! says it is full.
//!
//! The mutex guards the slots and the byte total. `Notify` stands in for
//! the condition variable: every successful offer signals it.

use crate::invariants::{debug_assert_byte_total, debug_assert_queue_bounds};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Receives items along with their encoded size.
///
/// Returning `Err(item)` hands the item back and stops the drain; the
/// caller keeps it where it was.
pub trait SizedConsumer<T> {
    fn offer(&mut self, item: T, size_in_bytes: usize) -> Result<(), T>;
}

struct QueueState<T> {
    slots: VecDeque<(T, usize)>,
    size_in_bytes: usize,
}

/// Multi-producer, single-drainer queue bounded by count and bytes.
pub struct ByteBoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Notify,
    max_count: usize,
    max_bytes: usize,
}

impl<T> ByteBoundedQueue<T> {
    /// Creates a queue. `max_bytes` of `None` disables the byte limit.
    pub fn new(max_count: usize, max_bytes: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                slots: VecDeque::with_capacity(max_count.min(1024)),
                size_in_bytes: 0,
            }),
            available: Notify::new(),
            max_count,
            max_bytes: max_bytes.unwrap_or(usize::MAX),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // A panicking consumer cannot leave the slots half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an item unless it would exceed either limit. Never blocks.
    pub fn offer(&self, item: T, size_in_bytes: usize) -> bool {
        {
            let mut state = self.lock();
            if state.slots.len() >= self.max_count {
                return false;
            }
            let new_size = match state.size_in_bytes.checked_add(size_in_bytes) {
                Some(size) if size <= self.max_bytes => size,
                _ => return false,
            };
            state.slots.push_back((item, size_in_bytes));
            state.size_in_bytes = new_size;

            debug_assert_queue_bounds!(
                state.slots.len(),
                self.max_count,
                state.size_in_bytes,
                self.max_bytes
            );
        }
        self.available.notify_one();
        true
    }

    /// Waits up to `timeout` for an item, then drains into `consumer`.
    ///
    /// Returns the number of items the consumer accepted. Returns early with
    /// zero when the timeout elapses or the queue is woken while still empty
    /// (see [`wake`](Self::wake)).
    pub async fn drain_to<C: SizedConsumer<T>>(&self, consumer: &mut C, timeout: Duration) -> usize {
        let notified = self.available.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(drained) = self.drain_if_nonempty(consumer) {
            return drained;
        }
        if timeout.is_zero() {
            return 0;
        }
        if tokio::time::timeout(timeout, notified).await.is_err() {
            return 0;
        }
        self.drain_if_nonempty(consumer).unwrap_or(0)
    }

    /// Drains whatever is queued right now without waiting.
    pub fn try_drain_to<C: SizedConsumer<T>>(&self, consumer: &mut C) -> usize {
        self.drain_if_nonempty(consumer).unwrap_or(0)
    }

    fn drain_if_nonempty<C: SizedConsumer<T>>(&self, consumer: &mut C) -> Option<usize> {
        let mut state = self.lock();
        if state.slots.is_empty() {
            return None;
        }

        let mut drained = 0;
        while let Some((item, size)) = state.slots.pop_front() {
            match consumer.offer(item, size) {
                Ok(()) => {
                    drained += 1;
                    state.size_in_bytes -= size;
                }
                Err(item) => {
                    state.slots.push_front((item, size));
                    break;
                }
            }
        }

        debug_assert_byte_total!(state.slots, state.size_in_bytes);
        Some(drained)
    }

    /// Drops every queued item, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.slots.len();
        state.slots.clear();
        state.size_in_bytes = 0;
        dropped
    }

    /// Wakes a waiting drainer without adding an item.
    pub fn wake(&self) {
        self.available.notify_one();
    }

    /// Number of queued items.
    pub fn count(&self) -> usize {
        self.lock().slots.len()
    }

    /// Total encoded size of queued items.
    pub fn size_in_bytes(&self) -> usize {
        self.lock().size_in_bytes
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}
