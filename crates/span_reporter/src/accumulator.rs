//! Next-message accumulator: packs drained spans under a byte budget.
//!
//! The accumulator sits between the queue and the transport. It accepts
//! items while the message (envelope included) still fits, and tells the
//! flusher a message is ready once it is full or its timeout has passed.
//!
//! It has one owner (the worker task, or the caller of an explicit flush)
//! and is never shared, so it holds plain fields and no locks.
//!
//! # Deadline
//!
//! The clock starts when the first item enters an empty buffer and is
//! cleared on every drain. Items left behind by a drain have no deadline, so
//! they are ready on the next cycle. A zero timeout makes the buffer ready as
//! soon as it holds anything.

use crate::encoding::Encoding;
use crate::invariants::{debug_assert_message_size, debug_assert_no_stale_deadline};
use crate::queue::SizedConsumer;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Buffers the spans of the next outbound message.
#[derive(Debug)]
pub struct MessageAccumulator<T> {
    encoding: Encoding,
    max_bytes: usize,
    timeout: Duration,
    items: VecDeque<(T, usize)>,
    /// Size of the message holding `items`, envelope included
    message_size_in_bytes: usize,
    buffer_full: bool,
    deadline: Option<Instant>,
}

impl<T> MessageAccumulator<T> {
    pub fn new(encoding: Encoding, max_bytes: usize, timeout: Duration) -> Self {
        Self {
            encoding,
            max_bytes,
            timeout,
            items: VecDeque::new(),
            message_size_in_bytes: encoding.empty_list_size_in_bytes(),
            buffer_full: false,
            deadline: None,
        }
    }

    /// Time left before the buffered message must go out.
    ///
    /// An empty buffer has no deadline yet, so the full timeout remains.
    /// Leftovers from a drain have none either and are already due.
    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None if self.items.is_empty() => self.timeout,
            None => Duration::ZERO,
        }
    }

    /// True when no more items fit, the deadline has passed, or leftovers
    /// from the last drain are waiting.
    pub fn is_ready(&self) -> bool {
        if self.buffer_full {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => !self.items.is_empty(),
        }
    }

    pub fn is_buffer_full(&self) -> bool {
        self.buffer_full
    }

    /// Offers each buffered item, oldest first, to `consumer`.
    ///
    /// Accepted items leave the buffer; the first refusal stops the pass and
    /// leaves that item and everything after it buffered. The deadline is
    /// cleared either way.
    pub fn drain<C: SizedConsumer<T>>(&mut self, consumer: &mut C) {
        while let Some((item, size)) = self.items.pop_front() {
            match consumer.offer(item, size) {
                Ok(()) => self.buffer_full = false,
                Err(item) => {
                    self.items.push_front((item, size));
                    break;
                }
            }
        }

        self.message_size_in_bytes = self
            .encoding
            .list_size_of_sizes(self.items.iter().map(|(_, size)| *size));
        self.deadline = None;
    }

    /// Drops all buffered items, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        self.message_size_in_bytes = self.encoding.empty_list_size_in_bytes();
        self.buffer_full = false;
        self.deadline = None;
        dropped
    }

    /// Number of buffered items.
    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Size of the message the buffered items would form.
    pub fn size_in_bytes(&self) -> usize {
        self.message_size_in_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl<T> SizedConsumer<T> for MessageAccumulator<T> {
    /// Buffers the item if the message still fits.
    ///
    /// Landing exactly on the budget accepts the item and marks the buffer
    /// full. Overshooting it refuses the item, leaves the buffer untouched
    /// and also marks it full.
    fn offer(&mut self, item: T, size_in_bytes: usize) -> Result<(), T> {
        debug_assert_no_stale_deadline!(self.items, self.deadline);
        let next_size = self.encoding.combined_size_in_bytes(
            self.message_size_in_bytes,
            self.items.len(),
            size_in_bytes,
        );
        if next_size > self.max_bytes {
            self.buffer_full = true;
            return Err(item);
        }

        if self.items.is_empty() {
            self.deadline = Some(Instant::now() + self.timeout);
        }
        self.items.push_back((item, size_in_bytes));
        self.message_size_in_bytes = next_size;
        if next_size == self.max_bytes {
            self.buffer_full = true;
        }

        debug_assert_message_size!(self.encoding, self.items, self.message_size_in_bytes);
        Ok(())
    }
}
