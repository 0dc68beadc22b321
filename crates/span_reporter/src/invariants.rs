//! Debug assertion macros for queue and accumulator invariants.
//!
//! Only active in debug builds, so release builds pay nothing for them.

// =============================================================================
// Queue bounds
// =============================================================================

/// Assert the queue holds no more than its item and byte limits.
///
/// **Invariant**: `0 ≤ count ≤ max_count` and `0 ≤ size_in_bytes ≤ max_bytes`
///
/// Used in: `ByteBoundedQueue::offer()` and after a drain
macro_rules! debug_assert_queue_bounds {
    ($count:expr, $max_count:expr, $bytes:expr, $max_bytes:expr) => {
        debug_assert!(
            $count <= $max_count && $bytes <= $max_bytes,
            "queue bounds violated: {} items (max {}), {} bytes (max {})",
            $count,
            $max_count,
            $bytes,
            $max_bytes
        )
    };
}

/// Assert the running byte total equals the sum of the stored sizes.
///
/// Used in: `ByteBoundedQueue` drain paths
macro_rules! debug_assert_byte_total {
    ($slots:expr, $total:expr) => {
        debug_assert_eq!(
            $slots.iter().map(|(_, size)| *size).sum::<usize>(),
            $total,
            "queue byte total drifted from stored sizes"
        )
    };
}

// =============================================================================
// Accumulator
// =============================================================================

/// Assert the incrementally tracked message size matches a full recompute.
///
/// **Invariant**: `message_size_in_bytes == encoding.list_size_of_sizes(sizes)`
///
/// Used in: `MessageAccumulator::offer()`
macro_rules! debug_assert_message_size {
    ($encoding:expr, $items:expr, $tracked:expr) => {
        debug_assert_eq!(
            $encoding.list_size_of_sizes($items.iter().map(|(_, size)| *size)),
            $tracked,
            "incremental message size disagrees with recompute"
        )
    };
}

/// Assert an empty buffer carries no deadline.
///
/// **Invariant**: `items.is_empty() ⇒ deadline.is_none()`. Leftovers from a
/// drain may also lack one; they count as due.
///
/// Used in: `MessageAccumulator::offer()`
macro_rules! debug_assert_no_stale_deadline {
    ($items:expr, $deadline:expr) => {
        debug_assert!(
            !$items.is_empty() || $deadline.is_none(),
            "empty accumulator still holds a deadline"
        )
    };
}

pub(crate) use debug_assert_byte_total;
pub(crate) use debug_assert_message_size;
pub(crate) use debug_assert_no_stale_deadline;
pub(crate) use debug_assert_queue_bounds;
