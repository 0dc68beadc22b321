//! Reporter metrics.
//!
//! Every drop the reporter makes is counted here; nothing is surfaced to
//! the code calling `report`. Implementations are called from many
//! producer threads and the worker at once, so they must be lock-free.

use crate::error::TransportError;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for reporter counters and gauges.
pub trait ReporterMetrics: Send + Sync {
    /// A message was assembled and handed to the transport.
    fn increment_messages(&self);
    /// A message failed to send.
    fn increment_messages_dropped(&self, cause: &TransportError);
    /// Bytes of an assembled message.
    fn increment_message_bytes(&self, bytes: usize);
    /// Spans passed to `report`.
    fn increment_spans(&self, count: usize);
    /// Encoded bytes of spans passed to `report`.
    fn increment_span_bytes(&self, bytes: usize);
    /// Spans that will never be sent.
    fn increment_spans_dropped(&self, count: usize);
    /// Spans waiting in the queue.
    fn update_queued_spans(&self, count: usize);
    /// Bytes waiting in the queue.
    fn update_queued_bytes(&self, bytes: usize);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporterMetrics;

impl ReporterMetrics for NoopReporterMetrics {
    fn increment_messages(&self) {}
    fn increment_messages_dropped(&self, _cause: &TransportError) {}
    fn increment_message_bytes(&self, _bytes: usize) {}
    fn increment_spans(&self, _count: usize) {}
    fn increment_span_bytes(&self, _bytes: usize) {}
    fn increment_spans_dropped(&self, _count: usize) {}
    fn update_queued_spans(&self, _count: usize) {}
    fn update_queued_bytes(&self, _bytes: usize) {}
}

/// Keeps counters in memory, for tests and for polling exporters.
#[derive(Debug, Default)]
pub struct InMemoryReporterMetrics {
    messages: AtomicU64,
    messages_dropped: [AtomicU64; TransportError::KINDS],
    message_bytes: AtomicU64,
    spans: AtomicU64,
    span_bytes: AtomicU64,
    spans_dropped: AtomicU64,
    queued_spans: AtomicU64,
    queued_bytes: AtomicU64,
}

impl InMemoryReporterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Total failed sends, across all causes.
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Failed sends with the same [`kind`](TransportError::kind) as `cause`.
    pub fn messages_dropped_by(&self, cause: &TransportError) -> u64 {
        self.messages_dropped[cause.kind_index()].load(Ordering::Relaxed)
    }

    pub fn message_bytes(&self) -> u64 {
        self.message_bytes.load(Ordering::Relaxed)
    }

    pub fn spans(&self) -> u64 {
        self.spans.load(Ordering::Relaxed)
    }

    pub fn span_bytes(&self) -> u64 {
        self.span_bytes.load(Ordering::Relaxed)
    }

    pub fn spans_dropped(&self) -> u64 {
        self.spans_dropped.load(Ordering::Relaxed)
    }

    pub fn queued_spans(&self) -> u64 {
        self.queued_spans.load(Ordering::Relaxed)
    }

    pub fn queued_bytes(&self) -> u64 {
        self.queued_bytes.load(Ordering::Relaxed)
    }

    /// Resets every counter and gauge to zero.
    pub fn clear(&self) {
        for counter in [
            &self.messages,
            &self.message_bytes,
            &self.spans,
            &self.span_bytes,
            &self.spans_dropped,
            &self.queued_spans,
            &self.queued_bytes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for counter in &self.messages_dropped {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl ReporterMetrics for InMemoryReporterMetrics {
    fn increment_messages(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_messages_dropped(&self, cause: &TransportError) {
        self.messages_dropped[cause.kind_index()].fetch_add(1, Ordering::Relaxed);
    }

    fn increment_message_bytes(&self, bytes: usize) {
        self.message_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn increment_spans(&self, count: usize) {
        self.spans.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn increment_span_bytes(&self, bytes: usize) {
        self.span_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn increment_spans_dropped(&self, count: usize) {
        self.spans_dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn update_queued_spans(&self, count: usize) {
        self.queued_spans.store(count as u64, Ordering::Relaxed);
    }

    fn update_queued_bytes(&self, bytes: usize) {
        self.queued_bytes.store(bytes as u64, Ordering::Relaxed);
    }
}
