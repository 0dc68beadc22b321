//! Asynchronous span reporter.
//!
//! [`AsyncReporter::report`] encodes a span and offers it to a
//! [`ByteBoundedQueue`]; it never waits and never fails. A background tokio
//! task drains the queue into a [`MessageAccumulator`] and sends a message
//! whenever the accumulator is full or its timeout passes.
//!
//! Lifecycle: not started, started (worker spawned by the first `report`),
//! closed. A zero message timeout skips the worker entirely and leaves
//! sending to explicit [`flush`](AsyncReporter::flush) calls.
//!
//! Every span that will never be sent is counted in
//! [`ReporterMetrics::increment_spans_dropped`]; nothing is retried.

use crate::accumulator::MessageAccumulator;
use crate::config::ReporterConfig;
use crate::encoder::{ErrorTagger, Proto3Encoder, SpanEncoder};
use crate::error::ReporterError;
use crate::metrics::{NoopReporterMetrics, ReporterMetrics};
use crate::queue::{ByteBoundedQueue, SizedConsumer};
use crate::span::Span;
use crate::transport::TransportBoxed;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Accepts finished spans for delivery.
pub trait Reporter: Send + Sync {
    /// Schedules `span` for sending. Never blocks and never fails.
    fn report(&self, span: &Span);
}

/// Discards every span.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn report(&self, _span: &Span) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared by the reporter handle and its worker task.
struct Shared {
    queue: ByteBoundedQueue<Bytes>,
    transport: Arc<dyn TransportBoxed>,
    encoder: Arc<dyn SpanEncoder>,
    metrics: Arc<dyn ReporterMetrics>,
    message_max_bytes: usize,
    message_timeout: Duration,
    closed: AtomicBool,
    /// Cleared after the first send failure is logged at warn level.
    should_warn: AtomicBool,
}

impl Shared {
    fn new_accumulator(&self, timeout: Duration) -> MessageAccumulator<Bytes> {
        MessageAccumulator::new(self.encoder.encoding(), self.message_max_bytes, timeout)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fills `accumulator` from the queue and sends it once ready.
    ///
    /// After close the message is sent regardless of readiness and the
    /// queue is not waited on. Only a closed transport is returned as an
    /// error; other send failures are counted and swallowed.
    async fn flush_into(&self, accumulator: &mut MessageAccumulator<Bytes>) -> Result<(), ReporterError> {
        let wait = if self.is_closed() {
            Duration::ZERO
        } else {
            accumulator.remaining()
        };
        self.queue.drain_to(accumulator, wait).await;

        self.metrics.update_queued_spans(self.queue.count());
        self.metrics.update_queued_bytes(self.queue.size_in_bytes());

        if !accumulator.is_ready() && !self.is_closed() {
            return Ok(());
        }
        if accumulator.is_empty() {
            return Ok(());
        }

        self.metrics.increment_messages();
        self.metrics.increment_message_bytes(accumulator.size_in_bytes());

        let mut message = OutboundMessage {
            transport: self.transport.as_ref(),
            metrics: self.metrics.as_ref(),
            max_bytes: self.message_max_bytes,
            spans: Vec::with_capacity(accumulator.count()),
            overflowed: false,
        };
        accumulator.drain(&mut message);
        let spans = message.spans;
        if spans.is_empty() {
            return Ok(());
        }

        let count = spans.len();
        match self.transport.send_boxed(spans).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.metrics.increment_messages_dropped(&err);
                self.metrics.increment_spans_dropped(count);
                if self.should_warn.swap(false, Ordering::Relaxed) {
                    warn!(
                        spans = count,
                        transport = self.transport.name(),
                        error = %err,
                        "dropped spans after send failure"
                    );
                } else {
                    debug!(
                        spans = count,
                        transport = self.transport.name(),
                        error = %err,
                        "dropped spans after send failure"
                    );
                }
                if err.is_closed() {
                    return Err(ReporterError::TransportClosed);
                }
                Ok(())
            }
        }
    }
}

/// Collects the spans of one message, checking the transport's own size
/// function after every addition.
///
/// The first span that pushes the message over budget is dropped; it has
/// already left the accumulator and does not go back. Everything after it
/// is refused and stays buffered.
struct OutboundMessage<'a> {
    transport: &'a dyn TransportBoxed,
    metrics: &'a dyn ReporterMetrics,
    max_bytes: usize,
    spans: Vec<Bytes>,
    overflowed: bool,
}

impl SizedConsumer<Bytes> for OutboundMessage<'_> {
    fn offer(&mut self, span: Bytes, _size_in_bytes: usize) -> Result<(), Bytes> {
        if self.overflowed {
            return Err(span);
        }
        self.spans.push(span);
        if self.transport.message_size_in_bytes(&self.spans) > self.max_bytes {
            self.spans.pop();
            self.overflowed = true;
            self.metrics.increment_spans_dropped(1);
            debug!(max_bytes = self.max_bytes, "dropped span that overflowed the message");
        }
        Ok(())
    }
}

/// The background flush task.
///
/// Owns the accumulator and the sending half of the shutdown latch. Both are
/// released in `Drop`, so the latch opens on every exit path, panics
/// included.
struct Worker {
    shared: Arc<Shared>,
    accumulator: MessageAccumulator<Bytes>,
    _done: oneshot::Sender<()>,
}

impl Worker {
    async fn run(mut self) {
        debug!(transport = self.shared.transport.name(), "flush worker started");

        while !self.shared.is_closed() {
            if let Err(err) = self.shared.flush_into(&mut self.accumulator).await {
                debug!(error = %err, "flush worker stopping");
                return;
            }
        }

        // closed: send what is already buffered without waiting
        if let Err(err) = self.shared.flush_into(&mut self.accumulator).await {
            debug!(error = %err, "final flush failed");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let dropped = self.accumulator.clear();
        if dropped > 0 {
            self.shared.metrics.increment_spans_dropped(dropped);
        }
        if std::thread::panicking() {
            warn!(dropped, "flush worker exited during a panic");
        } else {
            debug!(dropped, "flush worker stopped");
        }
    }
}

/// Reports spans through a [`Transport`](crate::Transport), batching them
/// into size-bounded messages.
///
/// Build one with [`AsyncReporter::builder`]. Call [`close`](Self::close)
/// before dropping it to give queued spans a chance to go out; dropping
/// without closing stops the worker after its current message.
///
/// Closing the reporter does not close the transport, which the caller owns.
pub struct AsyncReporter {
    shared: Arc<Shared>,
    close_timeout: Duration,
    started: AtomicBool,
    runtime: Option<Handle>,
    done_tx: Mutex<Option<oneshot::Sender<()>>>,
    done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl AsyncReporter {
    /// Starts building a reporter that sends through `transport`.
    pub fn builder(transport: Arc<dyn TransportBoxed>) -> ReporterBuilder {
        ReporterBuilder::new(transport)
    }

    /// Encodes `span` and queues it for the next message.
    ///
    /// The span is dropped (and counted) if the reporter is closed, if a
    /// message holding only this span would exceed the message limit, or if
    /// the queue is full by count or bytes.
    pub fn report(&self, span: &Span) {
        self.start_worker_once();

        let shared = &self.shared;
        shared.metrics.increment_spans(1);
        let size_in_bytes = shared.encoder.size_in_bytes(span);
        shared.metrics.increment_span_bytes(size_in_bytes);

        if shared.is_closed()
            || shared.transport.message_size_in_bytes_single(size_in_bytes) > shared.message_max_bytes
        {
            shared.metrics.increment_spans_dropped(1);
            return;
        }

        let encoded = shared.encoder.encode(span);
        debug_assert_eq!(encoded.len(), size_in_bytes, "encoder size disagrees with output");
        if !shared.queue.offer(encoded, size_in_bytes) {
            shared.metrics.increment_spans_dropped(1);
        }
    }

    fn start_worker_once(&self) {
        if self.started.load(Ordering::Acquire) || self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        // close() may have taken the latch sender first
        let Some(done) = lock(&self.done_tx).take() else {
            return;
        };
        let Some(runtime) = &self.runtime else {
            return;
        };
        let worker = Worker {
            accumulator: self.shared.new_accumulator(self.shared.message_timeout),
            shared: Arc::clone(&self.shared),
            _done: done,
        };
        runtime.spawn(worker.run());
    }

    /// Sends whatever is queued right now, up to one message.
    ///
    /// Spans that were packed but did not fit the message are dropped rather
    /// than queued again.
    pub async fn flush(&self) -> Result<(), ReporterError> {
        if self.shared.is_closed() {
            return Err(ReporterError::Closed);
        }
        let mut accumulator = self.shared.new_accumulator(Duration::ZERO);
        let result = self.shared.flush_into(&mut accumulator).await;
        let leftover = accumulator.clear();
        if leftover > 0 {
            self.shared.metrics.increment_spans_dropped(leftover);
        }
        result
    }

    /// Stops accepting spans and waits for the worker to finish.
    ///
    /// The worker gets up to the close timeout to send what it holds; after
    /// that any spans still queued are dropped and counted. Calling `close`
    /// again does nothing.
    pub async fn close(&self) {
        if self
            .shared
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // a report() racing with close must not spawn a worker now
        self.started.store(true, Ordering::Release);
        drop(lock(&self.done_tx).take());
        self.shared.queue.wake();

        let done = lock(&self.done_rx).take();
        if let Some(done) = done {
            if tokio::time::timeout(self.close_timeout, done).await.is_err() {
                warn!(
                    timeout = ?self.close_timeout,
                    "timed out waiting for the flush worker to finish"
                );
            }
        }

        let dropped = self.shared.queue.clear();
        if dropped > 0 {
            self.shared.metrics.increment_spans_dropped(dropped);
            warn!(dropped, "dropped spans still queued at close");
        }
        self.shared.metrics.update_queued_spans(0);
        self.shared.metrics.update_queued_bytes(0);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Effective message limit: the configured one, clamped to the transport's.
    pub fn message_max_bytes(&self) -> usize {
        self.shared.message_max_bytes
    }

    /// Spans waiting in the queue.
    pub fn queued_spans(&self) -> usize {
        self.shared.queue.count()
    }

    /// Encoded bytes waiting in the queue.
    pub fn queued_bytes(&self) -> usize {
        self.shared.queue.size_in_bytes()
    }
}

impl Reporter for AsyncReporter {
    fn report(&self, span: &Span) {
        AsyncReporter::report(self, span);
    }
}

impl Drop for AsyncReporter {
    fn drop(&mut self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.queue.wake();
        }
    }
}

/// Builder for [`AsyncReporter`].
pub struct ReporterBuilder {
    transport: Arc<dyn TransportBoxed>,
    config: ReporterConfig,
    metrics: Arc<dyn ReporterMetrics>,
    encoder: Option<Arc<dyn SpanEncoder>>,
    error_tag: Option<Arc<dyn ErrorTagger>>,
}

impl ReporterBuilder {
    pub fn new(transport: Arc<dyn TransportBoxed>) -> Self {
        Self {
            transport,
            config: ReporterConfig::default(),
            metrics: Arc::new(NoopReporterMetrics),
            encoder: None,
            error_tag: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ReporterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn ReporterMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Uses `encoder` instead of the default [`Proto3Encoder`].
    pub fn encoder(mut self, encoder: Arc<dyn SpanEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Error tag strategy for the default encoder. Ignored with a custom encoder.
    pub fn error_tag(mut self, error_tag: Arc<dyn ErrorTagger>) -> Self {
        self.error_tag = Some(error_tag);
        self
    }

    pub fn message_max_bytes(mut self, bytes: usize) -> Self {
        self.config = self.config.with_message_max_bytes(bytes);
        self
    }

    pub fn message_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_message_timeout(timeout);
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_close_timeout(timeout);
        self
    }

    pub fn queued_max_spans(mut self, spans: usize) -> Self {
        self.config = self.config.with_queued_max_spans(spans);
        self
    }

    pub fn queued_max_bytes(mut self, bytes: Option<usize>) -> Self {
        self.config = self.config.with_queued_max_bytes(bytes);
        self
    }

    /// Validates the configuration and creates the reporter.
    ///
    /// A non-zero message timeout needs a tokio runtime; the worker is
    /// spawned on the runtime current at this call.
    pub fn build(self) -> Result<AsyncReporter, ReporterError> {
        self.config.validate()?;

        let encoder = match self.encoder {
            Some(encoder) => encoder,
            None => match self.error_tag {
                Some(error_tag) => Arc::new(Proto3Encoder::with_error_tag(error_tag)),
                None => Arc::new(Proto3Encoder::new()),
            },
        };
        if encoder.encoding() != self.transport.encoding() {
            return Err(ReporterError::EncodingMismatch {
                encoder: encoder.encoding(),
                transport: self.transport.encoding(),
            });
        }

        let transport_max = self.transport.message_max_bytes();
        let message_max_bytes = self
            .config
            .message_max_bytes
            .map_or(transport_max, |bytes| bytes.min(transport_max));

        let background = !self.config.message_timeout.is_zero();
        let runtime = if background {
            Some(Handle::try_current().map_err(|_| ReporterError::NoRuntime)?)
        } else {
            None
        };

        let (done_tx, done_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            queue: ByteBoundedQueue::new(self.config.queued_max_spans, self.config.queued_max_bytes),
            transport: self.transport,
            encoder,
            metrics: self.metrics,
            message_max_bytes,
            message_timeout: self.config.message_timeout,
            closed: AtomicBool::new(false),
            should_warn: AtomicBool::new(true),
        });

        Ok(AsyncReporter {
            shared,
            close_timeout: self.config.close_timeout,
            started: AtomicBool::new(!background),
            runtime,
            done_tx: Mutex::new(background.then_some(done_tx)),
            done_rx: Mutex::new(Some(done_rx)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encoding;
    use crate::error::TransportError;
    use crate::metrics::InMemoryReporterMetrics;
    use crate::transport::{InMemoryTransport, Transport};
    use tokio::time::Instant;
    use tracing::Level;
    use tracing_subscriber::layer::Context;
    use tracing_subscriber::{prelude::*, Layer};

    fn span(n: u64) -> Span {
        Span::builder()
            .trace_id(format!("{:016x}", n + 1))
            .id(format!("{:016x}", n + 1))
            .name("get")
            .build()
            .unwrap()
    }

    fn single_span_message_size() -> usize {
        let transport = InMemoryTransport::default();
        let size = Proto3Encoder::new().size_in_bytes(&span(0));
        Transport::message_size_in_bytes_single(&transport, size)
    }

    struct Fixture {
        transport: Arc<InMemoryTransport>,
        metrics: Arc<InMemoryReporterMetrics>,
    }

    impl Fixture {
        fn new(transport: InMemoryTransport) -> Self {
            Self {
                transport: Arc::new(transport),
                metrics: Arc::new(InMemoryReporterMetrics::new()),
            }
        }

        fn builder(&self) -> ReporterBuilder {
            AsyncReporter::builder(self.transport.clone()).metrics(self.metrics.clone())
        }
    }

    /// Adds a fixed cost per span on top of the Proto3 list size.
    struct PaddedTransport {
        inner: InMemoryTransport,
        padding: usize,
    }

    impl Transport for PaddedTransport {
        fn encoding(&self) -> Encoding {
            Encoding::Proto3
        }

        fn message_max_bytes(&self) -> usize {
            Transport::message_max_bytes(&self.inner)
        }

        fn message_size_in_bytes(&self, encoded_spans: &[Bytes]) -> usize {
            Encoding::Proto3.list_size_in_bytes(encoded_spans) + self.padding * encoded_spans.len()
        }

        async fn send(&self, encoded_spans: Vec<Bytes>) -> Result<(), TransportError> {
            self.inner.send(encoded_spans).await
        }

        fn name(&self) -> &str {
            "padded"
        }
    }

    /// Records the level and message of every event.
    #[derive(Clone, Default)]
    struct CapturedEvents(Arc<Mutex<Vec<(Level, String)>>>);

    impl CapturedEvents {
        fn levels_of(&self, message: &str) -> Vec<Level> {
            lock(&self.0)
                .iter()
                .filter(|(_, m)| m == message)
                .map(|(level, _)| *level)
                .collect()
        }
    }

    struct MessageVisitor<'a>(&'a mut String);

    impl tracing::field::Visit for MessageVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                *self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for CapturedEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            lock(&self.0).push((*event.metadata().level(), message));
        }
    }

    #[tokio::test]
    async fn test_explicit_flush_without_worker() {
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture.builder().message_timeout(Duration::ZERO).build().unwrap();

        reporter.report(&span(1));
        assert_eq!(reporter.queued_spans(), 1);
        reporter.flush().await.unwrap();

        assert_eq!(fixture.transport.messages().len(), 1);
        assert_eq!(fixture.transport.span_count(), 1);
        assert_eq!(fixture.metrics.messages(), 1);
        assert_eq!(fixture.metrics.queued_spans(), 0);
    }

    #[tokio::test]
    async fn test_flush_after_close_fails() {
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture.builder().message_timeout(Duration::ZERO).build().unwrap();

        reporter.report(&span(1));
        reporter.close().await;
        assert_eq!(reporter.flush().await, Err(ReporterError::Closed));
        assert_eq!(fixture.metrics.spans_dropped(), 1, "queued span dropped at close");
    }

    #[tokio::test]
    async fn test_flush_sends_only_what_fits() {
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture
            .builder()
            .message_timeout(Duration::ZERO)
            .message_max_bytes(single_span_message_size())
            .build()
            .unwrap();

        reporter.report(&span(1));
        reporter.report(&span(2));

        reporter.flush().await.unwrap();
        let messages = fixture.transport.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].len(), 1);
        assert_eq!(reporter.queued_spans(), 1);

        reporter.flush().await.unwrap();
        assert_eq!(fixture.transport.messages().len(), 2);
        assert_eq!(fixture.transport.span_count(), 2);
        assert_eq!(fixture.metrics.spans_dropped(), 0);
    }

    #[tokio::test]
    async fn test_queue_full_drops_span() {
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture
            .builder()
            .message_timeout(Duration::ZERO)
            .queued_max_spans(1)
            .build()
            .unwrap();

        reporter.report(&span(1));
        reporter.report(&span(2));

        assert_eq!(fixture.metrics.spans(), 2);
        assert_eq!(fixture.metrics.spans_dropped(), 1);
        assert_eq!(reporter.queued_spans(), 1);
    }

    #[tokio::test]
    async fn test_oversized_span_dropped_before_queueing() {
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture
            .builder()
            .message_timeout(Duration::ZERO)
            .message_max_bytes(single_span_message_size() - 1)
            .build()
            .unwrap();

        reporter.report(&span(1));
        assert_eq!(fixture.metrics.spans_dropped(), 1);
        assert_eq!(reporter.queued_spans(), 0);

        reporter.flush().await.unwrap();
        assert!(fixture.transport.messages().is_empty(), "empty messages are never sent");
    }

    #[tokio::test]
    async fn test_report_after_close_drops() {
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture.builder().message_timeout(Duration::ZERO).build().unwrap();

        reporter.close().await;
        reporter.report(&span(1));
        assert_eq!(fixture.metrics.spans(), 1);
        assert_eq!(fixture.metrics.spans_dropped(), 1);
        assert_eq!(reporter.queued_spans(), 0);
    }

    #[tokio::test]
    async fn test_overflowing_span_is_not_requeued() {
        let transport = Arc::new(PaddedTransport {
            inner: InMemoryTransport::default(),
            padding: 10,
        });
        let metrics = Arc::new(InMemoryReporterMetrics::new());
        let size = Proto3Encoder::new().size_in_bytes(&span(0));
        let reporter = AsyncReporter::builder(transport.clone())
            .metrics(metrics.clone())
            .message_timeout(Duration::ZERO)
            // the accumulator packs two spans; the transport only fits one
            .message_max_bytes(2 * size)
            .build()
            .unwrap();

        reporter.report(&span(1));
        reporter.report(&span(2));
        reporter.flush().await.unwrap();

        assert_eq!(transport.inner.span_count(), 1);
        assert_eq!(metrics.spans_dropped(), 1);
        assert_eq!(reporter.queued_spans(), 0);

        reporter.flush().await.unwrap();
        assert_eq!(transport.inner.messages().len(), 1, "dropped span never comes back");
    }

    #[tokio::test]
    async fn test_send_failure_counts_message_and_spans() {
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture.builder().message_timeout(Duration::ZERO).build().unwrap();
        fixture.transport.fail_next(TransportError::Timeout);

        reporter.report(&span(1));
        reporter.report(&span(2));
        assert!(reporter.flush().await.is_ok());

        assert_eq!(fixture.metrics.messages(), 1);
        assert_eq!(fixture.metrics.messages_dropped_by(&TransportError::Timeout), 1);
        assert_eq!(fixture.metrics.spans_dropped(), 2);
        assert_eq!(fixture.transport.span_count(), 0);
    }

    #[tokio::test]
    async fn test_only_first_send_failure_warns() {
        let events = CapturedEvents::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));

        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture.builder().message_timeout(Duration::ZERO).build().unwrap();
        fixture.transport.fail_next(TransportError::Timeout);
        fixture.transport.fail_next(TransportError::Io("connection reset".into()));
        fixture.transport.fail_next(TransportError::Timeout);

        for i in 0..3 {
            reporter.report(&span(i));
            reporter.flush().await.unwrap();
            assert!(!reporter.shared.should_warn.load(Ordering::Relaxed));
        }

        assert_eq!(
            events.levels_of("dropped spans after send failure"),
            vec![Level::WARN, Level::DEBUG, Level::DEBUG]
        );
        assert_eq!(fixture.metrics.messages_dropped(), 3);
        assert_eq!(fixture.metrics.spans_dropped(), 3);
    }

    #[tokio::test]
    async fn test_queue_byte_limit_drops_span() {
        let size = Proto3Encoder::new().size_in_bytes(&span(0));
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture
            .builder()
            .message_timeout(Duration::ZERO)
            .queued_max_spans(100)
            .queued_max_bytes(Some(2 * size))
            .build()
            .unwrap();

        for i in 0..3 {
            reporter.report(&span(i));
        }

        assert_eq!(fixture.metrics.spans(), 3);
        assert_eq!(fixture.metrics.spans_dropped(), 1);
        assert_eq!(reporter.queued_spans(), 2);
        assert_eq!(reporter.queued_bytes(), 2 * size);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_sends_leftover_without_waiting_again() {
        let size = Proto3Encoder::new().size_in_bytes(&span(0));
        let transport = Arc::new(PaddedTransport {
            inner: InMemoryTransport::default(),
            padding: size,
        });
        let metrics = Arc::new(InMemoryReporterMetrics::new());
        let reporter = AsyncReporter::builder(transport.clone())
            .metrics(metrics.clone())
            .message_timeout(Duration::from_millis(100))
            // the accumulator packs three spans; the transport only fits one
            .message_max_bytes(3 * size)
            .build()
            .unwrap();

        for i in 0..3 {
            reporter.report(&span(i));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // first span sent, second dropped on overflow, third sent next cycle
        let messages = transport.inner.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], vec![Proto3Encoder::new().encode(&span(2))]);
        assert_eq!(metrics.spans_dropped(), 1);

        reporter.close().await;
    }

    #[tokio::test]
    async fn test_flush_reports_closed_transport() {
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture.builder().message_timeout(Duration::ZERO).build().unwrap();
        Transport::close(fixture.transport.as_ref()).await;

        reporter.report(&span(1));
        assert_eq!(reporter.flush().await, Err(ReporterError::TransportClosed));
        assert_eq!(fixture.metrics.messages_dropped_by(&TransportError::Closed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_sends_after_message_timeout() {
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture
            .builder()
            .message_timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        reporter.report(&span(1));
        reporter.report(&span(2));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fixture.transport.span_count(), 0, "message waits for its timeout");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fixture.transport.messages().len(), 1);
        assert_eq!(fixture.transport.span_count(), 2);

        reporter.close().await;
        assert_eq!(fixture.metrics.spans_dropped(), 0);
    }

    #[tokio::test]
    async fn test_close_flushes_buffered_spans() {
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture
            .builder()
            .message_timeout(Duration::from_secs(60))
            .build()
            .unwrap();

        for i in 0..3 {
            reporter.report(&span(i));
        }
        reporter.close().await;

        assert_eq!(fixture.transport.span_count(), 3);
        assert_eq!(fixture.metrics.spans_dropped(), 0);
        assert!(reporter.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture.builder().build().unwrap();
        reporter.report(&span(1));
        reporter.close().await;
        reporter.close().await;
        assert_eq!(fixture.transport.span_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_transport_stops_worker() {
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporter = fixture
            .builder()
            .message_timeout(Duration::from_millis(100))
            .close_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        Transport::close(fixture.transport.as_ref()).await;

        reporter.report(&span(1));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fixture.metrics.messages_dropped_by(&TransportError::Closed), 1);

        // nothing drains the queue any more
        reporter.report(&span(2));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(reporter.queued_spans(), 1);

        let start = Instant::now();
        reporter.close().await;
        assert!(start.elapsed() < Duration::from_secs(5), "worker already exited");
        assert_eq!(fixture.metrics.spans_dropped(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_times_out_on_slow_transport() {
        let fixture = Fixture::new(InMemoryTransport::default().with_send_delay(Duration::from_secs(10)));
        let reporter = fixture
            .builder()
            .message_timeout(Duration::from_millis(100))
            .close_timeout(Duration::from_millis(200))
            .build()
            .unwrap();

        reporter.report(&span(1));
        // worker is now stuck inside send
        tokio::time::sleep(Duration::from_millis(500)).await;
        reporter.report(&span(2));

        let start = Instant::now();
        reporter.close().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(10));
        assert_eq!(fixture.metrics.spans_dropped(), 1, "queued span dropped after timeout");
    }

    #[tokio::test]
    async fn test_message_max_bytes_clamped_to_transport() {
        let fixture = Fixture::new(InMemoryTransport::default().with_message_max_bytes(1000));
        let reporter = fixture.builder().message_max_bytes(1_000_000).build().unwrap();
        assert_eq!(reporter.message_max_bytes(), 1000);

        let reporter = fixture.builder().message_max_bytes(500).build().unwrap();
        assert_eq!(reporter.message_max_bytes(), 500);

        let reporter = fixture.builder().build().unwrap();
        assert_eq!(reporter.message_max_bytes(), 1000);
    }

    #[tokio::test]
    async fn test_encoding_mismatch_rejected() {
        let transport = Arc::new(InMemoryTransport::new(Encoding::Json));
        let result = AsyncReporter::builder(transport).build();
        assert!(matches!(
            result,
            Err(ReporterError::EncodingMismatch {
                encoder: Encoding::Proto3,
                transport: Encoding::Json
            })
        ));
    }

    #[test]
    fn test_worker_requires_runtime() {
        let transport = Arc::new(InMemoryTransport::default());
        let result = AsyncReporter::builder(transport.clone()).build();
        assert!(matches!(result, Err(ReporterError::NoRuntime)));

        let reporter = AsyncReporter::builder(transport)
            .message_timeout(Duration::ZERO)
            .build()
            .unwrap();
        reporter.report(&span(1));
        assert_eq!(reporter.queued_spans(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let transport = Arc::new(InMemoryTransport::default());
        let result = AsyncReporter::builder(transport).queued_max_spans(0).build();
        assert!(matches!(result, Err(ReporterError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_reporter_trait_object() {
        let fixture = Fixture::new(InMemoryTransport::default());
        let reporters: Vec<Arc<dyn Reporter>> = vec![
            Arc::new(NoopReporter),
            Arc::new(fixture.builder().message_timeout(Duration::ZERO).build().unwrap()),
        ];
        for reporter in &reporters {
            reporter.report(&span(1));
        }
        assert_eq!(fixture.metrics.spans(), 1);
    }
}
