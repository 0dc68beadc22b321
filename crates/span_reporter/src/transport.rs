use crate::encoding::Encoding;
use crate::error::TransportError;
use bytes::Bytes;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Default message budget for transports that do not impose their own.
pub const DEFAULT_MESSAGE_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Delivers messages of encoded spans to a collector.
///
/// The reporter calls nothing else: it sizes messages with
/// [`message_size_in_bytes`](Self::message_size_in_bytes) and hands the
/// finished list to [`send`](Self::send). Concrete transports (HTTP, Kafka,
/// ...) live outside this crate.
///
/// Uses native async fn in traits. For dynamic dispatch use
/// [`TransportBoxed`], which every `Transport` implements.
pub trait Transport: Send + Sync {
    /// Wire format the collector expects.
    fn encoding(&self) -> Encoding;

    /// Largest message the transport can carry.
    fn message_max_bytes(&self) -> usize;

    /// Size of a message carrying `encoded_spans`.
    fn message_size_in_bytes(&self, encoded_spans: &[Bytes]) -> usize {
        self.encoding().list_size_in_bytes(encoded_spans)
    }

    /// Size of a message carrying one span of `encoded_size_in_bytes`.
    fn message_size_in_bytes_single(&self, encoded_size_in_bytes: usize) -> usize {
        self.encoding().list_size_in_bytes_single(encoded_size_in_bytes)
    }

    /// Sends one message. [`TransportError::Closed`] means it never will again.
    fn send(&self, encoded_spans: Vec<Bytes>) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Releases transport resources. Later sends fail with `Closed`.
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`Transport`] for dynamic dispatch.
pub trait TransportBoxed: Send + Sync {
    fn encoding(&self) -> Encoding;

    fn message_max_bytes(&self) -> usize;

    fn message_size_in_bytes(&self, encoded_spans: &[Bytes]) -> usize;

    fn message_size_in_bytes_single(&self, encoded_size_in_bytes: usize) -> usize;

    /// Sends one message (boxed future for object safety).
    fn send_boxed(
        &self,
        encoded_spans: Vec<Bytes>,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    fn close_boxed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    fn name(&self) -> &str;
}

/// Blanket implementation: any Transport can be used as TransportBoxed
impl<T: Transport> TransportBoxed for T {
    fn encoding(&self) -> Encoding {
        Transport::encoding(self)
    }

    fn message_max_bytes(&self) -> usize {
        Transport::message_max_bytes(self)
    }

    fn message_size_in_bytes(&self, encoded_spans: &[Bytes]) -> usize {
        Transport::message_size_in_bytes(self, encoded_spans)
    }

    fn message_size_in_bytes_single(&self, encoded_size_in_bytes: usize) -> usize {
        Transport::message_size_in_bytes_single(self, encoded_size_in_bytes)
    }

    fn send_boxed(
        &self,
        encoded_spans: Vec<Bytes>,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(self.send(encoded_spans))
    }

    fn close_boxed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.close())
    }

    fn name(&self) -> &str {
        Transport::name(self)
    }
}

/// Transport that accepts and discards every message (for benchmarking)
#[derive(Debug)]
pub struct NullTransport {
    encoding: Encoding,
}

impl NullTransport {
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }
}

impl Default for NullTransport {
    fn default() -> Self {
        Self::new(Encoding::Proto3)
    }
}

impl Transport for NullTransport {
    fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn message_max_bytes(&self) -> usize {
        DEFAULT_MESSAGE_MAX_BYTES
    }

    async fn send(&self, _encoded_spans: Vec<Bytes>) -> Result<(), TransportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Transport that records every message it is sent.
///
/// Useful in tests and for embedding the reporter where messages are
/// consumed in-process. Failures can be scripted with
/// [`fail_next`](Self::fail_next), and an artificial delay makes sends slow.
#[derive(Debug)]
pub struct InMemoryTransport {
    encoding: Encoding,
    message_max_bytes: usize,
    send_delay: Duration,
    closed: AtomicBool,
    messages: Mutex<Vec<Vec<Bytes>>>,
    scripted_failures: Mutex<VecDeque<TransportError>>,
}

impl InMemoryTransport {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            message_max_bytes: DEFAULT_MESSAGE_MAX_BYTES,
            send_delay: Duration::ZERO,
            closed: AtomicBool::new(false),
            messages: Mutex::new(Vec::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Sets the largest message this transport accepts.
    pub fn with_message_max_bytes(mut self, message_max_bytes: usize) -> Self {
        self.message_max_bytes = message_max_bytes;
        self
    }

    /// Makes each send sleep before recording the message.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// Fails the next send with `err` instead of recording it.
    pub fn fail_next(&self, err: TransportError) {
        self.scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(err);
    }

    /// Messages received so far, in send order.
    pub fn messages(&self) -> Vec<Vec<Bytes>> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of spans received across all messages.
    pub fn span_count(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Vec::len)
            .sum()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(Encoding::Proto3)
    }
}

impl Transport for InMemoryTransport {
    fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn message_max_bytes(&self) -> usize {
        self.message_max_bytes
    }

    async fn send(&self, encoded_spans: Vec<Bytes>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        let scripted = self
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(encoded_spans);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
