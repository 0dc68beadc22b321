//! Span Reporter
//!
//! Client-side plumbing for shipping finished trace spans to a collector.
//! Instrumented code calls [`AsyncReporter::report`], which never blocks:
//! spans are encoded once, parked in a queue bounded by both span count and
//! total bytes, and packed by a background tokio task into messages that
//! never exceed the transport's size limit.
//!
//! ```text
//! report() ──► ByteBoundedQueue ──► MessageAccumulator ──► Transport::send
//!   (any thread)   (count + bytes)      (size + timeout)       (one message)
//! ```
//!
//! Spans are encoded with [`Proto3Encoder`], whose
//! [`size_in_bytes`](SpanEncoder::size_in_bytes) is exact so that all
//! batching math is done on sizes alone. Overload and failure never reach
//! the caller: every dropped span is counted in [`ReporterMetrics`].
//!
//! # Native async traits
//!
//! [`Transport`] uses async fn in traits directly (no `#[async_trait]`);
//! [`TransportBoxed`] is its object-safe twin, implemented for every
//! transport.

mod accumulator;
mod config;
pub mod encoder;
mod encoding;
mod error;
mod invariants;
mod metrics;
mod queue;
mod reporter;
pub mod span;
mod transport;

pub use accumulator::MessageAccumulator;
pub use config::ReporterConfig;
pub use encoder::{DefaultErrorTag, ErrorTagger, FnErrorTag, Proto3Encoder, SpanEncoder};
pub use encoding::Encoding;
pub use error::{ReporterError, TransportError};
pub use metrics::{InMemoryReporterMetrics, NoopReporterMetrics, ReporterMetrics};
pub use queue::{ByteBoundedQueue, SizedConsumer};
pub use reporter::{AsyncReporter, NoopReporter, Reporter, ReporterBuilder};
pub use span::{now_micros, Annotation, Endpoint, RecordedError, Span, SpanBuildError, SpanBuilder, SpanKind};
pub use transport::{InMemoryTransport, NullTransport, Transport, TransportBoxed, DEFAULT_MESSAGE_MAX_BYTES};
