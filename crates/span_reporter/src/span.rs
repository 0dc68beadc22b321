use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;
use thiserror::Error;

/// A finished span, as handed to the reporter by instrumentation.
///
/// Ids are kept as normalized lower-case hex so they can be written to the
/// wire as raw bytes without re-validation. Timestamps are epoch
/// microseconds; zero means "unset".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// Trace identifier, 16 or 32 hex characters
    pub trace_id: String,
    /// Parent span identifier, 16 hex characters (absent for root spans)
    pub parent_id: Option<String>,
    /// Span identifier, 16 hex characters
    pub id: String,
    /// Span kind (absent means unspecified)
    pub kind: Option<SpanKind>,
    /// Operation name
    pub name: Option<String>,
    /// Start time (epoch microseconds, 0 if unset)
    pub start_timestamp: u64,
    /// Finish time (epoch microseconds, 0 if unset)
    pub finish_timestamp: u64,
    /// The host that recorded this span
    pub local_endpoint: Endpoint,
    /// The other side of the connection, for RPC or messaging spans
    pub remote_endpoint: Endpoint,
    /// Timestamped events, in the order they were recorded
    pub annotations: Vec<Annotation>,
    /// Tags; a repeated key overwrites the earlier value
    pub tags: BTreeMap<String, String>,
    /// Force sampling of this trace
    pub debug: bool,
    /// Span shares its id with the remote side (RPC server half)
    pub shared: bool,
    /// Failure recorded for this span, if any
    pub error: Option<RecordedError>,
}

/// Span kind as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpanKind {
    Client,
    Server,
    Producer,
    Consumer,
}

impl SpanKind {
    /// Proto3 enum number. Zero is reserved for "unspecified".
    #[inline]
    pub const fn proto_number(self) -> u64 {
        match self {
            Self::Client => 1,
            Self::Server => 2,
            Self::Producer => 3,
            Self::Consumer => 4,
        }
    }
}

/// Network location of one side of a span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Lower-case service name
    pub service_name: Option<String>,
    /// IPv4 or IPv6 address literal
    pub ip: Option<String>,
    /// Port, 0 if unknown
    pub port: u16,
}

impl Endpoint {
    /// Returns true when no field is set.
    pub fn is_empty(&self) -> bool {
        self.service_name.as_deref().map_or(true, str::is_empty)
            && self.ip.as_deref().map_or(true, str::is_empty)
            && self.port == 0
    }
}

/// A timestamped event within a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Epoch microseconds
    pub timestamp: u64,
    pub value: String,
}

/// A failure captured on a span.
///
/// Only used to synthesize an error tag at encoding time; see
/// [`ErrorTagger`](crate::encoder::ErrorTagger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedError {
    /// Short type name of the error, e.g. `TimedOut`
    pub kind: String,
    /// Display text of the error, if it had any
    pub message: Option<String>,
}

impl RecordedError {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Captures any error value, using the last path segment of its type name as the kind.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let type_name = std::any::type_name::<E>();
        let kind = type_name.rsplit("::").next().unwrap_or(type_name);
        let message = err.to_string();
        Self {
            kind: kind.to_string(),
            message: (!message.is_empty()).then_some(message),
        }
    }
}

/// Errors from [`SpanBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpanBuildError {
    #[error("{field} is required")]
    Missing { field: &'static str },
    #[error("{field} must be 1-{max_len} hex characters, got {value:?}")]
    InvalidId {
        field: &'static str,
        max_len: usize,
        value: String,
    },
}

impl Span {
    /// Starts building a span.
    pub fn builder() -> SpanBuilder {
        SpanBuilder::default()
    }

    /// Sets a tag, replacing any earlier value for the same key.
    pub fn tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Records an event at the given epoch microseconds.
    pub fn annotate(&mut self, timestamp: u64, value: impl Into<String>) {
        self.annotations.push(Annotation {
            timestamp,
            value: value.into(),
        });
    }

    /// Marks the span finished at the given epoch microseconds.
    pub fn finish(&mut self, timestamp: u64) {
        self.finish_timestamp = timestamp;
    }

    /// Duration in microseconds, present only when both timestamps are set.
    ///
    /// Floored at 1 so a span that finished within the same microsecond
    /// still reports a duration.
    pub fn duration(&self) -> Option<u64> {
        if self.start_timestamp == 0 || self.finish_timestamp == 0 {
            return None;
        }
        Some(
            self.finish_timestamp
                .saturating_sub(self.start_timestamp)
                .max(1),
        )
    }
}

/// Current wall clock time in epoch microseconds.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Builder for [`Span`] that normalizes ids.
#[derive(Debug, Clone, Default)]
pub struct SpanBuilder {
    trace_id: Option<String>,
    parent_id: Option<String>,
    id: Option<String>,
    kind: Option<SpanKind>,
    name: Option<String>,
    start_timestamp: u64,
    finish_timestamp: u64,
    local_endpoint: Endpoint,
    remote_endpoint: Endpoint,
    annotations: Vec<Annotation>,
    tags: BTreeMap<String, String>,
    debug: bool,
    shared: bool,
    error: Option<RecordedError>,
}

impl SpanBuilder {
    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn start_timestamp(mut self, micros: u64) -> Self {
        self.start_timestamp = micros;
        self
    }

    pub fn finish_timestamp(mut self, micros: u64) -> Self {
        self.finish_timestamp = micros;
        self
    }

    pub fn local_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.local_endpoint = endpoint;
        self
    }

    pub fn remote_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.remote_endpoint = endpoint;
        self
    }

    pub fn annotation(mut self, timestamp: u64, value: impl Into<String>) -> Self {
        self.annotations.push(Annotation {
            timestamp,
            value: value.into(),
        });
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn error(mut self, error: RecordedError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn build(self) -> Result<Span, SpanBuildError> {
        let trace_id = self.trace_id.ok_or(SpanBuildError::Missing { field: "trace_id" })?;
        let trace_id = normalize_id("trace_id", &trace_id, 32)?;
        let id = self.id.ok_or(SpanBuildError::Missing { field: "id" })?;
        let id = normalize_id("id", &id, 16)?;
        let parent_id = self
            .parent_id
            .map(|p| normalize_id("parent_id", &p, 16))
            .transpose()?;

        Ok(Span {
            trace_id,
            parent_id,
            id,
            kind: self.kind,
            name: self.name,
            start_timestamp: self.start_timestamp,
            finish_timestamp: self.finish_timestamp,
            local_endpoint: self.local_endpoint,
            remote_endpoint: self.remote_endpoint,
            annotations: self.annotations,
            tags: self.tags,
            debug: self.debug,
            shared: self.shared,
            error: self.error,
        })
    }
}

/// Lower-cases and left-pads a hex id to 16 or 32 characters.
fn normalize_id(field: &'static str, value: &str, max_len: usize) -> Result<String, SpanBuildError> {
    let invalid = || SpanBuildError::InvalidId {
        field,
        max_len,
        value: value.to_string(),
    };
    if value.is_empty() || value.len() > max_len || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let width = if value.len() <= 16 { 16 } else { 32 };
    Ok(format!("{:0>width$}", value.to_ascii_lowercase(), width = width))
}
