//! Span encoders.
//!
//! The reporter only needs two things from an encoder: the bytes of a span
//! and, before that, exactly how many bytes it will take.

mod ip;
mod proto3;
mod writer;

pub use proto3::Proto3Encoder;

use crate::encoding::Encoding;
use crate::span::{RecordedError, Span};
use bytes::Bytes;

/// Turns a span into its wire form.
pub trait SpanEncoder: Send + Sync {
    /// The wire format this encoder produces.
    fn encoding(&self) -> Encoding;

    /// Exact length of [`encode`](Self::encode)'s output for `span`.
    fn size_in_bytes(&self, span: &Span) -> usize;

    /// Encodes one span.
    fn encode(&self, span: &Span) -> Bytes;
}

/// Decides the tag written for a span that failed.
///
/// The encoder only consults this when the span carries a
/// [`RecordedError`] and the user did not already set a tag under
/// [`key`](Self::key).
pub trait ErrorTagger: Send + Sync {
    /// Tag key, `"error"` by convention.
    fn key(&self) -> &str;

    /// Tag value for `error`, or `None` to write nothing.
    fn value(&self, error: &RecordedError) -> Option<String>;
}

/// Tags the error message, falling back to the error kind.
#[derive(Debug, Clone)]
pub struct DefaultErrorTag {
    key: String,
}

impl DefaultErrorTag {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for DefaultErrorTag {
    fn default() -> Self {
        Self::new("error")
    }
}

impl ErrorTagger for DefaultErrorTag {
    fn key(&self) -> &str {
        &self.key
    }

    fn value(&self, error: &RecordedError) -> Option<String> {
        match error.message.as_deref() {
            Some(message) if !message.is_empty() => Some(message.to_string()),
            _ if !error.kind.is_empty() => Some(error.kind.clone()),
            _ => None,
        }
    }
}

/// Error tag strategy backed by a closure.
pub struct FnErrorTag<F> {
    key: String,
    value: F,
}

impl<F> FnErrorTag<F>
where
    F: Fn(&RecordedError) -> Option<String> + Send + Sync,
{
    pub fn new(key: impl Into<String>, value: F) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

impl<F> ErrorTagger for FnErrorTag<F>
where
    F: Fn(&RecordedError) -> Option<String> + Send + Sync,
{
    fn key(&self) -> &str {
        &self.key
    }

    fn value(&self, error: &RecordedError) -> Option<String> {
        (self.value)(error)
    }
}
