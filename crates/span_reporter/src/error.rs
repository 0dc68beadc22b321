//! Error types for span reporting.

use crate::encoding::Encoding;
use thiserror::Error;

/// Errors a [`Transport`](crate::Transport) may return from `send`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport was closed and will never accept another message.
    #[error("transport is closed")]
    Closed,
    /// Network or I/O failure.
    #[error("i/o error: {0}")]
    Io(String),
    /// The send did not complete in time.
    #[error("send timed out")]
    Timeout,
    /// The backend answered but refused the message.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    /// The message could not be framed for the wire.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TransportError {
    /// Number of distinct [`TransportError::kind`] labels.
    pub const KINDS: usize = 5;

    /// Returns `true` if the transport is permanently unusable.
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Stable label, used when counting dropped messages by cause.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Io(_) => "io",
            Self::Timeout => "timeout",
            Self::Rejected { .. } => "rejected",
            Self::Serialization(_) => "serialization",
        }
    }

    pub(crate) fn kind_index(&self) -> usize {
        match self {
            Self::Closed => 0,
            Self::Io(_) => 1,
            Self::Timeout => 2,
            Self::Rejected { .. } => 3,
            Self::Serialization(_) => 4,
        }
    }
}

/// Errors surfaced by the reporter's control operations.
///
/// `report` never returns an error; these only come from building,
/// `flush` and the worker loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReporterError {
    /// `flush` was called after `close`.
    #[error("reporter is closed")]
    Closed,
    /// The transport reported it was closed out-of-band.
    #[error("transport is closed")]
    TransportClosed,
    /// The encoder and transport disagree on the wire format.
    #[error("encoder produces {encoder:?} but transport expects {transport:?}")]
    EncodingMismatch { encoder: Encoding, transport: Encoding },
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A background worker was requested but no tokio runtime is running.
    #[error("no tokio runtime available to run the flush worker")]
    NoRuntime,
}
