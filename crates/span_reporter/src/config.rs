//! Configuration for reporter behavior.

use crate::error::ReporterError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`AsyncReporter`](crate::AsyncReporter).
///
/// Deserializes from any serde format; missing fields take their defaults
/// and durations are written in milliseconds:
///
/// ```json
/// { "message_timeout_ms": 500, "queued_max_spans": 2000, "queued_max_bytes": null }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Upper bound on one outbound message, envelope included.
    ///
    /// Clamped to the transport's own maximum. `None` uses the transport's.
    pub message_max_bytes: Option<usize>,

    /// How long a partially filled message may wait before it is sent.
    ///
    /// Zero disables the background worker; messages then go out only on
    /// explicit `flush()`.
    ///
    /// Default: 1s
    #[serde(rename = "message_timeout_ms", with = "duration_ms")]
    pub message_timeout: Duration,

    /// How long `close()` waits for the worker to finish.
    ///
    /// Default: 1s
    #[serde(rename = "close_timeout_ms", with = "duration_ms")]
    pub close_timeout: Duration,

    /// Maximum number of spans waiting to be packed into a message.
    ///
    /// Default: 10000
    pub queued_max_spans: usize,

    /// Maximum total encoded bytes waiting to be packed. `None` is unlimited.
    ///
    /// Default: 4 MiB
    pub queued_max_bytes: Option<usize>,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            message_max_bytes: None,
            message_timeout: Duration::from_secs(1),
            close_timeout: Duration::from_secs(1),
            queued_max_spans: 10_000,
            queued_max_bytes: Some(4 * 1024 * 1024),
        }
    }
}

impl ReporterConfig {
    /// Sets the message size limit.
    pub fn with_message_max_bytes(mut self, bytes: usize) -> Self {
        self.message_max_bytes = Some(bytes);
        self
    }

    /// Sets the message timeout. Zero disables the background worker.
    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Sets how long `close()` waits for the worker.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the queued span limit.
    pub fn with_queued_max_spans(mut self, spans: usize) -> Self {
        self.queued_max_spans = spans;
        self
    }

    /// Sets the queued byte limit. `None` removes it.
    pub fn with_queued_max_bytes(mut self, bytes: Option<usize>) -> Self {
        self.queued_max_bytes = bytes;
        self
    }

    /// Checks that every limit admits at least one span.
    pub fn validate(&self) -> Result<(), ReporterError> {
        if self.queued_max_spans == 0 {
            return Err(ReporterError::InvalidConfig(
                "queued_max_spans must be greater than zero".into(),
            ));
        }
        if self.message_max_bytes == Some(0) {
            return Err(ReporterError::InvalidConfig(
                "message_max_bytes must be greater than zero".into(),
            ));
        }
        if self.queued_max_bytes == Some(0) {
            return Err(ReporterError::InvalidConfig(
                "queued_max_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
