//! Proto3 span encoder, hand-rolled against `zipkin.proto`.
//!
//! Each encoded span is a complete `ListOfSpans.spans` entry (key byte,
//! length, span message), so a message is just the concatenation of its
//! spans. `size_in_bytes` must equal the length `encode` produces: the
//! queue and the message packer budget with it before anything is written.
//!
//! ```text
//! Span:      1 trace_id  2 parent_id  3 id  4 kind  5 name  6 timestamp
//!            7 duration  8 local_endpoint  9 remote_endpoint
//!            10 annotations  11 tags  12 debug  13 shared
//! Endpoint:  1 service_name  2 ipv4  3 ipv6  4 port
//! Annotation:1 timestamp  2 value
//! Tag entry: 1 key  2 value
//! ```

use super::ip::{parse_ip, IpBytes};
use super::writer::*;
use super::{DefaultErrorTag, ErrorTagger, SpanEncoder};
use crate::encoding::Encoding;
use crate::span::{Annotation, Endpoint, Span};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;

const LIST_OF_SPANS_SPANS: u8 = 1;

const SPAN_TRACE_ID: u8 = 1;
const SPAN_PARENT_ID: u8 = 2;
const SPAN_ID: u8 = 3;
const SPAN_KIND: u8 = 4;
const SPAN_NAME: u8 = 5;
const SPAN_TIMESTAMP: u8 = 6;
const SPAN_DURATION: u8 = 7;
const SPAN_LOCAL_ENDPOINT: u8 = 8;
const SPAN_REMOTE_ENDPOINT: u8 = 9;
const SPAN_ANNOTATIONS: u8 = 10;
const SPAN_TAGS: u8 = 11;
const SPAN_DEBUG: u8 = 12;
const SPAN_SHARED: u8 = 13;

const ENDPOINT_SERVICE_NAME: u8 = 1;
const ENDPOINT_IPV4: u8 = 2;
const ENDPOINT_IPV6: u8 = 3;
const ENDPOINT_PORT: u8 = 4;

const ANNOTATION_TIMESTAMP: u8 = 1;
const ANNOTATION_VALUE: u8 = 2;

const TAG_KEY: u8 = 1;
const TAG_VALUE: u8 = 2;

/// Encodes spans in the Proto3 `ListOfSpans` form.
#[derive(Clone)]
pub struct Proto3Encoder {
    error_tag: Arc<dyn ErrorTagger>,
}

impl Default for Proto3Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Proto3Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proto3Encoder")
            .field("error_tag_key", &self.error_tag.key())
            .finish()
    }
}

impl Proto3Encoder {
    /// Creates an encoder that backfills errors under the `"error"` tag.
    pub fn new() -> Self {
        Self::with_error_tag(Arc::new(DefaultErrorTag::default()))
    }

    /// Creates an encoder with a custom error tag strategy.
    pub fn with_error_tag(error_tag: Arc<dyn ErrorTagger>) -> Self {
        Self { error_tag }
    }

    /// Encodes several spans into one `ListOfSpans` message.
    pub fn encode_list(&self, spans: &[Span]) -> Bytes {
        let layouts: Vec<SpanLayout> = spans.iter().map(|s| self.layout(s)).collect();
        let total = layouts.iter().map(|l| sizeof_message_entry(l.payload)).sum();
        let mut buf = BytesMut::with_capacity(total);
        for (span, layout) in spans.iter().zip(&layouts) {
            write_length_prefix(&mut buf, LIST_OF_SPANS_SPANS, layout.payload);
            self.write_span(&mut buf, span, layout);
        }
        debug_assert_eq!(buf.len(), total, "encoded list size disagrees with computed size");
        buf.freeze()
    }

    /// Measures `span`, keeping what the write pass would otherwise redo.
    fn layout(&self, span: &Span) -> SpanLayout {
        let local_endpoint = EndpointLayout::of(&span.local_endpoint);
        let remote_endpoint = EndpointLayout::of(&span.remote_endpoint);

        let mut size = id_field_size(&span.trace_id);
        size += span.parent_id.as_deref().map_or(0, id_field_size);
        size += id_field_size(&span.id);
        size += sizeof_varint_field(span.kind.map_or(0, |k| k.proto_number()));
        size += sizeof_length_delimited(span.name.as_deref().map_or(0, str::len));
        size += sizeof_fixed64_field(span.start_timestamp);
        size += sizeof_varint_field(span.duration().unwrap_or(0));
        size += local_endpoint.field_size();
        size += remote_endpoint.field_size();

        for annotation in &span.annotations {
            size += sizeof_message_entry(annotation_payload_size(annotation));
        }

        let key = self.error_tag.key();
        for (tag_key, value) in &span.tags {
            size += sizeof_message_entry(tag_payload_size(tag_key, value));
        }
        let error_tag = if span.tags.contains_key(key) {
            None
        } else {
            span.error.as_ref().and_then(|err| self.error_tag.value(err))
        };
        if let Some(value) = &error_tag {
            size += sizeof_message_entry(tag_payload_size(key, value));
        }

        size += sizeof_bool_field(span.debug);
        size += sizeof_bool_field(span.shared);
        SpanLayout {
            payload: size,
            local_endpoint,
            remote_endpoint,
            error_tag,
        }
    }

    fn write_span<B: BufMut>(&self, buf: &mut B, span: &Span, layout: &SpanLayout) {
        write_id_field(buf, SPAN_TRACE_ID, &span.trace_id);
        if let Some(parent_id) = span.parent_id.as_deref() {
            write_id_field(buf, SPAN_PARENT_ID, parent_id);
        }
        write_id_field(buf, SPAN_ID, &span.id);
        write_varint_field(buf, SPAN_KIND, span.kind.map_or(0, |k| k.proto_number()));
        write_bytes_field(buf, SPAN_NAME, span.name.as_deref().unwrap_or_default().as_bytes());
        write_fixed64_field(buf, SPAN_TIMESTAMP, span.start_timestamp);
        write_varint_field(buf, SPAN_DURATION, span.duration().unwrap_or(0));
        layout.local_endpoint.write(buf, SPAN_LOCAL_ENDPOINT, &span.local_endpoint);
        layout.remote_endpoint.write(buf, SPAN_REMOTE_ENDPOINT, &span.remote_endpoint);

        for annotation in &span.annotations {
            write_length_prefix(buf, SPAN_ANNOTATIONS, annotation_payload_size(annotation));
            write_fixed64_field(buf, ANNOTATION_TIMESTAMP, annotation.timestamp);
            write_bytes_field(buf, ANNOTATION_VALUE, annotation.value.as_bytes());
        }

        for (key, value) in &span.tags {
            write_tag_entry(buf, key, value);
        }
        if let Some(value) = &layout.error_tag {
            write_tag_entry(buf, self.error_tag.key(), value);
        }

        write_bool_field(buf, SPAN_DEBUG, span.debug);
        write_bool_field(buf, SPAN_SHARED, span.shared);
    }
}

impl SpanEncoder for Proto3Encoder {
    fn encoding(&self) -> Encoding {
        Encoding::Proto3
    }

    fn size_in_bytes(&self, span: &Span) -> usize {
        sizeof_message_entry(self.layout(span).payload)
    }

    fn encode(&self, span: &Span) -> Bytes {
        let layout = self.layout(span);
        let total = sizeof_message_entry(layout.payload);
        let mut buf = BytesMut::with_capacity(total);
        write_length_prefix(&mut buf, LIST_OF_SPANS_SPANS, layout.payload);
        self.write_span(&mut buf, span, &layout);
        debug_assert_eq!(buf.len(), total, "encoded span size disagrees with computed size");
        buf.freeze()
    }
}

/// Sizes and derived values of one span, computed once per encode.
struct SpanLayout {
    payload: usize,
    local_endpoint: EndpointLayout,
    remote_endpoint: EndpointLayout,
    /// Synthesized error tag value, if one is written
    error_tag: Option<String>,
}

struct EndpointLayout {
    ip: Option<IpBytes>,
    payload: usize,
}

impl EndpointLayout {
    fn of(endpoint: &Endpoint) -> Self {
        let ip = endpoint.ip.as_deref().and_then(parse_ip);
        let mut payload = sizeof_length_delimited(endpoint.service_name.as_deref().map_or(0, str::len));
        payload += ip.map_or(0, |ip| sizeof_length_delimited(ip.as_slice().len()));
        payload += sizeof_varint_field(u64::from(endpoint.port));
        Self { ip, payload }
    }

    /// An endpoint with nothing to write is left off entirely.
    fn field_size(&self) -> usize {
        match self.payload {
            0 => 0,
            payload => sizeof_message_entry(payload),
        }
    }

    fn write<B: BufMut>(&self, buf: &mut B, field_number: u8, endpoint: &Endpoint) {
        if self.payload == 0 {
            return;
        }
        write_length_prefix(buf, field_number, self.payload);
        write_bytes_field(
            buf,
            ENDPOINT_SERVICE_NAME,
            endpoint.service_name.as_deref().unwrap_or_default().as_bytes(),
        );
        match self.ip {
            Some(IpBytes::V4(b)) => write_bytes_field(buf, ENDPOINT_IPV4, &b),
            Some(IpBytes::V6(b)) => write_bytes_field(buf, ENDPOINT_IPV6, &b),
            None => {}
        }
        write_varint_field(buf, ENDPOINT_PORT, u64::from(endpoint.port));
    }
}

fn id_field_size(hex_id: &str) -> usize {
    decode_id(hex_id).map_or(0, |(_, len)| sizeof_length_delimited(len))
}

fn write_id_field<B: BufMut>(buf: &mut B, field_number: u8, hex_id: &str) {
    if let Some((bytes, len)) = decode_id(hex_id) {
        write_bytes_field(buf, field_number, &bytes[..len]);
    }
}

fn annotation_payload_size(annotation: &Annotation) -> usize {
    sizeof_fixed64_field(annotation.timestamp) + sizeof_length_delimited(annotation.value.len())
}

fn tag_payload_size(key: &str, value: &str) -> usize {
    sizeof_length_delimited(key.len()) + sizeof_length_delimited(value.len())
}

fn write_tag_entry<B: BufMut>(buf: &mut B, key: &str, value: &str) {
    write_length_prefix(buf, SPAN_TAGS, tag_payload_size(key, value));
    write_bytes_field(buf, TAG_KEY, key.as_bytes());
    write_bytes_field(buf, TAG_VALUE, value.as_bytes());
}
