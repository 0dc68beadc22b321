//! Protobuf wire primitives and their exact sizes.
//!
//! Every `write_*` function here has a matching `sizeof_*` function. The
//! encoder sizes a span first, allocates exactly that many bytes, then
//! writes; the two halves must agree byte for byte.

use bytes::BufMut;

pub(crate) const WIRETYPE_VARINT: u8 = 0;
pub(crate) const WIRETYPE_FIXED64: u8 = 1;
pub(crate) const WIRETYPE_LENGTH_DELIMITED: u8 = 2;

/// Field key byte. All field numbers used here are below 16, so the key
/// always fits in a single byte.
#[inline]
pub(crate) const fn key(field_number: u8, wire_type: u8) -> u8 {
    (field_number << 3) | wire_type
}

/// Number of bytes `value` takes as a base-128 varint.
#[inline]
pub(crate) const fn sizeof_varint(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    let bits = 64 - value.leading_zeros() as usize;
    (bits + 6) / 7
}

/// Size of a length-delimited field whose payload is `payload_len` bytes,
/// including its key. Zero-length payloads are omitted.
#[inline]
pub(crate) const fn sizeof_length_delimited(payload_len: usize) -> usize {
    if payload_len == 0 {
        return 0;
    }
    1 + sizeof_varint(payload_len as u64) + payload_len
}

/// Size of a repeated or nested message entry, which is written even when
/// its payload is empty.
#[inline]
pub(crate) const fn sizeof_message_entry(payload_len: usize) -> usize {
    1 + sizeof_varint(payload_len as u64) + payload_len
}

/// Size of a varint field including its key. Zero is omitted.
#[inline]
pub(crate) const fn sizeof_varint_field(value: u64) -> usize {
    if value == 0 {
        return 0;
    }
    1 + sizeof_varint(value)
}

/// Size of a fixed64 field including its key. Zero is omitted.
#[inline]
pub(crate) const fn sizeof_fixed64_field(value: u64) -> usize {
    if value == 0 {
        0
    } else {
        9
    }
}

/// Size of a bool field including its key. `false` is omitted.
#[inline]
pub(crate) const fn sizeof_bool_field(value: bool) -> usize {
    if value {
        2
    } else {
        0
    }
}

#[inline]
pub(crate) fn write_varint<B: BufMut>(buf: &mut B, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

#[inline]
pub(crate) fn write_varint_field<B: BufMut>(buf: &mut B, field_number: u8, value: u64) {
    if value == 0 {
        return;
    }
    buf.put_u8(key(field_number, WIRETYPE_VARINT));
    write_varint(buf, value);
}

#[inline]
pub(crate) fn write_fixed64_field<B: BufMut>(buf: &mut B, field_number: u8, value: u64) {
    if value == 0 {
        return;
    }
    buf.put_u8(key(field_number, WIRETYPE_FIXED64));
    buf.put_u64_le(value);
}

#[inline]
pub(crate) fn write_bool_field<B: BufMut>(buf: &mut B, field_number: u8, value: bool) {
    if value {
        buf.put_u8(key(field_number, WIRETYPE_VARINT));
        buf.put_u8(1);
    }
}

/// Writes `bytes` as a length-delimited field, omitting it when empty.
#[inline]
pub(crate) fn write_bytes_field<B: BufMut>(buf: &mut B, field_number: u8, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    write_length_prefix(buf, field_number, bytes.len());
    buf.put_slice(bytes);
}

/// Writes the key and length of a length-delimited field; the caller writes
/// exactly `payload_len` bytes next.
#[inline]
pub(crate) fn write_length_prefix<B: BufMut>(buf: &mut B, field_number: u8, payload_len: usize) {
    buf.put_u8(key(field_number, WIRETYPE_LENGTH_DELIMITED));
    write_varint(buf, payload_len as u64);
}

/// Hex id decoded to raw bytes: trace ids are 8 or 16 bytes, span ids 8.
///
/// Returns `None` for anything that is not an even-length hex string of at
/// most 32 characters, in which case the field is left off the wire.
pub(crate) fn decode_id(hex_id: &str) -> Option<([u8; 16], usize)> {
    let len = hex_id.len() / 2;
    if hex_id.is_empty() || hex_id.len() % 2 != 0 || len > 16 {
        return None;
    }
    let mut out = [0u8; 16];
    hex::decode_to_slice(hex_id, &mut out[..len]).ok()?;
    Some((out, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint_bytes(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, value);
        buf
    }

    #[test]
    fn test_varint_encoding() {
        assert_eq!(varint_bytes(0), vec![0x00]);
        assert_eq!(varint_bytes(1), vec![0x01]);
        assert_eq!(varint_bytes(127), vec![0x7f]);
        assert_eq!(varint_bytes(128), vec![0x80, 0x01]);
        assert_eq!(varint_bytes(300), vec![0xac, 0x02]);
        assert_eq!(varint_bytes(u64::MAX).len(), 10);
    }

    #[test]
    fn test_sizeof_varint_matches_written_len() {
        for value in [0u64, 1, 127, 128, 16_383, 16_384, 1 << 35, u64::MAX] {
            assert_eq!(sizeof_varint(value), varint_bytes(value).len(), "value {}", value);
        }
    }

    #[test]
    fn test_fixed64_little_endian() {
        let mut buf = Vec::new();
        write_fixed64_field(&mut buf, 6, 0x0102_0304_0506_0708);
        assert_eq!(buf, vec![0x31, 8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(sizeof_fixed64_field(1), 9);
    }

    #[test]
    fn test_default_values_are_omitted() {
        let mut buf = Vec::new();
        write_varint_field(&mut buf, 7, 0);
        write_fixed64_field(&mut buf, 6, 0);
        write_bool_field(&mut buf, 12, false);
        write_bytes_field(&mut buf, 5, b"");
        assert!(buf.is_empty());
        assert_eq!(sizeof_length_delimited(0), 0);
        assert_eq!(sizeof_varint_field(0), 0);
    }

    #[test]
    fn test_bool_true_is_two_bytes() {
        let mut buf = Vec::new();
        write_bool_field(&mut buf, 12, true);
        assert_eq!(buf, vec![0x60, 0x01]);
    }

    #[test]
    fn test_decode_id() {
        let (bytes, len) = decode_id("000000000000000a").unwrap();
        assert_eq!(len, 8);
        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0, 0, 0, 0x0a]);
        assert!(decode_id("").is_none());
        assert!(decode_id("abc").is_none());
        assert!(decode_id("zz").is_none());
        assert!(decode_id(&"a".repeat(34)).is_none());
    }
}
