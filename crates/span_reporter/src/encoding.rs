//! Wire encodings and their message envelope overhead.
//!
//! A message is a list of already-encoded spans. Each encoding frames that
//! list differently, which changes how many spans fit under a byte budget:
//!
//! | Encoding | Envelope | Per span after the first |
//! |----------|----------|--------------------------|
//! | `Json`   | `[` `]` (2 bytes) | `,` (1 byte) |
//! | `Thrift` | list header (5 bytes) | none |
//! | `Proto3` | none (`ListOfSpans` is a concatenation) | none |

use serde::{Deserialize, Serialize};

/// Wire format of a span and of a message of spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Encoding {
    /// JSON array of span objects.
    Json,
    /// Thrift `TList` of span structs.
    Thrift,
    /// Repeated `ListOfSpans.spans` field, one entry per span.
    Proto3,
}

impl Encoding {
    /// Size of a message holding no spans.
    #[inline]
    pub const fn empty_list_size_in_bytes(self) -> usize {
        match self {
            Self::Json => 2,
            Self::Thrift => 5,
            Self::Proto3 => 0,
        }
    }

    /// Size of a message holding exactly one span of `encoded_size_in_bytes`.
    #[inline]
    pub const fn list_size_in_bytes_single(self, encoded_size_in_bytes: usize) -> usize {
        self.empty_list_size_in_bytes() + encoded_size_in_bytes
    }

    /// Size of a message holding all of `encoded_spans`.
    pub fn list_size_in_bytes<B: AsRef<[u8]>>(self, encoded_spans: &[B]) -> usize {
        self.list_size_of_sizes(encoded_spans.iter().map(|s| s.as_ref().len()))
    }

    /// Size of a message whose spans have the given encoded sizes.
    pub fn list_size_of_sizes<I: IntoIterator<Item = usize>>(self, sizes: I) -> usize {
        let mut count = 0usize;
        let mut total = self.empty_list_size_in_bytes();
        for size in sizes {
            total = self.combined_size_in_bytes(total, count, size);
            count += 1;
        }
        total
    }

    /// Message size after appending a span of `next_size_in_bytes` to a
    /// message of `current_size_in_bytes` that already holds `buffered` spans.
    #[inline]
    pub const fn combined_size_in_bytes(
        self,
        current_size_in_bytes: usize,
        buffered: usize,
        next_size_in_bytes: usize,
    ) -> usize {
        match self {
            Self::Json if buffered > 0 => current_size_in_bytes + next_size_in_bytes + 1,
            _ => current_size_in_bytes + next_size_in_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_envelope() {
        assert_eq!(Encoding::Json.list_size_in_bytes::<Vec<u8>>(&[]), 2);
        assert_eq!(Encoding::Json.list_size_in_bytes(&[b"a".to_vec()]), 3);
        // [a,b,c]
        assert_eq!(Encoding::Json.list_size_of_sizes([1, 1, 1]), 7);
        assert_eq!(Encoding::Json.list_size_in_bytes_single(10), 12);
    }

    #[test]
    fn test_thrift_envelope() {
        assert_eq!(Encoding::Thrift.list_size_of_sizes([]), 5);
        assert_eq!(Encoding::Thrift.list_size_of_sizes([3, 4]), 12);
        assert_eq!(Encoding::Thrift.list_size_in_bytes_single(10), 15);
    }

    #[test]
    fn test_proto3_is_concatenation() {
        assert_eq!(Encoding::Proto3.list_size_of_sizes([]), 0);
        assert_eq!(Encoding::Proto3.list_size_of_sizes([3, 4, 5]), 12);
        assert_eq!(Encoding::Proto3.list_size_in_bytes_single(10), 10);
    }

    #[test]
    fn test_incremental_matches_full_recompute() {
        let sizes = [7usize, 1, 300, 42];
        for encoding in [Encoding::Json, Encoding::Thrift, Encoding::Proto3] {
            let mut running = encoding.empty_list_size_in_bytes();
            for (i, size) in sizes.iter().enumerate() {
                running = encoding.combined_size_in_bytes(running, i, *size);
            }
            assert_eq!(running, encoding.list_size_of_sizes(sizes));
        }
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Encoding::Proto3).unwrap();
        assert_eq!(json, "\"PROTO3\"");
        let parsed: Encoding = serde_json::from_str("\"THRIFT\"").unwrap();
        assert_eq!(parsed, Encoding::Thrift);
    }
}
