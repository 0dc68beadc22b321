//! IP literal parsing for endpoint encoding.
//!
//! Endpoints carry their address as text; the wire form wants raw bytes in
//! either the ipv4 or the ipv6 field. These parsers run twice per endpoint
//! (once to size, once to write), so they avoid allocation.

/// Raw address bytes, tagged with the field they belong in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IpBytes {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl IpBytes {
    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Self::V4(b) => b,
            Self::V6(b) => b,
        }
    }
}

/// Parses an address literal. Text containing a dot is treated as IPv4,
/// including the IPv4-mapped IPv6 form `::ffff:a.b.c.d`.
pub(crate) fn parse_ip(text: &str) -> Option<IpBytes> {
    if text.is_empty() {
        return None;
    }
    if text.contains('.') {
        let v4 = match text.rfind(':') {
            Some(colon) => {
                let prefix = &text[..=colon];
                if !prefix.eq_ignore_ascii_case("::ffff:") {
                    return None;
                }
                &text[colon + 1..]
            }
            None => text,
        };
        return parse_ipv4(v4).map(IpBytes::V4);
    }
    parse_ipv6(text).map(IpBytes::V6)
}

/// Parses dotted-decimal IPv4 in a single pass over the bytes.
pub(crate) fn parse_ipv4(text: &str) -> Option<[u8; 4]> {
    let mut out = [0u8; 4];
    let mut octet = 0usize;
    let mut value = 0u16;
    let mut digits = 0u8;

    for b in text.bytes() {
        match b {
            b'0'..=b'9' => {
                if digits == 3 {
                    return None;
                }
                value = value * 10 + u16::from(b - b'0');
                if value > 255 {
                    return None;
                }
                digits += 1;
            }
            b'.' => {
                if digits == 0 || octet == 3 {
                    return None;
                }
                out[octet] = value as u8;
                octet += 1;
                value = 0;
                digits = 0;
            }
            _ => return None,
        }
    }

    if digits == 0 || octet != 3 {
        return None;
    }
    out[3] = value as u8;
    Some(out)
}

/// Parses IPv6 text with at most one `::` run of zero groups.
///
/// After expansion there must be exactly eight 16-bit groups.
pub(crate) fn parse_ipv6(text: &str) -> Option<[u8; 16]> {
    let mut groups = [0u16; 8];

    match text.find("::") {
        None => {
            if parse_groups(text, &mut groups)? != 8 {
                return None;
            }
        }
        Some(gap) => {
            let head = &text[..gap];
            let tail = &text[gap + 2..];
            if tail.contains("::") {
                return None;
            }
            let head_count = parse_groups(head, &mut groups)?;
            let mut tail_groups = [0u16; 8];
            let tail_count = parse_groups(tail, &mut tail_groups)?;
            // "::" stands for at least one zero group
            if head_count + tail_count > 7 {
                return None;
            }
            groups[8 - tail_count..].copy_from_slice(&tail_groups[..tail_count]);
        }
    }

    let mut out = [0u8; 16];
    for (i, group) in groups.iter().enumerate() {
        out[i * 2..i * 2 + 2].copy_from_slice(&group.to_be_bytes());
    }
    Some(out)
}

/// Parses colon-separated hex groups into `out`, returning how many were read.
fn parse_groups(text: &str, out: &mut [u16; 8]) -> Option<usize> {
    if text.is_empty() {
        return Some(0);
    }
    let mut count = 0;
    for part in text.split(':') {
        if count == 8 || part.is_empty() || part.len() > 4 {
            return None;
        }
        let mut group = 0u16;
        for b in part.bytes() {
            let nibble = (b as char).to_digit(16)?;
            group = (group << 4) | nibble as u16;
        }
        out[count] = group;
        count += 1;
    }
    Some(count)
}
