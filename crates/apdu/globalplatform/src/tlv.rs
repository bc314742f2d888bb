//! Minimal TLV walking for card responses
//!
//! Everything this layer parses (FCI templates, status records) uses
//! single-byte tags and short-form lengths, so a full BER parser is not
//! needed.

/// Offset of the value of `tag` when `tag` sits exactly at `offset`.
///
/// Returns `None` when the tag does not match or the encoded length runs
/// past the end of the buffer.
pub fn skip_tag(buf: &[u8], offset: usize, tag: u8) -> Option<usize> {
    if offset + 2 > buf.len() || buf[offset] != tag {
        return None;
    }
    let len = buf[offset + 1] as usize;
    if offset + 2 + len > buf.len() {
        return None;
    }
    Some(offset + 2)
}

/// Walk sibling TLV entries from `offset` until `tag` is found.
///
/// Returns the offset of the value of the first matching entry.
pub fn find_tag(buf: &[u8], mut offset: usize, tag: u8) -> Option<usize> {
    while offset + 2 <= buf.len() {
        let current = buf[offset];
        let len = buf[offset + 1] as usize;
        if offset + 2 + len > buf.len() {
            return None;
        }
        if current == tag {
            return Some(offset + 2);
        }
        offset += 2 + len;
    }
    None
}

/// The value slice of the first `tag` sibling from `offset`.
pub fn find_value(buf: &[u8], offset: usize, tag: u8) -> Option<&[u8]> {
    let value_offset = find_tag(buf, offset, tag)?;
    let len = buf[value_offset - 1] as usize;
    Some(&buf[value_offset..value_offset + len])
}
