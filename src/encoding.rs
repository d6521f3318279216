//! Character encoding resolution for incoming byte streams.
//!
//! Priority order: explicit transport-layer charset (HTTP header), then an
//! in-document `<meta charset>` / `http-equiv` declaration found in the
//! first 1024 bytes, then a caller-supplied default, then windows-1252.

use encoding_rs::{Encoding, WINDOWS_1252};

const SNIFF_LIMIT: usize = 1024;

pub(crate) fn resolve_encoding(
    transport_charset: Option<&str>,
    bytes: &[u8],
    default_charset: Option<&'static Encoding>,
) -> &'static Encoding {
    if let Some(label) = transport_charset {
        if let Some(encoding) = Encoding::for_label(label.trim().as_bytes()) {
            return encoding;
        }
        log::debug!("unknown transport charset label: {label}");
    }
    if let Some(encoding) = sniff_meta_charset(bytes) {
        return encoding;
    }
    default_charset.unwrap_or(WINDOWS_1252)
}

pub(crate) fn decode(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        log::debug!("lossy decode of document bytes as {}", encoding.name());
    }
    text.into_owned()
}

/// Scans the first 1024 bytes for `<meta ... charset=...>` declarations,
/// including the `http-equiv="Content-Type"` form where the charset hides
/// inside the `content` attribute value.
pub(crate) fn sniff_meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let window = &bytes[..bytes.len().min(SNIFF_LIMIT)];
    let mut i = 0usize;
    while i < window.len() {
        if window[i] != b'<' {
            i += 1;
            continue;
        }
        if !tag_name_at(window, i + 1, b"meta") {
            i += 1;
            continue;
        }
        let end = window[i..]
            .iter()
            .position(|&b| b == b'>')
            .map(|off| i + off)
            .unwrap_or(window.len());
        let tag = &window[i..end];
        if let Some(label) = charset_in_meta_tag(tag) {
            if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
                return Some(encoding);
            }
        }
        i = end + 1;
    }
    None
}

fn tag_name_at(bytes: &[u8], at: usize, name: &[u8]) -> bool {
    if at + name.len() > bytes.len() {
        return false;
    }
    if !bytes[at..at + name.len()].eq_ignore_ascii_case(name) {
        return false;
    }
    match bytes.get(at + name.len()) {
        None => true,
        Some(b) => b.is_ascii_whitespace() || *b == b'>' || *b == b'/',
    }
}

fn charset_in_meta_tag(tag: &[u8]) -> Option<String> {
    let lower: Vec<u8> = tag.iter().map(|b| b.to_ascii_lowercase()).collect();
    let at = find_subslice(&lower, 0, b"charset")?;
    let mut i = at + b"charset".len();
    while i < tag.len() && tag[i].is_ascii_whitespace() {
        i += 1;
    }
    if tag.get(i) != Some(&b'=') {
        return None;
    }
    i += 1;
    while i < tag.len() && tag[i].is_ascii_whitespace() {
        i += 1;
    }
    let quote = match tag.get(i) {
        Some(&b @ (b'"' | b'\'')) => {
            i += 1;
            Some(b)
        }
        _ => None,
    };
    let start = i;
    while i < tag.len() {
        let b = tag[i];
        let done = match quote {
            Some(q) => b == q,
            None => {
                b.is_ascii_whitespace()
                    || b == b';'
                    || b == b'>'
                    || b == b'/'
                    || b == b'"'
                    || b == b'\''
            }
        };
        if done {
            break;
        }
        i += 1;
    }
    if start == i {
        return None;
    }
    Some(String::from_utf8_lossy(&tag[start..i]).into_owned())
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || from > bytes.len() {
        return None;
    }
    let mut i = from;
    while i + needle.len() <= bytes.len() {
        if &bytes[i..i + needle.len()] == needle {
            return Some(i);
        }
        i += 1;
    }
    None
}
