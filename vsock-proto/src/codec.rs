//! Binary-safe text codec for opaque byte payloads (file contents, process
//! output) carried inside an envelope, plus the escaping rules for string
//! fields embedded directly in the envelope text.
//!
//! The byte codec defers to the `base64` crate (standard alphabet, `=`
//! padding, RFC 4648 §4) rather than hand-rolling the alphabet tables this
//! workspace's other guest-side crates hand-roll their own formats for:
//! base64 is exactly the concern the corpus already reaches for a crate to
//! cover.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::ProtoError;

/// Encode raw bytes into the canonical base64 text form.
pub fn encode_bytes(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode a base64 text form back into raw bytes.
///
/// Rejects inputs whose length is not a multiple of 4, inputs with padding
/// in any position but the last two characters, and inputs containing
/// characters outside the alphabet.
pub fn decode_bytes(text: &str) -> Result<Vec<u8>, ProtoError> {
    STANDARD
        .decode(text)
        .map_err(|_| ProtoError::MalformedEncoding("base64 decode failed"))
}

/// Escape a string for embedding as a quoted value inside an envelope.
///
/// Escapes `"`, `\`, newline, carriage return, tab, and any other control
/// byte below 0x20 (as `\u{XXXX}`-free `\xNN`-style is not used here — this
/// wire format has no unicode-escape production, so other control bytes are
/// dropped to their closest named escape or left as literal bytes above the
/// control range).
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Unescape a quoted string body previously produced by (or tolerated by)
/// `escape_text`. Unknown escape sequences pass the following character
/// through literally, matching the envelope parser's tolerant behavior.
pub fn unescape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
