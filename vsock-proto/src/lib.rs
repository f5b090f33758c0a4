//! Wire format for the guest control-plane protocol: a line-oriented,
//! JSON-shaped request/response envelope carrying opaque bytes as base64.
//!
//! The envelope grammar is hand-rolled rather than pulling in `serde_json`,
//! matching this workspace's existing wire-format crate, which hand-rolls
//! its own binary framing for the same reason: a crate this small and this
//! close to PID 1 should not carry a serialization framework for a handful
//! of fixed shapes. The base64 byte codec is the one exception: that's a
//! concern the workspace already depends on the `base64` crate for
//! elsewhere, so this crate does too rather than hand-rolling it.

pub mod codec;
pub mod envelope;

pub use codec::{decode_bytes, encode_bytes, escape_text, unescape_text};
pub use envelope::{Request, Value, format_err, format_ok, parse};

/// Errors produced while parsing an envelope or decoding an opaque-bytes
/// field. Mirrors the existing `ProtocolError` pattern in this workspace: a
/// plain enum with a hand-written `Display`, no `thiserror`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoError {
    /// The request or response text did not parse as a well-formed
    /// envelope (bad braces, unterminated string, wrong field type, missing
    /// `operation`).
    MalformedEnvelope(&'static str),
    /// A string field that was supposed to carry base64-encoded bytes did
    /// not decode.
    MalformedEncoding(&'static str),
}

impl std::fmt::Display for ProtoError {
    /// The bare detail string, not a `"malformed envelope: "`/`"malformed
    /// encoding: "`-prefixed form: this is what `connection::serve` puts
    /// directly on the wire via `format_err`, and §7's error taxonomy (and
    /// the C source it was ported from) require the exact strings, e.g.
    /// `"missing operation"` rather than `"malformed envelope: missing
    /// operation"`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtoError::MalformedEnvelope(detail) => write!(f, "{detail}"),
            ProtoError::MalformedEncoding(detail) => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for ProtoError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_bare_detail_not_prefixed() {
        assert_eq!(
            ProtoError::MalformedEnvelope("missing operation").to_string(),
            "missing operation"
        );
        assert_eq!(
            ProtoError::MalformedEncoding("base64 decode failed").to_string(),
            "base64 decode failed"
        );
    }
}
