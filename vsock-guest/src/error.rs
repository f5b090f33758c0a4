//! Error taxonomy for file and exec operations, surfaced to the wire as an
//! `error` string on the response envelope. Mirrors the `SandboxError`
//! pattern used elsewhere in this workspace: a `thiserror` enum with one
//! variant per failure class, converted to text at the edge.

/// An error raised while servicing a single request.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    /// A filesystem syscall failed. `op` is the syscall name (`open`,
    /// `fstat`, `read`, `write`, `stat`, `unlink`, `rmdir`); `detail` is the
    /// OS-provided error text, matching the C source's `strerror`-based
    /// messages (e.g. `open: No such file or directory`).
    #[error("{op}: {detail}")]
    Io { op: &'static str, detail: String },

    /// A size ceiling was exceeded: an oversized file read, or an oversized
    /// request envelope.
    #[error("{0}")]
    ResourceExhausted(&'static str),

    /// The `operation` field named something this server does not
    /// implement.
    #[error("unknown operation")]
    UnknownOperation,

    /// A required field was absent or the wrong shape.
    #[error("{0}")]
    BadRequest(String),
}

impl OpError {
    pub fn io(op: &'static str, source: &std::io::Error) -> Self {
        OpError::Io {
            op,
            detail: strerror_only(source),
        }
    }
}

/// `std::io::Error`'s `Display` appends `" (os error N)"` after the libc
/// message; the wire contract (and the C source it was ported from) wants
/// the bare `strerror` text, e.g. `No such file or directory`.
fn strerror_only(e: &std::io::Error) -> String {
    let full = e.to_string();
    match full.rfind(" (os error ") {
        Some(idx) => full.get(..idx).unwrap_or(&full).to_string(),
        None => full,
    }
}
