//! Per-connection request handling: bounded read, parse, dispatch, write,
//! close. One call to `handle` services exactly one request/response pair
//! on an already-accepted stream, matching the original C source's
//! `handle_connection` — the server never pipelines.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

use vsock_proto::{Request, Value};

use crate::error::OpError;
use crate::{exec, fileops};

const MAX_REQUEST: usize = 128 * 1024 * 1024;
const READ_CHUNK: usize = 64 * 1024;

/// Service one connection to completion. Never panics outward: a panic
/// anywhere in the dispatch path is caught so one bad request cannot take
/// down the listener or any other in-flight handler.
pub fn handle(mut stream: UnixStream) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| serve(&mut stream)));
    if outcome.is_err() {
        crate::log_error!("connection handler panicked");
    }
}

fn serve(stream: &mut UnixStream) {
    let response = match read_request(stream) {
        Ok(bytes) => match vsock_proto::parse(&bytes) {
            Ok(req) => dispatch(&req),
            Err(e) => vsock_proto::format_err(&e.to_string()),
        },
        Err(oversized) => oversized,
    };
    write_response(stream, &response);
}

/// Reads up to and including the first `\n`, or until the peer closes, or
/// until `MAX_REQUEST` bytes have accumulated with no terminator — in which
/// case the request is rejected rather than read further.
fn read_request(stream: &mut UnixStream) -> Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; READ_CHUNK];
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            buf.truncate(pos + 1);
            return Ok(buf);
        }
        if buf.len() >= MAX_REQUEST {
            return Err(vsock_proto::format_err("request too large"));
        }
        match stream.read(&mut tmp) {
            Ok(0) => return Ok(buf),
            Ok(n) => {
                let room = MAX_REQUEST - buf.len();
                let take = n.min(room);
                buf.extend_from_slice(tmp.get(..take).unwrap_or(&tmp[..n]));
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => return Ok(buf),
        }
    }
}

fn write_response(stream: &mut UnixStream, response: &str) {
    let bytes = response.as_bytes();
    let mut written = 0;
    while written < bytes.len() {
        match stream.write(bytes.get(written..).unwrap_or(b"")) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

fn dispatch(req: &Request) -> String {
    match req.operation.as_str() {
        "ping" => vsock_proto::format_ok(&[("pong", Value::Bool(true))]),
        "file_read" => with_path(req, |path| {
            fileops::read_file(path).map(|f| {
                vsock_proto::format_ok(&[
                    ("content", Value::Str(f.content_b64)),
                    ("size", Value::Int(f.size as i64)),
                ])
            })
        }),
        "file_write" => dispatch_file_write(req),
        "file_stat" => with_path(req, |path| {
            fileops::stat_file(path).map(|s| {
                vsock_proto::format_ok(&[
                    ("path", Value::Str(s.path)),
                    ("size", Value::Int(s.size as i64)),
                    ("mode", Value::Str(s.mode)),
                    ("mod_time", Value::Str(s.mod_time)),
                    ("is_dir", Value::Bool(s.is_dir)),
                ])
            })
        }),
        "file_delete" => {
            with_path(req, |path| fileops::delete_file(path).map(|()| vsock_proto::format_ok(&[])))
        }
        "exec" => dispatch_exec(req),
        _ => vsock_proto::format_err("unknown operation"),
    }
}

fn with_path(req: &Request, f: impl FnOnce(&str) -> Result<String, OpError>) -> String {
    match req.field_str("path") {
        Some(path) => f(path).unwrap_or_else(|e| vsock_proto::format_err(&e.to_string())),
        None => vsock_proto::format_err("missing path"),
    }
}

fn dispatch_file_write(req: &Request) -> String {
    let path = req.field_str("path");
    let content = req.field_str("content");
    match (path, content) {
        (Some(path), Some(content)) => match fileops::write_file(path, content) {
            Ok(n) => vsock_proto::format_ok(&[("bytes_written", Value::Int(n as i64))]),
            Err(e) => vsock_proto::format_err(&e.to_string()),
        },
        (None, _) => vsock_proto::format_err("missing path"),
        (_, None) => vsock_proto::format_err("missing content"),
    }
}

fn dispatch_exec(req: &Request) -> String {
    let cmd = match req.field_cmd() {
        Some(Ok(items)) if items.is_empty() => return vsock_proto::format_err("empty command"),
        Some(Ok(items)) => items,
        Some(Err(())) => return vsock_proto::format_err("cmd must be an array"),
        None => return vsock_proto::format_err("missing cmd"),
    };
    if cmd.len() > 255 {
        return vsock_proto::format_err("too many arguments");
    }
    let argv: Vec<String> = cmd.to_vec();
    let timeout = req.field_i64("timeout");

    match exec::run(&argv, timeout) {
        // Exec never surfaces as a wire error once the child has been
        // forked: a non-zero exit, a timeout kill, or an exec-failure
        // fallback all come back as `success: true`.
        Ok(outcome) => vsock_proto::format_ok(&[
            ("exit_code", Value::Int(i64::from(outcome.exit_code))),
            ("stdout", Value::Str(lossy(&outcome.stdout))),
            ("stderr", Value::Str(lossy(&outcome.stderr))),
        ]),
        Err(e) => vsock_proto::format_err(&e.to_string()),
    }
}

/// Captured process output is not valid UTF-8 in general; invalid
/// sequences are replaced rather than rejected, since exec never fails on
/// the wire once the child has forked. `format_ok` applies `escape_text` to
/// every `Value::Str` when serializing, so this is the only conversion
/// needed here.
fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
