//! End-to-end protocol tests: a `Listener` bound to a Unix-domain socket
//! (standing in for `AF_VSOCK`, which only exists inside a guest) on one
//! side, a plain client connection on the other, exercising the same
//! request/response envelopes a real host client would send.

#![allow(clippy::unwrap_used)]

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use vsock_guest::Listener;

fn start_server(name: &str) -> (Arc<Listener>, std::path::PathBuf, std::thread::JoinHandle<()>) {
    let path = std::env::temp_dir().join(format!(
        "vsock-guest-integration-{}-{name}",
        std::process::id()
    ));
    let listener = Arc::new(Listener::bind_unix(&path).unwrap());
    let for_thread = Arc::clone(&listener);
    let handle = std::thread::spawn(move || for_thread.serve());
    std::thread::sleep(Duration::from_millis(20));
    (listener, path, handle)
}

fn roundtrip(path: &std::path::Path, request: &str) -> String {
    let mut stream = UnixStream::connect(path).unwrap();
    stream.write_all(request.as_bytes()).unwrap();
    stream.shutdown(std::net::Shutdown::Write).unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

#[test]
fn ping_returns_pong() {
    let (listener, path, handle) = start_server("ping");
    let response = roundtrip(&path, "{\"operation\":\"ping\"}\n");
    assert_eq!(response, "{\"success\":true,\"data\":{\"pong\":true}}\n");
    listener.close();
    handle.join().unwrap();
}

#[test]
fn two_consecutive_pings_both_succeed() {
    let (listener, path, handle) = start_server("ping-twice");
    for _ in 0..2 {
        let response = roundtrip(&path, "{\"operation\":\"ping\"}\n");
        assert_eq!(response, "{\"success\":true,\"data\":{\"pong\":true}}\n");
    }
    listener.close();
    handle.join().unwrap();
}

#[test]
fn file_write_then_read_roundtrips() {
    let (listener, path, handle) = start_server("file-roundtrip");
    let target = std::env::temp_dir().join(format!("vsock-guest-it-file-{}", std::process::id()));
    let target_str = target.to_str().unwrap();

    let write_req = format!(
        "{{\"operation\":\"file_write\",\"path\":\"{target_str}\",\"content\":\"aGVsbG8=\"}}\n"
    );
    let write_resp = roundtrip(&path, &write_req);
    assert_eq!(write_resp, "{\"success\":true,\"data\":{\"bytes_written\":5}}\n");

    let read_req = format!("{{\"operation\":\"file_read\",\"path\":\"{target_str}\"}}\n");
    let read_resp = roundtrip(&path, &read_req);
    assert_eq!(
        read_resp,
        "{\"success\":true,\"data\":{\"content\":\"aGVsbG8=\",\"size\":5}}\n"
    );

    let delete_req = format!("{{\"operation\":\"file_delete\",\"path\":\"{target_str}\"}}\n");
    let delete_resp = roundtrip(&path, &delete_req);
    assert_eq!(delete_resp, "{\"success\":true,\"data\":{}}\n");

    let stat_req = format!("{{\"operation\":\"file_stat\",\"path\":\"{target_str}\"}}\n");
    let stat_resp = roundtrip(&path, &stat_req);
    assert!(stat_resp.contains("No such file or directory"));

    listener.close();
    handle.join().unwrap();
    let _ = std::fs::remove_file(&target);
}

#[test]
fn stat_missing_path_reports_io_error() {
    let (listener, path, handle) = start_server("stat-missing");
    let response = roundtrip(
        &path,
        "{\"operation\":\"file_stat\",\"path\":\"/nonexistent-for-sure\"}\n",
    );
    assert_eq!(
        response,
        "{\"success\":false,\"error\":\"stat: No such file or directory\"}\n"
    );
    listener.close();
    handle.join().unwrap();
}

#[test]
fn exec_echo_captures_stdout() {
    let (listener, path, handle) = start_server("exec-echo");
    let response = roundtrip(
        &path,
        "{\"operation\":\"exec\",\"cmd\":[\"/bin/echo\",\"hi\"]}\n",
    );
    assert_eq!(
        response,
        "{\"success\":true,\"data\":{\"exit_code\":0,\"stdout\":\"hi\\n\",\"stderr\":\"\"}}\n"
    );
    listener.close();
    handle.join().unwrap();
}

#[test]
fn exec_timeout_reports_minus_one_exit() {
    let (listener, path, handle) = start_server("exec-timeout");
    let start = std::time::Instant::now();
    let response = roundtrip(
        &path,
        "{\"operation\":\"exec\",\"cmd\":[\"/bin/sleep\",\"10\"],\"timeout\":100}\n",
    );
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(
        response,
        "{\"success\":true,\"data\":{\"exit_code\":-1,\"stdout\":\"\",\"stderr\":\"\"}}\n"
    );
    listener.close();
    handle.join().unwrap();
}

#[test]
fn unknown_operation_is_rejected() {
    let (listener, path, handle) = start_server("unknown-op");
    let response = roundtrip(&path, "{\"operation\":\"frobnicate\"}\n");
    assert_eq!(response, "{\"success\":false,\"error\":\"unknown operation\"}\n");
    listener.close();
    handle.join().unwrap();
}

#[test]
fn missing_required_field_is_rejected() {
    let (listener, path, handle) = start_server("missing-field");
    let response = roundtrip(&path, "{\"operation\":\"file_read\"}\n");
    assert_eq!(response, "{\"success\":false,\"error\":\"missing path\"}\n");
    listener.close();
    handle.join().unwrap();
}

#[test]
fn malformed_envelope_is_rejected() {
    let (listener, path, handle) = start_server("malformed");
    let response = roundtrip(&path, "not json at all\n");
    assert_eq!(
        response,
        "{\"success\":false,\"error\":\"malformed envelope\"}\n"
    );
    listener.close();
    handle.join().unwrap();
}

/// §7's error taxonomy and the C source it was ported from both emit the
/// bare detail string (`"missing operation"`), not a
/// `"malformed envelope: "`-prefixed form.
#[test]
fn missing_operation_reports_bare_message_on_the_wire() {
    let (listener, path, handle) = start_server("missing-operation");
    let response = roundtrip(&path, "{\"path\":\"/x\"}\n");
    assert_eq!(
        response,
        "{\"success\":false,\"error\":\"missing operation\"}\n"
    );
    listener.close();
    handle.join().unwrap();
}

#[test]
fn concurrent_requests_do_not_interleave() {
    let (listener, path, handle) = start_server("concurrent");
    let threads: Vec<_> = (0..8)
        .map(|i| {
            let path = path.clone();
            std::thread::spawn(move || {
                let response = roundtrip(
                    &path,
                    &format!("{{\"operation\":\"exec\",\"cmd\":[\"/bin/echo\",\"worker-{i}\"]}}\n"),
                );
                assert_eq!(
                    response,
                    format!(
                        "{{\"success\":true,\"data\":{{\"exit_code\":0,\"stdout\":\"worker-{i}\\n\",\"stderr\":\"\"}}}}\n"
                    )
                );
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    listener.close();
    handle.join().unwrap();
}
