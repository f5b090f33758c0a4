//! PID 1 for the guest VM.
//!
//! Brings up the host-socket request server (`vsock_guest`) and owns
//! everything only PID 1 may do: signal intake, periodic zombie reaping, and
//! the orchestrated shutdown sequence that tears down user processes and
//! mounts before issuing the final reboot or power-off. One-shot guest
//! bootstrap (mounting pseudo-filesystems, device nodes, loopback, hostname)
//! is an external collaborator and is assumed to have already run by the
//! time this binary starts.

mod pid1;

use std::sync::Arc;
use std::thread;

use vsock_guest::{Listener, lifecycle, listener, log, log_error, log_info};

fn main() {
    if std::process::id() != 1 {
        eprintln!("init: must be run as PID 1");
        std::process::exit(1);
    }

    log::set_debug(parse_debug_flag());

    log_info!("init starting");
    pid1::install_signal_handlers();

    // A bind failure is logged but must not stop the rest of PID 1's
    // responsibilities from starting: the reaper loop and shutdown path are
    // useful even in a degraded environment with no working control plane.
    let listener = match Listener::bind_vsock(listener::PORT) {
        Ok(l) => {
            log_info!("listening on vsock port {}", listener::PORT);
            Some(Arc::new(l))
        }
        Err(e) => {
            log_error!("bind vsock port {}: {e}", listener::PORT);
            None
        }
    };

    if let Some(listener) = listener.clone() {
        thread::spawn(move || listener.serve());
    }

    log_info!("init ready");
    pid1::reap_loop();

    pid1::shutdown(listener.as_deref(), lifecycle::reboot_requested());
}

/// Hand-rolled `-d`/`--debug` parsing: this binary is the first process the
/// kernel starts and has no reason to pull in a CLI-parsing crate for one
/// optional flag (unlike the host-side tooling elsewhere in this workspace,
/// which does use one).
fn parse_debug_flag() -> bool {
    std::env::args().skip(1).any(|arg| arg == "-d" || arg == "--debug")
}
