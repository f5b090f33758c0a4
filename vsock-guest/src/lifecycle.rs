//! The two process-wide lifecycle flags: `shutdown_requested` and
//! `reboot_requested`. Set exactly from signal-handler context in
//! `guest-init`'s PID-1 loop; read here so the listener (C6) knows when to
//! stop accepting, and read again by `guest-init`'s reaper loop to know when
//! to leave `Running` and start the shutdown orchestration.
//!
//! Both are set-once: once true, a flag is never cleared, and a second
//! signal of the same kind is a harmless no-op store. "First set wins" is a
//! property of which flag gets read when the reaper loop first notices one
//! is set, not of any compare-and-swap here — a signal handler has nothing
//! richer than an atomic store available to it.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static REBOOT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Set by the SIGTERM handler. Async-signal-safe: a single atomic store.
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::Release);
}

/// Set by the SIGINT handler.
pub fn request_reboot() {
    REBOOT_REQUESTED.store(true, Ordering::Release);
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Acquire)
}

pub fn reboot_requested() -> bool {
    REBOOT_REQUESTED.load(Ordering::Acquire)
}

/// Either flag set: the signal that leaves `Running` for `Quiescing`.
pub fn any_requested() -> bool {
    shutdown_requested() || reboot_requested()
}
