//! PID-1 responsibilities that only the init process may perform: signal
//! intake, periodic zombie reaping, and the orchestrated shutdown sequence
//! (quiesce the listener, broadcast-kill every other process, sync and
//! lazily unmount, then reboot or power off). Ported directly from the
//! original C implementation's `setup_signals`/`reap_zombies`/`do_shutdown`,
//! using `nix`'s safe wrappers over the same syscalls rather than raw
//! `libc::sigaction`, matching the rest of this workspace's guest-side code.
//!
//! The two lifecycle flags these signal handlers set live in
//! `vsock_guest::lifecycle`, not here: the listener reads them to know when
//! to stop accepting, and this module's reap loop reads them to know when to
//! leave `Running` and begin shutdown.

use std::convert::Infallible;
use std::thread;
use std::time::Duration;

use nix::mount::{MntFlags, umount2};
use nix::sys::reboot::{RebootMode, reboot};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, kill, sigaction};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

use vsock_guest::{lifecycle, log_debug, log_error, log_info, log_warn};

/// Grace period between the SIGTERM broadcast and the follow-up SIGKILL
/// broadcast (spec §4.7, shutdown sequence step 3).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Interval between reap passes while in the `Running` state (spec §4.7).
const REAP_INTERVAL: Duration = Duration::from_millis(100);

/// Filesystems unmounted during shutdown, in the required reverse-mount
/// order (spec §4.7, step 7; matches the C source's `do_shutdown`).
const UNMOUNT_ORDER: &[&str] = &["/tmp", "/run", "/dev/pts", "/dev", "/sys", "/proc"];

extern "C" fn on_sigterm(_sig: libc::c_int) {
    lifecycle::request_shutdown();
}

extern "C" fn on_sigint(_sig: libc::c_int) {
    lifecycle::request_reboot();
}

/// SIGCHLD is deliberately not `SIG_IGN`: on Linux that would make the
/// kernel auto-reap children, racing `waitpid` calls elsewhere (the exec
/// supervisor's own wait, and this module's reap loop) and turning them into
/// spurious `ECHILD`. A do-nothing handler keeps normal `SIGCHLD` delivery
/// (and therefore ordinary `waitpid` semantics) while still counting as
/// "handled" rather than "ignored" for the purposes of spec §4.7's signal
/// mapping.
extern "C" fn on_sigchld(_sig: libc::c_int) {}

/// Install the process-wide signal mapping from spec §4.7: SIGTERM sets the
/// shutdown flag, SIGINT sets the reboot flag, SIGHUP/SIGUSR1/SIGUSR2 are
/// ignored, SIGCHLD gets a no-op handler. Must be called once, before any
/// other thread is started (signal disposition is process-wide).
pub fn install_signal_handlers() {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    let term = SigAction::new(SigHandler::Handler(on_sigterm), SaFlags::empty(), SigSet::empty());
    let int = SigAction::new(SigHandler::Handler(on_sigint), SaFlags::empty(), SigSet::empty());
    let chld = SigAction::new(
        SigHandler::Handler(on_sigchld),
        SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );

    // SAFETY: each handler touches only async-signal-safe operations (an
    // atomic store, or nothing at all); installed before any other thread
    // exists, so there is no concurrent sigaction() call racing these.
    unsafe {
        install(Signal::SIGHUP, &ignore);
        install(Signal::SIGUSR1, &ignore);
        install(Signal::SIGUSR2, &ignore);
        install(Signal::SIGTERM, &term);
        install(Signal::SIGINT, &int);
        install(Signal::SIGCHLD, &chld);
    }
}

/// # Safety
///
/// Caller must ensure `action`'s handler is async-signal-safe and that no
/// other thread is concurrently installing a handler for the same signal.
unsafe fn install(signal: Signal, action: &SigAction) {
    // SAFETY: delegated to this function's caller.
    if let Err(e) = unsafe { sigaction(signal, action) } {
        log_error!("sigaction({signal:?}): {e}");
    }
}

/// Reap every zombie currently available without blocking, logging each
/// child's cause of death. Returns once `waitpid` reports no more
/// terminated children (`WaitStatus::StillAlive`) or there are no children
/// left to wait for (`ECHILD`).
pub fn reap_zombies() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                log_debug!("process {pid} exited with status {code}");
            }
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                log_debug!("process {pid} killed by signal {signal:?}");
            }
            Ok(WaitStatus::StillAlive) => break,
            Ok(_) => continue,
            Err(_) => break,
        }
    }
}

/// The main-thread loop for the `Running` state: reap zombies every 100 ms
/// until either lifecycle flag is observed set.
pub fn reap_loop() {
    while !lifecycle::any_requested() {
        reap_zombies();
        thread::sleep(REAP_INTERVAL);
    }
}

/// Run the shutdown orchestration (spec §4.7, `Quiescing` through `Final`)
/// and terminate the process via the reboot primitive. Does not return.
///
/// `listener` is `None` when the listener never bound successfully (a
/// degraded-environment start, per spec §7) — shutdown proceeds regardless.
pub fn shutdown(listener: Option<&vsock_guest::Listener>, do_reboot: bool) -> ! {
    log_info!("{} initiated", if do_reboot { "reboot" } else { "shutdown" });

    // Step 1: close the listener before the first broadcast signal, so no
    // new connection can race the teardown (invariant 4).
    if let Some(listener) = listener {
        listener.close();
    }

    // Step 2-3: SIGTERM everyone but PID 1, then a grace period.
    log_info!("sending SIGTERM to all processes");
    broadcast(Signal::SIGTERM);
    thread::sleep(SHUTDOWN_GRACE);

    // Step 4-5: SIGKILL the stragglers, then reap everything left.
    log_info!("sending SIGKILL to remaining processes");
    broadcast(Signal::SIGKILL);
    reap_zombies();

    // Step 6: sync before unmounting.
    log_info!("syncing filesystems");
    sync();

    // Step 7: lazy-unmount in reverse mount order.
    log_info!("unmounting filesystems");
    for path in UNMOUNT_ORDER {
        if let Err(e) = umount2(*path, MntFlags::MNT_DETACH) {
            log_warn!("umount {path}: {e}");
        }
    }

    // Step 8: sync again after unmounting.
    sync();

    // Step 9: the reboot primitive. `reboot(2)` does not return on success;
    // a returned error is logged and the process exits directly so it never
    // falls back into the main loop (invariant 5).
    let mode = if do_reboot {
        log_info!("rebooting...");
        RebootMode::RB_AUTOBOOT
    } else {
        log_info!("powering off...");
        RebootMode::RB_POWER_OFF
    };
    match reboot(mode) {
        Ok(never) => absurd(never),
        Err(e) => log_error!("reboot: {e}"),
    }
    std::process::exit(0)
}

fn absurd(never: Infallible) -> ! {
    match never {}
}

/// `kill(-1, sig)`: every process in the caller's session except the caller
/// itself (PID 1's own handler threads are implicitly exempt, since the
/// kernel never delivers a broadcast signal to the sender).
fn broadcast(signal: Signal) {
    if let Err(e) = kill(Pid::from_raw(-1), signal) {
        log_warn!("kill(-1, {signal:?}): {e}");
    }
}

/// Flush pending filesystem writes.
fn sync() {
    // SAFETY: sync(2) takes no arguments and has no preconditions.
    unsafe { libc::sync() };
}
