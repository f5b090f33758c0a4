//! The host-socket listener (C6): binds the fixed, well-known port on the
//! vsock family (or, for tests and non-Linux development, a Unix-domain
//! socket standing in for it), accepts connections, and spawns a detached
//! handler thread per connection.
//!
//! The listening socket is a bare `RawFd`, not an `OwnedFd`: ownership of
//! this fd is inherently shared between the accept loop (which blocks
//! inside `accept()` on it) and the PID-1 shutdown sequence (which closes
//! it from a different thread to unblock that `accept()` and guarantee no
//! new connection can race the broadcast kill — invariant 4). That is the
//! same shape as the C source this crate was ported from, where `vsock_fd`
//! is a single global closed once by `do_shutdown`. `Listener::close` must
//! be called exactly once; nothing here enforces that beyond the single
//! call site in `guest-init`'s shutdown orchestration.

use std::io;
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::{connection, lifecycle};

/// The fixed host-socket port this server listens on (spec §4.6).
pub const PORT: u32 = 52;
const BACKLOG: i32 = 16;

/// `VMADDR_CID_ANY` from `linux/vm_sockets.h`. Defined locally rather than
/// taken from `libc` since not every `libc` version exports vsock
/// constants beyond the handful `vsock-guest`'s outbound connect path
/// already used.
const VMADDR_CID_ANY: u32 = 0xFFFF_FFFF;

pub struct Listener {
    fd: RawFd,
}

impl Listener {
    /// Bind the vsock host-socket on `port`, wildcard (any) local CID.
    #[cfg(target_os = "linux")]
    pub fn bind_vsock(port: u32) -> io::Result<Self> {
        // SAFETY: a plain socket(2) call; the returned fd is checked below.
        let fd = unsafe { libc::socket(libc::AF_VSOCK, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let addr = libc::sockaddr_vm {
            svm_family: libc::AF_VSOCK as u16,
            svm_reserved1: 0,
            svm_port: port,
            svm_cid: VMADDR_CID_ANY,
            svm_zero: [0; 4],
        };

        // SAFETY: fd is a freshly created, valid socket; addr is fully
        // initialized and sized correctly for sockaddr_vm.
        let ret = unsafe {
            libc::bind(
                fd,
                std::ptr::from_ref(&addr).cast::<libc::sockaddr>(),
                std::mem::size_of::<libc::sockaddr_vm>() as u32,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is open and we are abandoning it on this error path.
            unsafe { libc::close(fd) };
            return Err(err);
        }

        // SAFETY: fd is bound above.
        let ret = unsafe { libc::listen(fd, BACKLOG) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is open and we are abandoning it on this error path.
            unsafe { libc::close(fd) };
            return Err(err);
        }

        Ok(Self { fd })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn bind_vsock(_port: u32) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "vsock is only supported on Linux",
        ))
    }

    /// Bind a Unix-domain socket at `path`, used in place of `AF_VSOCK` for
    /// integration tests and local development builds (`AF_VSOCK` only
    /// exists inside a guest with a configured vsock device).
    pub fn bind_unix(path: &Path) -> io::Result<Self> {
        let _ = std::fs::remove_file(path);
        let listener = std::os::unix::net::UnixListener::bind(path)?;
        listener.set_nonblocking(false)?;
        use std::os::fd::IntoRawFd;
        Ok(Self {
            fd: listener.into_raw_fd(),
        })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Close the listening socket. Any thread blocked in `accept()` on this
    /// fd returns an error immediately, which `serve` (below) treats as a
    /// signal to stop. Must be called exactly once, after which `self` must
    /// not be used again.
    pub fn close(&self) {
        // SAFETY: fd was opened by bind_vsock/bind_unix and is not yet
        // closed (caller's obligation: close is called exactly once).
        unsafe {
            libc::close(self.fd);
        }
    }

    /// Accept connections until a lifecycle flag is observed set, spawning
    /// a detached handler thread per connection. Returns when the listener
    /// has stopped accepting — either because a flag was set before the
    /// next `accept()`, or because `close` was called on another thread
    /// and unblocked an in-flight `accept()`.
    pub fn serve(&self) {
        while !lifecycle::any_requested() {
            // SAFETY: self.fd is a bound, listening socket for the
            // lifetime of this call (or until `close` is called
            // elsewhere); accept() blocks until a connection, an error,
            // or that close.
            let client =
                unsafe { libc::accept(self.fd, std::ptr::null_mut(), std::ptr::null_mut()) };
            if client < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                // EBADF/ENOTSOCK mean `close` tore down this fd from another
                // thread (the shutdown path, or a test driving it directly):
                // stop promptly rather than spin re-calling accept() on a
                // dead descriptor forever.
                if matches!(err.raw_os_error(), Some(libc::EBADF) | Some(libc::ENOTSOCK)) {
                    return;
                }
                crate::log_error!("accept: {err}");
                continue;
            }
            std::thread::spawn(move || {
                // SAFETY: client was just returned by accept() above and is
                // not used anywhere else; ownership transfers fully to this
                // handler thread (invariant 1: exclusive fd ownership from
                // accept through close).
                let stream = unsafe { UnixStream::from_raw_fd(client) };
                connection::handle(stream);
            });
        }
    }
}
