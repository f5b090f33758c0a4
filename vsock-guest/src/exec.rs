//! Child-process supervision: fork, bounded-memory capture of stdout/stderr,
//! wall-clock timeout, exit status collection. Ported directly from the
//! original C implementation's `handle_exec`, using `nix`'s safe wrappers
//! over the same syscalls (`pipe`, `fork`, `execve`, `waitpid`) rather than
//! `std::process::Command`, since the timeout/kill/drain loop here needs
//! the raw non-blocking pipe handles the standard library's `Command`
//! does not expose.

use std::convert::Infallible;
use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::{Duration, Instant};

use nix::fcntl::{FcntlArg, OFlag, open};
use nix::sys::signal::{Signal, kill};
use nix::sys::stat::Mode;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, dup2, execve, fork, pipe, read};

use crate::error::OpError;

/// Output streams are each capped at 128 MiB; the pair is this crate's
/// entire per-exec memory ceiling.
const MAX_OUTPUT: usize = 128 * 1024 * 1024;
const DEFAULT_TIMEOUT_MS: i64 = 30_000;
const DRAIN_CHUNK: usize = 64 * 1024;

pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run `argv` to completion or timeout. `argv` must be non-empty; the
/// caller (the connection handler) is responsible for rejecting an empty
/// `cmd` before calling this.
pub fn run(argv: &[String], timeout_ms: Option<i64>) -> Result<ExecOutcome, OpError> {
    let timeout_ms = match timeout_ms {
        Some(t) if t >= 0 => t,
        _ => DEFAULT_TIMEOUT_MS,
    };

    let (stdout_r, stdout_w) =
        pipe().map_err(|e| OpError::io("pipe", &std::io::Error::from(e)))?;
    let (stderr_r, stderr_w) =
        pipe().map_err(|e| OpError::io("pipe", &std::io::Error::from(e)))?;

    // SAFETY: between fork() and execve()/_exit() the child touches only
    // dup2, close (via drop of already-owned fds) and execve — all
    // async-signal-safe. No allocation or locking happens on that path.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => run_child(argv, stdout_r, stdout_w, stderr_r, stderr_w),
        Ok(ForkResult::Parent { child }) => {
            drop(stdout_w);
            drop(stderr_w);
            collect(child, stdout_r, stderr_r, timeout_ms)
        }
        Err(e) => Err(OpError::io("fork", &std::io::Error::from(e))),
    }
}

fn run_child(
    argv: &[String],
    stdout_r: OwnedFd,
    stdout_w: OwnedFd,
    stderr_r: OwnedFd,
    stderr_w: OwnedFd,
) -> ! {
    drop(stdout_r);
    drop(stderr_r);
    let _ = dup2(stdout_w.as_raw_fd(), libc::STDOUT_FILENO);
    let _ = dup2(stderr_w.as_raw_fd(), libc::STDERR_FILENO);
    drop(stdout_w);
    drop(stderr_w);

    if let Ok(null_fd) = open("/dev/null", OFlag::O_RDONLY, Mode::empty()) {
        let _ = dup2(null_fd.as_raw_fd(), libc::STDIN_FILENO);
    }

    let envp = fixed_envp();
    if let Some(c_argv) = to_cstrings(argv) {
        let _ = try_exec(&c_argv, &envp);
    }

    // ENOENT/ENOEXEC (or a CString conversion failure) fall back to a shell
    // invocation of the joined argv. This is deliberately tolerant of shell
    // metacharacters in separate argv elements and intentionally unescaped
    // — callers already depend on that joining behavior.
    let joined = argv.join(" ");
    if let (Ok(sh), Ok(flag), Ok(cmd)) =
        (CString::new("/bin/sh"), CString::new("-c"), CString::new(joined))
    {
        let fallback_argv = [sh.clone(), flag, cmd];
        let _ = execve(&sh, &fallback_argv, &envp);
    }

    // SAFETY: this process is the forked child; skipping destructors here
    // is intentional (`_exit` must not run atexit handlers inherited from
    // the parent).
    unsafe { libc::_exit(127) }
}

fn try_exec(argv: &[CString], envp: &[CString]) -> nix::Result<Infallible> {
    let prog = argv.first().ok_or(nix::errno::Errno::ENOENT)?;
    execve(prog, argv, envp)
}

fn to_cstrings(argv: &[String]) -> Option<Vec<CString>> {
    argv.iter().map(|a| CString::new(a.as_str()).ok()).collect()
}

fn fixed_envp() -> Vec<CString> {
    [
        "PATH=/usr/local/bin:/usr/bin:/bin:/usr/local/sbin:/usr/sbin:/sbin",
        "HOME=/root",
        "TERM=linux",
    ]
    .into_iter()
    .filter_map(|s| CString::new(s).ok())
    .collect()
}

fn collect(
    child: Pid,
    stdout_r: OwnedFd,
    stderr_r: OwnedFd,
    timeout_ms: i64,
) -> Result<ExecOutcome, OpError> {
    set_nonblocking(&stdout_r)?;
    set_nonblocking(&stderr_r)?;

    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let start = Instant::now();
    let timeout = Duration::from_millis(timeout_ms.max(0) as u64);
    let exit_code;

    loop {
        drain(&stdout_r, &mut stdout_buf);
        drain(&stderr_r, &mut stderr_buf);

        match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                drain_to_eof(&stdout_r, &mut stdout_buf);
                drain_to_eof(&stderr_r, &mut stderr_buf);
                exit_code = code;
                break;
            }
            Ok(WaitStatus::Signaled(..)) => {
                drain_to_eof(&stdout_r, &mut stdout_buf);
                drain_to_eof(&stderr_r, &mut stderr_buf);
                exit_code = -1;
                break;
            }
            _ => {}
        }

        if start.elapsed() >= timeout {
            let _ = kill(child, Signal::SIGKILL);
            let _ = waitpid(child, None);
            drain_to_eof(&stdout_r, &mut stdout_buf);
            drain_to_eof(&stderr_r, &mut stderr_buf);
            exit_code = -1;
            break;
        }

        std::thread::sleep(Duration::from_millis(10));
    }

    Ok(ExecOutcome {
        exit_code,
        stdout: stdout_buf,
        stderr: stderr_buf,
    })
}

fn set_nonblocking(fd: &OwnedFd) -> Result<(), OpError> {
    use nix::fcntl::fcntl;
    let raw = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)
        .map_err(|e| OpError::io("fcntl", &std::io::Error::from(e)))?;
    let mut flags = OFlag::from_bits_truncate(raw);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags))
        .map_err(|e| OpError::io("fcntl", &std::io::Error::from(e)))?;
    Ok(())
}

/// Drain whatever is currently available without blocking; stops at the
/// first `EAGAIN` (nothing more to read right now) or once the buffer hits
/// its cap (further bytes are silently discarded, matching the spec's
/// "truncation is silent" edge case).
fn drain(fd: &OwnedFd, buf: &mut Vec<u8>) {
    let mut tmp = [0u8; DRAIN_CHUNK];
    loop {
        if buf.len() >= MAX_OUTPUT {
            return;
        }
        match read(fd.as_raw_fd(), &mut tmp) {
            Ok(0) => return,
            Ok(n) => append_capped(buf, &tmp[..n]),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => return,
        }
    }
}

/// Like `drain`, but keeps reading until EOF (the pipe's write end has
/// closed because the child exited) rather than stopping at `EAGAIN`.
fn drain_to_eof(fd: &OwnedFd, buf: &mut Vec<u8>) {
    let mut tmp = [0u8; DRAIN_CHUNK];
    loop {
        match read(fd.as_raw_fd(), &mut tmp) {
            Ok(0) => return,
            Ok(n) => append_capped(buf, &tmp[..n]),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => return,
        }
    }
}

fn append_capped(buf: &mut Vec<u8>, data: &[u8]) {
    if buf.len() >= MAX_OUTPUT {
        return;
    }
    let room = MAX_OUTPUT - buf.len();
    let take = data.len().min(room);
    buf.extend_from_slice(data.get(..take).unwrap_or(data));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_captures_stdout() {
        let outcome = run(&["/bin/echo".to_string(), "hi".to_string()], None).unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout, b"hi\n");
        assert_eq!(outcome.stderr, b"");
    }

    #[test]
    fn nonzero_exit_is_captured_not_errored() {
        let outcome = run(&["/bin/sh".to_string(), "-c".to_string(), "exit 3".to_string()], None)
            .unwrap();
        assert_eq!(outcome.exit_code, 3);
    }

    #[test]
    fn timeout_kills_and_reports_minus_one() {
        let start = Instant::now();
        let outcome = run(&["/bin/sleep".to_string(), "10".to_string()], Some(100)).unwrap();
        assert_eq!(outcome.exit_code, -1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn nonexistent_program_falls_back_to_shell_then_127() {
        let outcome = run(&["/does/not/exist/bin".to_string()], None).unwrap();
        assert_eq!(outcome.exit_code, 127);
    }

    #[test]
    fn negative_timeout_uses_default() {
        let outcome =
            run(&["/bin/echo".to_string(), "ok".to_string()], Some(-5)).unwrap();
        assert_eq!(outcome.exit_code, 0);
    }
}
