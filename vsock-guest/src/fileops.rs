//! Single-path file operations: read, write, stat, delete. Direct syscalls
//! via `nix` (rather than `std::fs`) so each failure can be tagged with the
//! exact syscall name the wire error names — `open`, `fstat`, `read`,
//! `write`, `stat`, `unlink`, `rmdir` — matching the original C source's
//! `handle_file_*` functions one for one.

use std::os::fd::AsRawFd;

use nix::fcntl::{OFlag, open};
use nix::sys::stat::{Mode, fstat, stat};
use nix::unistd::{read, rmdir, unlink, write};

use crate::error::OpError;

const MAX_FILE_SIZE: u64 = 128 * 1024 * 1024;

pub struct FileContent {
    pub content_b64: String,
    pub size: u64,
}

pub fn read_file(path: &str) -> Result<FileContent, OpError> {
    let fd = open(path, OFlag::O_RDONLY, Mode::empty())
        .map_err(|e| OpError::io("open", &std::io::Error::from(e)))?;
    let st = fstat(fd.as_raw_fd()).map_err(|e| OpError::io("fstat", &std::io::Error::from(e)))?;

    let size = u64::try_from(st.st_size).unwrap_or(0);
    if size > MAX_FILE_SIZE {
        return Err(OpError::ResourceExhausted("file too large"));
    }

    let mut buf = vec![0u8; size as usize];
    let mut total = 0usize;
    while total < buf.len() {
        let chunk = buf.get_mut(total..).unwrap_or_default();
        match read(fd.as_raw_fd(), chunk) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(OpError::io("read", &std::io::Error::from(e))),
        }
    }
    buf.truncate(total);

    Ok(FileContent {
        content_b64: vsock_proto::encode_bytes(&buf),
        size: total as u64,
    })
}

/// Writes `content_b64` (base64) in a single `write` call. Short writes are
/// reported, not retried — the write is considered a success as long as the
/// syscall itself did not error, matching the observed behavior of the
/// implementation this protocol was ported from.
pub fn write_file(path: &str, content_b64: &str) -> Result<u64, OpError> {
    let bytes = vsock_proto::decode_bytes(content_b64).map_err(|e| OpError::BadRequest(e.to_string()))?;

    let fd = open(
        path,
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
        Mode::from_bits_truncate(0o644),
    )
    .map_err(|e| OpError::io("open", &std::io::Error::from(e)))?;

    let n = write(&fd, &bytes).map_err(|e| OpError::io("write", &std::io::Error::from(e)))?;
    Ok(n as u64)
}

pub struct Stat {
    pub path: String,
    pub size: u64,
    pub mode: String,
    pub mod_time: String,
    pub is_dir: bool,
}

pub fn stat_file(path: &str) -> Result<Stat, OpError> {
    let st = stat(path).map_err(|e| OpError::io("stat", &std::io::Error::from(e)))?;

    let mode = st.st_mode & 0o7777;
    let is_dir = (st.st_mode & libc::S_IFMT) == libc::S_IFDIR;
    let mod_time = chrono::DateTime::from_timestamp(st.st_mtime, 0)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_default();

    Ok(Stat {
        path: path.to_string(),
        size: u64::try_from(st.st_size).unwrap_or(0),
        mode: format!("{mode:o}"),
        mod_time,
        is_dir,
    })
}

/// Unlinks `path`; if it names a directory, falls back to `rmdir`. A
/// non-empty directory surfaces the OS's own error (`ENOTEMPTY`) as an
/// `rmdir` `IoError`.
pub fn delete_file(path: &str) -> Result<(), OpError> {
    match unlink(path) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::EISDIR) => {
            rmdir(path).map_err(|e| OpError::io("rmdir", &std::io::Error::from(e)))
        }
        Err(e) => Err(OpError::io("unlink", &std::io::Error::from(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempdir();
        let path = dir.join("roundtrip.txt");
        let path = path.to_str().unwrap();

        let content = vsock_proto::encode_bytes(b"hello");
        let written = write_file(path, &content).unwrap();
        assert_eq!(written, 5);

        let got = read_file(path).unwrap();
        assert_eq!(got.size, 5);
        assert_eq!(vsock_proto::decode_bytes(&got.content_b64).unwrap(), b"hello");

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn write_with_bad_content_reports_base64_decode_failed() {
        let dir = tempdir();
        let path = dir.join("bad_content.txt");
        let path = path.to_str().unwrap();

        let err = write_file(path, "not valid base64!!").unwrap_err();
        match err {
            OpError::BadRequest(msg) => assert_eq!(msg, "base64 decode failed"),
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[test]
    fn stat_reports_regular_file() {
        let dir = tempdir();
        let path = dir.join("stat_me.txt");
        let path_str = path.to_str().unwrap();
        std::fs::File::create(&path).unwrap().write_all(b"x").unwrap();

        let st = stat_file(path_str).unwrap();
        assert!(!st.is_dir);
        assert_eq!(st.size, 1);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn stat_missing_path_is_io_error() {
        let err = stat_file("/nonexistent/path/for/sure").unwrap_err();
        match err {
            OpError::Io { op, detail } => {
                assert_eq!(op, "stat");
                assert!(detail.contains("No such file or directory"));
            }
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn delete_then_stat_is_not_found() {
        let dir = tempdir();
        let path = dir.join("to_delete.txt");
        let path_str = path.to_str().unwrap();
        std::fs::File::create(&path).unwrap();

        delete_file(path_str).unwrap();
        assert!(stat_file(path_str).is_err());
    }

    fn tempdir() -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("guest-init-fileops-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
