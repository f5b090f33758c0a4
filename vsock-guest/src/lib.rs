//! Host-socket request server for the guest side of a microVM.
//!
//! This crate implements everything between an accepted connection on the
//! host-socket and a written response: bounded request framing, envelope
//! parsing, file operations, and the exec supervisor. It also owns the
//! listener (binding the socket, accepting, spawning a handler thread per
//! connection) and the lifecycle flags that `guest-init`'s PID-1 loop sets
//! from signal handlers and that the listener reads to know when to stop.
//!
//! PID-1 signal handling, zombie reaping, and shutdown orchestration live
//! in `guest-init`, one layer up, since only the PID-1 process may use
//! `kill(-1, …)` or the reboot primitive.

pub mod connection;
pub mod error;
pub mod exec;
pub mod fileops;
pub mod lifecycle;
pub mod listener;
pub mod log;

pub use error::OpError;
pub use listener::Listener;
