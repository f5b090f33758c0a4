//! Logging for the guest agent: an RFC3339 timestamp, a level, and the
//! fixed `init:` tag, written to stderr — matching the field order of the
//! original C implementation's `log_msg` (`HH:MM:SS LEVEL init: message`),
//! upgraded to a date-bearing timestamp since a guest's wall clock is not
//! reliably "today" across snapshot/restore.

use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Lower the log threshold to include `DEBUG` records. Set once at startup
/// from the `-d`/`--debug` flag.
pub fn set_debug(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::log::debug_enabled() {
            eprintln!("{} DEBUG init: {}", $crate::log::timestamp(), format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        eprintln!("{} INFO init: {}", $crate::log::timestamp(), format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        eprintln!("{} WARN init: {}", $crate::log::timestamp(), format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        eprintln!("{} ERROR init: {}", $crate::log::timestamp(), format!($($arg)*));
    };
}
