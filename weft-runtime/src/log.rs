//! Diagnostic Logging
//!
//! Leveled diagnostics for the runtime. Every emitted line is prefixed
//! `rt:` and written to standard output; the prefix and destination are a
//! convention consumed by people and smoke tests, not a compatibility
//! surface.
//!
//! Pointer-tracing chatter (proc/stack/port creation, upcall entry) emits
//! at [`LogLevel::Debug`]; user-visible events (log upcalls, rendezvous
//! outcome, dead sends, check failures, deadlock) emit at
//! [`LogLevel::Info`].
//!
//! A capture sink can be swapped in so tests can assert on the emitted
//! lines instead of scraping stdout.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum LogLevel {
    /// Trace level (most verbose).
    Trace = 0,
    /// Debug level.
    Debug = 1,
    /// Informational messages (default).
    #[default]
    Info = 2,
    /// Warnings.
    Warn = 3,
    /// Errors.
    Error = 4,
    /// No logging.
    Off = 5,
}

impl LogLevel {
    /// Get the level name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }

    /// Get the level from a u8.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(LogLevel::Trace),
            1 => Some(LogLevel::Debug),
            2 => Some(LogLevel::Info),
            3 => Some(LogLevel::Warn),
            4 => Some(LogLevel::Error),
            5 => Some(LogLevel::Off),
            _ => None,
        }
    }

    /// Parse a log level from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" | "err" => Some(LogLevel::Error),
            "off" | "none" => Some(LogLevel::Off),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Minimum log level (atomic for fast checking).
static MIN_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Capture buffer. When `Some`, emitted lines are collected here instead of
/// being written to stdout.
static CAPTURE: Mutex<Option<Vec<String>>> = Mutex::new(None);

/// Set the minimum log level.
pub fn set_level(level: LogLevel) {
    MIN_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Get the current minimum log level.
pub fn level() -> LogLevel {
    LogLevel::from_u8(MIN_LEVEL.load(Ordering::SeqCst)).unwrap_or(LogLevel::Info)
}

/// Check if a log level would be logged.
pub fn would_log(level: LogLevel) -> bool {
    level >= self::level()
}

/// Emit a single `rt:`-prefixed diagnostic line at the given level.
pub fn emit(level: LogLevel, msg: impl AsRef<str>) {
    if !would_log(level) {
        return;
    }
    let line = format!("rt: {}", msg.as_ref());
    let mut capture = CAPTURE.lock();
    match capture.as_mut() {
        Some(buf) => buf.push(line),
        None => println!("{}", line),
    }
}

/// Log an informational message.
pub fn info(msg: impl AsRef<str>) {
    emit(LogLevel::Info, msg);
}

/// Log a debug message.
pub fn debug(msg: impl AsRef<str>) {
    emit(LogLevel::Debug, msg);
}

/// Log a trace message.
pub fn trace(msg: impl AsRef<str>) {
    emit(LogLevel::Trace, msg);
}

/// Log a warning.
pub fn warn(msg: impl AsRef<str>) {
    emit(LogLevel::Warn, msg);
}

/// Log an error.
pub fn error(msg: impl AsRef<str>) {
    emit(LogLevel::Error, msg);
}

/// Log a named pointer value at debug level.
pub fn logptr(msg: &str, ptrval: usize) {
    if would_log(LogLevel::Debug) {
        emit(LogLevel::Debug, format!("{} 0x{:x}", msg, ptrval));
    }
}

/// Begin capturing emitted lines. Any previously captured lines are
/// discarded.
pub fn begin_capture() {
    *CAPTURE.lock() = Some(Vec::new());
}

/// Stop capturing and return the captured lines. Subsequent lines go to
/// stdout again.
pub fn take_capture() -> Vec<String> {
    CAPTURE.lock().take().unwrap_or_default()
}

/// Serializes tests that use the global capture buffer.
#[cfg(test)]
pub(crate) mod test_support {
    use parking_lot::Mutex;

    pub static CAPTURE_LOCK: Mutex<()> = Mutex::new(());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Off);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("off"), Some(LogLevel::Off));
        assert_eq!(LogLevel::parse("bogus"), None);
    }

    #[test]
    fn test_capture_prefixes_lines() {
        let _guard = test_support::CAPTURE_LOCK.lock();
        begin_capture();
        info("hello from the runtime");
        let lines = take_capture();
        assert_eq!(lines, vec!["rt: hello from the runtime".to_string()]);
    }

    #[test]
    fn test_capture_respects_level() {
        let _guard = test_support::CAPTURE_LOCK.lock();
        let original = level();
        set_level(LogLevel::Info);
        begin_capture();
        debug("should be filtered");
        info("should appear");
        let lines = take_capture();
        set_level(original);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("should appear"));
    }
}
