//! Process-wide leveled logging for the wallet daemon crates.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    fn from_raw(raw: u8) -> Self {
        if raw == Format::Json as u8 {
            Format::Json
        } else {
            Format::Text
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static LOG_TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static LOG_STDERR_ENABLED: AtomicBool = AtomicBool::new(true);
static CAPTURE_ENABLED: AtomicBool = AtomicBool::new(false);
static CAPTURE: OnceLock<Mutex<CaptureBuffer>> = OnceLock::new();

/// A log record retained by the capture buffer.
#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub msg: String,
}

struct CaptureBuffer {
    capacity: usize,
    records: VecDeque<CapturedLog>,
}

impl CaptureBuffer {
    fn push(&mut self, record: CapturedLog) {
        if self.capacity == 0 {
            return;
        }
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }
}

pub fn init(config: LogConfig) {
    LOG_LEVEL.store(config.level as u8, Ordering::Relaxed);
    LOG_FORMAT.store(config.format as u8, Ordering::Relaxed);
    LOG_TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);
}

pub fn set_stderr_enabled(enabled: bool) {
    LOG_STDERR_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        CAPTURE_ENABLED.store(false, Ordering::Relaxed);
        return;
    }
    let buffer = CAPTURE.get_or_init(|| {
        Mutex::new(CaptureBuffer {
            capacity,
            records: VecDeque::new(),
        })
    });
    if let Ok(mut guard) = buffer.lock() {
        guard.capacity = capacity;
    }
    CAPTURE_ENABLED.store(true, Ordering::Relaxed);
}

pub fn clear_captured_logs() {
    let Some(buffer) = CAPTURE.get() else {
        return;
    };
    if let Ok(mut guard) = buffer.lock() {
        guard.records.clear();
    }
}

/// Returns up to `limit` of the most recent captured records, oldest first.
pub fn capture_snapshot(limit: usize) -> Vec<CapturedLog> {
    let Some(buffer) = CAPTURE.get() else {
        return Vec::new();
    };
    let Ok(guard) = buffer.lock() else {
        return Vec::new();
    };
    let start = guard.records.len().saturating_sub(limit);
    guard.records.iter().skip(start).cloned().collect()
}

pub fn enabled(level: Level) -> bool {
    level as u8 <= LOG_LEVEL.load(Ordering::Relaxed)
        || (CAPTURE_ENABLED.load(Ordering::Relaxed) && level <= Level::Warn)
}

pub fn log(
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
    args: fmt::Arguments<'_>,
) {
    let to_stderr =
        LOG_STDERR_ENABLED.load(Ordering::Relaxed) && level as u8 <= LOG_LEVEL.load(Ordering::Relaxed);
    let capture = CAPTURE_ENABLED.load(Ordering::Relaxed);
    if !to_stderr && !capture {
        return;
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ts_ms: u64 = now.as_millis().try_into().unwrap_or(u64::MAX);
    let msg = args.to_string();

    if to_stderr {
        let mut out = io::stderr().lock();
        match Format::from_raw(LOG_FORMAT.load(Ordering::Relaxed)) {
            Format::Text => {
                if LOG_TIMESTAMPS.load(Ordering::Relaxed) {
                    let ts = Timestamp {
                        unix_seconds: now.as_secs(),
                        millis: now.subsec_millis(),
                    };
                    let _ = write!(out, "{ts} ");
                }
                let _ = writeln!(out, "{} {}: {msg}", level.as_str(), target);
            }
            Format::Json => {
                let record = json!({
                    "ts_ms": ts_ms,
                    "level": level.as_str(),
                    "target": target,
                    "file": file,
                    "line": line,
                    "msg": msg,
                });
                let _ = writeln!(out, "{record}");
            }
        }
    }

    if capture {
        let Some(buffer) = CAPTURE.get() else {
            return;
        };
        if let Ok(mut guard) = buffer.lock() {
            guard.push(CapturedLog {
                ts_ms,
                level,
                target,
                msg,
            });
        }
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level) {
            $crate::log($level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

struct Timestamp {
    unix_seconds: u64,
    millis: u32,
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SECS_PER_DAY: u64 = 86_400;
        let days = (self.unix_seconds / SECS_PER_DAY) as i64;
        let secs_of_day = self.unix_seconds % SECS_PER_DAY;
        let (year, month, day) = civil_from_days(days);
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
            secs_of_day / 3600,
            (secs_of_day % 3600) / 60,
            secs_of_day % 60,
            self.millis
        )
    }
}

// Howard Hinnant's days-to-civil conversion.
fn civil_from_days(days_since_unix_epoch: i64) -> (i32, u32, u32) {
    let z = days_since_unix_epoch + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = (yoe as i32) + (era as i32) * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    (y + if m <= 2 { 1 } else { 0 }, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_and_format() {
        assert_eq!(Level::parse("info"), Some(Level::Info));
        assert_eq!(Level::parse(" WARNING "), Some(Level::Warn));
        assert_eq!(Level::parse("nope"), None);
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn timestamp_renders_iso8601() {
        let ts = Timestamp {
            unix_seconds: 1_700_000_000,
            millis: 7,
        };
        assert_eq!(ts.to_string(), "2023-11-14T22:13:20.007Z");
    }

    #[test]
    fn capture_keeps_most_recent_records() {
        set_stderr_enabled(false);
        enable_capture(2);
        clear_captured_logs();
        log_warn!("first");
        log_warn!("second");
        log_error!("third");
        let records = capture_snapshot(10);
        let messages: Vec<&str> = records.iter().map(|r| r.msg.as_str()).collect();
        assert_eq!(messages, vec!["second", "third"]);
        assert_eq!(records[1].level, Level::Error);
    }
}
