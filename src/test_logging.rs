//! Test logging infrastructure.
//!
//! Lightweight, std-only logging for this crate's unit and integration
//! tests: phases, sections, and checked assertions, filtered by the
//! `TEST_LOG_LEVEL` environment variable and stamped with elapsed time.
//!
//! ```ignore
//! init_test_logging();
//! rwmux::test_phase!("writer_serialization");
//! rwmux::assert_with_log!(log == expected, "log order", expected, log);
//! rwmux::test_complete!("writer_serialization");
//! ```

use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

/// Logging verbosity level for tests.
///
/// Levels are ordered from least to most verbose:
/// `Error < Warn < Info < Debug < Trace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TestLogLevel {
    /// Only failures.
    Error,
    /// Warnings and above.
    Warn,
    /// General test progress.
    #[default]
    Info,
    /// Per-check detail.
    Debug,
    /// Everything.
    Trace,
}

impl TestLogLevel {
    /// Returns a human-readable name for the level.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    /// Returns the level from the `TEST_LOG_LEVEL` environment variable.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var("TEST_LOG_LEVEL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for TestLogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

struct TestLogState {
    level: TestLogLevel,
    start: Instant,
}

static STATE: OnceLock<TestLogState> = OnceLock::new();

/// Initializes test logging once per process. Safe to call from every test.
pub fn init_test_logging() {
    STATE.get_or_init(|| TestLogState {
        level: TestLogLevel::from_env(),
        start: Instant::now(),
    });
}

/// Emits a line at the given level if it passes the configured filter.
pub fn log_event(level: TestLogLevel, message: &str) {
    let Some(state) = STATE.get() else { return };
    if level <= state.level {
        let elapsed = state.start.elapsed();
        eprintln!(
            "[{:>7.3}s {:>5}] {message}",
            elapsed.as_secs_f64(),
            level.name()
        );
    }
}

/// Records a checked assertion outcome.
pub fn log_check(what: &str, expected: &str, actual: &str, passed: bool) {
    if passed {
        log_event(TestLogLevel::Debug, &format!("check ok: {what}"));
    } else {
        log_event(
            TestLogLevel::Error,
            &format!("check FAILED: {what}: expected {expected}, got {actual}"),
        );
    }
}

/// Marks the start of a test phase.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::test_logging::log_event(
            $crate::test_logging::TestLogLevel::Info,
            &format!("=== phase: {} ===", $name),
        )
    };
}

/// Marks a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        $crate::test_logging::log_event(
            $crate::test_logging::TestLogLevel::Info,
            &format!("--- {}", $name),
        )
    };
}

/// Marks the successful end of a test phase.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::test_logging::log_event(
            $crate::test_logging::TestLogLevel::Info,
            &format!("=== complete: {} ===", $name),
        )
    };
}

/// Asserts a condition, logging expected and actual values either way.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {{
        let passed = $cond;
        $crate::test_logging::log_check(
            $what,
            &format!("{:?}", $expected),
            &format!("{:?}", $actual),
            passed,
        );
        assert!(passed, "{}: expected {:?}, got {:?}", $what, $expected, $actual);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_and_order() {
        assert_eq!("trace".parse(), Ok(TestLogLevel::Trace));
        assert_eq!("WARNING".parse(), Ok(TestLogLevel::Warn));
        assert!("verbose".parse::<TestLogLevel>().is_err());
        assert!(TestLogLevel::Error < TestLogLevel::Trace);
    }

    #[test]
    fn logging_is_a_noop_before_init_and_safe_after() {
        log_event(TestLogLevel::Info, "before init");
        init_test_logging();
        init_test_logging();
        log_event(TestLogLevel::Info, "after init");
        crate::test_phase!("self");
        crate::assert_with_log!(1 + 1 == 2, "arithmetic", 2, 1 + 1);
        crate::test_complete!("self");
    }
}
