//! Error types and error handling strategy.
//!
//! Errors are explicit and typed (no stringly-typed errors). The acquisition
//! paths never swallow errors from user bodies: release bookkeeping always
//! runs before an error surfaces. Errors raised by the acquire path itself
//! are reported before the body runs and leave no queue state behind.
//!
//! User-visible messages are locale-aware: [`Error::localized_message`]
//! renders the message for an explicit [`Locale`], and the [`Display`]
//! implementation uses the process-wide default locale.
//!
//! [`Display`]: std::fmt::Display

use crate::cancel::CancelReason;
use crate::locale::{self, Locale};
use core::fmt;
use std::rc::Rc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Exclusive acquisition attempted while the enclosing holder on the
    /// same lock holds shared access.
    Escalation,
    /// A pending acquisition was cancelled.
    Cancelled,
    /// A lock context could not be attached to an owner.
    Instrumentation,
    /// A queue invariant was violated (programmer error, never expected).
    InvariantViolated,
    /// A non-waiting acquisition would have had to wait.
    WouldWait,
    /// Configuration error (invalid env var, bad setting).
    ConfigError,
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Escalation | Self::WouldWait => ErrorCategory::Acquisition,
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::Instrumentation => ErrorCategory::Instrumentation,
            Self::InvariantViolated => ErrorCategory::Internal,
            Self::ConfigError | Self::User => ErrorCategory::User,
        }
    }

    /// Returns true if retrying the same operation can ever succeed.
    ///
    /// Escalation and invariant violations are programming errors; retrying
    /// without restructuring the calling code will fail again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Cancelled | Self::WouldWait)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Failures of the acquisition protocol itself.
    Acquisition,
    /// Cancellation of a pending acquisition.
    Cancellation,
    /// Owner/context attachment failures.
    Instrumentation,
    /// Internal invariant violations.
    Internal,
    /// User-originated and configuration errors.
    User,
}

/// The main error type for lock operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    detail: Option<String>,
    reason: Option<CancelReason>,
    source: Option<Rc<dyn std::error::Error + 'static>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            detail: None,
            reason: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error is an escalation failure.
    #[must_use]
    pub const fn is_escalation(&self) -> bool {
        matches!(self.kind, ErrorKind::Escalation)
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Adds a detail description to the error.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + 'static) -> Self {
        self.source = Some(Rc::new(source));
        self
    }

    /// Creates an escalation error.
    #[must_use]
    pub const fn escalation() -> Self {
        Self::new(ErrorKind::Escalation)
    }

    /// Creates a cancellation error carrying the caller-supplied reason.
    #[must_use]
    pub fn cancelled(reason: CancelReason) -> Self {
        let mut err = Self::new(ErrorKind::Cancelled);
        err.reason = Some(reason);
        err
    }

    /// Creates an instrumentation error.
    #[must_use]
    pub fn instrumentation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Instrumentation).with_detail(detail)
    }

    /// Creates an invariant-violation error (programmer error).
    #[must_use]
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvariantViolated).with_detail(detail)
    }

    /// Creates a would-wait error for non-waiting acquisitions.
    #[must_use]
    pub const fn would_wait() -> Self {
        Self::new(ErrorKind::WouldWait)
    }

    /// Returns the cancellation reason, if this is a cancellation error.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<&CancelReason> {
        self.reason.as_ref()
    }

    /// Returns the detail text, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Renders the user-visible message in the given locale.
    #[must_use]
    pub fn localized_message(&self, locale: Locale) -> String {
        let base = locale::kind_message(self.kind, locale);
        match (&self.reason, &self.detail) {
            (Some(reason), _) => format!("{base} ({reason})"),
            (None, Some(detail)) => format!("{base}: {detail}"),
            (None, None) => base.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.localized_message(locale::default_locale()))
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a detail message on error.
    fn context(self, detail: impl Into<String>) -> Result<T>;
    /// Attach a detail message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, detail: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_detail(detail))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_detail(f()))
    }
}

/// A specialized Result type for lock operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn kind_categories() {
        assert_eq!(ErrorKind::Escalation.category(), ErrorCategory::Acquisition);
        assert_eq!(ErrorKind::WouldWait.category(), ErrorCategory::Acquisition);
        assert_eq!(ErrorKind::Cancelled.category(), ErrorCategory::Cancellation);
        assert_eq!(
            ErrorKind::Instrumentation.category(),
            ErrorCategory::Instrumentation
        );
        assert_eq!(
            ErrorKind::InvariantViolated.category(),
            ErrorCategory::Internal
        );
        assert_eq!(ErrorKind::ConfigError.category(), ErrorCategory::User);
        assert_eq!(ErrorKind::User.category(), ErrorCategory::User);
    }

    #[test]
    fn cancellation_carries_reason_verbatim() {
        let reason = CancelReason::user("caller gave up");
        let err = Error::cancelled(reason.clone());
        assert!(err.is_cancelled());
        assert_eq!(err.cancel_reason(), Some(&reason));
    }

    #[test]
    fn localized_messages_differ_by_locale() {
        let err = Error::escalation();
        let en = err.localized_message(Locale::En);
        let de = err.localized_message(Locale::De);
        assert_ne!(en, de);
        assert!(en.contains("exclusive"));
        assert!(de.contains("exklusive"));
    }

    #[test]
    fn detail_is_appended() {
        let err = Error::instrumentation("type mismatch");
        let msg = err.localized_message(Locale::En);
        assert!(msg.ends_with("type mismatch"), "{msg}");
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::new(ErrorKind::User).with_source(Underlying);
        let source = err.source().expect("source missing");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn result_ext_adds_detail() {
        let res: core::result::Result<(), Error> = Err(Error::would_wait());
        let err = res.context("try-acquire").expect_err("expected err");
        assert_eq!(err.detail(), Some("try-acquire"));
    }

    #[test]
    fn retryability() {
        assert!(ErrorKind::Cancelled.is_retryable());
        assert!(ErrorKind::WouldWait.is_retryable());
        assert!(!ErrorKind::Escalation.is_retryable());
        assert!(!ErrorKind::InvariantViolated.is_retryable());
    }
}
