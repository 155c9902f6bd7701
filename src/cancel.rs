//! Cancellation tokens for pending acquisitions.
//!
//! A [`CancelToken`] is handed to an acquisition through [`Cx`]. Cancelling
//! the token carries a [`CancelReason`] that is propagated verbatim to every
//! waiter that observes it. Cancellation only affects *pending* acquisitions:
//! a lock that has already been granted is unaffected and must be released
//! through its handle.
//!
//! [`Cx`]: crate::Cx

use std::cell::RefCell;
use std::rc::Rc;
use std::task::Waker;

/// Classification of a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelKind {
    /// Cancelled explicitly by user code.
    User,
    /// Cancelled because a deadline elapsed.
    Timeout,
    /// Cancelled because the surrounding scope is shutting down.
    Shutdown,
}

/// The reason a pending acquisition was cancelled.
///
/// The reason is carried verbatim from the caller that cancelled the token
/// to every waiter that fails with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    kind: CancelKind,
    detail: String,
}

impl CancelReason {
    /// Creates a user-initiated cancellation reason.
    #[must_use]
    pub fn user(detail: impl Into<String>) -> Self {
        Self {
            kind: CancelKind::User,
            detail: detail.into(),
        }
    }

    /// Creates a timeout cancellation reason.
    #[must_use]
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self {
            kind: CancelKind::Timeout,
            detail: detail.into(),
        }
    }

    /// Creates a shutdown cancellation reason.
    #[must_use]
    pub fn shutdown(detail: impl Into<String>) -> Self {
        Self {
            kind: CancelKind::Shutdown,
            detail: detail.into(),
        }
    }

    /// Returns the cancellation kind.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// Returns the caller-supplied detail text.
    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            CancelKind::User => "user",
            CancelKind::Timeout => "timeout",
            CancelKind::Shutdown => "shutdown",
        };
        if self.detail.is_empty() {
            write!(f, "{kind}")
        } else {
            write!(f, "{kind}: {}", self.detail)
        }
    }
}

#[derive(Debug, Default)]
struct TokenState {
    reason: Option<CancelReason>,
    wakers: Vec<Waker>,
}

/// A one-shot cancellation token.
///
/// Clones share state: cancelling any clone cancels them all. Pending
/// acquisitions register their wakers on the token so that cancellation is
/// observed promptly rather than at the next queue advance.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Rc<RefCell<TokenState>>,
}

impl CancelToken {
    /// Creates a new, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token with the given reason, waking registered waiters.
    ///
    /// The first reason wins; cancelling an already-cancelled token is a
    /// no-op and the original reason is kept.
    pub fn cancel(&self, reason: CancelReason) {
        let wakers = {
            let mut state = self.inner.borrow_mut();
            if state.reason.is_some() {
                return;
            }
            tracing::debug!(%reason, waiters = state.wakers.len(), "cancel token fired");
            state.reason = Some(reason);
            std::mem::take(&mut state.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Returns true if the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.borrow().reason.is_some()
    }

    /// Returns the cancellation reason, if cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.borrow().reason.clone()
    }

    /// Registers a waker to be woken when the token fires.
    ///
    /// If the token is already cancelled the waker is woken immediately.
    pub(crate) fn register(&self, waker: &Waker) {
        let mut state = self.inner.borrow_mut();
        if state.reason.is_some() {
            drop(state);
            waker.wake_by_ref();
            return;
        }
        if let Some(existing) = state.wakers.iter_mut().find(|w| w.will_wake(waker)) {
            existing.clone_from(waker);
        } else {
            state.wakers.push(waker.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Waker;

    #[test]
    fn first_reason_wins() {
        let token = CancelToken::new();
        token.cancel(CancelReason::user("first"));
        token.cancel(CancelReason::timeout("second"));

        let reason = token.reason().expect("cancelled");
        assert_eq!(reason.kind(), CancelKind::User);
        assert_eq!(reason.detail(), "first");
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel(CancelReason::shutdown("bye"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn register_after_cancel_wakes_immediately() {
        let token = CancelToken::new();
        token.cancel(CancelReason::user("done"));
        // A noop waker must not panic; immediate wake is exercised end to
        // end by the acquisition tests.
        token.register(&Waker::noop());
    }

    #[test]
    fn reason_display() {
        assert_eq!(CancelReason::user("stop").to_string(), "user: stop");
        assert_eq!(CancelReason::timeout("").to_string(), "timeout");
    }
}
