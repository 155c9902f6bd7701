//! The capability context for acquisitions.
//!
//! All acquisition paths take an explicit [`Cx`]. It carries two things:
//!
//! - an optional [`CancelToken`] observed by pending acquisitions, and
//! - the **hold chain**: which locks the current logical call tree already
//!   holds, and with which access kind.
//!
//! The hold chain is how escalation is detected: acquiring exclusive access
//! on a lock whose innermost enclosing hold in this context is shared fails
//! before touching the queue. The chain is per lock identity, not ambient —
//! recursion through the same lock sees it, other locks do not.
//!
//! Body closures run under a *derived* context with one more hold frame;
//! the prior context is restored structurally when the derived context goes
//! out of scope, so nesting depth composes.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::queue::AccessKind;
use std::cell::Cell;
use std::rc::Rc;
use std::task::Waker;

/// Identity of one lock instance, used to key the hold chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct MuxId(u64);

impl MuxId {
    /// Allocates a fresh identity. Identities are unique within a thread
    /// for the life of the process.
    pub(crate) fn next() -> Self {
        thread_local! {
            static NEXT: Cell<u64> = const { Cell::new(0) };
        }
        NEXT.with(|next| {
            let id = next.get();
            next.set(id + 1);
            Self(id)
        })
    }
}

#[derive(Debug)]
struct HoldFrame {
    mux: MuxId,
    kind: AccessKind,
    parent: Option<Rc<HoldFrame>>,
}

/// The capability context threaded through acquisitions and bodies.
///
/// `Cx` is cheap to clone; clones share the same cancellation token. A
/// default context has no cancellation and no enclosing holds.
#[derive(Debug, Clone, Default)]
pub struct Cx {
    cancel: Option<CancelToken>,
    hold: Option<Rc<HoldFrame>>,
}

impl Cx {
    /// Creates a context with no cancellation and no enclosing holds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context observing the given cancellation token.
    #[must_use]
    pub fn with_cancel(token: CancelToken) -> Self {
        Self {
            cancel: Some(token),
            hold: None,
        }
    }

    /// Returns the cancellation token, if any.
    #[must_use]
    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.cancel.as_ref()
    }

    /// Checks for cancellation and returns an error carrying the reason if
    /// the token has fired.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled) with
    /// the caller-supplied reason when the token is cancelled.
    pub fn checkpoint(&self) -> Result<()> {
        match self.cancel.as_ref().and_then(CancelToken::reason) {
            Some(reason) => Err(Error::cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Registers a waker to be woken when the cancellation token fires.
    pub(crate) fn register_cancel_waker(&self, waker: &Waker) {
        if let Some(token) = &self.cancel {
            token.register(waker);
        }
    }

    /// Returns the innermost enclosing hold on the given lock, if any.
    pub(crate) fn holder_kind(&self, mux: MuxId) -> Option<AccessKind> {
        let mut frame = self.hold.as_ref();
        while let Some(current) = frame {
            if current.mux == mux {
                return Some(current.kind);
            }
            frame = current.parent.as_ref();
        }
        None
    }

    /// Derives a context with one more hold frame for the given lock.
    pub(crate) fn child_with_hold(&self, mux: MuxId, kind: AccessKind) -> Self {
        Self {
            cancel: self.cancel.clone(),
            hold: Some(Rc::new(HoldFrame {
                mux,
                kind,
                parent: self.hold.clone(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelReason;

    #[test]
    fn fresh_context_holds_nothing() {
        let cx = Cx::new();
        assert_eq!(cx.holder_kind(MuxId::next()), None);
        assert!(cx.checkpoint().is_ok());
    }

    #[test]
    fn innermost_hold_wins() {
        let mux = MuxId::next();
        let cx = Cx::new();
        let shared = cx.child_with_hold(mux, AccessKind::Shared);
        let exclusive = shared.child_with_hold(mux, AccessKind::Exclusive);

        assert_eq!(shared.holder_kind(mux), Some(AccessKind::Shared));
        assert_eq!(exclusive.holder_kind(mux), Some(AccessKind::Exclusive));
        // The outer context is untouched by derivation.
        assert_eq!(cx.holder_kind(mux), None);
    }

    #[test]
    fn holds_are_per_lock_identity() {
        let a = MuxId::next();
        let b = MuxId::next();
        let cx = Cx::new().child_with_hold(a, AccessKind::Exclusive);

        assert_eq!(cx.holder_kind(a), Some(AccessKind::Exclusive));
        assert_eq!(cx.holder_kind(b), None);
    }

    #[test]
    fn checkpoint_reports_the_reason() {
        let token = CancelToken::new();
        let cx = Cx::with_cancel(token.clone());
        assert!(cx.checkpoint().is_ok());

        token.cancel(CancelReason::user("halt"));
        let err = cx.checkpoint().expect_err("cancelled");
        assert!(err.is_cancelled());
        assert_eq!(err.cancel_reason().map(CancelReason::detail), Some("halt"));
    }

    #[test]
    fn derived_context_shares_cancellation() {
        let token = CancelToken::new();
        let cx = Cx::with_cancel(token.clone());
        let child = cx.child_with_hold(MuxId::next(), AccessKind::Shared);

        token.cancel(CancelReason::shutdown(""));
        assert!(child.checkpoint().is_err());
    }
}
