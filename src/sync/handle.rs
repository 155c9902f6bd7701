//! Scoped lock handles.

use crate::cx::Cx;
use crate::queue::{AccessKind, Effects, Ticket};
use crate::sync::instance::MuxShared;
use crate::sync::keyed::{KeyedGrant, KeyedShared};
use std::rc::Rc;

#[derive(Debug)]
enum HandleInner {
    Instance {
        mux: Rc<MuxShared>,
        ticket: Ticket,
    },
    Keyed {
        mux: Rc<KeyedShared>,
        grant: KeyedGrant,
    },
}

/// A granted lock with a one-shot scoped release.
///
/// Dropping the handle releases the lock; [`release`](Self::release) does
/// so explicitly and is idempotent — the queue is advanced exactly once no
/// matter how often release runs.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the handle is dropped"]
pub struct LockHandle {
    inner: Option<HandleInner>,
    scope: Cx,
    kind: AccessKind,
}

impl LockHandle {
    pub(crate) fn instance(mux: Rc<MuxShared>, ticket: Ticket, scope: Cx, kind: AccessKind) -> Self {
        Self {
            inner: Some(HandleInner::Instance { mux, ticket }),
            scope,
            kind,
        }
    }

    pub(crate) fn keyed(mux: Rc<KeyedShared>, grant: KeyedGrant, scope: Cx, kind: AccessKind) -> Self {
        Self {
            inner: Some(HandleInner::Keyed { mux, grant }),
            scope,
            kind,
        }
    }

    /// The access kind this handle holds.
    #[must_use]
    pub fn kind(&self) -> AccessKind {
        self.kind
    }

    /// The derived context for work performed under this lock.
    ///
    /// For instance locks the context records the hold, so nested
    /// acquisitions through it are re-entrant and shared-to-exclusive
    /// escalation is detected.
    #[must_use]
    pub fn scope(&self) -> &Cx {
        &self.scope
    }

    /// Returns true once the handle has released its slot.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Releases the lock and advances the queue. Idempotent.
    pub fn release(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        let mut fx = Effects::new();
        match inner {
            HandleInner::Instance { mux, ticket } => {
                let mut state = mux.state.borrow_mut();
                state.queue.release(ticket, &mut fx);
                drop(state);
            }
            HandleInner::Keyed { mux, grant } => {
                let mut state = mux.state.borrow_mut();
                state.release(&grant, &mut fx);
                drop(state);
            }
        }
        fx.wake_all();
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}
