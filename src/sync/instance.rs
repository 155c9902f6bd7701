//! The single-owner readers-writer mutex.
//!
//! An [`RwMux`] serializes asynchronous operations over one logical
//! resource: exclusive acquirers run one at a time in arrival order, shared
//! acquirers coalesce into cohorts that run in parallel, and a shared
//! cohort and an exclusive holder never overlap.
//!
//! Acquisition comes in two forms:
//!
//! - the scoped form ([`exclusive`](RwMux::exclusive) /
//!   [`shared`](RwMux::shared)) acquires, runs an async body under a
//!   derived [`Cx`], and releases before the body's result surfaces;
//! - the manual form ([`acquire_exclusive`](RwMux::acquire_exclusive) /
//!   [`acquire_shared`](RwMux::acquire_shared)) resolves to a
//!   [`LockHandle`] that releases on drop or explicit
//!   [`release`](LockHandle::release).
//!
//! Nested acquisition through the same context is re-entrant for
//! exclusive-in-exclusive and shared-in-shared; exclusive-in-shared is the
//! forbidden escalation and fails without touching the queue.

use crate::cx::{Cx, MuxId};
use crate::diagnostics::MuxSnapshot;
use crate::error::{Error, Result};
use crate::queue::{AccessKind, Effects, SlotStatus, Ticket, WaitQueue};
use crate::sync::handle::LockHandle;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

#[derive(Debug)]
pub(crate) struct MuxShared {
    pub(crate) id: MuxId,
    pub(crate) state: RefCell<MuxState>,
}

#[derive(Debug)]
pub(crate) struct MuxState {
    pub(crate) queue: WaitQueue,
}

/// An asynchronous readers-writer mutex bound to one logical resource.
///
/// The mutex serializes *operations*, not data: bodies receive no guarded
/// reference, they are simply admitted one writer at a time or one reader
/// cohort at a time, FIFO by arrival. Clones share the same queue.
///
/// All state lives behind `Rc`/`RefCell`; the futures this type produces
/// are `!Send` and belong on a single-threaded cooperative executor.
#[derive(Debug, Clone)]
pub struct RwMux {
    shared: Rc<MuxShared>,
}

impl Default for RwMux {
    fn default() -> Self {
        Self::new()
    }
}

impl RwMux {
    /// Creates a new, idle mutex.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Rc::new(MuxShared {
                id: MuxId::next(),
                state: RefCell::new(MuxState {
                    queue: WaitQueue::new(),
                }),
            }),
        }
    }

    /// Acquires exclusive access, runs `body` under a derived context, and
    /// releases before the body's result is returned.
    ///
    /// The derived [`Cx`] passed to the body records the exclusive hold, so
    /// nested exclusive acquisitions on this mutex through it are admitted
    /// re-entrantly instead of deadlocking.
    ///
    /// # Errors
    ///
    /// Fails with `Escalation` when `cx` already holds shared access on
    /// this mutex, with `Cancelled` when the context's token fires before
    /// admission, and with whatever the body itself returns.
    pub async fn exclusive<T, F, Fut>(&self, cx: &Cx, body: F) -> Result<T>
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut handle = self.acquire_exclusive(cx).await?;
        let scope = handle.scope().clone();
        let out = body(scope).await;
        handle.release();
        out
    }

    /// Acquires shared access, runs `body` under a derived context, and
    /// releases before the body's result is returned.
    ///
    /// Never fails with `Escalation`: shared-in-shared nesting joins the
    /// running cohort.
    ///
    /// # Errors
    ///
    /// Fails with `Cancelled` when the context's token fires before
    /// admission, and with whatever the body itself returns.
    pub async fn shared<T, F, Fut>(&self, cx: &Cx, body: F) -> Result<T>
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut handle = self.acquire_shared(cx).await?;
        let scope = handle.scope().clone();
        let out = body(scope).await;
        handle.release();
        out
    }

    /// Begins a manual exclusive acquisition.
    pub fn acquire_exclusive(&self, cx: &Cx) -> ExclusiveAcquire {
        ExclusiveAcquire {
            inner: Acquire::new(Rc::clone(&self.shared), cx.clone(), AccessKind::Exclusive),
        }
    }

    /// Begins a manual shared acquisition.
    pub fn acquire_shared(&self, cx: &Cx) -> SharedAcquire {
        SharedAcquire {
            inner: Acquire::new(Rc::clone(&self.shared), cx.clone(), AccessKind::Shared),
        }
    }

    /// Acquires exclusive access only if no waiting would be required.
    ///
    /// # Errors
    ///
    /// Fails with `Escalation` under a shared hold and `WouldWait` when the
    /// queue is occupied.
    pub fn try_acquire_exclusive(&self, cx: &Cx) -> Result<LockHandle> {
        self.try_acquire(cx, AccessKind::Exclusive)
    }

    /// Acquires shared access only if no waiting would be required.
    ///
    /// # Errors
    ///
    /// Fails with `WouldWait` when a writer holds or waits on the queue.
    pub fn try_acquire_shared(&self, cx: &Cx) -> Result<LockHandle> {
        self.try_acquire(cx, AccessKind::Shared)
    }

    fn try_acquire(&self, cx: &Cx, kind: AccessKind) -> Result<LockHandle> {
        let reentrant = check_escalation(&self.shared, cx, kind)?;
        cx.checkpoint()?;
        let mut state = self.shared.state.borrow_mut();
        if !state.queue.can_admit_now(kind, reentrant) {
            return Err(Error::would_wait());
        }
        let mut fx = Effects::new();
        let ticket = match kind {
            AccessKind::Exclusive => state.queue.arrive_writer(reentrant, &mut fx),
            AccessKind::Shared => state.queue.arrive_reader(reentrant, &mut fx),
        };
        debug_assert_eq!(state.queue.poll_slot(ticket, None), SlotStatus::Runnable);
        drop(state);
        fx.wake_all();
        Ok(make_handle(&self.shared, cx, kind, ticket))
    }

    /// Returns true if no acquirer holds or waits on this mutex.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.shared.state.borrow().queue.has_occupants()
    }

    /// Takes an observational snapshot of the queue.
    #[must_use]
    pub fn snapshot(&self) -> MuxSnapshot {
        MuxSnapshot {
            queue: self.shared.state.borrow().queue.snapshot(),
        }
    }

    #[cfg(test)]
    pub(crate) fn queue_validate(&self) -> Result<()> {
        self.shared.state.borrow().queue.validate()
    }
}

/// Checks the escalation rule and reports whether the arrival is
/// re-entrant for its kind.
fn check_escalation(shared: &MuxShared, cx: &Cx, kind: AccessKind) -> Result<bool> {
    let holder = cx.holder_kind(shared.id);
    if kind == AccessKind::Exclusive && holder == Some(AccessKind::Shared) {
        tracing::debug!("escalation rejected");
        return Err(Error::escalation());
    }
    Ok(holder == Some(kind))
}

fn make_handle(shared: &Rc<MuxShared>, cx: &Cx, kind: AccessKind, ticket: Ticket) -> LockHandle {
    let scope = cx.child_with_hold(shared.id, kind);
    LockHandle::instance(Rc::clone(shared), ticket, scope, kind)
}

#[derive(Debug, Clone, Copy)]
enum Lifecycle {
    Start,
    Waiting(Ticket),
    Done,
}

#[derive(Debug)]
struct Acquire {
    mux: Rc<MuxShared>,
    cx: Cx,
    kind: AccessKind,
    lifecycle: Lifecycle,
}

impl Acquire {
    fn new(mux: Rc<MuxShared>, cx: Cx, kind: AccessKind) -> Self {
        Self {
            mux,
            cx,
            kind,
            lifecycle: Lifecycle::Start,
        }
    }

    fn poll_acquire(&mut self, waker: &Waker) -> Poll<Result<LockHandle>> {
        match self.lifecycle {
            Lifecycle::Start => {
                let reentrant = match check_escalation(&self.mux, &self.cx, self.kind) {
                    Ok(reentrant) => reentrant,
                    Err(e) => {
                        self.lifecycle = Lifecycle::Done;
                        return Poll::Ready(Err(e));
                    }
                };
                // Pre-check: an already-cancelled acquisition never touches
                // the queue.
                if let Err(e) = self.cx.checkpoint() {
                    self.lifecycle = Lifecycle::Done;
                    return Poll::Ready(Err(e));
                }
                let mut state = self.mux.state.borrow_mut();
                let mut fx = Effects::new();
                let ticket = match self.kind {
                    AccessKind::Exclusive => state.queue.arrive_writer(reentrant, &mut fx),
                    AccessKind::Shared => state.queue.arrive_reader(reentrant, &mut fx),
                };
                let status = state.queue.poll_slot(ticket, Some(waker));
                drop(state);
                fx.wake_all();
                self.settle(ticket, status, waker)
            }
            Lifecycle::Waiting(ticket) => {
                if let Err(e) = self.cx.checkpoint() {
                    self.unwind(ticket);
                    self.lifecycle = Lifecycle::Done;
                    return Poll::Ready(Err(e));
                }
                let status = {
                    let mut state = self.mux.state.borrow_mut();
                    state.queue.poll_slot(ticket, Some(waker))
                };
                self.settle(ticket, status, waker)
            }
            Lifecycle::Done => panic!("acquire future polled after completion"),
        }
    }

    fn settle(
        &mut self,
        ticket: Ticket,
        status: SlotStatus,
        waker: &Waker,
    ) -> Poll<Result<LockHandle>> {
        match status {
            SlotStatus::Runnable => {
                self.lifecycle = Lifecycle::Done;
                Poll::Ready(Ok(make_handle(&self.mux, &self.cx, self.kind, ticket)))
            }
            SlotStatus::Waiting => {
                self.cx.register_cancel_waker(waker);
                self.lifecycle = Lifecycle::Waiting(ticket);
                Poll::Pending
            }
            SlotStatus::Missing => {
                self.lifecycle = Lifecycle::Done;
                Poll::Ready(Err(Error::invariant("pending slot vanished from queue")))
            }
        }
    }

    fn unwind(&self, ticket: Ticket) {
        let mut state = self.mux.state.borrow_mut();
        let mut fx = Effects::new();
        state.queue.abandon(ticket, &mut fx);
        drop(state);
        fx.wake_all();
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        if let Lifecycle::Waiting(ticket) = self.lifecycle {
            self.unwind(ticket);
        }
    }
}

/// Future returned by [`RwMux::acquire_exclusive`].
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct ExclusiveAcquire {
    inner: Acquire,
}

impl Future for ExclusiveAcquire {
    type Output = Result<LockHandle>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_acquire(cx.waker())
    }
}

/// Future returned by [`RwMux::acquire_shared`].
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct SharedAcquire {
    inner: Acquire,
}

impl Future for SharedAcquire {
    type Output = Result<LockHandle>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_acquire(cx.waker())
    }
}
