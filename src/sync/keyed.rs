//! The keyed readers-writer mutex.
//!
//! A [`KeyedRwMux`] serializes operations per key while keeping distinct
//! keys independent. Unkeyed acquisitions act as a barrier: they wait for
//! all keyed work admitted before them and block keyed work admitted after
//! them (for keys that existed when they arrived).
//!
//! Internally the mux holds one global queue plus one queue per live key.
//!
//! - A keyed acquisition on a live key arrives on that key's queue only.
//! - A keyed acquisition on a fresh key attaches to the trailing barrier
//!   item of the global queue (creating one if the tail is not a barrier)
//!   and seeds the new key queue behind a mirror of it, so nothing in the
//!   key runs before the barrier reaches the global head.
//! - An unkeyed acquisition with no live keys is a plain arrival on the
//!   global queue. With live keys it fans out: one arrival on every
//!   current key queue, ready when all of them are, released as one.
//!
//! Key queues are deleted when they drain; a barrier whose last key queue
//! is gone leaves the global queue when it reaches the head. A key created
//! while an unkeyed fan-out acquirer is still pending seeds behind the
//! current trailing barrier and is independent of that acquirer.

use crate::cx::Cx;
use crate::diagnostics::KeyedSnapshot;
use crate::error::{Error, Result};
use crate::queue::{AccessKind, Effects, SlotStatus, Ticket, WaitQueue};
use crate::sync::handle::LockHandle;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Selects the scope of a keyed acquisition.
///
/// A `&str` converts into the keyed form, so call sites can pass a key
/// directly: `mux.acquire_exclusive(&cx, "tenant-7")`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    /// The barrier scope: waits for and blocks all keys.
    Global,
    /// One key, independent of all other keys.
    Key(&'a str),
}

impl<'a> From<&'a str> for Target<'a> {
    fn from(key: &'a str) -> Self {
        Self::Key(key)
    }
}

impl<'a> From<&'a String> for Target<'a> {
    fn from(key: &'a String) -> Self {
        Self::Key(key)
    }
}

impl<'a> From<Option<&'a str>> for Target<'a> {
    fn from(key: Option<&'a str>) -> Self {
        key.map_or(Self::Global, Self::Key)
    }
}

#[derive(Debug)]
struct KeyEntry {
    queue: WaitQueue,
    /// Id of the global barrier item this key queue is attached to.
    barrier: u64,
}

#[derive(Debug)]
pub(crate) struct KeyedShared {
    pub(crate) state: RefCell<KeyedState>,
}

#[derive(Debug, Default)]
pub(crate) struct KeyedState {
    global: WaitQueue,
    keys: BTreeMap<String, KeyEntry>,
}

/// Where an admitted keyed acquisition lives, and how to release it.
#[derive(Debug, Clone)]
pub(crate) enum KeyedGrant {
    Global(Ticket),
    Keyed { key: String, ticket: Ticket },
    /// Unkeyed fan-out: one slot per key queue that existed at arrival.
    Barrier(Vec<(String, Ticket)>),
}

impl KeyedState {
    fn admit(&mut self, kind: AccessKind, key: Option<&str>, fx: &mut Effects) -> KeyedGrant {
        let grant = match key {
            Some(key) => {
                if let Some(entry) = self.keys.get_mut(key) {
                    let ticket = arrive(&mut entry.queue, kind, fx);
                    KeyedGrant::Keyed {
                        key: key.to_string(),
                        ticket,
                    }
                } else {
                    let barrier = self.global.attach_barrier(fx);
                    let mut queue = WaitQueue::new();
                    if !self.global.barrier_ready(barrier) {
                        queue.push_mirror();
                    }
                    let ticket = arrive(&mut queue, kind, fx);
                    tracing::debug!(key, barrier, "key queue created");
                    self.keys
                        .insert(key.to_string(), KeyEntry { queue, barrier });
                    KeyedGrant::Keyed {
                        key: key.to_string(),
                        ticket,
                    }
                }
            }
            None if self.keys.is_empty() => KeyedGrant::Global(arrive(&mut self.global, kind, fx)),
            None => {
                // Fan-out: one arrival per live key queue, in key order.
                let slots = self
                    .keys
                    .iter_mut()
                    .map(|(key, entry)| (key.clone(), arrive(&mut entry.queue, kind, fx)))
                    .collect();
                tracing::debug!(kind = kind.label(), "barrier fan-out admitted");
                KeyedGrant::Barrier(slots)
            }
        };
        self.settle(fx);
        grant
    }

    fn poll_grant(&mut self, grant: &KeyedGrant, waker: &Waker) -> SlotStatus {
        match grant {
            KeyedGrant::Global(ticket) => self.global.poll_slot(*ticket, Some(waker)),
            KeyedGrant::Keyed { key, ticket } => match self.keys.get_mut(key) {
                Some(entry) => entry.queue.poll_slot(*ticket, Some(waker)),
                None => SlotStatus::Missing,
            },
            KeyedGrant::Barrier(slots) => {
                let mut all = SlotStatus::Runnable;
                for (key, ticket) in slots {
                    let status = match self.keys.get_mut(key) {
                        Some(entry) => entry.queue.poll_slot(*ticket, Some(waker)),
                        None => SlotStatus::Missing,
                    };
                    match status {
                        SlotStatus::Runnable => {}
                        SlotStatus::Waiting => all = SlotStatus::Waiting,
                        SlotStatus::Missing => return SlotStatus::Missing,
                    }
                }
                all
            }
        }
    }

    pub(crate) fn release(&mut self, grant: &KeyedGrant, fx: &mut Effects) {
        match grant {
            KeyedGrant::Global(ticket) => self.global.release(*ticket, fx),
            KeyedGrant::Keyed { key, ticket } => {
                if let Some(entry) = self.keys.get_mut(key) {
                    entry.queue.release(*ticket, fx);
                }
            }
            KeyedGrant::Barrier(slots) => {
                for (key, ticket) in slots {
                    if let Some(entry) = self.keys.get_mut(key) {
                        entry.queue.release(*ticket, fx);
                    }
                }
            }
        }
        self.settle(fx);
    }

    fn abandon(&mut self, grant: &KeyedGrant, fx: &mut Effects) {
        match grant {
            KeyedGrant::Global(ticket) => self.global.abandon(*ticket, fx),
            KeyedGrant::Keyed { key, ticket } => {
                if let Some(entry) = self.keys.get_mut(key) {
                    entry.queue.abandon(*ticket, fx);
                }
            }
            KeyedGrant::Barrier(slots) => {
                for (key, ticket) in slots {
                    if let Some(entry) = self.keys.get_mut(key) {
                        entry.queue.abandon(*ticket, fx);
                    }
                }
            }
        }
        self.settle(fx);
    }

    /// Propagates barrier readiness into key-queue mirrors and deletes
    /// drained key queues until the state stabilizes.
    fn settle(&mut self, fx: &mut Effects) {
        loop {
            let mut progressed = false;

            let ready = fx.take_barriers_ready();
            if !ready.is_empty() {
                for entry in self.keys.values_mut() {
                    if ready.contains(&entry.barrier) {
                        entry.queue.resolve_mirror(fx);
                        progressed = true;
                    }
                }
            }

            let drained: Vec<String> = self
                .keys
                .iter()
                .filter(|(_, entry)| !entry.queue.has_occupants())
                .map(|(key, _)| key.clone())
                .collect();
            for key in drained {
                if let Some(entry) = self.keys.remove(&key) {
                    tracing::debug!(key = %key, "key queue drained");
                    self.global.detach_barrier(entry.barrier, fx);
                    progressed = true;
                }
            }

            if !progressed {
                return;
            }
        }
    }
}

fn arrive(queue: &mut WaitQueue, kind: AccessKind, fx: &mut Effects) -> Ticket {
    match kind {
        AccessKind::Exclusive => queue.arrive_writer(false, fx),
        AccessKind::Shared => queue.arrive_reader(false, fx),
    }
}

/// A keyed asynchronous readers-writer mutex.
///
/// Keyed acquisitions serialize per key and run independently across keys;
/// unkeyed acquisitions are admitted as a barrier over all keys. Clones
/// share the same queues.
///
/// Like [`RwMux`](crate::RwMux), all futures produced here are `!Send` and
/// belong on a single-threaded cooperative executor.
#[derive(Debug, Clone, Default)]
pub struct KeyedRwMux {
    shared: Rc<KeyedShared>,
}

impl Default for KeyedShared {
    fn default() -> Self {
        Self {
            state: RefCell::new(KeyedState::default()),
        }
    }
}

impl KeyedRwMux {
    /// Creates a new, idle keyed mutex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires exclusive access, runs `body`, and releases before the
    /// body's result is returned.
    ///
    /// # Errors
    ///
    /// Fails with `Cancelled` when the context's token fires before
    /// admission, and with whatever the body itself returns.
    pub async fn exclusive<'t, T, F, Fut>(
        &self,
        cx: &Cx,
        target: impl Into<Target<'t>>,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut handle = self.acquire_exclusive(cx, target).await?;
        let scope = handle.scope().clone();
        let out = body(scope).await;
        handle.release();
        out
    }

    /// Acquires shared access, runs `body`, and releases before the body's
    /// result is returned.
    ///
    /// # Errors
    ///
    /// Fails with `Cancelled` when the context's token fires before
    /// admission, and with whatever the body itself returns.
    pub async fn shared<'t, T, F, Fut>(
        &self,
        cx: &Cx,
        target: impl Into<Target<'t>>,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut handle = self.acquire_shared(cx, target).await?;
        let scope = handle.scope().clone();
        let out = body(scope).await;
        handle.release();
        out
    }

    /// Begins a manual exclusive acquisition on the given target.
    pub fn acquire_exclusive<'t>(&self, cx: &Cx, target: impl Into<Target<'t>>) -> KeyedAcquire {
        self.acquire(cx, AccessKind::Exclusive, target.into())
    }

    /// Begins a manual shared acquisition on the given target.
    pub fn acquire_shared<'t>(&self, cx: &Cx, target: impl Into<Target<'t>>) -> KeyedAcquire {
        self.acquire(cx, AccessKind::Shared, target.into())
    }

    fn acquire(&self, cx: &Cx, kind: AccessKind, target: Target<'_>) -> KeyedAcquire {
        KeyedAcquire {
            mux: Rc::clone(&self.shared),
            cx: cx.clone(),
            kind,
            key: match target {
                Target::Global => None,
                Target::Key(key) => Some(key.to_string()),
            },
            lifecycle: KeyedLifecycle::Start,
        }
    }

    /// Returns true if no acquirer holds or waits on any queue.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.borrow();
        state.keys.is_empty() && !state.global.has_occupants()
    }

    /// Returns the number of live key queues.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.shared.state.borrow().keys.len()
    }

    /// Takes an observational snapshot of the global and per-key queues.
    #[must_use]
    pub fn snapshot(&self) -> KeyedSnapshot {
        let state = self.shared.state.borrow();
        KeyedSnapshot {
            global: state.global.snapshot(),
            keys: state
                .keys
                .iter()
                .map(|(key, entry)| (key.clone(), entry.queue.snapshot()))
                .collect(),
        }
    }
}

#[derive(Debug)]
enum KeyedLifecycle {
    Start,
    Waiting(KeyedGrant),
    Done,
}

/// Future returned by the keyed acquisition methods.
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct KeyedAcquire {
    mux: Rc<KeyedShared>,
    cx: Cx,
    kind: AccessKind,
    key: Option<String>,
    lifecycle: KeyedLifecycle,
}

impl KeyedAcquire {
    fn unwind(&self, grant: &KeyedGrant) {
        let mut state = self.mux.state.borrow_mut();
        let mut fx = Effects::new();
        state.abandon(grant, &mut fx);
        drop(state);
        fx.wake_all();
    }

    fn settle(&mut self, grant: KeyedGrant, status: SlotStatus, waker: &Waker) -> Poll<Result<LockHandle>> {
        match status {
            SlotStatus::Runnable => {
                self.lifecycle = KeyedLifecycle::Done;
                Poll::Ready(Ok(LockHandle::keyed(
                    Rc::clone(&self.mux),
                    grant,
                    self.cx.clone(),
                    self.kind,
                )))
            }
            SlotStatus::Waiting => {
                self.cx.register_cancel_waker(waker);
                self.lifecycle = KeyedLifecycle::Waiting(grant);
                Poll::Pending
            }
            SlotStatus::Missing => {
                self.lifecycle = KeyedLifecycle::Done;
                Poll::Ready(Err(Error::invariant("pending slot vanished from queue")))
            }
        }
    }
}

impl Future for KeyedAcquire {
    type Output = Result<LockHandle>;

    fn poll(mut self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match &this.lifecycle {
            KeyedLifecycle::Start => {
                // Pre-check: an already-cancelled acquisition never touches
                // the queues.
                if let Err(e) = this.cx.checkpoint() {
                    this.lifecycle = KeyedLifecycle::Done;
                    return Poll::Ready(Err(e));
                }
                let (grant, status) = {
                    let mut state = this.mux.state.borrow_mut();
                    let mut fx = Effects::new();
                    let grant = state.admit(this.kind, this.key.as_deref(), &mut fx);
                    let status = state.poll_grant(&grant, task_cx.waker());
                    drop(state);
                    fx.wake_all();
                    (grant, status)
                };
                this.settle(grant, status, task_cx.waker())
            }
            KeyedLifecycle::Waiting(grant) => {
                let grant = grant.clone();
                if let Err(e) = this.cx.checkpoint() {
                    this.unwind(&grant);
                    this.lifecycle = KeyedLifecycle::Done;
                    return Poll::Ready(Err(e));
                }
                let status = {
                    let mut state = this.mux.state.borrow_mut();
                    state.poll_grant(&grant, task_cx.waker())
                };
                this.settle(grant, status, task_cx.waker())
            }
            KeyedLifecycle::Done => panic!("acquire future polled after completion"),
        }
    }
}

impl Drop for KeyedAcquire {
    fn drop(&mut self) {
        if let KeyedLifecycle::Waiting(grant) = &self.lifecycle {
            let grant = grant.clone();
            self.unwind(&grant);
        }
    }
}
