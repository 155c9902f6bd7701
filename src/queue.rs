//! The lock-queue state machine.
//!
//! A [`WaitQueue`] is a linear sequence of admission items:
//!
//! - a **writer item** carries an ordered list of steps, one per admitted
//!   exclusive acquirer. The front step is the currently admitted one;
//!   releasing it fires the next. Re-entrant acquisitions by the running
//!   holder join at the front of the list (they run while the outer body is
//!   suspended awaiting them); top-level acquirers coalesce at the back and
//!   run in arrival order.
//! - a **reader item** carries the admitted cohort of shared acquirers.
//!   Arriving readers join the tail reader item; the whole cohort becomes
//!   runnable when the item reaches the head; the item is removed when the
//!   last member releases.
//! - a **barrier item** gates keyed queues on the global queue of a keyed
//!   mux. In the global queue a barrier becomes ready at the head and stays
//!   until its last attached key queue is deleted; in a key queue a barrier
//!   mirror holds the head until resolved externally.
//!
//! Queue invariants:
//!
//! - adjacent items never share a coalescible tag (a new writer item is only
//!   appended when the tail is not a writer; same for readers),
//! - the head writer/reader item is always ready,
//! - reader items hold at least one member and writer items at least one
//!   step while queued; removal happens exactly when the last one goes.
//!
//! Cancellation routes through [`WaitQueue::abandon`]: a slot abandoned
//! while pending is auto-released the moment it would have become runnable,
//! so an abandoned writer step still fires the next step and an abandoned
//! reader still leaves the cohort. The queue ends up in the state it would
//! have had if the acquirer had completed and released immediately.

use crate::diagnostics::{ItemSnapshot, ItemTag, QueueSnapshot};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::task::Waker;

/// The kind of access an acquirer requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Shared (reader) access: parallel with other shared holders.
    Shared,
    /// Exclusive (writer) access: serial with everything.
    Exclusive,
}

impl AccessKind {
    /// Returns a short label for logging.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Exclusive => "exclusive",
        }
    }
}

/// Addresses one admitted slot (a writer step or a reader membership).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket {
    item: u64,
    slot: u64,
}

/// Result of polling a slot for readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotStatus {
    /// The slot is admitted; the acquirer holds the lock.
    Runnable,
    /// Still queued; the waker (if given) has been registered.
    Waiting,
    /// The slot no longer exists (released or abandoned).
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Waiting,
    Runnable,
    Abandoned,
}

#[derive(Debug)]
struct Slot {
    id: u64,
    state: SlotState,
    waker: Option<Waker>,
}

impl Slot {
    fn waiting(id: u64) -> Self {
        Self {
            id,
            state: SlotState::Waiting,
            waker: None,
        }
    }

    fn runnable(id: u64) -> Self {
        Self {
            id,
            state: SlotState::Runnable,
            waker: None,
        }
    }
}

#[derive(Debug)]
enum ItemBody {
    Writer { steps: VecDeque<Slot> },
    Reader { members: Vec<Slot> },
    Barrier { attached: usize, mirror: bool },
}

#[derive(Debug)]
struct Item {
    id: u64,
    ready: bool,
    body: ItemBody,
}

impl Item {
    const fn tag(&self) -> ItemTag {
        match self.body {
            ItemBody::Writer { .. } => ItemTag::Writer,
            ItemBody::Reader { .. } => ItemTag::Reader,
            ItemBody::Barrier { .. } => ItemTag::Barrier,
        }
    }
}

/// Side effects of a queue mutation, applied after releasing the state
/// borrow: wakers to wake and global barriers that became ready.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    wakes: SmallVec<[Waker; 4]>,
    barriers_ready: SmallVec<[u64; 2]>,
}

impl Effects {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Drains the barrier ids that became ready since the last call.
    pub(crate) fn take_barriers_ready(&mut self) -> SmallVec<[u64; 2]> {
        std::mem::take(&mut self.barriers_ready)
    }

    /// Wakes every collected waker. Call with no queue borrow held.
    pub(crate) fn wake_all(self) {
        debug_assert!(
            self.barriers_ready.is_empty(),
            "barrier readiness must be settled before waking"
        );
        for waker in self.wakes {
            waker.wake();
        }
    }
}

/// A FIFO admission queue of writer, reader, and barrier items.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    items: VecDeque<Item>,
    next_item: u64,
    next_slot: u64,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn next_item_id(&mut self) -> u64 {
        let id = self.next_item;
        self.next_item += 1;
        id
    }

    fn next_slot_id(&mut self) -> u64 {
        let id = self.next_slot;
        self.next_slot += 1;
        id
    }

    /// Admits an exclusive acquirer.
    ///
    /// `reentrant` marks an acquisition made from inside the running
    /// exclusive critical section of this queue: it joins the front of the
    /// head writer item's step list and is runnable immediately (the outer
    /// holder is suspended awaiting it). Top-level acquirers coalesce onto a
    /// writer tail or append a fresh writer item.
    pub(crate) fn arrive_writer(&mut self, reentrant: bool, fx: &mut Effects) -> Ticket {
        if reentrant {
            if let Some(item) = self.items.front_mut() {
                if let ItemBody::Writer { steps } = &mut item.body {
                    if item.ready {
                        let slot = self.next_slot;
                        self.next_slot += 1;
                        steps.push_front(Slot::runnable(slot));
                        tracing::trace!(item = item.id, slot, "re-entrant writer admitted");
                        return Ticket {
                            item: item.id,
                            slot,
                        };
                    }
                }
            }
            // The hold chain said exclusive but the head is not a running
            // writer item; treat as a top-level arrival.
            tracing::warn!("re-entrant writer arrival without a running writer head");
        }

        let ticket = match self.items.back_mut() {
            Some(item) => {
                if let ItemBody::Writer { steps } = &mut item.body {
                    let slot = self.next_slot;
                    self.next_slot += 1;
                    steps.push_back(Slot::waiting(slot));
                    tracing::trace!(item = item.id, slot, "writer coalesced");
                    Ticket {
                        item: item.id,
                        slot,
                    }
                } else {
                    self.push_writer_item()
                }
            }
            None => self.push_writer_item(),
        };
        self.advance(fx);
        self.debug_validate();
        ticket
    }

    fn push_writer_item(&mut self) -> Ticket {
        let item = self.next_item_id();
        let slot = self.next_slot_id();
        let mut steps = VecDeque::with_capacity(1);
        steps.push_back(Slot::waiting(slot));
        self.items.push_back(Item {
            id: item,
            ready: false,
            body: ItemBody::Writer { steps },
        });
        tracing::trace!(item, slot, "writer item appended");
        Ticket { item, slot }
    }

    /// Admits a shared acquirer.
    ///
    /// `reentrant` marks an acquisition made from inside a running shared
    /// critical section of this queue: it joins the head reader cohort
    /// directly. Top-level acquirers coalesce into a reader tail or append a
    /// fresh reader item.
    pub(crate) fn arrive_reader(&mut self, reentrant: bool, fx: &mut Effects) -> Ticket {
        if reentrant {
            if let Some(item) = self.items.front_mut() {
                if let ItemBody::Reader { members } = &mut item.body {
                    if item.ready {
                        let slot = self.next_slot;
                        self.next_slot += 1;
                        members.push(Slot::runnable(slot));
                        tracing::trace!(item = item.id, slot, "re-entrant reader admitted");
                        return Ticket {
                            item: item.id,
                            slot,
                        };
                    }
                }
            }
            tracing::warn!("re-entrant reader arrival without a running reader head");
        }

        let ticket = match self.items.back_mut() {
            Some(item) => {
                if let ItemBody::Reader { members } = &mut item.body {
                    let slot = self.next_slot;
                    self.next_slot += 1;
                    let joined = if item.ready {
                        members.push(Slot::runnable(slot));
                        "running cohort"
                    } else {
                        members.push(Slot::waiting(slot));
                        "pending cohort"
                    };
                    tracing::trace!(item = item.id, slot, joined, "reader coalesced");
                    Ticket {
                        item: item.id,
                        slot,
                    }
                } else {
                    self.push_reader_item()
                }
            }
            None => self.push_reader_item(),
        };
        self.advance(fx);
        self.debug_validate();
        ticket
    }

    fn push_reader_item(&mut self) -> Ticket {
        let item = self.next_item_id();
        let slot = self.next_slot_id();
        self.items.push_back(Item {
            id: item,
            ready: false,
            body: ItemBody::Reader {
                members: vec![Slot::waiting(slot)],
            },
        });
        tracing::trace!(item, slot, "reader item appended");
        Ticket { item, slot }
    }

    /// Polls a slot for readiness, registering `waker` while waiting.
    pub(crate) fn poll_slot(&mut self, ticket: Ticket, waker: Option<&Waker>) -> SlotStatus {
        let Some(item) = self.items.iter_mut().find(|i| i.id == ticket.item) else {
            return SlotStatus::Missing;
        };
        let slot = match &mut item.body {
            ItemBody::Writer { steps } => steps.iter_mut().find(|s| s.id == ticket.slot),
            ItemBody::Reader { members } => members.iter_mut().find(|s| s.id == ticket.slot),
            ItemBody::Barrier { .. } => None,
        };
        match slot {
            Some(slot) => match slot.state {
                SlotState::Runnable => SlotStatus::Runnable,
                SlotState::Waiting => {
                    if let Some(waker) = waker {
                        match &mut slot.waker {
                            Some(existing) if existing.will_wake(waker) => {}
                            other => *other = Some(waker.clone()),
                        }
                    }
                    SlotStatus::Waiting
                }
                SlotState::Abandoned => SlotStatus::Missing,
            },
            None => SlotStatus::Missing,
        }
    }

    /// Releases an admitted slot, advancing the queue.
    ///
    /// Releasing a slot that no longer exists is a no-op, which makes the
    /// lock handles idempotent.
    pub(crate) fn release(&mut self, ticket: Ticket, fx: &mut Effects) {
        let Some(index) = self.items.iter().position(|i| i.id == ticket.item) else {
            return;
        };
        let mut item_empty = false;
        match &mut self.items[index].body {
            ItemBody::Writer { steps } => {
                let Some(pos) = steps.iter().position(|s| s.id == ticket.slot) else {
                    return;
                };
                steps.remove(pos);
                tracing::trace!(item = ticket.item, slot = ticket.slot, "writer released");
                item_empty = steps.is_empty();
            }
            ItemBody::Reader { members } => {
                let Some(pos) = members.iter().position(|s| s.id == ticket.slot) else {
                    return;
                };
                members.remove(pos);
                tracing::trace!(item = ticket.item, slot = ticket.slot, "reader released");
                item_empty = members.is_empty();
            }
            ItemBody::Barrier { .. } => {}
        }
        if item_empty {
            self.items.remove(index);
        }
        if index == 0 {
            self.advance(fx);
        }
        self.debug_validate();
    }

    /// Unwinds a cancelled acquirer through the release bookkeeping.
    ///
    /// A runnable slot is released immediately. A pending slot is marked and
    /// auto-released when its turn comes, so the canceled writer step still
    /// fires the next one and the canceled reader still leaves its cohort.
    pub(crate) fn abandon(&mut self, ticket: Ticket, fx: &mut Effects) {
        let mut release_now = false;
        if let Some(item) = self.items.iter_mut().find(|i| i.id == ticket.item) {
            let slot = match &mut item.body {
                ItemBody::Writer { steps } => steps.iter_mut().find(|s| s.id == ticket.slot),
                ItemBody::Reader { members } => members.iter_mut().find(|s| s.id == ticket.slot),
                ItemBody::Barrier { .. } => None,
            };
            match slot {
                Some(slot) if slot.state == SlotState::Runnable => release_now = true,
                Some(slot) if slot.state == SlotState::Waiting => {
                    tracing::trace!(
                        item = ticket.item,
                        slot = ticket.slot,
                        "abandon: pending, deferred"
                    );
                    slot.state = SlotState::Abandoned;
                    slot.waker = None;
                }
                _ => {}
            }
        }
        if release_now {
            tracing::trace!(
                item = ticket.item,
                slot = ticket.slot,
                "abandon: runnable, releasing"
            );
            self.release(ticket, fx);
        } else {
            self.debug_validate();
        }
    }

    /// Ensures a trailing (non-mirror) barrier item and attaches one key
    /// queue to it. Returns the barrier's item id.
    pub(crate) fn attach_barrier(&mut self, fx: &mut Effects) -> u64 {
        if let Some(item) = self.items.back_mut() {
            if let ItemBody::Barrier { attached, mirror } = &mut item.body {
                debug_assert!(!*mirror, "mirror barriers never sit in a global queue");
                *attached += 1;
                tracing::trace!(item = item.id, attached = *attached, "barrier reused");
                return item.id;
            }
        }
        let id = self.next_item_id();
        self.items.push_back(Item {
            id,
            ready: false,
            body: ItemBody::Barrier {
                attached: 1,
                mirror: false,
            },
        });
        tracing::debug!(item = id, "barrier appended");
        self.advance(fx);
        self.debug_validate();
        id
    }

    /// Detaches one key queue from a barrier; a fully detached barrier at
    /// the head is removed and the queue advances past it.
    pub(crate) fn detach_barrier(&mut self, id: u64, fx: &mut Effects) {
        let Some(index) = self.items.iter().position(|i| i.id == id) else {
            return;
        };
        if let ItemBody::Barrier { attached, .. } = &mut self.items[index].body {
            *attached = attached.saturating_sub(1);
            tracing::trace!(item = id, attached = *attached, "barrier detached");
        }
        if index == 0 {
            self.advance(fx);
        }
        self.debug_validate();
    }

    /// Returns true if the barrier with the given id has become ready.
    pub(crate) fn barrier_ready(&self, id: u64) -> bool {
        self.items
            .iter()
            .find(|i| i.id == id)
            .is_some_and(|i| i.ready)
    }

    /// Seeds an empty key queue with a mirror barrier at its head.
    pub(crate) fn push_mirror(&mut self) {
        debug_assert!(self.items.is_empty(), "mirror seeds a fresh queue");
        let id = self.next_item_id();
        self.items.push_back(Item {
            id,
            ready: false,
            body: ItemBody::Barrier {
                attached: 0,
                mirror: true,
            },
        });
    }

    /// Resolves the mirror barrier at the head, admitting the queued work.
    /// A queue without a mirror head is left untouched.
    pub(crate) fn resolve_mirror(&mut self, fx: &mut Effects) {
        let Some(head) = self.items.front_mut() else {
            return;
        };
        if let ItemBody::Barrier { mirror: true, .. } = head.body {
            head.ready = true;
            tracing::trace!(item = head.id, "mirror resolved");
            self.advance(fx);
            self.debug_validate();
        }
    }

    /// Returns true if an arrival of `kind` would be runnable immediately,
    /// without waiting. Used by the non-waiting acquisition forms.
    pub(crate) fn can_admit_now(&self, kind: AccessKind, reentrant: bool) -> bool {
        if reentrant {
            if let Some(head) = self.items.front() {
                match (&head.body, kind) {
                    (ItemBody::Writer { .. }, AccessKind::Exclusive)
                    | (ItemBody::Reader { .. }, AccessKind::Shared) => return head.ready,
                    _ => {}
                }
            }
        }
        match kind {
            AccessKind::Exclusive => self.items.is_empty(),
            AccessKind::Shared => match self.items.back() {
                None => true,
                // The tail reader is also the running head: joining the
                // cohort does not wait.
                Some(item) => matches!(item.body, ItemBody::Reader { .. }) && item.ready,
            },
        }
    }

    /// Returns true if any writer or reader item is queued (including
    /// abandoned slots that still await their auto-release turn).
    pub(crate) fn has_occupants(&self) -> bool {
        self.items
            .iter()
            .any(|i| !matches!(i.body, ItemBody::Barrier { .. }))
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Admits work at the head until the queue stabilizes.
    fn advance(&mut self, fx: &mut Effects) {
        loop {
            let exhausted = {
                let Some(item) = self.items.front_mut() else {
                    return;
                };
                match &mut item.body {
                    ItemBody::Writer { steps } => {
                        item.ready = true;
                        // Auto-release abandoned fronts so the next step fires.
                        while steps
                            .front()
                            .is_some_and(|s| s.state == SlotState::Abandoned)
                        {
                            let slot = steps.pop_front().map(|s| s.id);
                            tracing::trace!(
                                item = item.id,
                                slot,
                                "abandoned writer step auto-released"
                            );
                        }
                        if let Some(step) = steps.front_mut() {
                            if step.state == SlotState::Waiting {
                                step.state = SlotState::Runnable;
                                if let Some(waker) = step.waker.take() {
                                    fx.wakes.push(waker);
                                }
                            }
                            false
                        } else {
                            true
                        }
                    }
                    ItemBody::Reader { members } => {
                        if !item.ready {
                            item.ready = true;
                            for member in members.iter_mut() {
                                if member.state == SlotState::Waiting {
                                    member.state = SlotState::Runnable;
                                    if let Some(waker) = member.waker.take() {
                                        fx.wakes.push(waker);
                                    }
                                }
                            }
                        }
                        members.retain(|m| m.state != SlotState::Abandoned);
                        members.is_empty()
                    }
                    ItemBody::Barrier { attached, mirror } => {
                        if *mirror {
                            if !item.ready {
                                // Gate stays closed until resolved externally.
                                return;
                            }
                            true
                        } else {
                            if !item.ready {
                                item.ready = true;
                                tracing::debug!(item = item.id, "barrier ready");
                                fx.barriers_ready.push(item.id);
                            }
                            *attached == 0
                        }
                    }
                }
            };
            if exhausted {
                self.items.pop_front();
            } else {
                return;
            }
        }
    }

    pub(crate) fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            items: self
                .items
                .iter()
                .map(|item| {
                    let (occupancy, abandoned, attached) = match &item.body {
                        ItemBody::Writer { steps } => (
                            steps.len(),
                            steps
                                .iter()
                                .filter(|s| s.state == SlotState::Abandoned)
                                .count(),
                            0,
                        ),
                        ItemBody::Reader { members } => (
                            members.len(),
                            members
                                .iter()
                                .filter(|s| s.state == SlotState::Abandoned)
                                .count(),
                            0,
                        ),
                        ItemBody::Barrier { attached, .. } => (0, 0, *attached),
                    };
                    ItemSnapshot {
                        tag: item.tag(),
                        ready: item.ready,
                        occupancy,
                        abandoned,
                        attached,
                    }
                })
                .collect(),
        }
    }

    /// Checks the structural invariants; used by debug assertions and tests.
    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        let mut prev: Option<ItemTag> = None;
        for (index, item) in self.items.iter().enumerate() {
            let tag = item.tag();
            if prev == Some(tag) && tag != ItemTag::Barrier {
                return Err(crate::error::Error::invariant(format!(
                    "adjacent {tag:?} items at position {index}"
                )));
            }
            match &item.body {
                ItemBody::Writer { steps } => {
                    if steps.is_empty() {
                        return Err(crate::error::Error::invariant("empty writer item queued"));
                    }
                }
                ItemBody::Reader { members } => {
                    if members.is_empty() {
                        return Err(crate::error::Error::invariant("empty reader item queued"));
                    }
                }
                ItemBody::Barrier { .. } => {}
            }
            if index == 0 && !item.ready && !matches!(item.body, ItemBody::Barrier { .. }) {
                return Err(crate::error::Error::invariant("head item not ready"));
            }
            prev = Some(tag);
        }
        Ok(())
    }

    fn debug_validate(&self) {
        debug_assert!(self.validate().is_ok(), "queue invariant: {:?}", {
            self.validate().err()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runnable(q: &mut WaitQueue, t: Ticket) -> bool {
        matches!(q.poll_slot(t, None), SlotStatus::Runnable)
    }

    #[test]
    fn first_writer_is_admitted_immediately() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let a = q.arrive_writer(false, &mut fx);
        assert!(runnable(&mut q, a));
    }

    #[test]
    fn writers_coalesce_and_run_fifo() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let a = q.arrive_writer(false, &mut fx);
        let b = q.arrive_writer(false, &mut fx);
        let c = q.arrive_writer(false, &mut fx);

        assert_eq!(q.snapshot().items.len(), 1, "coalesced into one item");
        assert!(runnable(&mut q, a));
        assert!(!runnable(&mut q, b));
        assert!(!runnable(&mut q, c));

        q.release(a, &mut fx);
        assert!(runnable(&mut q, b));
        assert!(!runnable(&mut q, c));

        q.release(b, &mut fx);
        assert!(runnable(&mut q, c));

        q.release(c, &mut fx);
        assert!(q.is_empty());
    }

    #[test]
    fn readers_share_a_cohort() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let a = q.arrive_reader(false, &mut fx);
        let b = q.arrive_reader(false, &mut fx);

        assert!(runnable(&mut q, a));
        assert!(runnable(&mut q, b));
        assert_eq!(q.snapshot().items.len(), 1);

        q.release(a, &mut fx);
        assert!(!q.is_empty(), "cohort lives until the last member leaves");
        q.release(b, &mut fx);
        assert!(q.is_empty());
    }

    #[test]
    fn writer_after_readers_waits_for_the_cohort() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let r1 = q.arrive_reader(false, &mut fx);
        let r2 = q.arrive_reader(false, &mut fx);
        let w = q.arrive_writer(false, &mut fx);

        assert!(!runnable(&mut q, w));
        q.release(r1, &mut fx);
        assert!(!runnable(&mut q, w));
        q.release(r2, &mut fx);
        assert!(runnable(&mut q, w));
    }

    #[test]
    fn readers_behind_a_waiting_writer_form_a_fresh_cohort() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let r1 = q.arrive_reader(false, &mut fx);
        let w = q.arrive_writer(false, &mut fx);
        let r2 = q.arrive_reader(false, &mut fx);

        assert!(runnable(&mut q, r1));
        assert!(!runnable(&mut q, r2), "late reader waits behind the writer");
        assert_eq!(q.snapshot().items.len(), 3);

        q.release(r1, &mut fx);
        assert!(runnable(&mut q, w));
        q.release(w, &mut fx);
        assert!(runnable(&mut q, r2));
        q.release(r2, &mut fx);
        assert!(q.is_empty());
    }

    #[test]
    fn reentrant_writer_runs_before_coalesced_sibling() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let outer = q.arrive_writer(false, &mut fx);
        let sibling = q.arrive_writer(false, &mut fx);
        assert!(runnable(&mut q, outer));

        let nested = q.arrive_writer(true, &mut fx);
        assert!(runnable(&mut q, nested), "nested writer admitted at once");
        assert!(!runnable(&mut q, sibling));

        q.release(nested, &mut fx);
        assert!(runnable(&mut q, outer), "outer resumes after nested");
        assert!(!runnable(&mut q, sibling));

        q.release(outer, &mut fx);
        assert!(runnable(&mut q, sibling));
        q.release(sibling, &mut fx);
        assert!(q.is_empty());
    }

    #[test]
    fn reentrant_reader_joins_running_cohort() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let outer = q.arrive_reader(false, &mut fx);
        let w = q.arrive_writer(false, &mut fx);
        let nested = q.arrive_reader(true, &mut fx);

        assert!(runnable(&mut q, nested), "nested reader joins the head cohort");
        q.release(nested, &mut fx);
        q.release(outer, &mut fx);
        assert!(runnable(&mut q, w));
        q.release(w, &mut fx);
    }

    #[test]
    fn abandoned_pending_writer_step_still_fires_next() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let a = q.arrive_writer(false, &mut fx);
        let b = q.arrive_writer(false, &mut fx);
        let c = q.arrive_writer(false, &mut fx);

        q.abandon(b, &mut fx);
        assert!(!runnable(&mut q, c), "abandon keeps queue order");

        q.release(a, &mut fx);
        assert!(runnable(&mut q, c), "abandoned step auto-released in turn");
        q.release(c, &mut fx);
        assert!(q.is_empty());
    }

    #[test]
    fn abandoned_pending_reader_leaves_cohort_on_admission() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let w = q.arrive_writer(false, &mut fx);
        let r1 = q.arrive_reader(false, &mut fx);
        let r2 = q.arrive_reader(false, &mut fx);

        q.abandon(r1, &mut fx);
        q.release(w, &mut fx);

        assert!(runnable(&mut q, r2));
        q.release(r2, &mut fx);
        assert!(q.is_empty(), "abandoned member never lingers");
    }

    #[test]
    fn abandoning_a_runnable_slot_releases_immediately() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let a = q.arrive_writer(false, &mut fx);
        let b = q.arrive_writer(false, &mut fx);

        q.abandon(a, &mut fx);
        assert!(runnable(&mut q, b));
        q.release(b, &mut fx);
        assert!(q.is_empty());
    }

    #[test]
    fn release_is_idempotent() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let a = q.arrive_writer(false, &mut fx);
        let b = q.arrive_writer(false, &mut fx);

        q.release(a, &mut fx);
        q.release(a, &mut fx);
        assert!(runnable(&mut q, b), "double release does not over-advance");
        q.release(b, &mut fx);
        assert!(q.is_empty());
    }

    #[test]
    fn barrier_becomes_ready_at_head_and_leaves_after_detach() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let w = q.arrive_writer(false, &mut fx);
        let barrier = q.attach_barrier(&mut fx);

        assert!(!q.barrier_ready(barrier));
        q.release(w, &mut fx);
        assert!(q.barrier_ready(barrier));
        assert_eq!(fx.take_barriers_ready().into_vec(), vec![barrier]);

        q.detach_barrier(barrier, &mut fx);
        assert!(q.is_empty());
    }

    #[test]
    fn trailing_barrier_is_reused() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let _w = q.arrive_writer(false, &mut fx);
        let b1 = q.attach_barrier(&mut fx);
        let b2 = q.attach_barrier(&mut fx);
        assert_eq!(b1, b2);
        assert_eq!(q.snapshot().items.len(), 2);
    }

    #[test]
    fn mirror_gates_until_resolved() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        q.push_mirror();
        let w = q.arrive_writer(false, &mut fx);

        assert!(!runnable(&mut q, w), "mirror holds the head");
        q.resolve_mirror(&mut fx);
        assert!(runnable(&mut q, w));
        q.release(w, &mut fx);
        assert!(q.is_empty());
    }

    #[test]
    fn snapshot_reports_tags_in_order() {
        let mut q = WaitQueue::new();
        let mut fx = Effects::new();
        let _w = q.arrive_writer(false, &mut fx);
        let _r = q.arrive_reader(false, &mut fx);
        let _b = q.attach_barrier(&mut fx);

        let tags: Vec<ItemTag> = q.snapshot().items.iter().map(|i| i.tag).collect();
        assert_eq!(tags, vec![ItemTag::Writer, ItemTag::Reader, ItemTag::Barrier]);
        assert!(q.validate().is_ok());
    }
}
