//! Observational snapshots of lock state.
//!
//! Snapshots are taken under the state borrow and never mutate anything;
//! they exist for debugging, test assertions, and structured artifacts
//! (every snapshot serializes to JSON).

use serde::Serialize;
use std::collections::BTreeMap;

/// The tag of one queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemTag {
    /// An exclusive slot (step list of coalesced and re-entrant writers).
    Writer,
    /// A shared cohort.
    Reader,
    /// A keyed-mux barrier or barrier mirror.
    Barrier,
}

/// One queue item at observation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ItemSnapshot {
    /// The item's tag.
    pub tag: ItemTag,
    /// Whether the item has been admitted at the head.
    pub ready: bool,
    /// Writer steps or reader members currently queued, abandoned ones
    /// included.
    pub occupancy: usize,
    /// How many of those are abandoned and awaiting auto-release.
    pub abandoned: usize,
    /// Key queues attached (barriers only).
    pub attached: usize,
}

/// An ordered view of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct QueueSnapshot {
    /// Items from head to tail.
    pub items: Vec<ItemSnapshot>,
}

impl QueueSnapshot {
    /// The item tags from head to tail.
    #[must_use]
    pub fn tags(&self) -> Vec<ItemTag> {
        self.items.iter().map(|i| i.tag).collect()
    }

    /// Checks that no two adjacent items carry the same coalescible tag.
    #[must_use]
    pub fn adjacency_ok(&self) -> bool {
        self.items.windows(2).all(|pair| {
            pair[0].tag != pair[1].tag || pair[0].tag == ItemTag::Barrier
        })
    }
}

/// Snapshot of an instance mutex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MuxSnapshot {
    /// The single admission queue.
    pub queue: QueueSnapshot,
}

impl MuxSnapshot {
    /// Serializes the snapshot for artifacts.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("snapshot serializes")
    }
}

/// Snapshot of a keyed mutex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyedSnapshot {
    /// The global queue (writers, readers, barriers).
    pub global: QueueSnapshot,
    /// Per-key queues, in key order.
    pub keys: BTreeMap<String, QueueSnapshot>,
}

impl KeyedSnapshot {
    /// Serializes the snapshot for artifacts.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("snapshot serializes")
    }
}
