//! Readers-writer mutexes for cooperative single-threaded runtimes.
//!
//! Two lock shapes share the queue semantics of [`crate::queue`]:
//!
//! - [`RwMux`]: a lock bound to one logical resource, with re-entrant
//!   writer admission and escalation detection through the [`Cx`] hold
//!   chain.
//! - [`KeyedRwMux`]: a multi-resource lock where keyed acquisitions are
//!   independent per key and unkeyed acquisitions act as a barrier across
//!   all keys.
//!
//! Both produce [`LockHandle`]s: scoped, idempotent, release-on-drop.
//! [`ContextRegistry`] and [`Locked`] attach a lock context to owner
//! values for the instrumentation (decorator) surface.
//!
//! [`Cx`]: crate::Cx

mod handle;
mod instance;
mod keyed;
mod registry;

pub use handle::LockHandle;
pub use instance::{ExclusiveAcquire, RwMux, SharedAcquire};
pub use keyed::{KeyedAcquire, KeyedRwMux, Target};
pub use registry::{ContextRegistry, Locked};
