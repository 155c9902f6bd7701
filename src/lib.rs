//! Asynchronous readers-writer mutexes for single-threaded cooperative
//! runtimes.
//!
//! This crate serializes asynchronous operations over logical resources
//! while letting read-only operations run in parallel, with FIFO fairness
//! across contending acquirers:
//!
//! - [`RwMux`] locks one resource. Exclusive acquirers run serially in
//!   arrival order; shared acquirers coalesce into cohorts that run
//!   together. Nested exclusive-in-exclusive acquisition through the
//!   acquired scope is re-entrant, and shared-to-exclusive escalation is
//!   detected and rejected before it can deadlock.
//! - [`KeyedRwMux`] locks a family of resources addressed by string key.
//!   Keys are independent of each other; an unkeyed acquisition is a
//!   barrier that waits for and blocks all keyed work.
//!
//! Acquisitions take an explicit capability context, [`Cx`], carrying the
//! optional [`CancelToken`] and the hold chain used for escalation
//! detection. Granted locks are [`LockHandle`]s: scoped, idempotent,
//! release-on-drop.
//!
//! Everything is built for a single-threaded cooperative scheduler: state
//! lives in `Rc`/`RefCell`, futures are `!Send`, and between any two
//! suspension points queue mutations are atomic. The bundled
//! [`lab::LabRuntime`] is a deterministic executor with virtual time that
//! hosts the crate's own end-to-end tests.
//!
//! # Example
//!
//! ```
//! use rwmux::{Cx, RwMux};
//! use rwmux::lab::LabRuntime;
//!
//! let rt = LabRuntime::new();
//! let out = rt.block_on(async {
//!     let mux = RwMux::new();
//!     let cx = Cx::new();
//!     mux.exclusive(&cx, |scope| async move {
//!         // Exclusive admission; `scope` re-enters this mux without
//!         // deadlocking and trips on shared-to-exclusive escalation.
//!         drop(scope);
//!         Ok(2 + 2)
//!     })
//!     .await
//! });
//! assert_eq!(out.unwrap(), 4);
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod config;
mod cx;
pub mod diagnostics;
pub mod error;
pub mod lab;
pub mod locale;
mod queue;
pub mod singleton;
pub mod sync;
pub mod test_logging;
pub mod time;

pub use cancel::{CancelKind, CancelReason, CancelToken};
pub use config::{ConfigError, MuxConfig};
pub use cx::Cx;
pub use error::{Error, ErrorCategory, ErrorKind, Result, ResultExt};
pub use locale::{default_locale, set_default_locale, Locale};
pub use queue::AccessKind;
pub use singleton::{singleton, OnceCache};
pub use sync::{
    ContextRegistry, ExclusiveAcquire, KeyedAcquire, KeyedRwMux, LockHandle, Locked, RwMux,
    SharedAcquire, Target,
};
