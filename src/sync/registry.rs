//! Attaching lock contexts to owner values.
//!
//! The scoped acquisition forms need to answer "which lock does this owner
//! use?". Two renditions are provided:
//!
//! - [`Locked<T>`] embeds the lock context next to the value it guards —
//!   the preferred form when the owner type is yours to define.
//! - [`ContextRegistry`] associates a lazily created context with an owner
//!   it cannot modify, keyed on the owner's identity (address plus type).
//!   The association must be [`detach`](ContextRegistry::detach)ed when
//!   the owner is retired; attaching a different type at a live address is
//!   reported as an instrumentation failure.

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::sync::instance::RwMux;
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

#[derive(Debug)]
struct RegistryEntry {
    type_id: TypeId,
    mux: RwMux,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<usize, RegistryEntry>,
    capacity: Option<usize>,
}

/// An identity-keyed association from owner values to lock contexts.
///
/// The context for an owner is created lazily on first use and found again
/// on every later call with the same owner. Identity is the owner's address
/// together with its type, so two owners of different types at the same
/// address (zero-sized values, reused allocations after [`detach`]) never
/// share a context.
///
/// [`detach`]: Self::detach
#[derive(Debug, Clone, Default)]
pub struct ContextRegistry {
    state: Rc<RefCell<RegistryState>>,
}

impl ContextRegistry {
    /// Creates an unbounded registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that refuses to hold more than `capacity` owner
    /// contexts at a time.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(RegistryState {
                entries: HashMap::new(),
                capacity: Some(capacity),
            })),
        }
    }

    /// Obtains or lazily creates the lock context for `owner`.
    ///
    /// # Errors
    ///
    /// Fails with `Instrumentation` when the owner's address is currently
    /// registered under a different type, or when the registry is at
    /// capacity.
    pub fn context_for<T: 'static>(&self, owner: &T) -> Result<RwMux> {
        let key = std::ptr::from_ref(owner) as usize;
        let type_id = TypeId::of::<T>();
        let mut state = self.state.borrow_mut();
        if let Some(entry) = state.entries.get(&key) {
            if entry.type_id != type_id {
                return Err(Error::instrumentation(format!(
                    "address {key:#x} is registered under a different owner type"
                )));
            }
            return Ok(entry.mux.clone());
        }
        if let Some(capacity) = state.capacity {
            if state.entries.len() >= capacity {
                return Err(Error::instrumentation(format!(
                    "registry capacity {capacity} exhausted"
                )));
            }
        }
        let mux = RwMux::new();
        tracing::debug!(owner = key, "lock context attached");
        state.entries.insert(
            key,
            RegistryEntry {
                type_id,
                mux: mux.clone(),
            },
        );
        Ok(mux)
    }

    /// Removes the association for `owner`. Returns true if one existed.
    ///
    /// Call this when the owner is retired so a later allocation at the
    /// same address starts fresh.
    pub fn detach<T: 'static>(&self, owner: &T) -> bool {
        let key = std::ptr::from_ref(owner) as usize;
        let mut state = self.state.borrow_mut();
        match state.entries.get(&key) {
            Some(entry) if entry.type_id == TypeId::of::<T>() => {
                state.entries.remove(&key);
                tracing::debug!(owner = key, "lock context detached");
                true
            }
            _ => false,
        }
    }

    /// Number of attached owner contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().entries.len()
    }

    /// Returns true if no owner context is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.borrow().entries.is_empty()
    }
}

/// A value paired with its own lock context.
///
/// This is the embed form of owner instrumentation: operations over the
/// value run through the scoped acquisition forms of the embedded
/// [`RwMux`]. The lock serializes the operations; the value itself is
/// handed to bodies by shared reference.
#[derive(Debug)]
pub struct Locked<T> {
    value: T,
    mux: RwMux,
}

impl<T> Locked<T> {
    /// Wraps a value with a fresh lock context.
    pub fn new(value: T) -> Self {
        Self {
            value,
            mux: RwMux::new(),
        }
    }

    /// The embedded lock context.
    #[must_use]
    pub fn mux(&self) -> &RwMux {
        &self.mux
    }

    /// Runs `body` over the value under exclusive admission.
    ///
    /// # Errors
    ///
    /// Propagates acquisition failures and the body's own error.
    pub async fn exclusive<'a, R, F, Fut>(&'a self, cx: &Cx, body: F) -> Result<R>
    where
        F: FnOnce(&'a T, Cx) -> Fut,
        Fut: Future<Output = Result<R>> + 'a,
    {
        self.mux.exclusive(cx, |scope| body(&self.value, scope)).await
    }

    /// Runs `body` over the value under shared admission.
    ///
    /// # Errors
    ///
    /// Propagates acquisition failures and the body's own error.
    pub async fn shared<'a, R, F, Fut>(&'a self, cx: &Cx, body: F) -> Result<R>
    where
        F: FnOnce(&'a T, Cx) -> Fut,
        Fut: Future<Output = Result<R>> + 'a,
    {
        self.mux.shared(cx, |scope| body(&self.value, scope)).await
    }

    /// Returns the value, discarding the lock context.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Unguarded access to the value.
    #[must_use]
    pub fn get(&self) -> &T {
        &self.value
    }
}
