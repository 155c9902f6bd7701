//! One-shot keyed initialization.
//!
//! An [`OnceCache`] runs an asynchronous initializer at most once per key
//! and caches the result. Concurrent callers for the same key await the
//! in-flight initialization and all receive its outcome.
//!
//! Failure handling is asymmetric on purpose:
//!
//! - if the *synchronous* part of the initializer fails (constructing the
//!   future), no entry is written and the cache is untouched;
//! - if the *asynchronous* part fails, every current waiter receives the
//!   error and the entry is evicted so a later call can retry.

use crate::error::{Error, ErrorKind, Result};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

#[derive(Debug)]
struct PendingInit<T> {
    outcome: Option<Result<T>>,
    wakers: Vec<Waker>,
}

#[derive(Debug)]
enum EntrySlot<T> {
    Ready(T),
    Pending(Rc<RefCell<PendingInit<T>>>),
}

#[derive(Debug)]
struct CacheState<T> {
    entries: HashMap<String, EntrySlot<T>>,
}

/// A per-key once cache for asynchronous initialization.
///
/// Values must be cheap to clone; cache an `Rc` for anything heavier.
/// Clones of the cache share entries.
#[derive(Debug)]
pub struct OnceCache<T> {
    state: Rc<RefCell<CacheState<T>>>,
}

impl<T> Clone for OnceCache<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T> Default for OnceCache<T> {
    fn default() -> Self {
        Self {
            state: Rc::new(RefCell::new(CacheState {
                entries: HashMap::new(),
            })),
        }
    }
}

impl<T: Clone + 'static> OnceCache<T> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, or runs `init` to produce it.
    ///
    /// The first caller for a key becomes the leader: its future runs the
    /// initialization while later callers await the shared outcome. If the
    /// leader is dropped mid-flight, waiters fail and the entry is evicted.
    ///
    /// # Errors
    ///
    /// Propagates `init`'s synchronous error (nothing is cached) or the
    /// initialization future's error (the entry is evicted for retry).
    pub async fn get_or_init<F, Fut>(&self, key: &str, init: F) -> Result<T>
    where
        F: FnOnce() -> Result<Fut>,
        Fut: Future<Output = Result<T>>,
    {
        enum Found<T> {
            Ready(T),
            Pending(Rc<RefCell<PendingInit<T>>>),
            Vacant,
        }

        let found = {
            let state = self.state.borrow();
            match state.entries.get(key) {
                Some(EntrySlot::Ready(value)) => Found::Ready(value.clone()),
                Some(EntrySlot::Pending(pending)) => Found::Pending(Rc::clone(pending)),
                None => Found::Vacant,
            }
        };

        match found {
            Found::Ready(value) => Ok(value),
            Found::Pending(pending) => InitWait { pending }.await,
            Found::Vacant => {
                // The synchronous part runs before anything is written: a
                // failure here leaves the cache untouched.
                let fut = init()?;
                let pending = Rc::new(RefCell::new(PendingInit {
                    outcome: None,
                    wakers: Vec::new(),
                }));
                self.state.borrow_mut().entries.insert(
                    key.to_string(),
                    EntrySlot::Pending(Rc::clone(&pending)),
                );
                tracing::debug!(key, "initialization started");
                let mut guard = LeaderGuard {
                    state: Rc::clone(&self.state),
                    key: key.to_string(),
                    pending,
                    finished: false,
                };
                let outcome = fut.await;
                guard.finish(outcome.clone());
                outcome
            }
        }
    }

    /// Returns the cached value without initializing.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<T> {
        match self.state.borrow().entries.get(key) {
            Some(EntrySlot::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Evicts the entry for `key`. Returns true if a completed entry was
    /// removed; an in-flight initialization is left to finish.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = self.state.borrow_mut();
        match state.entries.get(key) {
            Some(EntrySlot::Ready(_)) => {
                state.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Number of entries, counting in-flight initializations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().entries.len()
    }

    /// Returns true if the cache has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.borrow().entries.is_empty()
    }
}

/// Distributes the outcome, updates the cache entry, and wakes waiters.
/// Runs at most once; the drop path covers an abandoned leader.
struct LeaderGuard<T> {
    state: Rc<RefCell<CacheState<T>>>,
    key: String,
    pending: Rc<RefCell<PendingInit<T>>>,
    finished: bool,
}

impl<T: Clone> LeaderGuard<T> {
    fn finish(&mut self, outcome: Result<T>) {
        if self.finished {
            return;
        }
        self.finished = true;
        let wakers = {
            let mut pending = self.pending.borrow_mut();
            pending.outcome = Some(outcome.clone());
            std::mem::take(&mut pending.wakers)
        };
        {
            let mut state = self.state.borrow_mut();
            match outcome {
                Ok(value) => {
                    state.entries.insert(self.key.clone(), EntrySlot::Ready(value));
                }
                Err(_) => {
                    // Evict so a later call can retry.
                    state.entries.remove(&self.key);
                    tracing::debug!(key = %self.key, "initialization failed, entry evicted");
                }
            }
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T> Drop for LeaderGuard<T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let wakers = {
            let mut pending = self.pending.borrow_mut();
            pending.outcome = Some(Err(Error::new(ErrorKind::User)
                .with_detail("initialization abandoned before completion")));
            std::mem::take(&mut pending.wakers)
        };
        self.state.borrow_mut().entries.remove(&self.key);
        for waker in wakers {
            waker.wake();
        }
    }
}

struct InitWait<T> {
    pending: Rc<RefCell<PendingInit<T>>>,
}

impl<T: Clone> Future for InitWait<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut pending = self.pending.borrow_mut();
        if let Some(outcome) = &pending.outcome {
            return Poll::Ready(outcome.clone());
        }
        let waker = cx.waker();
        if let Some(existing) = pending.wakers.iter_mut().find(|w| w.will_wake(waker)) {
            existing.clone_from(waker);
        } else {
            pending.wakers.push(waker.clone());
        }
        Poll::Pending
    }
}

/// Runs `init` once per `key` on a thread-wide cache and returns the
/// (shared) value.
///
/// This is the convenience form of [`OnceCache`] for values shared across
/// a whole single-threaded runtime. Values are stored type-erased; asking
/// for a key under a different type than it was created with fails.
///
/// # Errors
///
/// Propagates [`OnceCache::get_or_init`] failures, plus a `User` error on
/// a type mismatch for an existing key.
pub async fn singleton<T, F, Fut>(key: &str, init: F) -> Result<Rc<T>>
where
    T: 'static,
    F: FnOnce() -> Result<Fut>,
    Fut: Future<Output = Result<Rc<T>>>,
{
    thread_local! {
        static GLOBAL: OnceCache<Rc<dyn Any>> = OnceCache::default();
    }
    let cache = GLOBAL.with(Clone::clone);
    let value = cache
        .get_or_init(key, || {
            let fut = init()?;
            Ok(async move { fut.await.map(|v| v as Rc<dyn Any>) })
        })
        .await?;
    value
        .downcast::<T>()
        .map_err(|_| Error::new(ErrorKind::User).with_detail(format!("type mismatch for key {key:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::task::Waker;

    fn block_on<T>(mut fut: Pin<&mut impl Future<Output = T>>) -> T {
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        loop {
            if let Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
                return v;
            }
        }
    }

    #[test]
    fn initializes_once_and_caches() {
        let cache: OnceCache<u32> = OnceCache::new();
        let runs = Cell::new(0u32);

        for _ in 0..3 {
            let fut = cache.get_or_init("answer", || {
                runs.set(runs.get() + 1);
                Ok(async { Ok(42) })
            });
            let value = block_on(std::pin::pin!(fut)).expect("ok");
            assert_eq!(value, 42);
        }
        assert_eq!(runs.get(), 1, "initializer ran once");
        assert_eq!(cache.get("answer"), Some(42));
    }

    #[test]
    fn sync_failure_writes_no_entry() {
        let cache: OnceCache<u32> = OnceCache::new();

        let fut = cache.get_or_init("bad", || {
            Err::<std::future::Ready<Result<u32>>, _>(
                Error::new(ErrorKind::User).with_detail("construction failed"),
            )
        });
        let err = block_on(std::pin::pin!(fut)).expect_err("sync failure");
        assert_eq!(err.kind(), ErrorKind::User);
        assert!(cache.is_empty(), "nothing cached on sync failure");
    }

    #[test]
    fn async_failure_evicts_for_retry() {
        let cache: OnceCache<u32> = OnceCache::new();
        let attempts = Cell::new(0u32);

        let failing = cache.get_or_init("flaky", || {
            attempts.set(attempts.get() + 1);
            Ok(async { Err(Error::new(ErrorKind::User).with_detail("boom")) })
        });
        block_on(std::pin::pin!(failing)).expect_err("first attempt fails");
        assert!(cache.is_empty(), "failed entry evicted");

        let retry = cache.get_or_init("flaky", || {
            attempts.set(attempts.get() + 1);
            Ok(async { Ok(7) })
        });
        let value = block_on(std::pin::pin!(retry)).expect("retry succeeds");
        assert_eq!(value, 7);
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn followers_share_the_leaders_outcome() {
        let cache: OnceCache<u32> = OnceCache::new();
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);

        let leader = cache.get_or_init("shared", || {
            Ok(async { Ok(11) })
        });
        let mut leader = Box::pin(leader);

        // The second caller must observe the first caller's outcome; its
        // own initializer must never run.
        let follower = cache.get_or_init("shared", || {
            Ok(async { Ok(99) })
        });
        let mut follower = Box::pin(follower);

        assert!(leader.as_mut().poll(&mut cx).is_ready());
        match follower.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(value)) => assert_eq!(value, 11, "follower got the cached value"),
            other => panic!("follower should be done: {other:?}"),
        }
    }

    #[test]
    fn invalidate_removes_completed_entries() {
        let cache: OnceCache<u32> = OnceCache::new();
        let fut = cache.get_or_init("v", || Ok(async { Ok(1) }));
        block_on(std::pin::pin!(fut)).expect("ok");

        assert!(cache.invalidate("v"));
        assert!(!cache.invalidate("v"), "already gone");
        assert!(cache.is_empty());
    }
}
