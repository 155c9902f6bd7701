//! A deterministic single-threaded runtime for tests and embedding.
//!
//! [`LabRuntime`] polls local (`!Send`) futures in FIFO wake order and
//! drives a virtual clock: when every task is stalled, the clock jumps to
//! the next timer deadline. Runs are fully deterministic — the same tasks
//! and timers produce the same interleaving every time.
//!
//! This is where the crate's own end-to-end tests run, and the simplest
//! host for the lock types outside a larger executor.
//!
//! # Example
//!
//! ```
//! use rwmux::lab::LabRuntime;
//!
//! let rt = LabRuntime::new();
//! let timer = rt.clone();
//! let out = rt.block_on(async move {
//!     timer.sleep_ms(250).await;
//!     timer.now().as_millis()
//! });
//! assert_eq!(out, 250);
//! ```

use crate::time::{Time, TimerHeap};
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

/// FIFO queue of woken tasks with O(1) dedup.
///
/// Wakers must be `Send + Sync`, so this is the one corner of the runtime
/// behind a real mutex even though everything is polled on one thread.
#[derive(Debug, Default)]
struct WokenSet {
    queue: Mutex<WokenQueue>,
}

#[derive(Debug, Default)]
struct WokenQueue {
    order: VecDeque<u64>,
    queued: HashSet<u64>,
}

impl WokenSet {
    fn push(&self, task: u64) {
        let mut queue = self.queue.lock();
        if queue.queued.insert(task) {
            queue.order.push_back(task);
        }
    }

    fn pop(&self) -> Option<u64> {
        let mut queue = self.queue.lock();
        let task = queue.order.pop_front()?;
        queue.queued.remove(&task);
        Some(task)
    }
}

struct TaskWaker {
    set: Arc<WokenSet>,
    task: u64,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.set.push(self.task);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.set.push(self.task);
    }
}

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

struct LabInner {
    tasks: RefCell<HashMap<u64, LocalFuture>>,
    next_task: Cell<u64>,
    woken: Arc<WokenSet>,
    timers: RefCell<TimerHeap>,
    clock: Cell<Time>,
}

/// The deterministic local runtime. Clones share the same scheduler.
#[derive(Clone)]
pub struct LabRuntime {
    inner: Rc<LabInner>,
}

impl Default for LabRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl LabRuntime {
    /// Creates a runtime with an empty task set and the clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(LabInner {
                tasks: RefCell::new(HashMap::new()),
                next_task: Cell::new(0),
                woken: Arc::new(WokenSet::default()),
                timers: RefCell::new(TimerHeap::new()),
                clock: Cell::new(Time::ZERO),
            }),
        }
    }

    /// The current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.clock.get()
    }

    /// Spawns a task. It is polled on the next scheduler pass.
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        let task = self.inner.next_task.get();
        self.inner.next_task.set(task + 1);
        self.inner.tasks.borrow_mut().insert(task, Box::pin(future));
        self.inner.woken.push(task);
        tracing::trace!(task, "task spawned");
    }

    /// Sleeps until `duration` of virtual time has passed.
    #[must_use]
    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep {
            inner: Rc::clone(&self.inner),
            deadline: self.now().saturating_add(duration),
            scheduled: false,
        }
    }

    /// Sleeps for `millis` of virtual time.
    #[must_use]
    pub fn sleep_ms(&self, millis: u64) -> Sleep {
        self.sleep(Duration::from_millis(millis))
    }

    /// Polls woken tasks in FIFO order until none is runnable.
    pub fn run_until_stalled(&self) {
        while let Some(task) = self.inner.woken.pop() {
            // The task leaves the table while it runs so its body can
            // spawn and wake freely.
            let Some(mut future) = self.inner.tasks.borrow_mut().remove(&task) else {
                continue;
            };
            let waker = Waker::from(Arc::new(TaskWaker {
                set: Arc::clone(&self.inner.woken),
                task,
            }));
            let mut cx = Context::from_waker(&waker);
            match future.as_mut().poll(&mut cx) {
                Poll::Ready(()) => {
                    tracing::trace!(task, "task completed");
                }
                Poll::Pending => {
                    self.inner.tasks.borrow_mut().insert(task, future);
                }
            }
        }
    }

    /// Jumps the clock to the next timer deadline and fires everything due.
    /// Returns false if no timer is pending.
    pub fn advance_to_next_timer(&self) -> bool {
        let Some(deadline) = self.inner.timers.borrow().peek_deadline() else {
            return false;
        };
        debug_assert!(deadline >= self.inner.clock.get());
        self.inner.clock.set(deadline);
        tracing::trace!(now = %deadline, "clock advanced");
        let expired = self.inner.timers.borrow_mut().pop_expired(deadline);
        for waker in expired {
            waker.wake();
        }
        true
    }

    /// Runs tasks and advances virtual time until nothing can progress.
    pub fn run_until_idle(&self) {
        loop {
            self.run_until_stalled();
            if !self.advance_to_next_timer() {
                return;
            }
        }
    }

    /// Drives `future` (plus any tasks it spawns) to completion.
    ///
    /// # Panics
    ///
    /// Panics if the future is still pending when every task has stalled
    /// and no timer remains — a deadlock in the code under test.
    pub fn block_on<T: 'static>(&self, future: impl Future<Output = T> + 'static) -> T {
        let result = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&result);
        self.spawn(async move {
            let value = future.await;
            *slot.borrow_mut() = Some(value);
        });
        self.run_until_idle();
        let value = result
            .borrow_mut()
            .take()
            .expect("deadlock: main future stalled with no runnable task or timer");
        value
    }

    /// Number of live (incomplete) tasks.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }
}

/// Future returned by [`LabRuntime::sleep`].
#[must_use = "futures do nothing unless awaited"]
pub struct Sleep {
    inner: Rc<LabInner>,
    deadline: Time,
    scheduled: bool,
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.inner.clock.get() >= self.deadline {
            return Poll::Ready(());
        }
        if !self.scheduled {
            let deadline = self.deadline;
            self.inner
                .timers
                .borrow_mut()
                .insert(deadline, cx.waker().clone());
            self.scheduled = true;
        }
        Poll::Pending
    }
}
