//! Cooperative wait/notify primitives: the single-threaded [`Condition`]
//! and the thread-safe, single-waiter [`Blocker`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::task::{Context, Poll, Waker};

use crate::select::{ReadyFn, Selectable};

/// A cooperative condition variable. Coroutines that await
/// [`wait`](Condition::wait) block until something calls
/// [`notify_one`](Condition::notify_one) or
/// [`notify_all`](Condition::notify_all).
///
/// Waiters are woken strictly in FIFO order. Not thread-safe, despite
/// the name: every operation must happen on one scheduler's thread.
#[derive(Default)]
pub struct Condition {
    waiters: RefCell<VecDeque<(u64, Waker)>>,
    next_ticket: Cell<u64>,
}

impl Condition {
    pub fn new() -> Self {
        Condition::default()
    }

    /// Wakes up the longest-waiting coroutine, if any.
    pub fn notify_one(&self) {
        if let Some((_, waker)) = self.waiters.borrow_mut().pop_front() {
            waker.wake();
        }
    }

    /// Wakes up all waiting coroutines.
    pub fn notify_all(&self) {
        let drained: Vec<_> = self.waiters.borrow_mut().drain(..).collect();
        for (_, waker) in drained {
            waker.wake();
        }
    }

    pub fn has_waiters(&self) -> bool {
        !self.waiters.borrow().is_empty()
    }

    /// Parks the current coroutine until notified.
    pub fn wait(&self) -> ConditionWait<'_> {
        ConditionWait {
            cond: self,
            ticket: None,
        }
    }
}

impl Drop for Condition {
    fn drop(&mut self) {
        debug_assert!(
            self.waiters.borrow().is_empty(),
            "Condition dropped with parked waiters"
        );
    }
}

#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ConditionWait<'a> {
    cond: &'a Condition,
    ticket: Option<u64>,
}

impl Future for ConditionWait<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.ticket {
            None => {
                let ticket = self.cond.next_ticket.get();
                self.cond.next_ticket.set(ticket + 1);
                self.cond
                    .waiters
                    .borrow_mut()
                    .push_back((ticket, cx.waker().clone()));
                self.ticket = Some(ticket);
                Poll::Pending
            }
            Some(ticket) => {
                let mut waiters = self.cond.waiters.borrow_mut();
                if let Some(entry) = waiters.iter_mut().find(|(t, _)| *t == ticket) {
                    // Spurious resume: stay queued with a fresh waker.
                    entry.1 = cx.waker().clone();
                    Poll::Pending
                } else {
                    drop(waiters);
                    self.ticket = None;
                    Poll::Ready(())
                }
            }
        }
    }
}

impl Drop for ConditionWait<'_> {
    fn drop(&mut self) {
        // Cancelled while still queued: withdraw, so a later notify does
        // not go to a dead waiter.
        if let Some(ticket) = self.ticket {
            self.cond.waiters.borrow_mut().retain(|(t, _)| *t != ticket);
        }
    }
}

// Blocker states.
const INITIAL: u8 = 0;
const WAITING: u8 = 1;
const READY: u8 = 2;

/// A single-waiter latch that adapts completion callbacks to awaits:
/// start an operation, await the blocker, and have the operation's
/// callback deliver the result with [`notify`](Blocker::notify) — from
/// any thread.
///
/// If `notify` runs before the await, the await returns immediately.
/// Reusable via [`reset`](Blocker::reset). At most one coroutine may
/// wait at a time; use [`Condition`] for multiple waiters.
pub struct Blocker<T> {
    state: AtomicU8,
    slot: Mutex<BlockerSlot<T>>,
}

struct BlockerSlot<T> {
    value: Option<T>,
    waker: Option<Waker>,
    on_ready: Option<ReadyFn>,
}

impl<T> Blocker<T> {
    pub fn new() -> Self {
        Blocker {
            state: AtomicU8::new(INITIAL),
            slot: Mutex::new(BlockerSlot {
                value: None,
                waker: None,
                on_ready: None,
            }),
        }
    }

    /// Delivers the value and wakes the waiter. Thread-safe.
    pub fn notify(&self, value: T) {
        let (waker, on_ready) = {
            let mut slot = self.slot.lock().unwrap();
            debug_assert!(slot.value.is_none(), "Blocker notified twice without a reset");
            slot.value = Some(value);
            self.state.store(READY, Ordering::Release);
            (slot.waker.take(), slot.on_ready.take())
        };
        if let Some(f) = on_ready {
            f();
        }
        if let Some(w) = waker {
            w.wake();
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// Re-arms a notified blocker for reuse.
    pub fn reset(&self) {
        debug_assert!(self.slot.lock().unwrap().value.is_none());
        self.state.store(INITIAL, Ordering::Release);
    }

    /// Parks the current coroutine until [`notify`](Blocker::notify);
    /// resolves to the notified value.
    pub fn wait(&self) -> BlockerWait<'_, T> {
        BlockerWait { blocker: self }
    }
}

impl<T> Default for Blocker<T> {
    fn default() -> Self {
        Blocker::new()
    }
}

#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct BlockerWait<'a, T> {
    blocker: &'a Blocker<T>,
}

impl<T> Future for BlockerWait<'_, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut slot = self.blocker.slot.lock().unwrap();
        if self.blocker.state.load(Ordering::Acquire) == READY {
            let value = slot.value.take().expect("Blocker value already consumed");
            Poll::Ready(value)
        } else {
            slot.waker = Some(cx.waker().clone());
            self.blocker.state.store(WAITING, Ordering::Release);
            Poll::Pending
        }
    }
}

impl<T> Selectable for Blocker<T> {
    fn on_ready(&self, f: Option<ReadyFn>) {
        let Some(f) = f else {
            self.slot.lock().unwrap().on_ready = None;
            return;
        };
        let fire_now = {
            let mut slot = self.slot.lock().unwrap();
            if self.is_ready() {
                Some(f)
            } else {
                slot.on_ready = Some(f);
                None
            }
        };
        if let Some(f) = fire_now {
            f();
        }
    }
}
