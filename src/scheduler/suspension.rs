//! The parked half of a suspended coroutine.
//!
//! Every time the executor parks a coroutine it creates a fresh
//! [`Suspension`], keeps one reference in the scheduler's suspended map,
//! and hands the other out as the [`Waker`] for that poll. The waker side
//! may travel to any thread; the single false→true transition of the wake
//! flag is the only synchronizing event between it and the scheduler.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Wake, Waker};

use crate::scheduler::id_alloc::Id;
use crate::scheduler::Shared;

const WAKE: u8 = 1;
const CANCELLED: u8 = 2;

/// State machine: Active → (wake requested | cancelled) → swept.
///
/// A `Suspension` never touches the suspended map itself: it flags itself
/// and nudges the scheduler, whose sweep (on its own thread) re-queues or
/// reaps the entry. That keeps every map mutation on the owning thread,
/// and the `Arc` keeps the flags alive for late wakers.
pub(crate) struct Suspension {
    id: Id,
    flags: AtomicU8,
    sched: Arc<Shared>,
}

impl Suspension {
    pub(crate) fn new(id: Id, sched: Arc<Shared>) -> Self {
        Suspension {
            id,
            flags: AtomicU8::new(0),
            sched,
        }
    }

    /// Make the parked coroutine runnable again. Thread-safe and
    /// idempotent: only the first call notifies the scheduler.
    pub(crate) fn wake_up(&self) {
        let prev = self.flags.fetch_or(WAKE, Ordering::AcqRel);
        if prev & (WAKE | CANCELLED) == 0 {
            log::trace!("suspension {:?} woken", self.id);
            self.sched.wake_up();
        }
    }

    /// Disconnect the parked coroutine: the sweep will drop the entry
    /// instead of re-queueing it. Used when the frame is about to be
    /// destroyed while a waker may still be in flight.
    pub(crate) fn cancel(&self) {
        let prev = self.flags.fetch_or(WAKE | CANCELLED, Ordering::AcqRel);
        if prev & WAKE == 0 {
            log::trace!("suspension {:?} cancelled", self.id);
            self.sched.wake_up();
        }
    }

    pub(crate) fn wake_requested(&self) -> bool {
        self.flags.load(Ordering::Acquire) & WAKE != 0
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.flags.load(Ordering::Acquire) & CANCELLED != 0
    }

    pub(crate) fn waker(self: &Arc<Self>) -> Waker {
        Waker::from(Arc::clone(self))
    }
}

impl Wake for Suspension {
    fn wake(self: Arc<Self>) {
        self.wake_up();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.wake_up();
    }
}
