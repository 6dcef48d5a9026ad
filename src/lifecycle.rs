//! Accounting for coroutine state transitions. Diagnostic only: nothing
//! here affects scheduling decisions, and every hook may be a no-op
//! without changing the runtime's semantics.

use std::cell::Cell;

use crate::scheduler::id_alloc::Id;

thread_local! {
    // Coroutines are thread-affine, so a per-thread count is exact: a
    // migrating coroutine is `ended` on the source thread and `created`
    // on the target.
    static LIVE: Cell<usize> = const { Cell::new(0) };
}

/// Number of live coroutine frames owned by the current thread.
pub fn count() -> usize {
    LIVE.with(|c| c.get())
}

pub(crate) fn created(id: Id) {
    LIVE.with(|c| c.set(c.get() + 1));
    log::trace!("coro {id:?} created");
}

pub(crate) fn resumed(id: Id) {
    log::trace!("coro {id:?} resumed");
}

pub(crate) fn suspended(id: Id) {
    log::trace!("coro {id:?} suspended");
}

pub(crate) fn ready(id: Id) {
    log::trace!("coro {id:?} ready");
}

pub(crate) fn ended(id: Id) {
    LIVE.with(|c| c.set(c.get() - 1));
    log::trace!("coro {id:?} ended");
}
