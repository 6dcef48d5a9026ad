//! Awaiting the first ready of several sources.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// Callback registered with a [`Selectable`]; invoked exactly once when
/// the object becomes ready. May be invoked from any thread.
pub type ReadyFn = Box<dyn FnOnce() + Send>;

/// Anything that can report one-shot readiness: implemented by
/// [`Promise`](crate::promise::Promise) and
/// [`Blocker`](crate::condition::Blocker).
pub trait Selectable {
    /// Register (or, with `None`, clear) a readiness callback. If the
    /// object is already ready the callback is invoked immediately.
    fn on_ready(&self, f: Option<ReadyFn>);
}

pub const MAX_SOURCES: usize = 8;

/// Waits for whichever of up to [`MAX_SOURCES`] sources signals readiness
/// first.
///
/// Only enabled sources participate. Once a source has been returned from
/// [`wait`](Select::wait) it is disabled and must be re-enabled before it
/// can be selected again; the other enabled sources stay registered.
pub struct Select<'a> {
    sources: Vec<&'a dyn Selectable>,
    shared: Arc<SelectShared>,
}

struct SelectShared {
    enabled: AtomicU8,
    ready: AtomicU8,
    waker: Mutex<Option<Waker>>,
}

impl SelectShared {
    fn notify(&self, index: usize) {
        self.ready.fetch_or(1 << index, Ordering::AcqRel);
        self.enabled.fetch_and(!(1 << index), Ordering::AcqRel);
        if let Some(waker) = self.waker.lock().unwrap().take() {
            waker.wake();
        }
    }
}

impl<'a> Select<'a> {
    pub fn new<const N: usize>(sources: [&'a dyn Selectable; N]) -> Self {
        assert!(N <= MAX_SOURCES, "Select supports at most {MAX_SOURCES} sources");
        Select {
            sources: sources.to_vec(),
            shared: Arc::new(SelectShared {
                enabled: AtomicU8::new(0),
                ready: AtomicU8::new(0),
                waker: Mutex::new(None),
            }),
        }
    }

    /// Begins watching the source at `index`.
    pub fn enable(&mut self, index: usize) -> &mut Self {
        let bit = 1u8 << index;
        if self.shared.enabled.load(Ordering::Acquire) & bit == 0 {
            self.shared.enabled.fetch_or(bit, Ordering::AcqRel);
            let shared = Arc::clone(&self.shared);
            self.sources[index].on_ready(Some(Box::new(move || shared.notify(index))));
        }
        self
    }

    /// Begins watching every source.
    pub fn enable_all(&mut self) -> &mut Self {
        for i in 0..self.sources.len() {
            self.enable(i);
        }
        self
    }

    /// Resolves to the index of the first enabled source to become ready,
    /// or `None` immediately if nothing is enabled or ready.
    pub fn wait(&mut self) -> SelectWait<'_, 'a> {
        SelectWait { select: self }
    }
}

impl Drop for Select<'_> {
    fn drop(&mut self) {
        let enabled = self.shared.enabled.load(Ordering::Acquire);
        for (i, source) in self.sources.iter().enumerate() {
            if enabled & (1 << i) != 0 {
                source.on_ready(None);
            }
        }
    }
}

#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct SelectWait<'s, 'a> {
    select: &'s mut Select<'a>,
}

impl Future for SelectWait<'_, '_> {
    type Output = Option<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let shared = &self.select.shared;
        // Publish the waker before checking, so a notify that lands in
        // between is not lost.
        *shared.waker.lock().unwrap() = Some(cx.waker().clone());

        let ready = shared.ready.load(Ordering::Acquire);
        if ready != 0 {
            let index = ready.trailing_zeros() as usize;
            shared.ready.fetch_and(!(1 << index), Ordering::AcqRel);
            return Poll::Ready(Some(index));
        }
        if shared.enabled.load(Ordering::Acquire) == 0 {
            log::warn!("awaiting a Select with no enabled sources");
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::promise::Promise;
    use crate::scheduler::Scheduler;

    #[test]
    fn first_resolved_enabled_source_wins() {
        let sched = Scheduler::current();

        let a = Promise::<i32>::provider();
        let b = Promise::<i32>::provider();
        let (pa, pb) = (a.promise(), b.promise());

        let winner = sched.block_on(async {
            let mut sel = Select::new([&pa as &dyn Selectable, &pb]);
            sel.enable_all();
            a.resolve_value(1);
            sel.wait().await
        });
        assert_eq!(winner, Some(0));
        assert_eq!(sched.block_on(pa).value(), 1);
        b.resolve_value(2);
        assert_eq!(sched.block_on(pb).value(), 2);
        assert!(sched.assert_empty());
    }

    #[test]
    fn second_source_wins_when_it_resolves_first() {
        let sched = Scheduler::current();

        let a = Promise::<i32>::provider();
        let b = Promise::<i32>::provider();
        let (pa, pb) = (a.promise(), b.promise());

        let winner = sched.block_on(async {
            let mut sel = Select::new([&pa as &dyn Selectable, &pb]);
            sel.enable_all();
            b.resolve_value(2);
            sel.wait().await
        });
        assert_eq!(winner, Some(1));
        a.resolve_value(1);
        drop((pa, pb));
        assert!(sched.assert_empty());
    }

    #[test]
    fn a_non_enabled_source_never_wins() {
        let sched = Scheduler::current();

        let a = Promise::<i32>::provider();
        let b = Promise::<i32>::provider();
        let (pa, pb) = (a.promise(), b.promise());

        let winner = sched.block_on(async {
            let mut sel = Select::new([&pa as &dyn Selectable, &pb]);
            sel.enable(0);
            // Only B resolves; the select must keep waiting until A is
            // both enabled and resolved.
            b.resolve_value(2);
            let standalone = {
                let mut probe = Select::new([&pb as &dyn Selectable]);
                probe.enable_all();
                probe.wait().await
            };
            assert_eq!(standalone, Some(0));

            a.resolve_value(1);
            sel.wait().await
        });
        assert_eq!(winner, Some(0));
        drop((pa, pb));
        assert!(sched.assert_empty());
    }

    #[test]
    fn nothing_enabled_returns_none() {
        let sched = Scheduler::current();
        let a = Promise::<i32>::provider();
        let pa = a.promise();
        let winner = sched.block_on(async {
            let mut sel = Select::new([&pa as &dyn Selectable]);
            sel.wait().await
        });
        assert_eq!(winner, None);
        a.resolve_value(1);
        drop(pa);
        assert!(sched.assert_empty());
    }
}
