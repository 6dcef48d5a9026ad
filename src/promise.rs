//! One-shot asynchronous values.
//!
//! A [`Promise`] is the consuming side of a result that may not exist
//! yet; its [`Provider`] is the producing side. A coroutine spawned with
//! [`spawn`] resolves its promise with whatever the body returns, but a
//! provider can just as well be resolved from a callback or another
//! thread.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::error::{Error, RuntimeError};
use crate::outcome::{IntoOutcome, Outcome};
use crate::scheduler::{Caught, CoroBox, Scheduler};
use crate::select::{ReadyFn, Selectable};

// Lifecycle of a promise's shared state. Transitions are one-way into
// READY.
const EMPTY: u8 = 0;
const WAITING: u8 = 1;
const CHAINED: u8 = 2;
const READY: u8 = 3;

type ChainFn<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

struct StateInner<T> {
    outcome: Outcome<T>,
    /// The outcome was already handed to a consumer or a chain.
    taken: bool,
    waker: Option<Waker>,
    chain: Option<ChainFn<T>>,
    on_ready: Option<ReadyFn>,
}

struct PromiseState<T> {
    phase: AtomicU8,
    providers: AtomicUsize,
    promise_taken: AtomicBool,
    inner: Mutex<StateInner<T>>,
}

impl<T> PromiseState<T> {
    fn new() -> Arc<Self> {
        Arc::new(PromiseState {
            phase: AtomicU8::new(EMPTY),
            providers: AtomicUsize::new(1),
            promise_taken: AtomicBool::new(false),
            inner: Mutex::new(StateInner {
                outcome: Outcome::Empty,
                taken: false,
                waker: None,
                chain: None,
                on_ready: None,
            }),
        })
    }

    fn has_result(&self) -> bool {
        self.phase.load(Ordering::Acquire) == READY
    }

    /// Stores the outcome and runs whatever was waiting on it: the chain
    /// callback, the `on_ready` callback, and the parked consumer, in
    /// that order. Only the first resolution takes effect.
    fn resolve(&self, outcome: Outcome<T>) {
        let (chain, on_ready, waker) = {
            let mut inner = self.inner.lock().unwrap();
            if self.phase.load(Ordering::Acquire) == READY {
                log::warn!("promise resolved twice; keeping the first result");
                return;
            }
            // A registered chain consumes the outcome directly; otherwise
            // it is stored for the consumer.
            let chain = match inner.chain.take() {
                Some(chain) => {
                    inner.taken = true;
                    Some((chain, outcome))
                }
                None => {
                    inner.outcome = outcome;
                    None
                }
            };
            self.phase.store(READY, Ordering::Release);
            (chain, inner.on_ready.take(), inner.waker.take())
        };
        if let Some((chain, outcome)) = chain {
            chain(outcome);
        }
        if let Some(f) = on_ready {
            f();
        }
        if let Some(w) = waker {
            w.wake();
        }
    }
}

/// The writable side of a [`Promise`]. Clones share the same promise;
/// whichever resolves first wins. If every provider is dropped without
/// resolving, the promise resolves to [`RuntimeError::Cancelled`].
pub struct Provider<T> {
    state: Arc<PromiseState<T>>,
}

impl<T> Provider<T> {
    pub fn resolve(&self, outcome: Outcome<T>) {
        self.state.resolve(outcome);
    }

    pub fn resolve_value(&self, value: T) {
        self.state.resolve(Outcome::Value(value));
    }

    pub fn resolve_error(&self, err: impl Into<Error>) {
        self.state.resolve(Outcome::from_error(err.into()));
    }

    pub fn has_result(&self) -> bool {
        self.state.has_result()
    }

    /// The consuming side. May be taken once per promise.
    pub fn promise(&self) -> Promise<T> {
        let already = self.state.promise_taken.swap(true, Ordering::AcqRel);
        debug_assert!(!already, "promise() may only be taken once");
        Promise {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Clone for Provider<T> {
    fn clone(&self) -> Self {
        self.state.providers.fetch_add(1, Ordering::AcqRel);
        Provider {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Drop for Provider<T> {
    fn drop(&mut self) {
        if self.state.providers.fetch_sub(1, Ordering::AcqRel) == 1
            && !self.state.has_result()
        {
            self.state
                .resolve(Outcome::Error(RuntimeError::Cancelled.into()));
        }
    }
}

/// A value of type `T` that may not be available yet.
///
/// Awaiting yields an [`Outcome<T>`] — errors are values here, never
/// panics; call [`Outcome::value`] or [`Outcome::into_result`] to unwrap.
/// A promise must be awaited, chained with [`then`](Promise::then), or
/// waited on; dropping one unresolved simply detaches the consumer.
#[must_use = "a Promise must be awaited, chained or waited on"]
pub struct Promise<T> {
    state: Arc<PromiseState<T>>,
}

impl<T> Promise<T> {
    /// A fresh provider, from which the promise itself is taken.
    pub fn provider() -> Provider<T> {
        Provider {
            state: PromiseState::new(),
        }
    }

    /// An already-resolved promise.
    pub fn ready(value: T) -> Promise<T> {
        let provider = Promise::provider();
        provider.resolve_value(value);
        provider.promise()
    }

    /// An already-failed promise.
    pub fn error(err: impl Into<Error>) -> Promise<T> {
        let provider = Promise::provider();
        provider.resolve_error(err);
        provider.promise()
    }

    /// True if a value or error has been set by the provider.
    pub fn has_result(&self) -> bool {
        self.state.has_result()
    }

    /// The error, if the promise resolved to one, else
    /// [`Error::NO_ERROR`].
    pub fn result_error(&self) -> Error {
        if self.state.has_result() {
            self.state.inner.lock().unwrap().outcome.error()
        } else {
            Error::NO_ERROR
        }
    }

    /// Blocks (by running the event loop) until the promise resolves.
    /// Only for non-coroutine callers; panics inside a coroutine.
    pub fn wait(self) -> Outcome<T> {
        Scheduler::current().block_on(self)
    }

    /// [`wait`](Promise::wait), unwrapped.
    pub fn wait_value(self) -> T {
        self.wait().value()
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Registers a continuation and returns the promise of its result.
    ///
    /// If this promise already has a result, `f` runs inline before
    /// `then` returns. Otherwise `f` will run on the scheduler of the
    /// thread calling `then`, whichever thread later resolves the
    /// provider. `f` is not called on an error; the error propagates to
    /// the returned promise unchanged.
    pub fn then<U, F>(self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let provider = Promise::<U>::provider();
        let chained = provider.promise();
        let target = Scheduler::current().handle();

        {
            let mut inner = self.state.inner.lock().unwrap();
            if self.state.has_result() {
                debug_assert!(!inner.taken, "promise already consumed");
                inner.taken = true;
                let outcome = inner.outcome.take();
                drop(inner);
                provider.resolve(outcome.map(f));
                return chained;
            }
            inner.chain = Some(Box::new(move |outcome: Outcome<T>| {
                target.asap(move || provider.resolve(outcome.map(f)));
            }));
            self.state.phase.store(CHAINED, Ordering::Release);
        }
        chained
    }
}

impl<T> Future for Promise<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.state.inner.lock().unwrap();
        if self.state.phase.load(Ordering::Acquire) == READY {
            debug_assert!(!inner.taken, "promise awaited after its result was consumed");
            inner.taken = true;
            Poll::Ready(inner.outcome.take())
        } else {
            inner.waker = Some(cx.waker().clone());
            self.state.phase.store(WAITING, Ordering::Release);
            Poll::Pending
        }
    }
}

impl<T> Selectable for Promise<T> {
    fn on_ready(&self, f: Option<ReadyFn>) {
        let Some(f) = f else {
            self.state.inner.lock().unwrap().on_ready = None;
            return;
        };
        let fire_now = {
            let mut inner = self.state.inner.lock().unwrap();
            if self.state.has_result() {
                Some(f)
            } else {
                inner.on_ready = Some(f);
                None
            }
        };
        if let Some(f) = fire_now {
            f();
        }
    }
}

/// Spawns a coroutine on the current scheduler and returns the promise
/// of its result.
///
/// The body starts eagerly: it runs up to its first suspension before
/// `spawn` returns. It may return a `Result<T, Error>`, an `Outcome<T>`,
/// or (for `T = ()`) nothing; a panic resolves the promise with a
/// `"panic"`-domain error.
pub fn spawn<T, O, F>(body: F) -> Promise<T>
where
    T: Send + 'static,
    O: IntoOutcome<T>,
    F: Future<Output = O> + 'static,
{
    let provider = Promise::provider();
    let promise = provider.promise();
    Scheduler::current().spawn_now(CoroBox::Local(Box::pin(async move {
        let outcome = Caught::new(body).await;
        provider.resolve(outcome);
    })));
    promise
}

/// Like [`spawn`], for a `Send` body. Only coroutines spawned this way
/// may migrate between schedulers with
/// [`SchedulerHandle::switch_to`](crate::scheduler::SchedulerHandle::switch_to).
pub fn spawn_sendable<T, O, F>(body: F) -> Promise<T>
where
    T: Send + 'static,
    O: IntoOutcome<T>,
    F: Future<Output = O> + Send + 'static,
{
    let provider = Promise::provider();
    let promise = provider.promise();
    Scheduler::current().spawn_now(CoroBox::Sendable(Box::pin(async move {
        let outcome = Caught::new(body).await;
        provider.resolve(outcome);
    })));
    promise
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn coroutine_body_starts_eagerly() {
        let sched = Scheduler::current();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let o2 = Arc::clone(&order);
        let p = spawn(async move {
            o2.lock().unwrap().push("inside");
            Ok(1)
        });
        order.lock().unwrap().push("after spawn");
        assert_eq!(*order.lock().unwrap(), vec!["inside", "after spawn"]);
        assert_eq!(sched.block_on(p).value(), 1);
        assert!(sched.assert_empty());
    }

    #[test]
    fn then_before_and_after_resolution() {
        let provider = Promise::<i32>::provider();
        let p = provider.promise();

        let before = Arc::new(StdMutex::new(None));
        let b2 = Arc::clone(&before);
        let chained = p.then(move |v| {
            *b2.lock().unwrap() = Some(v);
            v
        });
        assert!(before.lock().unwrap().is_none());

        provider.resolve_value(7);
        // Registered before resolution: ran at resolution, on this thread.
        assert_eq!(*before.lock().unwrap(), Some(7));

        // Registered after resolution: runs before then() returns.
        let after = Arc::new(StdMutex::new(None));
        let a2 = Arc::clone(&after);
        let _last = chained.then(move |v| {
            *a2.lock().unwrap() = Some(v);
            v
        });
        assert_eq!(*after.lock().unwrap(), Some(7));
    }

    #[test]
    fn then_composition() {
        let sched = Scheduler::current();
        let p = Promise::ready(6).then(|x| x * x).then(|y| y + 1);
        assert_eq!(sched.block_on(p).value(), 37);
        assert!(sched.assert_empty());
    }

    #[test]
    fn then_skips_the_callback_on_error() {
        let called = Arc::new(StdMutex::new(false));
        let c2 = Arc::clone(&called);
        let p = Promise::<i32>::error(RuntimeError::ParseError).then(move |v| {
            *c2.lock().unwrap() = true;
            v
        });
        assert!(!*called.lock().unwrap());
        assert!(p.has_result());
        assert_eq!(p.result_error(), Error::from(RuntimeError::ParseError));
    }

    #[test]
    fn then_runs_on_the_registering_thread() {
        let sched = Scheduler::current();
        let registering = std::thread::current().id();

        let provider = Promise::<i32>::provider();
        let p = provider.promise();
        let seen_on = Arc::new(StdMutex::new(None));
        let s2 = Arc::clone(&seen_on);
        let chained = p.then(move |v| {
            *s2.lock().unwrap() = Some(std::thread::current().id());
            v
        });

        let worker = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            provider.resolve_value(5);
        });

        assert_eq!(sched.block_on(chained).value(), 5);
        worker.join().unwrap();
        assert_eq!(*seen_on.lock().unwrap(), Some(registering));
        assert!(sched.assert_empty());
    }

    #[test]
    fn double_resolve_keeps_the_first_result() {
        let provider = Promise::<i32>::provider();
        let p = provider.promise();
        provider.resolve_value(1);
        provider.resolve_value(2);
        assert_eq!(p.wait().value(), 1);
    }

    #[test]
    fn dropping_every_provider_cancels() {
        let provider = Promise::<i32>::provider();
        let p = provider.promise();
        let clone = provider.clone();
        drop(provider);
        assert!(!p.has_result());
        drop(clone);
        assert!(p.has_result());
        assert_eq!(p.result_error(), Error::from(RuntimeError::Cancelled));
    }

    #[test]
    fn a_panicking_body_resolves_with_a_panic_error() {
        let sched = Scheduler::current();
        let p: Promise<i32> = spawn(async {
            assert_eq!(1 + 1, 3, "kaboom");
            Ok(2)
        });
        let outcome = sched.block_on(p);
        assert_eq!(outcome.error().domain_name(), "panic");
        assert!(sched.assert_empty());
    }

    #[test]
    fn resolving_from_another_thread_wakes_the_awaiter() {
        let sched = Scheduler::current();
        let provider = Promise::<i32>::provider();
        let p = provider.promise();

        let worker = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            provider.resolve_value(99);
        });

        let joined = spawn(async move { Ok(p.await.value() + 1) });
        assert_eq!(sched.block_on(joined).value(), 100);
        worker.join().unwrap();
        assert!(sched.assert_empty());
    }
}
