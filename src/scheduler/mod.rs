//! The per-thread cooperative executor.
//!
//! A [`Scheduler`] owns an arena of spawned coroutines (pinned boxed
//! futures keyed by a generational [`Id`](id_alloc::Id)), a FIFO ready
//! queue, a suspended map, and an [`EventLoop`]. Coroutines are
//! thread-affine: they are polled only on the thread that owns them, and
//! cross-thread signals arrive exclusively through each parked
//! coroutine's suspension flag and the scheduler's own atomic wake flag.

pub mod id_alloc;
pub(crate) mod suspension;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::ThreadId;

use pin_project::pin_project;
use tinyset::SetU64;

use crate::error::Error;
use crate::event_loop::{BasicLoop, EventLoop};
use crate::lifecycle;
use crate::outcome::{IntoOutcome, Outcome};

use self::id_alloc::{Id, Ids};
use self::suspension::Suspension;

thread_local! {
    static CURRENT: Scheduler = Scheduler::new_for_thread();

    // Set for the duration of one coroutine poll; lets awaitables that
    // need executor cooperation (migration) leave a note for it.
    static ACTIVE_TASK: RefCell<Option<ActiveTask>> = const { RefCell::new(None) };
}

struct ActiveTask {
    id: Id,
    status: PollStatus,
}

enum PollStatus {
    /// Default: a `Pending` poll parks the coroutine in the suspended map.
    Park,
    /// A `Pending` poll re-queues the coroutine at the ready-queue tail.
    /// Bypassing the suspended map keeps yield order strictly FIFO.
    Yield,
    /// A `Pending` poll hands the coroutine over to another scheduler.
    Move(SchedulerHandle),
}

/// A spawned coroutine. Most are `Local`; only coroutines spawned with a
/// `Send` body may migrate between schedulers.
pub(crate) enum CoroBox {
    Local(Pin<Box<dyn Future<Output = ()> + 'static>>),
    Sendable(Pin<Box<dyn Future<Output = ()> + Send + 'static>>),
}

impl CoroBox {
    fn poll(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        match self {
            CoroBox::Local(f) => f.as_mut().poll(cx),
            CoroBox::Sendable(f) => f.as_mut().poll(cx),
        }
    }
}

/// The part of a scheduler other threads are allowed to touch.
pub(crate) struct Shared {
    woke: AtomicBool,
    stop_requested: AtomicBool,
    event_loop: Mutex<Option<Arc<dyn EventLoop>>>,
    thread: ThreadId,
}

impl Shared {
    pub(crate) fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread
    }

    /// Flag that a suspended coroutine wants to run and kick the event
    /// loop out of its wait. Thread-safe; only the first call until the
    /// next sweep does any work.
    pub(crate) fn wake_up(&self) {
        if !self.woke.swap(true, Ordering::AcqRel) {
            let el = self.event_loop.lock().unwrap().clone();
            if let Some(el) = el {
                if self.is_current() {
                    if el.is_running() {
                        el.stop(false);
                    }
                } else {
                    el.stop(true);
                }
            }
        }
    }

    fn running_loop(&self) -> Arc<dyn EventLoop> {
        self.event_loop
            .lock()
            .unwrap()
            .clone()
            .expect("scheduler has no event loop yet")
    }
}

/// Handle to this thread's [`Scheduler`]. Cloning is cheap; all clones
/// refer to the same per-thread instance.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

struct Inner {
    shared: Arc<Shared>,
    /// Arena of spawned coroutines. The box is taken out of its slot for
    /// the duration of a poll, so the map stays borrowable from inside.
    tasks: RefCell<HashMap<Id, Option<CoroBox>>>,
    ready: RefCell<VecDeque<Id>>,
    /// Mirror of `ready` for O(1) membership checks.
    ready_set: RefCell<SetU64>,
    suspended: RefCell<HashMap<Id, Arc<Suspension>>>,
    /// Coroutines spawned while another coroutine is being polled; folded
    /// into the arena at the next loop point.
    incoming: RefCell<VecDeque<(Id, CoroBox)>>,
    ids: RefCell<Ids>,
}

impl Scheduler {
    fn new_for_thread() -> Scheduler {
        log::debug!("created scheduler for {:?}", std::thread::current().id());
        Scheduler {
            inner: Rc::new(Inner {
                shared: Arc::new(Shared {
                    woke: AtomicBool::new(false),
                    stop_requested: AtomicBool::new(false),
                    event_loop: Mutex::new(None),
                    thread: std::thread::current().id(),
                }),
                tasks: RefCell::new(HashMap::new()),
                ready: RefCell::new(VecDeque::new()),
                ready_set: RefCell::new(SetU64::new()),
                suspended: RefCell::new(HashMap::new()),
                incoming: RefCell::new(VecDeque::new()),
                ids: RefCell::new(Ids::new()),
            }),
        }
    }

    /// The calling thread's scheduler, created on first use.
    pub fn current() -> Scheduler {
        CURRENT.with(|s| s.clone())
    }

    /// True if this is the calling thread's scheduler.
    pub fn is_current(&self) -> bool {
        self.inner.shared.is_current()
    }

    //---- Event loop

    /// The associated event loop, created as a [`BasicLoop`] on first use.
    pub fn event_loop(&self) -> Arc<dyn EventLoop> {
        let mut el = self.inner.shared.event_loop.lock().unwrap();
        if el.is_none() {
            assert!(self.is_current());
            *el = Some(Arc::new(BasicLoop::new()));
        }
        el.as_ref().unwrap().clone()
    }

    /// Associates an embedder-provided event loop with this scheduler.
    /// Must be called before anything forced the default loop into place.
    pub fn use_event_loop(&self, el: Arc<dyn EventLoop>) {
        assert!(self.is_current());
        let mut slot = self.inner.shared.event_loop.lock().unwrap();
        assert!(slot.is_none(), "scheduler already has an event loop");
        *slot = Some(el);
    }

    /// A `Send` handle to this scheduler, for cross-thread use. Forces
    /// the event loop into existence so wake-ups always have a target.
    pub fn handle(&self) -> SchedulerHandle {
        let _ = self.event_loop();
        SchedulerHandle {
            shared: Arc::clone(&self.inner.shared),
        }
    }

    //---- Introspection

    /// True if no coroutine is ready to run right now.
    pub fn is_idle(&self) -> bool {
        self.inner.ready.borrow().is_empty()
            && self.inner.incoming.borrow().is_empty()
            && !self.has_wakers()
    }

    /// True if no coroutine is ready or suspended.
    pub fn is_empty(&self) -> bool {
        self.is_idle() && self.inner.suspended.borrow().is_empty()
    }

    /// Verifies that no coroutines spawned on this thread remain, driving
    /// the loop for a bounded number of iterations to let stragglers
    /// finish. Checked at the end of tests.
    pub fn assert_empty(&self) -> bool {
        self.schedule_wakers();
        if self.is_empty() && lifecycle::count() == 0 {
            return true;
        }
        log::info!(
            "assert_empty: running until {} ready and {} suspended coroutines finish",
            self.inner.ready.borrow().len(),
            self.inner.suspended.borrow().len()
        );
        let mut attempts = 0u32;
        self.run_until(|| {
            if self.is_empty() && lifecycle::count() == 0 {
                return true;
            }
            attempts += 1;
            attempts >= 100
        });
        if attempts < 100 {
            return true;
        }

        log::error!("assert_empty: coroutines still in existence:");
        for id in self.inner.ready.borrow().iter() {
            log::error!("  ready: {id:?}");
        }
        for id in self.inner.suspended.borrow().keys() {
            log::error!("  suspended: {id:?}");
        }
        false
    }

    fn has_wakers(&self) -> bool {
        self.inner.shared.woke.load(Ordering::Acquire)
            && self
                .inner
                .suspended
                .borrow()
                .values()
                .any(|s| s.wake_requested() && !s.cancelled())
    }

    //---- Spawning

    pub(crate) fn spawn_boxed(&self, coro: CoroBox) -> Id {
        assert!(self.is_current(), "coroutines must be spawned on the scheduler's own thread");
        let id = self.inner.ids.borrow_mut().allocate();
        lifecycle::created(id);
        self.inner.incoming.borrow_mut().push_back((id, coro));
        id
    }

    /// Adopt a coroutine handed over by another scheduler.
    pub(crate) fn adopt(&self, coro: CoroBox) {
        self.spawn_boxed(coro);
    }

    /// Spawns a coroutine and runs it right away, up to its first
    /// suspension. This may nest inside another coroutine's poll; the
    /// caller's poll context is saved around the inner one.
    pub(crate) fn spawn_now(&self, mut coro: CoroBox) {
        assert!(self.is_current(), "coroutines must be spawned on the scheduler's own thread");
        let id = self.inner.ids.borrow_mut().allocate();
        lifecycle::created(id);

        let sus = Arc::new(Suspension::new(id, Arc::clone(&self.inner.shared)));
        let waker = sus.waker();
        let mut cx = Context::from_waker(&waker);

        let saved = ACTIVE_TASK.with(|t| {
            t.borrow_mut().replace(ActiveTask {
                id,
                status: PollStatus::Park,
            })
        });
        lifecycle::resumed(id);
        let polled = coro.poll(&mut cx);
        let active = ACTIVE_TASK.with(|t| {
            let mut slot = t.borrow_mut();
            let inner = slot.take().expect("poll cleared the active task");
            *slot = saved;
            inner
        });
        debug_assert_eq!(active.id, id);

        match polled {
            Poll::Ready(()) => {
                self.inner.ids.borrow_mut().free(id);
                lifecycle::ended(id);
            }
            Poll::Pending => {
                self.inner.tasks.borrow_mut().insert(id, Some(coro));
                self.settle(id, sus, active.status);
            }
        }
    }

    /// Files a coroutine that returned `Pending` according to the status
    /// its poll left behind.
    fn settle(&self, id: Id, sus: Arc<Suspension>, status: PollStatus) {
        match status {
            PollStatus::Park => {
                lifecycle::suspended(id);
                self.inner.suspended.borrow_mut().insert(id, sus);
            }
            PollStatus::Yield => {
                self.make_ready(id);
            }
            PollStatus::Move(target) => {
                let coro = self
                    .inner
                    .tasks
                    .borrow_mut()
                    .get_mut(&id)
                    .and_then(Option::take);
                self.remove_task(id);
                match coro {
                    Some(CoroBox::Sendable(boxed)) => {
                        log::debug!("moving coroutine {id:?} to another scheduler");
                        target.on_event_loop(move || {
                            Scheduler::current().adopt(CoroBox::Sendable(boxed));
                        });
                    }
                    _ => panic!("a coroutine with a non-Send body cannot move between schedulers"),
                }
            }
        }
    }

    fn drain_incoming(&self) {
        loop {
            let next = self.inner.incoming.borrow_mut().pop_front();
            let Some((id, coro)) = next else { break };
            self.inner.tasks.borrow_mut().insert(id, Some(coro));
            self.make_ready(id);
        }
    }

    /// Appends `id` to the ready queue, unless it is already there.
    fn make_ready(&self, id: Id) {
        if self.inner.ready_set.borrow_mut().insert(id.to_bits()) {
            lifecycle::ready(id);
            self.inner.ready.borrow_mut().push_back(id);
        }
    }

    //---- The loop

    /// Moves every suspended coroutine whose wake flag is set to the
    /// ready queue, and reaps cancelled entries.
    fn schedule_wakers(&self) {
        while self.inner.shared.woke.swap(false, Ordering::AcqRel) {
            let mut woken = Vec::new();
            let mut reaped = Vec::new();
            self.inner.suspended.borrow_mut().retain(|id, sus| {
                if !sus.wake_requested() {
                    return true;
                }
                if sus.cancelled() {
                    reaped.push(*id);
                } else {
                    woken.push(*id);
                }
                false
            });
            for id in woken {
                self.make_ready(id);
            }
            for id in reaped {
                log::debug!("reaping cancelled suspension {id:?}");
                self.remove_task(id);
            }
        }
    }

    fn remove_task(&self, id: Id) {
        self.inner.tasks.borrow_mut().remove(&id);
        self.inner.ids.borrow_mut().free(id);
        lifecycle::ended(id);
    }

    /// Resumes the next ready coroutine. Returns false if none was ready.
    fn resume_next(&self) -> bool {
        self.drain_incoming();
        self.schedule_wakers();

        let id = {
            let mut ready = self.inner.ready.borrow_mut();
            let Some(id) = ready.pop_front() else {
                return false;
            };
            self.inner.ready_set.borrow_mut().remove(id.to_bits());
            id
        };

        let Some(slot) = self.inner.tasks.borrow_mut().get_mut(&id).map(Option::take) else {
            log::warn!("ready queue held a dead coroutine {id:?}");
            return true;
        };
        let mut coro = slot.expect("coroutine resumed reentrantly");

        let sus = Arc::new(Suspension::new(id, Arc::clone(&self.inner.shared)));
        let waker = sus.waker();
        let mut cx = Context::from_waker(&waker);

        lifecycle::resumed(id);
        ACTIVE_TASK.with(|t| {
            *t.borrow_mut() = Some(ActiveTask {
                id,
                status: PollStatus::Park,
            })
        });
        let polled = coro.poll(&mut cx);
        let active = ACTIVE_TASK
            .with(|t| t.borrow_mut().take())
            .expect("poll cleared the active task");
        debug_assert_eq!(active.id, id);

        match polled {
            Poll::Ready(()) => {
                self.remove_task(id);
            }
            Poll::Pending => {
                if let Some(slot) = self.inner.tasks.borrow_mut().get_mut(&id) {
                    *slot = Some(coro);
                }
                self.settle(id, sus, active.status);
            }
        }
        true
    }

    /// Drives the loop — resuming ready coroutines interleaved with event
    /// loop iterations — until the predicate returns true. The predicate
    /// is checked before each iteration.
    pub fn run_until(&self, mut pred: impl FnMut() -> bool) {
        assert!(self.is_current());
        assert!(
            ACTIVE_TASK.with(|t| t.borrow().is_none()),
            "run_until may not be called from inside a coroutine"
        );
        let el = self.event_loop();
        loop {
            if pred() {
                break;
            }
            let idle = !self.resume_next();
            if !idle && pred() {
                break;
            }
            el.run_once(idle);
        }
    }

    /// Runs the loop until [`SchedulerHandle::stop`] is called.
    pub fn run(&self) {
        let shared = Arc::clone(&self.inner.shared);
        self.run_until(move || shared.stop_requested.swap(false, Ordering::AcqRel));
    }

    /// Polls `fut` to completion, driving this scheduler in between.
    /// The synchronous entry point for non-coroutine callers; never legal
    /// from inside a coroutine.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        assert!(self.is_current());
        assert!(
            ACTIVE_TASK.with(|t| t.borrow().is_none()),
            "block_on may not be called from inside a coroutine"
        );
        let mut fut = std::pin::pin!(fut);
        let waker = Waker::from(Arc::new(LoopWaker {
            shared: Arc::clone(&self.inner.shared),
        }));
        let mut cx = Context::from_waker(&waker);
        let el = self.event_loop();
        loop {
            if let Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
                return v;
            }
            let idle = !self.resume_next();
            el.run_once(idle);
        }
    }

    /// Defers `f` to the next iteration of this scheduler's event loop.
    /// The cross-thread forms of this live on [`SchedulerHandle`].
    pub fn on_event_loop(&self, f: impl FnOnce() + Send + 'static) {
        self.event_loop().perform(Box::new(f));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let tasks = self.tasks.borrow().len();
        if tasks > 0 {
            log::warn!(
                "scheduler for {:?} dropped with {tasks} live coroutines",
                self.thread_id()
            );
        } else {
            log::debug!("scheduler for {:?} dropped", self.thread_id());
        }
    }
}

impl Inner {
    fn thread_id(&self) -> ThreadId {
        self.shared.thread
    }
}

/// Wakes the scheduler's loop without targeting a specific coroutine;
/// used by [`Scheduler::block_on`] for its top-level future.
struct LoopWaker {
    shared: Arc<Shared>,
}

impl Wake for LoopWaker {
    fn wake(self: Arc<Self>) {
        self.shared.wake_up();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.shared.wake_up();
    }
}

/// A `Send + Sync` reference to a scheduler, usable from any thread.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// True if the calling thread is the referenced scheduler's thread.
    pub fn is_current(&self) -> bool {
        self.shared.is_current()
    }

    /// Schedules `f` to run on the scheduler's thread at its next event
    /// loop iteration. Thread-safe.
    pub fn on_event_loop(&self, f: impl FnOnce() + Send + 'static) {
        self.shared.running_loop().perform(Box::new(f));
    }

    /// Like [`on_event_loop`](Self::on_event_loop) but blocks until `f`
    /// has run. Deadlocks if called on the scheduler's own thread, so
    /// that is rejected outright.
    pub fn on_event_loop_sync(&self, f: impl FnOnce() + Send + 'static) {
        assert!(
            !self.is_current(),
            "on_event_loop_sync would deadlock on the scheduler's own thread"
        );
        self.shared.running_loop().perform_sync(Box::new(f));
    }

    /// Runs `f` immediately if on the scheduler's thread, else via
    /// [`on_event_loop`](Self::on_event_loop).
    pub fn asap(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_current() {
            f();
        } else {
            self.on_event_loop(f);
        }
    }

    /// Kick the scheduler's loop so it re-evaluates its state.
    pub fn wake(&self) {
        self.shared.wake_up();
    }

    /// Makes the scheduler's [`run`](Scheduler::run) return.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::Release);
        self.shared.wake_up();
    }

    /// Awaiting this moves the current coroutine onto the referenced
    /// scheduler's thread. The coroutine must have been spawned with a
    /// `Send` body (`spawn_sendable`); resolves immediately when already
    /// on the right thread.
    pub fn switch_to(&self) -> SwitchTo {
        SwitchTo {
            handle: self.clone(),
        }
    }
}

#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct SwitchTo {
    handle: SchedulerHandle,
}

impl Future for SwitchTo {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.handle.is_current() {
            return Poll::Ready(());
        }
        ACTIVE_TASK.with(|t| {
            let mut t = t.borrow_mut();
            let active = t
                .as_mut()
                .expect("switch_to may only be awaited inside a spawned coroutine");
            active.status = PollStatus::Move(self.handle.clone());
        });
        Poll::Pending
    }
}

/// Lets a long-running coroutine give other ready coroutines some time:
/// the awaiting coroutine re-joins the ready queue at the tail.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        let noted = ACTIVE_TASK.with(|t| {
            if let Some(active) = t.borrow_mut().as_mut() {
                active.status = PollStatus::Yield;
                true
            } else {
                false
            }
        });
        if !noted {
            // Not inside a spawned coroutine (e.g. a block_on future):
            // fall back to an immediate self-wake.
            cx.waker().wake_by_ref();
        }
        Poll::Pending
    }
}

/// Adapter that converts a panic during the inner future's poll into an
/// error-carrying [`Outcome`]; applied to every spawned coroutine body so
/// a panicking coroutine reports failure instead of tearing down the
/// loop.
#[pin_project]
pub(crate) struct Caught<F, T> {
    #[pin]
    inner: F,
    _marker: std::marker::PhantomData<T>,
}

impl<F, T> Caught<F, T> {
    pub(crate) fn new(inner: F) -> Self {
        Caught {
            inner,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, O, F> Future for Caught<F, T>
where
    F: Future<Output = O>,
    O: IntoOutcome<T>,
{
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match catch_unwind(AssertUnwindSafe(|| this.inner.poll(cx))) {
            Ok(Poll::Ready(out)) => Poll::Ready(out.into_outcome()),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Outcome::Error(Error::from_panic(payload))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::promise;
    use std::cell::Cell;

    fn spawn_counting(log: Rc<RefCell<Vec<u32>>>, tag: u32, rounds: u32) {
        let _ = promise::spawn(async move {
            for _ in 0..rounds {
                log.borrow_mut().push(tag);
                yield_now().await;
            }
        });
    }

    #[test]
    fn ready_queue_is_fifo_across_yields() {
        let sched = Scheduler::current();
        let log = Rc::new(RefCell::new(Vec::new()));
        spawn_counting(Rc::clone(&log), 1, 3);
        spawn_counting(Rc::clone(&log), 2, 3);

        sched.run_until(|| sched.is_empty());
        assert_eq!(*log.borrow(), vec![1, 2, 1, 2, 1, 2]);
        assert!(sched.assert_empty());
    }

    #[test]
    fn idempotent_wake() {
        let sched = Scheduler::current();
        let id = sched.spawn_boxed(CoroBox::Local(Box::pin(std::future::ready(()))));
        sched.drain_incoming();
        sched.inner.ready.borrow_mut().clear();
        *sched.inner.ready_set.borrow_mut() = SetU64::new();
        let sus = Arc::new(Suspension::new(id, Arc::clone(&sched.inner.shared)));
        sched.inner.suspended.borrow_mut().insert(id, Arc::clone(&sus));

        sus.wake_up();
        sus.wake_up();
        sus.wake_up();

        sched.schedule_wakers();
        assert_eq!(sched.inner.ready.borrow().len(), 1);
        assert!(sched.inner.suspended.borrow().is_empty());

        // One resume drains it; nothing is left behind.
        assert!(sched.resume_next());
        assert!(!sched.resume_next());
        assert!(sched.is_empty());
    }

    #[test]
    fn cancelled_suspension_is_reaped_not_resumed() {
        let sched = Scheduler::current();
        let polled = Rc::new(Cell::new(false));
        let polled2 = Rc::clone(&polled);
        let id = sched.spawn_boxed(CoroBox::Local(Box::pin(async move {
            polled2.set(true);
        })));
        sched.drain_incoming();

        // Park it manually, then cancel before any wake.
        sched.inner.ready.borrow_mut().clear();
        *sched.inner.ready_set.borrow_mut() = SetU64::new();
        let sus = Arc::new(Suspension::new(id, Arc::clone(&sched.inner.shared)));
        sched.inner.suspended.borrow_mut().insert(id, Arc::clone(&sus));

        sus.cancel();
        sus.wake_up(); // late waker; must be a no-op
        sched.schedule_wakers();

        assert!(sched.inner.suspended.borrow().is_empty());
        assert!(sched.inner.tasks.borrow().is_empty());
        assert!(!polled.get());
    }

    #[test]
    fn block_on_runs_spawned_work() {
        let sched = Scheduler::current();
        let p = promise::spawn(async { Ok(21) });
        let doubled = sched.block_on(async move { p.await.value() * 2 });
        assert_eq!(doubled, 42);
        assert!(sched.assert_empty());
    }

    #[test]
    fn cross_thread_wake_reaches_the_owning_scheduler() {
        let sched = Scheduler::current();
        let handle = sched.handle();

        let done = Rc::new(Cell::new(false));
        let done2 = Rc::clone(&done);
        let main_thread = std::thread::current().id();
        let _ = promise::spawn(async move {
            struct Once(bool);
            impl Future for Once {
                type Output = ();
                fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
                    if self.0 {
                        Poll::Ready(())
                    } else {
                        self.0 = true;
                        let waker = cx.waker().clone();
                        std::thread::spawn(move || {
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            waker.wake();
                        });
                        Poll::Pending
                    }
                }
            }
            Once(false).await;
            // Affinity: resumed on the owning thread, not the waker's.
            assert_eq!(std::thread::current().id(), main_thread);
            done2.set(true);
        });

        sched.run_until(|| done.get());
        assert!(sched.assert_empty());
        drop(handle);
    }
}
