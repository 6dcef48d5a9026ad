//! The contract between a [`Scheduler`](crate::scheduler::Scheduler) and
//! the I/O driver underneath it, plus a portable default implementation.
//!
//! Real deployments plug in an I/O back-end (epoll, io_uring, a platform
//! framework) behind this trait; the runtime itself only ever calls the
//! operations below.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A deferred callback handed to [`EventLoop::perform`].
pub type LoopFn = Box<dyn FnOnce() + Send>;

/// One iteration-driven event loop. All methods take `&self`: the loop is
/// shared between its owning scheduler and, for [`stop`](EventLoop::stop)
/// and [`perform`](EventLoop::perform), arbitrary other threads.
pub trait EventLoop: Send + Sync {
    /// Run one iteration: dispatch pending callbacks and I/O completions.
    /// Blocks waiting for events iff `wait_for_io` is true and nothing is
    /// pending. Returns true if a [`stop`](EventLoop::stop) request ended
    /// the iteration (the request is consumed).
    fn run_once(&self, wait_for_io: bool) -> bool;

    /// Run iterations until [`stop`](EventLoop::stop) is called.
    fn run(&self) {
        while !self.run_once(true) {}
    }

    /// Request that the current (or next) iteration exit. With
    /// `thread_safe` set, this must be callable from any thread.
    fn stop(&self, thread_safe: bool);

    /// Schedule `f` to run on the loop's thread at its next iteration.
    /// Callable from any thread.
    fn perform(&self, f: LoopFn);

    /// Like [`perform`](EventLoop::perform), but blocks the caller until
    /// `f` has run. Must not be called on the loop's own thread.
    fn perform_sync(&self, f: LoopFn) {
        let (tx, rx) = oneshot::channel();
        self.perform(Box::new(move || {
            f();
            let _ = tx.send(());
        }));
        let _ = rx.recv();
    }

    /// True while the loop is inside [`run_once`](EventLoop::run_once).
    fn is_running(&self) -> bool;
}

/// The default [`EventLoop`]: a callback queue and a condition variable.
/// It performs no I/O; "waiting for events" means waiting for someone to
/// call [`perform`](EventLoop::perform) or [`stop`](EventLoop::stop).
pub struct BasicLoop {
    state: Mutex<LoopState>,
    wakeup: Condvar,
    running: AtomicBool,
}

struct LoopState {
    callbacks: VecDeque<LoopFn>,
    stopped: bool,
}

// An idle wait wakes up at this interval even with no signal, so that a
// stalled embedder (a predicate that can never fire, a leaked suspension)
// degrades to slow polling instead of a silent hang.
const IDLE_WAIT: Duration = Duration::from_millis(10);

impl BasicLoop {
    pub fn new() -> Self {
        BasicLoop {
            state: Mutex::new(LoopState {
                callbacks: VecDeque::new(),
                stopped: false,
            }),
            wakeup: Condvar::new(),
            running: AtomicBool::new(false),
        }
    }
}

impl Default for BasicLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop for BasicLoop {
    fn run_once(&self, wait_for_io: bool) -> bool {
        self.running.store(true, Ordering::Release);

        let (ready, stopped) = {
            let mut state = self.state.lock().unwrap();
            if state.callbacks.is_empty() && wait_for_io && !state.stopped {
                state = self.wakeup.wait_timeout(state, IDLE_WAIT).unwrap().0;
            }
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.stopped),
            )
        };

        // Callbacks run with the lock released: they are free to perform
        // more callbacks or stop the loop again.
        for f in ready {
            f();
        }

        self.running.store(false, Ordering::Release);
        stopped
    }

    fn stop(&self, _thread_safe: bool) {
        self.state.lock().unwrap().stopped = true;
        self.wakeup.notify_all();
    }

    fn perform(&self, f: LoopFn) {
        self.state.lock().unwrap().callbacks.push_back(f);
        self.wakeup.notify_all();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
