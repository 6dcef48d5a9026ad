//! Detached background coroutines.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::condition::Blocker;
use crate::error::Error;
use crate::outcome::IntoOutcome;
use crate::scheduler::{yield_now, Caught, CoroBox, Scheduler, YieldNow};

struct TaskShared {
    alive: AtomicBool,
    interrupt: AtomicBool,
    done: Blocker<Error>,
}

/// Handle to a background coroutine started with [`task`].
///
/// The coroutine itself is detached: it keeps running when the handle is
/// dropped, and its frame is released when its body returns. The handle
/// can request a cooperative stop ([`interrupt`](Task::interrupt)) and
/// wait for completion ([`join`](Task::join)). Move-only.
pub struct Task {
    shared: Arc<TaskShared>,
}

/// Passed into a task's body; its yield point doubles as the
/// interruption check.
#[derive(Clone)]
pub struct TaskControl {
    shared: Arc<TaskShared>,
}

/// Starts a background coroutine. The body does not run before the next
/// scheduler iteration, so the caller always holds the [`Task`] before
/// the body can finish. Long-running bodies are expected to await
/// [`keep_going`](TaskControl::keep_going) periodically, both for
/// fairness and so [`interrupt`](Task::interrupt) can take effect.
pub fn task<F, Fut, O>(f: F) -> Task
where
    F: FnOnce(TaskControl) -> Fut,
    Fut: Future<Output = O> + 'static,
    O: IntoOutcome<()>,
{
    let shared = Arc::new(TaskShared {
        alive: AtomicBool::new(true),
        interrupt: AtomicBool::new(false),
        done: Blocker::new(),
    });
    let body = f(TaskControl {
        shared: Arc::clone(&shared),
    });
    let shared2 = Arc::clone(&shared);
    Scheduler::current().spawn_boxed(CoroBox::Local(Box::pin(async move {
        let outcome = Caught::new(body).await;
        shared2.alive.store(false, Ordering::Release);
        shared2.done.notify(outcome.error());
    })));
    Task { shared }
}

impl Task {
    /// True as long as the task's body is still running.
    pub fn alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Lets the task know it should stop: its next
    /// [`keep_going`](TaskControl::keep_going) returns false. Thread-safe.
    pub fn interrupt(&self) {
        self.shared.interrupt.store(true, Ordering::Release);
    }

    /// Await this to block until the task completes. Resolves to the
    /// body's terminal error: [`Error::NO_ERROR`] on a normal return.
    pub fn join(&self) -> TaskJoin {
        TaskJoin {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl TaskControl {
    /// Gives other ready coroutines some time, then reports whether the
    /// task should continue: false once the holder called
    /// [`Task::interrupt`].
    pub fn keep_going(&self) -> KeepGoing<'_> {
        KeepGoing {
            ctl: self,
            yielding: yield_now(),
        }
    }

    pub fn interrupted(&self) -> bool {
        self.shared.interrupt.load(Ordering::Acquire)
    }
}

#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct KeepGoing<'a> {
    ctl: &'a TaskControl,
    yielding: YieldNow,
}

impl Future for KeepGoing<'_> {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        match Pin::new(&mut self.yielding).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(()) => Poll::Ready(!self.ctl.interrupted()),
        }
    }
}

/// Future returned by [`Task::join`]; usable from any coroutine holding
/// it, independent of the task handle's lifetime.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct TaskJoin {
    shared: Arc<TaskShared>,
}

impl Future for TaskJoin {
    type Output = Error;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Error> {
        let mut wait = self.shared.done.wait();
        Pin::new(&mut wait).poll(cx)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::RuntimeError;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn the_body_does_not_run_before_the_caller_has_the_handle() {
        let sched = Scheduler::current();
        let order = Rc::new(RefCellVec::default());
        let o2 = Rc::clone(&order);
        let t = task(move |_ctl| async move {
            o2.push("body");
        });
        order.push("caller");
        sched.run_until(|| !t.alive());
        assert_eq!(order.take(), vec!["caller", "body"]);
        assert!(sched.assert_empty());
    }

    #[derive(Default)]
    struct RefCellVec(std::cell::RefCell<Vec<&'static str>>);
    impl RefCellVec {
        fn push(&self, s: &'static str) {
            self.0.borrow_mut().push(s);
        }
        fn take(&self) -> Vec<&'static str> {
            self.0.take()
        }
    }

    #[test]
    fn interrupt_stops_the_task_at_its_next_yield() {
        let sched = Scheduler::current();
        let rounds = Rc::new(Cell::new(0u32));
        let r2 = Rc::clone(&rounds);
        let t = task(move |ctl| async move {
            while ctl.keep_going().await {
                r2.set(r2.get() + 1);
            }
        });
        assert!(t.alive());

        sched.run_until(|| rounds.get() >= 3);
        t.interrupt();
        let rounds_at_interrupt = rounds.get();

        let err = sched.block_on(t.join());
        assert_eq!(err, Error::NO_ERROR);
        assert!(!t.alive());
        // The task exited at its next yield, not some arbitrary later one.
        assert!(rounds.get() <= rounds_at_interrupt + 1);
        assert!(sched.assert_empty());
    }

    #[test]
    fn a_failing_body_reports_its_error_at_the_join() {
        let sched = Scheduler::current();
        let t = task(|_ctl| async move { Err(RuntimeError::UnexpectedEof.into()) });
        let err = sched.block_on(t.join());
        assert_eq!(err, Error::from(RuntimeError::UnexpectedEof));
        assert!(sched.assert_empty());
    }

    #[test]
    fn a_panicking_body_reports_a_panic_error() {
        let sched = Scheduler::current();
        let t = task::<_, _, ()>(|_ctl| async move {
            panic!("task went sideways");
        });
        let err = sched.block_on(t.join());
        assert_eq!(err.domain_name(), "panic");
        assert!(sched.assert_empty());
    }
}
