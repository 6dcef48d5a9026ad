//! A single-threaded cooperative asynchronous runtime.
//!
//! Each thread owns one [`Scheduler`](scheduler::Scheduler), which drives
//! coroutines (plain `async` bodies) over a pluggable
//! [event loop](event_loop::EventLoop). Coroutines communicate through
//! the awaitable primitives in this crate — [`Promise`](promise::Promise),
//! [`Condition`](condition::Condition), [`Blocker`](condition::Blocker),
//! [`Select`](select::Select) — and errors travel as values in
//! [`Outcome`](outcome::Outcome), never as unwinds.
//!
//! Everything is thread-affine except the handful of operations built
//! for crossing threads: waking a suspended coroutine, notifying a
//! [`Blocker`](condition::Blocker), resolving a
//! [`Provider`](promise::Provider), and posting callbacks with
//! [`SchedulerHandle::on_event_loop`](scheduler::SchedulerHandle::on_event_loop).
//!
//! ```
//! use monocoro::prelude::*;
//!
//! let sched = Scheduler::current();
//! let doubled = spawn(async { Ok(21) }).then(|v| v * 2);
//! assert_eq!(sched.block_on(doubled).value(), 42);
//! ```

pub mod actor;
pub mod condition;
pub mod error;
pub mod event_loop;
pub mod generator;
pub mod lifecycle;
pub mod outcome;
pub mod promise;
pub mod queue;
pub mod scheduler;
pub mod select;
pub mod task;

pub mod prelude {
    pub use crate::actor::{Actor, StateCell};
    pub use crate::condition::{Blocker, Condition};
    pub use crate::error::{Error, ErrorDomain, RuntimeError};
    pub use crate::event_loop::{BasicLoop, EventLoop};
    pub use crate::generator::{generator, Generator, Yielder};
    pub use crate::outcome::{IntoOutcome, Outcome};
    pub use crate::promise::{spawn, spawn_sendable, Promise, Provider};
    pub use crate::queue::{AsyncQueue, BoundedAsyncQueue, QueueState};
    pub use crate::scheduler::{yield_now, Scheduler, SchedulerHandle};
    pub use crate::select::{Select, Selectable};
    pub use crate::task::{task, Task, TaskControl};
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn a_sendable_coroutine_can_migrate_between_schedulers() {
        init_logging();
        let sched = Scheduler::current();
        let main_handle = sched.handle();
        let main_thread = std::thread::current().id();

        let (tx, rx) = std::sync::mpsc::channel();
        let worker = std::thread::spawn(move || {
            let sched = Scheduler::current();
            tx.send(sched.handle()).unwrap();
            sched.run();
            assert!(sched.assert_empty());
        });
        let worker_handle = rx.recv().unwrap();

        let to_worker = worker_handle.clone();
        let back_home = main_handle.clone();
        let journey = spawn_sendable(async move {
            to_worker.switch_to().await;
            let visited = std::thread::current().id();
            back_home.switch_to().await;
            assert_eq!(std::thread::current().id(), main_thread);
            Ok(visited)
        });

        let visited = sched.block_on(journey).value();
        assert_ne!(visited, main_thread);

        worker_handle.stop();
        worker.join().unwrap();
        assert!(sched.assert_empty());
    }

    #[test]
    fn work_composes_across_primitives() {
        init_logging();
        let sched = Scheduler::current();
        let queue = AsyncQueue::new();

        // A generator feeding a queue feeding a consumer, with the total
        // reported through a promise chain.
        let squares = generator(|y| async move {
            for i in 1..=5u64 {
                y.emit(i * i).await;
            }
        });

        let q2 = queue.clone();
        let feeder = task(move |ctl| async move {
            let mut squares = squares;
            loop {
                match squares.next().await {
                    Outcome::Value(v) => {
                        q2.push(v);
                    }
                    _ => {
                        q2.close_push(Error::NO_ERROR);
                        break;
                    }
                }
                if !ctl.keep_going().await {
                    break;
                }
            }
        });

        let q3 = queue.clone();
        let total = spawn(async move {
            let mut gen = q3.generate();
            let mut total = 0u64;
            loop {
                match gen.next().await {
                    Outcome::Value(v) => total += v,
                    _ => break,
                }
            }
            Ok(total)
        })
        .then(|total| total + 1);

        assert_eq!(sched.block_on(total).value(), 1 + 4 + 9 + 16 + 25 + 1);
        assert_eq!(sched.block_on(feeder.join()), Error::NO_ERROR);
        assert!(sched.assert_empty());
    }

    #[test]
    fn no_frames_leak_across_a_busy_run() {
        init_logging();
        let sched = Scheduler::current();
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let completed = Arc::clone(&completed);
            let _ = spawn(async move {
                for _ in 0..4 {
                    yield_now().await;
                }
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        sched.run_until(|| completed.load(Ordering::SeqCst) == 16);
        assert!(sched.assert_empty());
        assert_eq!(crate::lifecycle::count(), 0);
    }
}
