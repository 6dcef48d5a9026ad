//! Serialization of coroutine methods onto one scheduler.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::outcome::IntoOutcome;
use crate::promise::{Promise, Provider};
use crate::scheduler::{Caught, CoroBox, Scheduler, SchedulerHandle};

/// An invocation that has not started yet. The flag says whether to start
/// it eagerly (fresh call on an idle lane) or via the ready queue (taken
/// off the lane's backlog).
type Invocation = Box<dyn FnOnce(bool) + Send>;

struct Lane {
    active: bool,
    backlog: VecDeque<Invocation>,
}

struct ActorShared<S> {
    sched: SchedulerHandle,
    state: Mutex<S>,
    lane: Mutex<Lane>,
}

/// Runs one coroutine method at a time over a piece of state, no matter
/// how many callers — or threads — invoke methods concurrently.
///
/// Every method runs on the actor's scheduler. A method invoked on that
/// scheduler's thread while the actor is idle starts immediately; other
/// invocations are queued and start, in order, as their predecessors
/// finish.
pub struct Actor<S: Send + 'static> {
    shared: Arc<ActorShared<S>>,
}

impl<S: Send + 'static> Actor<S> {
    /// An actor whose methods run on the current thread's scheduler.
    pub fn new(state: S) -> Self {
        Self::on(&Scheduler::current(), state)
    }

    /// An actor bound to a specific scheduler.
    pub fn on(sched: &Scheduler, state: S) -> Self {
        Actor {
            shared: Arc::new(ActorShared {
                sched: sched.handle(),
                state: Mutex::new(state),
                lane: Mutex::new(Lane {
                    active: false,
                    backlog: VecDeque::new(),
                }),
            }),
        }
    }

    pub fn scheduler(&self) -> SchedulerHandle {
        self.shared.sched.clone()
    }

    /// Invokes a coroutine method on the actor. Callable from any
    /// thread; the body runs on the actor's scheduler, strictly
    /// serialized with every other method of this actor.
    ///
    /// The closure receives a [`StateCell`] for synchronous access to
    /// the actor's state between awaits.
    pub fn invoke<R, O, F, Fut>(&self, f: F) -> Promise<R>
    where
        R: Send + 'static,
        O: IntoOutcome<R>,
        F: FnOnce(StateCell<S>) -> Fut + Send + 'static,
        Fut: Future<Output = O> + 'static,
    {
        let provider = Promise::provider();
        let promise = provider.promise();
        let shared = Arc::clone(&self.shared);
        let inv = make_invocation(Arc::clone(&self.shared), provider, f);
        ActorShared::submit(shared, inv);
        promise
    }
}

fn make_invocation<S, R, O, F, Fut>(
    shared: Arc<ActorShared<S>>,
    provider: Provider<R>,
    f: F,
) -> Invocation
where
    S: Send + 'static,
    R: Send + 'static,
    O: IntoOutcome<R>,
    F: FnOnce(StateCell<S>) -> Fut + Send + 'static,
    Fut: Future<Output = O> + 'static,
{
    Box::new(move |eager| {
        // Runs on the actor's scheduler thread. The method future is
        // built here, so it does not need to be Send itself.
        let body = f(StateCell {
            shared: Arc::clone(&shared),
        });
        let wrapped = Box::pin(async move {
            let outcome = Caught::new(body).await;
            provider.resolve(outcome);
            ActorShared::finished(&shared);
        });
        let sched = Scheduler::current();
        if eager {
            sched.spawn_now(CoroBox::Local(wrapped));
        } else {
            sched.spawn_boxed(CoroBox::Local(wrapped));
        }
    })
}

impl<S: Send + 'static> ActorShared<S> {
    /// Start the invocation now if the lane is idle and we are on the
    /// right thread; otherwise queue it or hand it to the right thread.
    fn submit(shared: Arc<Self>, inv: Invocation) {
        if shared.sched.is_current() {
            let start = {
                let mut lane = shared.lane.lock().unwrap();
                if lane.active {
                    lane.backlog.push_back(inv);
                    None
                } else {
                    lane.active = true;
                    Some(inv)
                }
            };
            if let Some(inv) = start {
                inv(true);
            }
        } else {
            let shared2 = Arc::clone(&shared);
            shared.sched.on_event_loop(move || Self::submit(shared2, inv));
        }
    }

    /// Called as each method finishes: starts the next queued one.
    fn finished(shared: &Arc<Self>) {
        let next = {
            let mut lane = shared.lane.lock().unwrap();
            debug_assert!(lane.active);
            let next = lane.backlog.pop_front();
            if next.is_none() {
                lane.active = false;
            }
            next
        };
        if let Some(inv) = next {
            inv(false);
        }
    }
}

/// Access to an actor's state from inside a method body. Sections run
/// between awaits; the serialization guarantee makes them uncontended.
pub struct StateCell<S: Send + 'static> {
    shared: Arc<ActorShared<S>>,
}

impl<S: Send + 'static> Clone for StateCell<S> {
    fn clone(&self) -> Self {
        StateCell {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Send + 'static> StateCell<S> {
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = self.shared.state.lock().unwrap();
        f(&mut state)
    }
}
