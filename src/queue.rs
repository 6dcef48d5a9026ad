//! Producer/consumer queues with close semantics.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::condition::Condition;
use crate::error::Error;
use crate::generator::{generator, Generator};
use crate::outcome::Outcome;
use crate::task::{task, Task};

/// Close-state of a queue: `Open` accepts pushes and pops, `Closing`
/// drains (no more pushes), `Closed` accepts nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    Open,
    Closing,
    Closed,
}

struct QueueCore<T> {
    items: VecDeque<T>,
    state: QueueState,
    close_error: Error,
    close_when_empty: bool,
    generating: bool,
    capacity: Option<usize>,
}

struct QueueShared<T> {
    core: RefCell<QueueCore<T>>,
    /// Signalled when an item lands in an empty queue, or on close.
    pull: Condition,
    /// Signalled when a full bounded queue gains room, or on close.
    room: Condition,
}

impl<T> QueueShared<T> {
    fn close(&self, err: Error) {
        {
            let mut core = self.core.borrow_mut();
            if core.state == QueueState::Closed {
                return;
            }
            core.state = QueueState::Closed;
            if !core.close_error.is_error() {
                core.close_error = err;
            }
            core.items.clear();
        }
        self.pull.notify_one();
        self.room.notify_all();
    }

    fn pop(&self) -> T {
        let (item, was_full, close_now) = {
            let mut core = self.core.borrow_mut();
            let was_full = core
                .capacity
                .is_some_and(|cap| core.items.len() >= cap);
            let item = core
                .items
                .pop_front()
                .expect("pop from an empty queue");
            let close_now = core.close_when_empty && core.items.is_empty();
            (item, was_full, close_now)
        };
        if close_now {
            self.close(Error::NO_ERROR);
        } else if was_full {
            self.room.notify_one();
        }
        item
    }
}

/// A FIFO whose consumer side is a [`Generator`]. Cloned handles share
/// one queue; everything is single-threaded.
///
/// `push` and `pop` never suspend. The asynchronous side is the
/// generator view ([`generate`](AsyncQueue::generate)), which drains
/// items as they arrive and ends when the queue closes.
pub struct AsyncQueue<T> {
    shared: Rc<QueueShared<T>>,
}

impl<T> Clone for AsyncQueue<T> {
    fn clone(&self) -> Self {
        AsyncQueue {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        AsyncQueue {
            shared: Rc::new(QueueShared {
                core: RefCell::new(QueueCore {
                    items: VecDeque::new(),
                    state: QueueState::Open,
                    close_error: Error::NO_ERROR,
                    close_when_empty: false,
                    generating: false,
                    capacity,
                }),
                pull: Condition::new(),
                room: Condition::new(),
            }),
        }
    }

    pub fn state(&self) -> QueueState {
        self.shared.core.borrow().state
    }

    pub fn len(&self) -> usize {
        self.shared.core.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.core.borrow().items.is_empty()
    }

    /// The terminal error, once the queue has drained; otherwise
    /// [`Error::NO_ERROR`].
    pub fn error(&self) -> Error {
        let core = self.shared.core.borrow();
        if core.items.is_empty() {
            core.close_error
        } else {
            Error::NO_ERROR
        }
    }

    /// Closes the push side: the state becomes `Closing`, pushes are
    /// rejected, pops keep draining. The generator ends (with `err`, if
    /// it is a real error) once the queue empties.
    pub fn close_push(&self, err: Error) {
        let drained = {
            let mut core = self.shared.core.borrow_mut();
            if core.state != QueueState::Open {
                return;
            }
            core.state = QueueState::Closing;
            core.close_when_empty = true;
            if !core.close_error.is_error() {
                core.close_error = err;
            }
            core.items.is_empty()
        };
        if drained {
            // Nothing left to drain: close now, so a parked generator
            // wakes and sees EOF instead of waiting for an item that
            // can never arrive.
            self.shared.close(err);
        }
        self.shared.room.notify_all();
    }

    /// Arranges for the queue to close once it drains — unlike
    /// [`close_push`](AsyncQueue::close_push), pushes stay allowed in
    /// the meantime.
    pub fn close_when_empty(&self, err: Error) {
        let close_now = {
            let mut core = self.shared.core.borrow_mut();
            if core.items.is_empty() {
                true
            } else {
                core.close_when_empty = true;
                if !core.close_error.is_error() {
                    core.close_error = err;
                }
                false
            }
        };
        if close_now {
            self.shared.close(err);
        }
    }

    /// Closes the queue immediately, discarding queued items. The
    /// generator signals EOF (with `err`, if it is a real error) right
    /// away.
    pub fn close(&self, err: Error) {
        self.shared.close(err);
    }

    /// Adds an item at the tail. Returns false if the queue is not open,
    /// or (for a bounded queue) full.
    pub fn push(&self, item: T) -> bool {
        let pushed_first = {
            let mut core = self.shared.core.borrow_mut();
            if core.state != QueueState::Open {
                return false;
            }
            if core.capacity.is_some_and(|cap| core.items.len() >= cap) {
                return false;
            }
            core.items.push_back(item);
            core.items.len() == 1
        };
        if pushed_first {
            self.shared.pull.notify_one();
        }
        true
    }

    /// Pushes a value outcome; an error outcome closes the push side
    /// with that error instead.
    pub fn push_outcome(&self, outcome: Outcome<T>) -> bool {
        match outcome {
            Outcome::Value(v) => self.push(v),
            other => {
                self.close_push(other.error());
                true
            }
        }
    }

    /// Removes and returns the front item. Panics if the queue is empty;
    /// use [`maybe_pop`](AsyncQueue::maybe_pop) for the checked form.
    pub fn pop(&self) -> T {
        self.shared.pop()
    }

    pub fn maybe_pop(&self) -> Option<T> {
        if self.is_empty() {
            None
        } else {
            Some(self.shared.pop())
        }
    }

    /// Returns a generator yielding items until the queue closes.
    /// May be called once per queue.
    pub fn generate(&self) -> Generator<T>
    where
        T: 'static,
    {
        {
            let mut core = self.shared.core.borrow_mut();
            debug_assert!(!core.generating, "generate() may only be called once");
            core.generating = true;
        }
        let shared = Rc::clone(&self.shared);
        generator(move |y| async move {
            loop {
                let (state, empty, close_when_empty) = {
                    let core = shared.core.borrow();
                    (core.state, core.items.is_empty(), core.close_when_empty)
                };
                if state == QueueState::Closed {
                    break;
                }
                if empty {
                    if close_when_empty {
                        shared.close(Error::NO_ERROR);
                        break;
                    }
                    shared.pull.wait().await;
                    if shared.core.borrow().items.is_empty() {
                        // Woken by close, not by an item.
                        break;
                    }
                }
                let item = shared.pop();
                y.emit(item).await;
            }
            let err = shared.core.borrow().close_error;
            if err.is_error() {
                return Err(err);
            }
            Ok(())
        })
    }
}

impl<T: PartialEq> AsyncQueue<T> {
    pub fn contains(&self, item: &T) -> bool {
        self.shared.core.borrow().items.contains(item)
    }

    /// Removes the first item equal to `item`. Only legal while open.
    pub fn remove(&self, item: &T) -> bool {
        let (removed, was_full) = {
            let mut core = self.shared.core.borrow_mut();
            debug_assert!(core.state == QueueState::Open);
            let was_full = core
                .capacity
                .is_some_and(|cap| core.items.len() >= cap);
            let before = core.items.len();
            core.items.retain(|i| i != item);
            (core.items.len() < before, was_full)
        };
        if removed && was_full {
            self.shared.room.notify_one();
        }
        removed
    }
}

impl<T: Clone> AsyncQueue<T> {
    /// A copy of the front item (the one [`pop`](AsyncQueue::pop) would
    /// return), if any.
    pub fn peek(&self) -> Option<T> {
        self.shared.core.borrow().items.front().cloned()
    }
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// An [`AsyncQueue`] with a maximum size. `push` fails while full;
/// [`async_push`](BoundedAsyncQueue::async_push) waits for room instead.
pub struct BoundedAsyncQueue<T> {
    queue: AsyncQueue<T>,
}

impl<T> Clone for BoundedAsyncQueue<T> {
    fn clone(&self) -> Self {
        BoundedAsyncQueue {
            queue: self.queue.clone(),
        }
    }
}

impl<T> BoundedAsyncQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        BoundedAsyncQueue {
            queue: AsyncQueue::with_capacity(Some(capacity)),
        }
    }

    /// True if no more items fit right now.
    pub fn is_full(&self) -> bool {
        let core = self.queue.shared.core.borrow();
        core.capacity.is_some_and(|cap| core.items.len() >= cap)
    }

    /// Pushes an item, waiting for room if the queue is full.
    /// Resolves to false if the queue closed in the meantime.
    pub async fn async_push(&self, item: T) -> bool {
        while self.is_full() && self.state() == QueueState::Open {
            self.queue.shared.room.wait().await;
        }
        self.push(item)
    }

    pub async fn async_push_outcome(&self, outcome: Outcome<T>) -> bool {
        match outcome {
            Outcome::Value(v) => self.async_push(v).await,
            other => {
                self.close_push(other.error());
                true
            }
        }
    }

    /// Starts a task that drains `gen` into the queue, respecting
    /// backpressure, and closes the queue when the generator ends.
    pub fn push_generator(&self, mut gen: Generator<T>) -> Task
    where
        T: 'static,
    {
        let queue = self.clone();
        task(move |ctl| async move {
            while queue.state() == QueueState::Open {
                match gen.next().await {
                    Outcome::Value(v) => {
                        if !queue.async_push(v).await {
                            break;
                        }
                    }
                    terminal => {
                        queue.close_when_empty(terminal.error());
                        break;
                    }
                }
                if !ctl.keep_going().await {
                    break;
                }
            }
        })
    }
}

impl<T> std::ops::Deref for BoundedAsyncQueue<T> {
    type Target = AsyncQueue<T>;

    fn deref(&self) -> &AsyncQueue<T> {
        &self.queue
    }
}
