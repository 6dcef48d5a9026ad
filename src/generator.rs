//! Lazy, caller-driven sequences.
//!
//! The producer is an ordinary coroutine body that parks at every
//! [`Yielder::emit`]; the consumer pulls with [`Generator::next`], which
//! polls the producer inline — the producer only ever advances while a
//! consumer is asking for the next item, and its suspensions (awaiting a
//! promise, a condition, …) propagate through the consumer's own await.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::outcome::{IntoOutcome, Outcome};
use crate::scheduler::{Caught, Scheduler};

/// Handed to a generator body; emits the sequence's items.
pub struct Yielder<T> {
    cell: Rc<RefCell<Option<T>>>,
}

impl<T> Yielder<T> {
    /// Emits one item and parks the producer until the consumer pulls
    /// again.
    pub fn emit(&self, value: T) -> Emit<'_, T> {
        Emit {
            yielder: self,
            value: Some(value),
        }
    }
}

#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Emit<'a, T> {
    yielder: &'a Yielder<T>,
    value: Option<T>,
}

impl<T> Future for Emit<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = unsafe { self.get_unchecked_mut() };
        match this.value.take() {
            Some(value) => {
                let previous = this.yielder.cell.borrow_mut().replace(value);
                debug_assert!(previous.is_none(), "emitted over an unconsumed item");
                // No waker: the consumer drives the producer directly.
                Poll::Pending
            }
            None => {
                if this.yielder.cell.borrow().is_some() {
                    Poll::Pending
                } else {
                    Poll::Ready(())
                }
            }
        }
    }
}

/// A lazy sequence produced by a coroutine. Pull items with
/// [`next`](Generator::next); the sequence ends with a terminal
/// [`Outcome::Empty`], or [`Outcome::Error`] if the producer failed.
/// Not restartable. Dropping the generator drops the producer's frame,
/// running any cleanup in its body.
pub struct Generator<T> {
    producer: Option<Pin<Box<dyn Future<Output = Outcome<()>>>>>,
    cell: Rc<RefCell<Option<T>>>,
}

/// Creates a generator from a producer body.
///
/// Lazy: nothing runs until the first [`next`](Generator::next). The
/// body may return `()`, an `Outcome<()>`, or a `Result<(), Error>`; an
/// error becomes the sequence's terminal outcome.
pub fn generator<T, F, Fut, O>(f: F) -> Generator<T>
where
    T: 'static,
    F: FnOnce(Yielder<T>) -> Fut,
    Fut: Future<Output = O> + 'static,
    O: IntoOutcome<()>,
{
    let cell = Rc::new(RefCell::new(None));
    let body = f(Yielder {
        cell: Rc::clone(&cell),
    });
    Generator {
        producer: Some(Box::pin(Caught::new(body))),
        cell,
    }
}

impl<T> Generator<T> {
    /// Resolves to the next item, or the terminal outcome of the
    /// sequence. After the terminal outcome, every further pull is
    /// `Empty`.
    pub fn next(&mut self) -> GenNext<'_, T> {
        GenNext { gen: self }
    }

    /// Pulls the next item from non-coroutine code, driving the
    /// scheduler until the producer delivers. Panics inside a coroutine.
    pub fn next_blocking(&mut self) -> Outcome<T> {
        let sched = Scheduler::current();
        let pull = self.next();
        sched.block_on(pull)
    }

    /// True once the producer has finished.
    pub fn is_finished(&self) -> bool {
        self.producer.is_none()
    }
}

#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct GenNext<'a, T> {
    gen: &'a mut Generator<T>,
}

impl<T> Future for GenNext<'_, T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome<T>> {
        let gen = &mut *self.gen;
        let Some(producer) = gen.producer.as_mut() else {
            return Poll::Ready(Outcome::Empty);
        };
        match producer.as_mut().poll(cx) {
            Poll::Pending => match gen.cell.borrow_mut().take() {
                // The producer parked at an emit: that's our item.
                Some(value) => Poll::Ready(Outcome::Value(value)),
                // The producer parked on something else; our caller's
                // waker is registered there, so just pass it up.
                None => Poll::Pending,
            },
            Poll::Ready(outcome) => {
                gen.producer = None;
                match outcome {
                    Outcome::Error(e) => Poll::Ready(Outcome::Error(e)),
                    _ => Poll::Ready(Outcome::Empty),
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{Error, RuntimeError};
    use crate::promise::Promise;
    use crate::scheduler::Scheduler;
    use std::cell::Cell;
    use std::rc::Rc;

    fn fibonacci_up_to(limit: u64) -> Generator<u64> {
        generator(move |y| async move {
            let (mut a, mut b) = (1u64, 1u64);
            while a <= limit {
                y.emit(a).await;
                (a, b) = (b, a + b);
            }
        })
    }

    #[test]
    fn fibonacci_sequence_and_clean_termination() {
        let sched = Scheduler::current();
        let mut gen = fibonacci_up_to(50);

        let mut items = Vec::new();
        loop {
            match gen.next_blocking() {
                Outcome::Value(v) => items.push(v),
                terminal => {
                    assert!(terminal.is_empty());
                    assert_eq!(terminal.error(), Error::NO_ERROR);
                    break;
                }
            }
        }
        assert_eq!(items, vec![1, 1, 2, 3, 5, 8, 13, 21, 34]);
        assert!(gen.is_finished());
        assert!(gen.next_blocking().is_empty());
        assert!(sched.assert_empty());
    }

    #[test]
    fn nothing_runs_until_the_first_pull() {
        let started = Rc::new(Cell::new(false));
        let s2 = Rc::clone(&started);
        let mut gen = generator(move |y| async move {
            s2.set(true);
            y.emit(1).await;
        });
        assert!(!started.get());
        assert_eq!(gen.next_blocking().value(), 1);
        assert!(started.get());
    }

    #[test]
    fn a_failing_producer_ends_the_sequence_with_its_error() {
        let mut gen = generator(|y| async move {
            y.emit(10).await;
            Err(RuntimeError::ParseError.into())
        });
        assert_eq!(gen.next_blocking().value(), 10);
        let terminal = gen.next_blocking();
        assert_eq!(terminal.error(), Error::from(RuntimeError::ParseError));
        // The error is terminal; later pulls read plain EOF.
        assert!(gen.next_blocking().is_empty());
    }

    #[test]
    fn the_producer_may_await_other_awaitables() {
        let sched = Scheduler::current();
        let provider = Promise::<u64>::provider();
        let promise = provider.promise();
        let mut gen = generator(move |y| async move {
            let seed = promise.await.value();
            y.emit(seed).await;
            y.emit(seed * 2).await;
        });

        let worker = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            provider.resolve_value(21);
        });
        assert_eq!(gen.next_blocking().value(), 21);
        assert_eq!(gen.next_blocking().value(), 42);
        assert!(gen.next_blocking().is_empty());
        worker.join().unwrap();
        assert!(sched.assert_empty());
    }

    #[test]
    fn dropping_a_generator_runs_the_producers_cleanup() {
        struct SetOnDrop(Rc<Cell<bool>>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let dropped = Rc::new(Cell::new(false));
        let d2 = Rc::clone(&dropped);
        let mut gen = generator::<_, _, _, ()>(move |y| async move {
            let _guard = SetOnDrop(d2);
            loop {
                y.emit(1).await;
            }
        });
        assert_eq!(gen.next_blocking().value(), 1);
        assert!(!dropped.get());
        drop(gen);
        assert!(dropped.get());
    }
}
