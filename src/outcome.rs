use std::fmt;

use crate::error::{Error, RuntimeError};

/// The result of an asynchronous operation: a value, an error, or nothing.
///
/// "Nothing" ([`Outcome::Empty`]) is a real state, not an invalid one: a
/// [`Generator`](crate::generator::Generator) pulls `Empty` at the end of
/// its sequence, and an `Outcome<()>` distinguishes "completed" from "not
/// yet" without a payload.
#[must_use = "an Outcome may hold an error which should be checked"]
#[derive(Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Value(T),
    Error(Error),
    Empty,
}

impl<T> Outcome<T> {
    /// Normalizing constructor: [`Error::NO_ERROR`] encodes `Empty`.
    pub fn from_error(err: Error) -> Self {
        if err.is_error() {
            Outcome::Error(err)
        } else {
            Outcome::Empty
        }
    }

    pub fn from_result(res: Result<T, Error>) -> Self {
        match res {
            Ok(v) => Outcome::Value(v),
            Err(e) => Outcome::from_error(e),
        }
    }

    /// True if there is a value.
    pub fn ok(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Outcome::Empty)
    }

    /// The error, if any, else [`Error::NO_ERROR`].
    pub fn error(&self) -> Error {
        match self {
            Outcome::Error(e) => *e,
            _ => Error::NO_ERROR,
        }
    }

    /// Returns the value. Panics on an error or empty outcome; use
    /// [`into_result`](Outcome::into_result) where failure is expected.
    #[track_caller]
    pub fn value(self) -> T {
        match self {
            Outcome::Value(v) => v,
            Outcome::Error(e) => panic!("Outcome::value() on an error: {e}"),
            Outcome::Empty => panic!(
                "Outcome::value() on an empty outcome: {}",
                Error::from(RuntimeError::EmptyResult)
            ),
        }
    }

    /// Converts to a plain `Result`, mapping `Empty` to
    /// [`RuntimeError::EmptyResult`] so `?` can be used on any outcome.
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::Error(e) => Err(e),
            Outcome::Empty => Err(RuntimeError::EmptyResult.into()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Value(v) => Outcome::Value(f(v)),
            Outcome::Error(e) => Outcome::Error(e),
            Outcome::Empty => Outcome::Empty,
        }
    }

    pub fn take(&mut self) -> Outcome<T> {
        std::mem::replace(self, Outcome::Empty)
    }
}

impl<T> From<Error> for Outcome<T> {
    fn from(err: Error) -> Self {
        Outcome::from_error(err)
    }
}

impl<T: fmt::Debug> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(v) => write!(f, "Value({v:?})"),
            Outcome::Error(e) => write!(f, "Error({e:?})"),
            Outcome::Empty => write!(f, "Empty"),
        }
    }
}

/// What a coroutine body is allowed to return: either an [`Outcome`]
/// directly, a `Result` (so `?` composes), or `()` for bodies that cannot
/// fail.
pub trait IntoOutcome<T> {
    fn into_outcome(self) -> Outcome<T>;
}

impl<T> IntoOutcome<T> for Outcome<T> {
    fn into_outcome(self) -> Outcome<T> {
        self
    }
}

impl<T> IntoOutcome<T> for Result<T, Error> {
    fn into_outcome(self) -> Outcome<T> {
        Outcome::from_result(self)
    }
}

impl IntoOutcome<()> for () {
    fn into_outcome(self) -> Outcome<()> {
        Outcome::Value(())
    }
}
