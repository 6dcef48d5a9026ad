use std::any::Any;
use std::fmt;

/// An error domain: a named, statically registered family of error codes.
///
/// The core defines the [`CoreDomain`] and [`PanicDomain`]; embedders add
/// their own domains (I/O back-ends, protocol layers) by implementing this
/// trait for a unit struct and handing out `&'static` references to it.
pub trait ErrorDomain: Send + Sync {
    /// Short identifier of the domain, unique within the process.
    fn name(&self) -> &'static str;

    /// Human-readable description of one of this domain's codes.
    fn description(&self, code: i32) -> &'static str;
}

/// A domain-tagged error value. Cheap to copy, compare and store.
///
/// Code 0 is reserved in every domain: it encodes "no error"
/// ([`Error::NO_ERROR`]), which lets an `Error` field double as an
/// optional without an extra wrapper.
#[derive(Clone, Copy)]
pub struct Error {
    domain: &'static dyn ErrorDomain,
    code: i32,
}

impl Error {
    /// The distinguished "no error" value.
    pub const NO_ERROR: Error = Error {
        domain: &CoreDomain,
        code: 0,
    };

    pub fn new(domain: &'static dyn ErrorDomain, code: i32) -> Self {
        Error { domain, code }
    }

    /// True if this is an actual error (not [`Error::NO_ERROR`]).
    pub fn is_error(&self) -> bool {
        self.code != 0
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn domain(&self) -> &'static dyn ErrorDomain {
        self.domain
    }

    pub fn domain_name(&self) -> &'static str {
        self.domain.name()
    }

    pub fn description(&self) -> &'static str {
        if self.code == 0 {
            "(no error)"
        } else {
            self.domain.description(self.code)
        }
    }

    /// Converts a captured panic payload into an error in the
    /// [`PanicDomain`]. The payload message, when there is one, is logged
    /// here since the error value itself only carries (domain, code).
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Error {
        let code = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            log::error!("coroutine panicked: {msg}");
            panic_code::MESSAGE
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            log::error!("coroutine panicked: {msg}");
            panic_code::MESSAGE
        } else {
            log::error!("coroutine panicked with a non-string payload");
            panic_code::OPAQUE
        };
        Error::new(&PanicDomain, code)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        // Domains are compared by name: two `&'static` references to the
        // same unit struct may still have distinct addresses.
        self.code == other.code && self.domain.name() == other.domain.name()
    }
}

impl Eq for Error {}

impl std::hash::Hash for Error {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.domain.name().hash(state);
        self.code.hash(state);
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code == 0 {
            write!(f, "(no error)")
        } else {
            write!(f, "{}: {}", self.domain.name(), self.description())
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error({}, {})", self.domain.name(), self.code)
    }
}

impl std::error::Error for Error {}

impl Default for Error {
    fn default() -> Self {
        Error::NO_ERROR
    }
}

/// The runtime's own error domain.
pub struct CoreDomain;

/// Error codes of the [`CoreDomain`], usable wherever an [`Error`] is
/// expected via `From`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RuntimeError {
    Cancelled = 1,
    Timeout,
    LogicError,
    EmptyResult,
    UnexpectedEof,
    ParseError,
    Unimplemented,
    InvalidArgument,
}

impl ErrorDomain for CoreDomain {
    fn name(&self) -> &'static str {
        "monocoro"
    }

    fn description(&self, code: i32) -> &'static str {
        match code {
            1 => "operation was cancelled",
            2 => "operation timed out",
            3 => "internal error (logic error)",
            4 => "internal error (result is empty)",
            5 => "unexpected EOF",
            6 => "error parsing data",
            7 => "unimplemented operation",
            8 => "invalid argument",
            _ => "unknown error",
        }
    }
}

impl From<RuntimeError> for Error {
    fn from(code: RuntimeError) -> Self {
        Error::new(&CoreDomain, code as i32)
    }
}

impl PartialEq<RuntimeError> for Error {
    fn eq(&self, other: &RuntimeError) -> bool {
        *self == Error::from(*other)
    }
}

/// Domain of errors produced by capturing a panic at a coroutine boundary.
pub struct PanicDomain;

mod panic_code {
    /// The panic payload was a message string.
    pub const MESSAGE: i32 = 1;
    /// The panic payload was some other type.
    pub const OPAQUE: i32 = 2;
}

impl ErrorDomain for PanicDomain {
    fn name(&self) -> &'static str {
        "panic"
    }

    fn description(&self, code: i32) -> &'static str {
        match code {
            1 => "a coroutine panicked",
            2 => "a coroutine panicked (non-string payload)",
            _ => "unknown error",
        }
    }
}
