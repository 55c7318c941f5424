use std::fmt;

/// Coarse classification of the few fallible, caller-visible operations in this crate.
///
/// The scheduling fast path (`post`, `post_event`, timer firing) never returns a
/// `Result` at all: failures there are logged and dropped, see the crate-level docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A module name was already registered.
    AlreadyExists,
    /// No module is registered under the given name.
    NotFound,
    /// The scheduling policy required a collaborator that was not present
    /// (e.g. handler-routed without a task handler).
    FailedPrecondition,
    /// The worker pool could not grow any further.
    ResourceExhausted,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::NotFound => "not found",
            ErrorKind::FailedPrecondition => "failed precondition",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Error type returned by the small set of fallible operations (module
/// registration, handler construction).
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

/// Result alias used by the crate's fallible entry points.
pub type Result<T> = std::result::Result<T, Error>;
