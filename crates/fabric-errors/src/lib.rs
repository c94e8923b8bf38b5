//! The error value shared by every layer of the fabric runtime.
//!
//! Unlike a plain `std::error::Error`, a [`Error`] carries the pieces the
//! runtime needs to turn a handler failure into a wire-level response: an
//! HTTP status code, a stack of capture sites, a bag of structured
//! properties, and a correlation trace id that is propagated in the
//! envelope (see `fabric_wire::frame`).
//!
//! Construction mirrors the source framework's positional `New(pattern,
//! args...)` convention: the first integer argument becomes the status
//! code, error arguments are wrap-chained in the order given, and any
//! remaining string arguments are paired up into properties (an odd
//! leftover is stored under the key `!BADKEY`). Rust has no variadics, so
//! the convention is expressed through [`ErrorArg`] and the [`error_args!`]
//! helper macro instead of reflection.

use std::collections::BTreeMap;
use std::fmt;

mod status;
pub use status::status_text;

/// One capture site in an error's stack.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StackFrame {
    /// Best-effort function/module label; empty when the call site didn't supply one.
    pub function: String,
    pub file: String,
    pub line: u32,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.function.is_empty() {
            write!(f, "{}:{}", self.file, self.line)
        } else {
            write!(f, "{} ({}:{})", self.function, self.file, self.line)
        }
    }
}

/// A single positional argument to [`Error::new`] / [`Error::trace`].
///
/// Built up by [`error_args!`] from plain literals: integers become the
/// status code, `Error` values are wrap-chained causes, and strings are
/// collected pairwise into structured properties.
#[derive(Debug, Clone)]
pub enum ErrorArg {
    Status(u16),
    Cause(Error),
    Text(String),
}

impl From<u16> for ErrorArg {
    fn from(v: u16) -> Self {
        ErrorArg::Status(v)
    }
}

impl From<i32> for ErrorArg {
    fn from(v: i32) -> Self {
        ErrorArg::Status(v as u16)
    }
}

impl From<Error> for ErrorArg {
    fn from(v: Error) -> Self {
        ErrorArg::Cause(v)
    }
}

impl From<&str> for ErrorArg {
    fn from(v: &str) -> Self {
        ErrorArg::Text(v.to_owned())
    }
}

impl From<String> for ErrorArg {
    fn from(v: String) -> Self {
        ErrorArg::Text(v)
    }
}

/// Builds a `Vec<ErrorArg>` from plain literals passed to [`Error::new`].
///
/// ```
/// use fabric_errors::{error_args, Error};
/// let e = Error::new("overloaded", error_args![503u16, "retry_after", "2s"]);
/// assert_eq!(e.status(), 503);
/// assert_eq!(e.property("retry_after"), Some("2s"));
/// ```
#[macro_export]
macro_rules! error_args {
    ($($arg:expr),* $(,)?) => {
        vec![$(::fabric_errors::ErrorArg::from($arg)),*]
    };
}

/// A stack-capturing, status-carrying, trace-id-propagating error value.
#[derive(Debug, Clone)]
pub struct Error {
    message: String,
    status: u16,
    stack: Vec<StackFrame>,
    properties: BTreeMap<String, String>,
    trace_id: String,
    /// Wrap-chained causes, in the order they were supplied to `new`/`trace`.
    causes: Vec<Error>,
}

impl Error {
    /// Positional constructor mirroring the source `New(pattern, args...)`.
    ///
    /// - the first [`ErrorArg::Status`] encountered sets the status (default 500
    ///   when none is given and `pattern` is empty falls back to the status's
    ///   well-known text);
    /// - every [`ErrorArg::Cause`] is appended to the wrap chain, in order;
    /// - remaining [`ErrorArg::Text`] values are paired into properties; an
    ///   odd one out is stored under `!BADKEY`.
    #[track_caller]
    pub fn new(pattern: impl Into<String>, args: Vec<ErrorArg>) -> Error {
        let loc = std::panic::Location::caller();
        let mut status = None;
        let mut causes = Vec::new();
        let mut texts = Vec::new();
        for arg in args {
            match arg {
                ErrorArg::Status(s) if status.is_none() => status = Some(s),
                ErrorArg::Status(_) => {}
                ErrorArg::Cause(e) => causes.push(e),
                ErrorArg::Text(t) => texts.push(t),
            }
        }
        let status = status.unwrap_or(500);
        let pattern = pattern.into();
        let message = if pattern.is_empty() {
            status_text(status).to_owned()
        } else {
            pattern
        };

        let mut properties = BTreeMap::new();
        let mut it = texts.into_iter();
        loop {
            match (it.next(), it.next()) {
                (Some(k), Some(v)) => {
                    properties.insert(k, v);
                }
                (Some(k), None) => {
                    properties.insert("!BADKEY".to_owned(), k);
                    break;
                }
                _ => break,
            }
        }

        Error {
            message,
            status,
            stack: vec![StackFrame {
                function: String::new(),
                file: loc.file().to_owned(),
                line: loc.line(),
            }],
            properties,
            trace_id: new_trace_id(),
            causes,
        }
    }

    /// `Trace(err, args...)` is `New("", err, args...)`: it captures one frame
    /// above the caller and wraps `err` as the first cause, inheriting its
    /// trace id so the whole call chain shares one correlation token.
    #[track_caller]
    pub fn trace(err: Error, args: Vec<ErrorArg>) -> Error {
        let trace_id = err.trace_id.clone();
        let status = err.status;
        let caller_gave_status = args
            .iter()
            .any(|a| matches!(a, ErrorArg::Status(_)));
        let mut full_args = vec![ErrorArg::Cause(err)];
        full_args.extend(args);
        let mut traced = Error::new("", full_args);
        traced.trace_id = trace_id;
        if !caller_gave_status {
            traced.status = status;
        }
        traced
    }

    /// Merges several errors' stacks into one new root error. Used by
    /// `Connector::parallel` to aggregate concurrent failures.
    #[track_caller]
    pub fn join(errors: Vec<Error>) -> Option<Error> {
        if errors.is_empty() {
            return None;
        }
        if errors.len() == 1 {
            return errors.into_iter().next();
        }
        let status = errors[0].status;
        let trace_id = errors[0].trace_id.clone();
        let message = errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let loc = std::panic::Location::caller();
        let mut stack = vec![StackFrame {
            function: String::new(),
            file: loc.file().to_owned(),
            line: loc.line(),
        }];
        let mut causes = Vec::with_capacity(errors.len());
        for e in errors {
            stack.extend(e.stack.iter().cloned());
            causes.push(e);
        }
        Some(Error {
            message,
            status,
            stack,
            properties: BTreeMap::new(),
            trace_id,
            causes,
        })
    }

    /// Wraps any `std::error::Error` into a fabric `Error` with status 500,
    /// capturing a fresh frame and minting a new trace id.
    #[track_caller]
    pub fn wrap(err: impl std::error::Error) -> Error {
        Error::new(err.to_string(), vec![])
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Error {
        self.trace_id = trace_id.into();
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn stack(&self) -> &[StackFrame] {
        &self.stack
    }

    pub fn causes(&self) -> &[Error] {
        &self.causes
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {})", self.message, self.status)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// Mints a 32-hex-character correlation token.
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Runs `f`, converting any panic into a 500 `Error` whose message is the
/// stringified panic payload, with a stack frame captured at the catch site.
#[track_caller]
pub fn catch_panic<F, R>(f: F) -> Result<R, Error>
where
    F: FnOnce() -> R + std::panic::UnwindSafe,
{
    match std::panic::catch_unwind(f) {
        Ok(v) => Ok(v),
        Err(payload) => {
            let text = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_owned()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "panic with non-string payload".to_owned()
            };
            Err(Error::new(text, error_args![500i32]))
        }
    }
}
