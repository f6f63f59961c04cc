use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// An engine-agnostic representation of JavaScript values crossing the host boundary.
/// Only primitives cross; structured payloads are passed as JSON text.
#[derive(Clone, Debug, PartialEq)]
pub enum JSValue {
    /// The `undefined` value.
    Undefined,
    /// The `null` value.
    Null,
    /// A boolean primitive.
    Boolean(bool),
    /// A number (IEEE 754 double precision).
    Number(f64),
    /// A string value (UTF-8).
    String(String),
}

impl JSValue {
    /// Borrow the string payload, if this is a string.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Numeric payload, if this is a number.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(number) => Some(*number),
            _ => None,
        }
    }

    /// True for `undefined` and `null`.
    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }
}

/// Error type used by host callbacks. Engines rethrow it as a JS exception.
#[derive(Debug, PartialEq, Eq)]
pub enum JSError {
    /// A type error (for example, wrong argument types).
    TypeError(String),
    /// A malformed argument such as an invalid URL (mirrors the DOM `SyntaxError`).
    SyntaxError(String),
    /// The object is not in a state that allows the call (mirrors the DOM `InvalidStateError`).
    InvalidState(String),
    /// An argument outside the allowed range (mirrors the DOM `InvalidAccessError`).
    InvalidAccess(String),
    /// An internal error not exposed to user code in detail.
    InternalError(String),
}

impl JSError {
    /// The exception name scripts observe on the thrown error.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TypeError(_) => "TypeError",
            Self::SyntaxError(_) => "SyntaxError",
            Self::InvalidState(_) => "InvalidStateError",
            Self::InvalidAccess(_) => "InvalidAccessError",
            Self::InternalError(_) => "InternalError",
        }
    }

    /// The message without the exception name.
    pub fn message(&self) -> &str {
        match self {
            Self::TypeError(message)
            | Self::SyntaxError(message)
            | Self::InvalidState(message)
            | Self::InvalidAccess(message)
            | Self::InternalError(message) => message,
        }
    }
}

impl Display for JSError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        write!(formatter, "{}: {}", self.name(), self.message())
    }
}

impl Error for JSError {}

/// Log severity levels understood by the host logger.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Read a required string argument.
pub(crate) fn string_arg(args: &[JSValue], index: usize, name: &str) -> Result<String, JSError> {
    args.get(index)
        .and_then(JSValue::as_str)
        .map(str::to_owned)
        .ok_or_else(|| JSError::TypeError(format!("{name} must be a string")))
}

/// Read a required numeric id argument.
pub(crate) fn id_arg(args: &[JSValue], index: usize, name: &str) -> Result<u64, JSError> {
    match args.get(index).and_then(JSValue::as_f64) {
        Some(number) if number.is_finite() && number >= 0.0 => Ok(number as u64),
        _ => Err(JSError::TypeError(format!("{name} must be a non-negative number"))),
    }
}

/// Read an optional string argument; `undefined`/`null` map to `None`.
pub(crate) fn optional_string_arg(args: &[JSValue], index: usize) -> Option<String> {
    args.get(index).and_then(JSValue::as_str).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_helpers_validate_types() {
        let args = vec![
            JSValue::String(String::from("ws://relay")),
            JSValue::Number(7.0),
            JSValue::Null,
        ];
        assert_eq!(string_arg(&args, 0, "url"), Ok(String::from("ws://relay")));
        assert_eq!(id_arg(&args, 1, "id"), Ok(7));
        assert!(matches!(id_arg(&args, 0, "id"), Err(JSError::TypeError(_))));
        assert!(matches!(string_arg(&args, 2, "url"), Err(JSError::TypeError(_))));
        assert_eq!(optional_string_arg(&args, 2), None);
        assert!(args[2].is_nullish());
    }

    #[test]
    fn errors_render_with_exception_names() {
        assert_eq!(
            JSError::InvalidState(String::from("still connecting")).to_string(),
            "InvalidStateError: still connecting"
        );
    }
}
