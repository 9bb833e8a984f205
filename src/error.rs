//! Error types for promise-event
//!
//! Two error classes exist. Construction errors are synchronous and coded
//! ([`ValidationError`]); they abort the call that produced them. Task
//! failures are never errors at this level: they are captured as values and
//! surfaced through events and snapshots.

use std::fmt;
use thiserror::Error;

/// Coded validation failures raised by constructors and `all`.
///
/// Codes in the 10 range belong to the single-task bridge, codes in the 20
/// range to the batch aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationError {
    /// The executor candidate is not invocable
    NotAFunction,
    /// The executor does not declare exactly two parameters
    WrongArity,
    /// `all` was called without a task list
    MissingArgument,
    /// The task list is not an array
    NotAnArray,
    /// The task list is empty
    EmptyArray,
    /// At least one item in the task list is not a promise
    InvalidItems,
}

impl ValidationError {
    /// Stable numeric code
    pub fn code(&self) -> u16 {
        match self {
            ValidationError::NotAFunction => 10,
            ValidationError::WrongArity => 11,
            ValidationError::MissingArgument => 20,
            ValidationError::NotAnArray => 21,
            ValidationError::EmptyArray => 22,
            ValidationError::InvalidItems => 23,
        }
    }

    /// Fixed human-readable message
    pub fn message(&self) -> &'static str {
        match self {
            ValidationError::NotAFunction => messages::NOT_A_FUNCTION,
            ValidationError::WrongArity => messages::WRONG_ARITY,
            ValidationError::MissingArgument => messages::MISSING_ARGUMENT,
            ValidationError::NotAnArray => messages::NOT_AN_ARRAY,
            ValidationError::EmptyArray => messages::EMPTY_ARRAY,
            ValidationError::InvalidItems => messages::INVALID_ITEMS,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Code {}] {}", self.code(), self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Main error type for promise-event
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed constructor or `all` argument
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Invalid configuration value
    #[error("ConfigError: {0}")]
    Config(String),

    /// Native function invocation failed
    #[error("CallError: {0}")]
    Call(String),

    /// IO error
    #[error("IOError: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON decoding error
    #[error("JsonError: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Create a call error
    pub fn call(message: impl Into<String>) -> Self {
        Error::Call(message.into())
    }

    /// Numeric code of a validation error, if this is one
    pub fn code(&self) -> Option<u16> {
        match self {
            Error::Validation(v) => Some(v.code()),
            _ => None,
        }
    }

    /// The underlying validation error, if this is one
    pub fn validation(&self) -> Option<ValidationError> {
        match self {
            Error::Validation(v) => Some(*v),
            _ => None,
        }
    }
}

/// Result type alias for promise-event
pub type Result<T> = std::result::Result<T, Error>;

/// Fixed validation messages
pub mod messages {
    pub const NOT_A_FUNCTION: &str = "The provided argument is not a function.";
    pub const WRONG_ARITY: &str = "The provided function does not have two arguments.";
    pub const MISSING_ARGUMENT: &str = "No argument was provided.";
    pub const NOT_AN_ARRAY: &str = "The provided argument is not an array.";
    pub const EMPTY_ARRAY: &str = "The provided array has no items.";
    pub const INVALID_ITEMS: &str = "The items in the array are not valid promises.";
}
