//! Argument validation
//!
//! Pure checks run before any task is started. Failures are returned as
//! coded [`ValidationError`]s and are never delivered as events.

use crate::error::ValidationError;
use crate::promise::Promise;
use crate::value::Value;

/// Validation view over a candidate argument
#[derive(Debug, Clone, Copy)]
pub struct Validation<'a> {
    input: &'a Value,
}

/// Number of parameters an executor must declare: `resolve` and `reject`
pub const EXECUTOR_ARITY: usize = 2;

impl<'a> Validation<'a> {
    /// Wrap a candidate argument
    pub fn new(input: &'a Value) -> Self {
        Self { input }
    }

    /// Check a single-task executor candidate.
    ///
    /// Returns `Ok(false)` for a falsy candidate: no task is started and no
    /// error is raised. Returns `Ok(true)` when a task may be started.
    pub fn main(&self) -> Result<bool, ValidationError> {
        if !self.input.to_boolean() {
            return Ok(false);
        }
        let Some(func) = self.input.as_function() else {
            return Err(ValidationError::NotAFunction);
        };
        if func.arity() != EXECUTOR_ARITY {
            return Err(ValidationError::WrongArity);
        }
        Ok(true)
    }

    /// Check a batch task list, returning its promise handles in order.
    pub fn all(&self) -> Result<Vec<Promise>, ValidationError> {
        if self.input.is_undefined() {
            return Err(ValidationError::MissingArgument);
        }
        let Some(items) = self.input.as_array() else {
            return Err(ValidationError::NotAnArray);
        };
        if items.is_empty() {
            return Err(ValidationError::EmptyArray);
        }
        items
            .iter()
            .map(|item| item.as_promise().cloned().ok_or(ValidationError::InvalidItems))
            .collect()
    }
}

/// Shorthand for [`Validation::new`]
pub fn validation(input: &Value) -> Validation<'_> {
    Validation::new(input)
}
