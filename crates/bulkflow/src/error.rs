//! Error types for the execution core
//!
//! A single error kind, [`ExecutionError`], crosses the engine boundary: it
//! wraps whatever the driver collaborator failed with together with the
//! originating statement. Batching never fails (unresolvable grouping keys
//! degrade to singleton groups), so there is no batching error type.

use crate::statement::Statement;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error produced by the driver collaborator. The engine treats the
/// cause as opaque and normalizes it into [`ExecutionError`].
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of a raw driver call, before normalization
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// A statement execution failure
///
/// Carries the originating statement so that resilient callers can account
/// for (or retry) exactly the unit of work that failed. The cause is shared,
/// which keeps error-wrapping results cheap to move through result streams.
#[derive(Debug, Clone)]
pub struct ExecutionError {
    statement: Statement,
    cause: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl ExecutionError {
    /// Wrap a driver failure together with the statement that triggered it
    pub fn new(statement: Statement, cause: DriverError) -> Self {
        Self {
            statement,
            cause: Arc::from(cause),
        }
    }

    /// Create an execution error from a plain message
    pub fn message(statement: Statement, message: impl Into<String>) -> Self {
        Self {
            statement,
            cause: Arc::new(MessageError(message.into())),
        }
    }

    /// The statement whose execution failed
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// The underlying driver failure
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.cause
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "statement execution failed: {} (statement: {})",
            self.cause, self.statement
        )
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let cause: &(dyn std::error::Error + 'static) = &*self.cause;
        Some(cause)
    }
}

/// Plain-text driver failure used by [`ExecutionError::message`]
#[derive(Debug, Error)]
#[error("{0}")]
struct MessageError(String);
