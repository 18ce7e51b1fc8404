//! Result items delivered to consumers
//!
//! Each item is either a successful outcome wrapping the driver's per-row or
//! per-write response, or (in resilient mode) a failure outcome wrapping the
//! execution error. Items are immutable and created once per logical unit
//! produced.

use crate::driver::{Row, WriteAck};
use crate::error::ExecutionError;
use crate::statement::Statement;

/// One result item of a read subscription: a row, or the statement's failure
#[derive(Debug, Clone)]
pub enum ReadResult {
    /// A row produced by a successful execution
    Row {
        /// The statement that produced the row
        statement: Statement,
        /// The row itself
        row: Row,
    },
    /// The statement's execution failed (resilient mode only)
    Error(ExecutionError),
}

impl ReadResult {
    pub(crate) fn success(statement: Statement, row: Row) -> Self {
        Self::Row { statement, row }
    }

    pub(crate) fn failure(error: ExecutionError) -> Self {
        Self::Error(error)
    }

    /// Whether this item wraps a row
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Row { .. })
    }

    /// The originating statement
    pub fn statement(&self) -> &Statement {
        match self {
            Self::Row { statement, .. } => statement,
            Self::Error(error) => error.statement(),
        }
    }

    /// The row, if this item is a success
    pub fn row(&self) -> Option<&Row> {
        match self {
            Self::Row { row, .. } => Some(row),
            Self::Error(_) => None,
        }
    }

    /// The failure, if this item is an error
    pub fn error(&self) -> Option<&ExecutionError> {
        match self {
            Self::Row { .. } => None,
            Self::Error(error) => Some(error),
        }
    }
}

/// The result of a write subscription: an acknowledgement, or the
/// statement's failure
#[derive(Debug, Clone)]
pub enum WriteResult {
    /// The write was executed
    Ack {
        /// The statement that was written
        statement: Statement,
        /// The driver's acknowledgement
        ack: WriteAck,
    },
    /// The statement's execution failed (resilient mode only)
    Error(ExecutionError),
}

impl WriteResult {
    pub(crate) fn success(statement: Statement, ack: WriteAck) -> Self {
        Self::Ack { statement, ack }
    }

    pub(crate) fn failure(error: ExecutionError) -> Self {
        Self::Error(error)
    }

    /// Whether this item wraps an acknowledgement
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ack { .. })
    }

    /// The originating statement
    pub fn statement(&self) -> &Statement {
        match self {
            Self::Ack { statement, .. } => statement,
            Self::Error(error) => error.statement(),
        }
    }

    /// The acknowledgement, if this item is a success
    pub fn ack(&self) -> Option<&WriteAck> {
        match self {
            Self::Ack { ack, .. } => Some(ack),
            Self::Error(_) => None,
        }
    }

    /// The failure, if this item is an error
    pub fn error(&self) -> Option<&ExecutionError> {
        match self {
            Self::Ack { .. } => None,
            Self::Error(error) => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_result_accessors() {
        let stmt = Statement::single("SELECT 1");
        let ok = ReadResult::success(stmt.clone(), Row::new(&b"r"[..]));
        assert!(ok.is_success());
        assert!(ok.row().is_some());
        assert!(ok.error().is_none());

        let err = ReadResult::failure(ExecutionError::message(stmt, "boom"));
        assert!(!err.is_success());
        assert!(err.row().is_none());
        assert_eq!(err.statement().to_string(), "SELECT 1");
    }

    #[test]
    fn test_write_result_accessors() {
        let stmt = Statement::single("INSERT");
        let ok = WriteResult::success(stmt.clone(), WriteAck::applied());
        assert!(ok.is_success());
        assert!(ok.ack().unwrap().was_applied());

        let err = WriteResult::failure(ExecutionError::message(stmt, "down"));
        assert!(!err.is_success());
        assert!(err.error().is_some());
    }
}
