//! Database driver boundary
//!
//! The engine executes statements through these traits and treats everything
//! behind them as opaque: connection management, retries below the driver,
//! the wire protocol and row decoding all live on the other side. The only
//! structure the engine relies on is pagination: a read response exposes its
//! current page of rows, whether more pages exist, and a way to fetch the
//! next page asynchronously.

use crate::error::DriverResult;
use crate::statement::Statement;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;

/// One row of a read response, opaque to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    data: Bytes,
}

impl Row {
    /// Wrap an encoded row payload
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// The encoded payload
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// Acknowledgement of a successful write execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    applied: bool,
}

impl WriteAck {
    /// Acknowledgement of a write that was applied
    pub fn applied() -> Self {
        Self { applied: true }
    }

    /// Acknowledgement of a conditional write that was not applied
    pub fn not_applied() -> Self {
        Self { applied: false }
    }

    /// Whether the write took effect (always true for unconditional writes)
    pub fn was_applied(&self) -> bool {
        self.applied
    }
}

impl Default for WriteAck {
    fn default() -> Self {
        Self::applied()
    }
}

/// A paginated read response
///
/// Implementations hand out one page at a time; fetching the next page
/// consumes the response and yields a fresh one. The engine wraps every
/// `fetch_next_page` call in its own admission cycle.
pub trait PagedRows: Send + 'static {
    /// Take the rows of the current page, in page order. Subsequent calls
    /// return an empty vector.
    fn take_page(&mut self) -> Vec<Row>;

    /// Whether another page can be fetched
    fn has_more_pages(&self) -> bool;

    /// Fetch the next page. Must only be called while
    /// [`has_more_pages`](Self::has_more_pages) returns true.
    fn fetch_next_page(self: Box<Self>) -> BoxFuture<'static, DriverResult<Box<dyn PagedRows>>>;
}

/// Asynchronous statement execution supplied by the driver
#[async_trait]
pub trait StatementExecutor: Send + Sync + 'static {
    /// Execute a read statement, returning its first page of rows
    async fn execute_read(&self, statement: Statement) -> DriverResult<Box<dyn PagedRows>>;

    /// Execute a write statement (single or batch), returning its
    /// acknowledgement
    async fn execute_write(&self, statement: Statement) -> DriverResult<WriteAck>;
}

#[async_trait]
impl<T: StatementExecutor + ?Sized> StatementExecutor for std::sync::Arc<T> {
    async fn execute_read(&self, statement: Statement) -> DriverResult<Box<dyn PagedRows>> {
        (**self).execute_read(statement).await
    }

    async fn execute_write(&self, statement: Statement) -> DriverResult<WriteAck> {
        (**self).execute_write(statement).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_wraps_payload() {
        let row = Row::new(&b"payload"[..]);
        assert_eq!(row.data().as_ref(), b"payload");
    }

    #[test]
    fn test_write_ack_applied_flag() {
        assert!(WriteAck::applied().was_applied());
        assert!(!WriteAck::not_applied().was_applied());
        assert!(WriteAck::default().was_applied());
    }
}
