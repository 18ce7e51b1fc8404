//! Execution lifecycle observation
//!
//! An [`ExecutionListener`] is a pure sink for lifecycle events: request
//! started, succeeded, failed, and row produced. Hooks run synchronously on
//! the execution path, so implementations must not block and must not panic;
//! they have no influence on control flow.

use crate::driver::Row;
use crate::error::ExecutionError;
use crate::statement::Statement;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-subscription context handed to every listener hook
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    subscription_id: u64,
    started: Instant,
}

impl ExecutionContext {
    pub(crate) fn new(subscription_id: u64) -> Self {
        Self {
            subscription_id,
            started: Instant::now(),
        }
    }

    /// Identifier of the subscription producing the event, unique within
    /// the process
    pub fn subscription_id(&self) -> u64 {
        self.subscription_id
    }

    /// Time elapsed since the subscription began executing
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Observer of execution lifecycle events
///
/// All hooks default to no-ops, so implementations override only what they
/// need. Request hooks fire once per page fetch; `on_row_received` fires
/// once per row, at the moment the row is produced from a page.
#[allow(unused_variables)]
pub trait ExecutionListener: Send + Sync {
    /// A read request is about to be issued
    fn on_read_request_started(&self, statement: &Statement, ctx: &ExecutionContext) {}

    /// A read request's response arrived
    fn on_read_request_successful(&self, statement: &Statement, ctx: &ExecutionContext) {}

    /// A read request failed
    fn on_read_request_failed(
        &self,
        statement: &Statement,
        error: &ExecutionError,
        ctx: &ExecutionContext,
    ) {
    }

    /// A write request is about to be issued
    fn on_write_request_started(&self, statement: &Statement, ctx: &ExecutionContext) {}

    /// A write request's response arrived
    fn on_write_request_successful(&self, statement: &Statement, ctx: &ExecutionContext) {}

    /// A write request failed
    fn on_write_request_failed(
        &self,
        statement: &Statement,
        error: &ExecutionError,
        ctx: &ExecutionContext,
    ) {
    }

    /// A row was produced from a read response page
    fn on_row_received(&self, row: &Row, ctx: &ExecutionContext) {}
}

/// Point-in-time view of a [`MetricsListener`]'s counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionMetrics {
    /// Read requests issued
    pub reads_started: u64,
    /// Read requests that returned a response
    pub reads_successful: u64,
    /// Read requests that failed
    pub reads_failed: u64,
    /// Write requests issued
    pub writes_started: u64,
    /// Write requests that returned an acknowledgement
    pub writes_successful: u64,
    /// Write requests that failed
    pub writes_failed: u64,
    /// Rows produced from read response pages
    pub rows_received: u64,
}

/// A listener aggregating lifecycle events into atomic counters
#[derive(Debug, Default)]
pub struct MetricsListener {
    reads_started: AtomicU64,
    reads_successful: AtomicU64,
    reads_failed: AtomicU64,
    writes_started: AtomicU64,
    writes_successful: AtomicU64,
    writes_failed: AtomicU64,
    rows_received: AtomicU64,
}

impl MetricsListener {
    /// Create a listener with zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the counters
    pub fn snapshot(&self) -> ExecutionMetrics {
        ExecutionMetrics {
            reads_started: self.reads_started.load(Ordering::Relaxed),
            reads_successful: self.reads_successful.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            writes_started: self.writes_started.load(Ordering::Relaxed),
            writes_successful: self.writes_successful.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            rows_received: self.rows_received.load(Ordering::Relaxed),
        }
    }
}

impl ExecutionListener for MetricsListener {
    fn on_read_request_started(&self, _statement: &Statement, _ctx: &ExecutionContext) {
        self.reads_started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_read_request_successful(&self, _statement: &Statement, _ctx: &ExecutionContext) {
        self.reads_successful.fetch_add(1, Ordering::Relaxed);
    }

    fn on_read_request_failed(
        &self,
        _statement: &Statement,
        _error: &ExecutionError,
        _ctx: &ExecutionContext,
    ) {
        self.reads_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn on_write_request_started(&self, _statement: &Statement, _ctx: &ExecutionContext) {
        self.writes_started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_write_request_successful(&self, _statement: &Statement, _ctx: &ExecutionContext) {
        self.writes_successful.fetch_add(1, Ordering::Relaxed);
    }

    fn on_write_request_failed(
        &self,
        _statement: &Statement,
        _error: &ExecutionError,
        _ctx: &ExecutionContext,
    ) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn on_row_received(&self, _row: &Row, _ctx: &ExecutionContext) {
        self.rows_received.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_listener_counts_events() {
        let listener = MetricsListener::new();
        let stmt = Statement::single("SELECT 1");
        let ctx = ExecutionContext::new(1);

        listener.on_read_request_started(&stmt, &ctx);
        listener.on_read_request_successful(&stmt, &ctx);
        listener.on_row_received(&Row::new(&b"r"[..]), &ctx);
        listener.on_row_received(&Row::new(&b"r"[..]), &ctx);
        listener.on_write_request_started(&stmt, &ctx);
        listener.on_write_request_failed(
            &stmt,
            &ExecutionError::message(stmt.clone(), "boom"),
            &ctx,
        );

        let metrics = listener.snapshot();
        assert_eq!(metrics.reads_started, 1);
        assert_eq!(metrics.reads_successful, 1);
        assert_eq!(metrics.rows_received, 2);
        assert_eq!(metrics.writes_started, 1);
        assert_eq!(metrics.writes_failed, 1);
        assert_eq!(metrics.writes_successful, 0);
    }
}
