//! Test doubles for the driver boundary
//!
//! [`MockExecutor`] is a scriptable [`StatementExecutor`]: configure the
//! pages every read returns, the acknowledgement every write returns, an
//! artificial latency, and failure injection per operation or per page
//! fetch. It tracks driver-side concurrency so tests can assert that the
//! admission throttles actually bound it.

use crate::driver::{PagedRows, Row, StatementExecutor, WriteAck};
use crate::error::DriverResult;
use crate::statement::Statement;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error produced by injected mock failures
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MockDriverError(
    /// The injected failure message
    pub String,
);

#[derive(Default)]
struct MockShared {
    latency: Option<Duration>,
    fail_on_page: Option<(usize, String)>,
    reads: AtomicU64,
    writes: AtomicU64,
    pages_fetched: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

impl MockShared {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        InFlightGuard {
            shared: Arc::clone(self),
        }
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

struct InFlightGuard {
    shared: Arc<MockShared>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A scriptable driver for tests
pub struct MockExecutor {
    pages: Mutex<Vec<Vec<Row>>>,
    write_ack: WriteAck,
    fail_reads: Option<String>,
    fail_writes: Option<String>,
    shared: Arc<MockShared>,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    /// A driver returning one empty page per read and an applied
    /// acknowledgement per write
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(vec![Vec::new()]),
            write_ack: WriteAck::applied(),
            fail_reads: None,
            fail_writes: None,
            shared: Arc::new(MockShared::default()),
        }
    }

    /// Script the pages every read returns, in order. An empty vector means
    /// a single empty page.
    pub fn with_read_pages(mut self, pages: Vec<Vec<Row>>) -> Self {
        let pages = if pages.is_empty() {
            vec![Vec::new()]
        } else {
            pages
        };
        self.pages = Mutex::new(pages);
        self
    }

    /// Script the acknowledgement every write returns
    pub fn with_write_ack(mut self, ack: WriteAck) -> Self {
        self.write_ack = ack;
        self
    }

    /// Add an artificial delay to every driver call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.latency = Some(latency);
        }
        self
    }

    /// Make every read fail immediately
    pub fn fail_reads(mut self, message: impl Into<String>) -> Self {
        self.fail_reads = Some(message.into());
        self
    }

    /// Make every write fail immediately
    pub fn fail_writes(mut self, message: impl Into<String>) -> Self {
        self.fail_writes = Some(message.into());
        self
    }

    /// Make the fetch of page `index` fail (pages are numbered from 0; the
    /// first fetched continuation is page 1)
    pub fn fail_on_page(mut self, index: usize, message: impl Into<String>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.fail_on_page = Some((index, message.into()));
        }
        self
    }

    /// Reads issued so far
    pub fn reads(&self) -> u64 {
        self.shared.reads.load(Ordering::Relaxed)
    }

    /// Writes issued so far
    pub fn writes(&self) -> u64 {
        self.shared.writes.load(Ordering::Relaxed)
    }

    /// Continuation pages fetched so far (the first page of each read does
    /// not count)
    pub fn pages_fetched(&self) -> u64 {
        self.shared.pages_fetched.load(Ordering::Relaxed)
    }

    /// Driver calls currently in progress
    pub fn in_flight(&self) -> u64 {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of simultaneous driver calls observed
    pub fn peak_in_flight(&self) -> u64 {
        self.shared.peak_in_flight.load(Ordering::Acquire)
    }
}

#[async_trait]
impl StatementExecutor for MockExecutor {
    async fn execute_read(&self, _statement: Statement) -> DriverResult<Box<dyn PagedRows>> {
        let _guard = self.shared.enter();
        self.shared.reads.fetch_add(1, Ordering::Relaxed);
        self.shared.delay().await;

        if let Some(message) = &self.fail_reads {
            return Err(Box::new(MockDriverError(message.clone())));
        }

        let mut remaining: VecDeque<Vec<Row>> = self.pages.lock().clone().into();
        let current = remaining.pop_front().unwrap_or_default();
        Ok(Box::new(MockResultSet {
            current,
            remaining,
            page_index: 0,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn execute_write(&self, _statement: Statement) -> DriverResult<WriteAck> {
        let _guard = self.shared.enter();
        self.shared.writes.fetch_add(1, Ordering::Relaxed);
        self.shared.delay().await;

        if let Some(message) = &self.fail_writes {
            return Err(Box::new(MockDriverError(message.clone())));
        }
        Ok(self.write_ack.clone())
    }
}

/// The paginated response handed out by [`MockExecutor`]
struct MockResultSet {
    current: Vec<Row>,
    remaining: VecDeque<Vec<Row>>,
    page_index: usize,
    shared: Arc<MockShared>,
}

impl PagedRows for MockResultSet {
    fn take_page(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.current)
    }

    fn has_more_pages(&self) -> bool {
        !self.remaining.is_empty()
    }

    fn fetch_next_page(
        mut self: Box<Self>,
    ) -> BoxFuture<'static, DriverResult<Box<dyn PagedRows>>> {
        Box::pin(async move {
            let _guard = self.shared.enter();
            self.shared.pages_fetched.fetch_add(1, Ordering::Relaxed);
            self.shared.delay().await;

            let next_index = self.page_index + 1;
            if let Some((index, message)) = &self.shared.fail_on_page {
                if *index == next_index {
                    return Err(
                        Box::new(MockDriverError(message.clone())) as crate::error::DriverError
                    );
                }
            }

            self.current = self.remaining.pop_front().unwrap_or_default();
            self.page_index = next_index;
            Ok(self as Box<dyn PagedRows>)
        })
    }
}

/// Produce `n` distinct rows
pub fn rows(n: usize) -> Vec<Row> {
    (0..n).map(|i| Row::new(format!("row-{i}"))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_read_pages_in_order() {
        let driver = MockExecutor::new().with_read_pages(vec![rows(2), rows(1)]);

        let mut response = driver
            .execute_read(Statement::single("SELECT"))
            .await
            .unwrap();
        assert_eq!(response.take_page().len(), 2);
        assert!(response.has_more_pages());

        let mut response = response.fetch_next_page().await.unwrap();
        assert_eq!(response.take_page().len(), 1);
        assert!(!response.has_more_pages());
        assert_eq!(driver.reads(), 1);
        assert_eq!(driver.pages_fetched(), 1);
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let driver = MockExecutor::new().fail_reads("read down");
        let err = driver
            .execute_read(Statement::single("SELECT"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "read down");

        let driver = MockExecutor::new()
            .with_read_pages(vec![rows(1), rows(1)])
            .fail_on_page(1, "page down");
        let response = driver
            .execute_read(Statement::single("SELECT"))
            .await
            .unwrap();
        assert!(response.fetch_next_page().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_tracks_in_flight() {
        let driver = Arc::new(MockExecutor::new().with_latency(Duration::from_millis(20)));

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let driver = Arc::clone(&driver);
                tokio::spawn(async move {
                    driver.execute_write(Statement::single("INSERT")).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(driver.in_flight(), 0);
        assert!(driver.peak_in_flight() >= 1);
        assert_eq!(driver.writes(), 3);
    }
}
