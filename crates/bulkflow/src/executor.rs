//! Bulk execution facade
//!
//! A [`BulkExecutor`] wraps a driver and owns the process-wide admission
//! controller; every statement handed to it becomes one demand-driven
//! subscription sharing those throttles. The executor itself is cheap to
//! clone and safe to use from many tasks.

use crate::admission::{AdmissionConfig, AdmissionController, AdmissionStats};
use crate::driver::StatementExecutor;
use crate::error::Result;
use crate::listener::ExecutionListener;
use crate::result::{ReadResult, WriteResult};
use crate::statement::Statement;
use crate::subscription::{subscribe, ReadKind, ResultSubscription, WriteKind};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Executor tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum concurrent in-flight executions (0 = unlimited)
    pub max_in_flight_requests: usize,
    /// Maximum new executions per second (0 = unlimited)
    pub max_requests_per_second: u64,
    /// Whether the first failure terminates a subscription with an error
    /// (`true`), or failures become ordinary error items (`false`)
    pub fail_fast: bool,
    /// Demand window maintained by the stream adapters, per statement
    pub stream_prefetch: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight_requests: 1_000,
            max_requests_per_second: 0,
            fail_fast: true,
            stream_prefetch: 64,
        }
    }
}

/// Builder for [`BulkExecutor`]
pub struct BulkExecutorBuilder<E> {
    driver: Arc<E>,
    config: ExecutorConfig,
    listener: Option<Arc<dyn ExecutionListener>>,
}

impl<E: StatementExecutor> BulkExecutorBuilder<E> {
    fn new(driver: E) -> Self {
        Self {
            driver: Arc::new(driver),
            config: ExecutorConfig::default(),
            listener: None,
        }
    }

    /// Cap concurrent in-flight executions (0 = unlimited)
    pub fn max_in_flight_requests(mut self, max: usize) -> Self {
        self.config.max_in_flight_requests = max;
        self
    }

    /// Cap new executions per second (0 = unlimited)
    pub fn max_requests_per_second(mut self, max: u64) -> Self {
        self.config.max_requests_per_second = max;
        self
    }

    /// Terminate subscriptions on the first failure (the default), or turn
    /// failures into ordinary error items
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    /// Observe execution lifecycle events
    pub fn listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Demand window maintained per statement by the stream adapters
    pub fn stream_prefetch(mut self, prefetch: u64) -> Self {
        self.config.stream_prefetch = prefetch;
        self
    }

    /// Replace the whole configuration at once
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the executor
    pub fn build(self) -> BulkExecutor<E> {
        let admission = AdmissionController::new(AdmissionConfig::new(
            self.config.max_in_flight_requests,
            self.config.max_requests_per_second,
        ));
        BulkExecutor {
            driver: self.driver,
            admission: Arc::new(admission),
            listener: self.listener,
            config: self.config,
        }
    }
}

/// Rate- and concurrency-limited bulk statement executor
pub struct BulkExecutor<E> {
    driver: Arc<E>,
    admission: Arc<AdmissionController>,
    listener: Option<Arc<dyn ExecutionListener>>,
    config: ExecutorConfig,
}

impl<E> Clone for BulkExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            admission: Arc::clone(&self.admission),
            listener: self.listener.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: StatementExecutor> BulkExecutor<E> {
    /// Start building an executor around a driver
    pub fn builder(driver: E) -> BulkExecutorBuilder<E> {
        BulkExecutorBuilder::new(driver)
    }

    /// Wrap a driver with default configuration
    pub fn new(driver: E) -> Self {
        Self::builder(driver).build()
    }

    /// The active configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute a read statement as a demand-driven subscription. No work
    /// happens until demand is granted on the returned handle.
    pub fn read(&self, statement: Statement) -> ResultSubscription<ReadResult> {
        let driver = Arc::clone(&self.driver);
        let stmt = statement.clone();
        let first = Box::pin(async move { driver.execute_read(stmt).await });
        subscribe(
            ReadKind,
            statement,
            first,
            Arc::clone(&self.admission),
            self.listener.clone(),
            self.config.fail_fast,
        )
    }

    /// Execute a write statement as a demand-driven subscription yielding
    /// exactly one acknowledgement item
    pub fn write(&self, statement: Statement) -> ResultSubscription<WriteResult> {
        let driver = Arc::clone(&self.driver);
        let stmt = statement.clone();
        let first = Box::pin(async move { driver.execute_write(stmt).await });
        subscribe(
            WriteKind,
            statement,
            first,
            Arc::clone(&self.admission),
            self.listener.clone(),
            self.config.fail_fast,
        )
    }

    /// Execute many read statements concurrently, merging their rows into
    /// one stream in arrival order. Per-statement row order is preserved;
    /// order across statements is not.
    pub fn read_stream<I>(&self, statements: I) -> BoxStream<'static, Result<ReadResult>>
    where
        I: IntoIterator<Item = Statement>,
    {
        let prefetch = self.config.stream_prefetch;
        let subscriptions: Vec<_> = statements
            .into_iter()
            .map(|statement| self.read(statement).into_stream(prefetch))
            .collect();
        stream::iter(subscriptions).flatten_unordered(None).boxed()
    }

    /// Execute many write statements concurrently, merging their
    /// acknowledgements into one stream in arrival order
    pub fn write_stream<I>(&self, statements: I) -> BoxStream<'static, Result<WriteResult>>
    where
        I: IntoIterator<Item = Statement>,
    {
        let prefetch = self.config.stream_prefetch;
        let subscriptions: Vec<_> = statements
            .into_iter()
            .map(|statement| self.write(statement).into_stream(prefetch))
            .collect();
        stream::iter(subscriptions).flatten_unordered(None).boxed()
    }

    /// Snapshot the shared admission throttles
    pub fn admission_stats(&self) -> AdmissionStats {
        self.admission.snapshot()
    }

    /// Executions currently in flight across all subscriptions
    pub fn in_flight(&self) -> u64 {
        self.admission.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.max_in_flight_requests, 1_000);
        assert_eq!(config.max_requests_per_second, 0);
        assert!(config.fail_fast);
        assert_eq!(config.stream_prefetch, 64);
    }

    #[test]
    fn test_config_roundtrips_through_serde() {
        let config = ExecutorConfig {
            max_in_flight_requests: 8,
            max_requests_per_second: 500,
            fail_fast: false,
            stream_prefetch: 16,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: ExecutorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_in_flight_requests, 8);
        assert_eq!(back.max_requests_per_second, 500);
        assert!(!back.fail_fast);
    }
}
