//! # bulkflow
//!
//! Execution core for bulk data transfer against a distributed database:
//! locality-aware statement batching plus demand-driven, throughput-limited
//! statement execution.
//!
//! ## Features
//!
//! - **Statement Batching**: Group statements by partition key or replica
//!   set so each batch lands on one coordinator without cross-node fan-out
//! - **Demand-Driven Execution**: One subscription per statement; rows are
//!   produced strictly against consumer demand, pages fetched lazily
//! - **Admission Control**: Shared concurrency cap and token-bucket rate
//!   limit across every in-flight execution
//! - **Failure Modes**: Fail-fast termination or resilient per-statement
//!   error items, selected at executor construction
//! - **Lifecycle Observation**: Pluggable listener hooks for request and
//!   row events, with a ready-made metrics aggregator
//! - **Driver Agnostic**: Everything below the [`StatementExecutor`] trait
//!   is opaque to the engine
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bulkflow::prelude::*;
//!
//! // Batch statements by data locality
//! let batcher = StatementBatcher::new(BatcherConfig::default());
//! let batches = batcher.batch_by_grouping_key(statements);
//!
//! // Execute them with bounded concurrency and rate
//! let executor = BulkExecutor::builder(driver)
//!     .max_in_flight_requests(128)
//!     .max_requests_per_second(10_000)
//!     .build();
//!
//! let mut results = executor.write_stream(batches);
//! while let Some(result) = results.next().await {
//!     let ack = result?;
//! }
//! ```
//!
//! [`StatementExecutor`]: driver::StatementExecutor

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod admission;
pub mod batcher;
pub mod driver;
pub mod error;
pub mod executor;
pub mod listener;
pub mod result;
pub mod statement;
pub mod subscription;
pub mod testing;
pub mod topology;

/// Commonly used types, importable in one line
pub mod prelude {
    pub use crate::admission::{AdmissionConfig, AdmissionController, AdmissionStats};
    pub use crate::batcher::{BatchMode, BatcherConfig, StatementBatcher};
    pub use crate::driver::{PagedRows, Row, StatementExecutor, WriteAck};
    pub use crate::error::{DriverError, DriverResult, ExecutionError, Result};
    pub use crate::executor::{BulkExecutor, BulkExecutorBuilder, ExecutorConfig};
    pub use crate::listener::{
        ExecutionContext, ExecutionListener, ExecutionMetrics, MetricsListener,
    };
    pub use crate::result::{ReadResult, WriteResult};
    pub use crate::statement::{BatchStatement, BatchType, BoundStatement, Statement, Token};
    pub use crate::subscription::{ResultSubscription, SubscriptionState};
    pub use crate::topology::{ReplicaLocator, ReplicaSet, StaticTopology};
}

pub use error::{ExecutionError, Result};
pub use executor::BulkExecutor;
pub use statement::Statement;

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use crate::testing::{rows, MockExecutor};
    use futures::StreamExt;

    #[tokio::test]
    async fn test_batch_then_execute_smoke() {
        let statements: Vec<Statement> = vec![
            BoundStatement::new("INSERT 1").with_routing_key(&b"k1"[..]).into(),
            BoundStatement::new("INSERT 2").with_routing_key(&b"k1"[..]).into(),
            BoundStatement::new("INSERT 3").with_routing_key(&b"k2"[..]).into(),
        ];
        let batcher = StatementBatcher::new(BatcherConfig::default());
        let batches = batcher.batch_by_grouping_key(statements);
        assert_eq!(batches.len(), 2);

        let executor = BulkExecutor::new(MockExecutor::new());
        let results: Vec<_> = executor.write_stream(batches).collect().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_read_smoke() {
        let driver = MockExecutor::new().with_read_pages(vec![rows(3)]);
        let executor = BulkExecutor::new(driver);

        let mut subscription = executor.read(Statement::single("SELECT"));
        subscription.request(u64::MAX);

        let mut count = 0;
        while let Some(result) = subscription.next().await {
            assert!(result.unwrap().is_success());
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
