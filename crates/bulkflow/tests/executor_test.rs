//! Bulk executor integration tests

use bulkflow::prelude::*;
use bulkflow::testing::{rows, MockExecutor};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_read_stream_merges_all_rows() {
    let driver = MockExecutor::new().with_read_pages(vec![rows(2), rows(3)]);
    let executor = BulkExecutor::new(driver);

    let statements: Vec<_> = (0..4)
        .map(|i| Statement::single(format!("SELECT {i}")))
        .collect();
    let results: Vec<_> = executor.read_stream(statements).collect().await;

    assert_eq!(results.len(), 4 * 5);
    assert!(results.iter().all(|r| r.as_ref().unwrap().is_success()));
}

#[tokio::test]
async fn test_write_stream_yields_one_ack_per_statement() {
    let driver = Arc::new(MockExecutor::new());
    let executor = BulkExecutor::builder(Arc::clone(&driver)).build();

    let statements: Vec<_> = (0..10)
        .map(|i| Statement::single(format!("INSERT {i}")))
        .collect();
    let results: Vec<_> = executor.write_stream(statements).collect().await;

    assert_eq!(results.len(), 10);
    assert!(results
        .iter()
        .all(|r| r.as_ref().unwrap().ack().unwrap().was_applied()));
    assert_eq!(driver.writes(), 10);
}

#[tokio::test]
async fn test_fail_fast_surfaces_errors_in_streams() {
    let driver = MockExecutor::new().fail_writes("refused");
    let executor = BulkExecutor::builder(driver).fail_fast(true).build();

    let statements = vec![Statement::single("INSERT 1"), Statement::single("INSERT 2")];
    let results: Vec<_> = executor.write_stream(statements).collect().await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_err()));
}

#[tokio::test]
async fn test_resilient_streams_carry_errors_as_items() {
    let driver = MockExecutor::new().fail_reads("unavailable");
    let executor = BulkExecutor::builder(driver).fail_fast(false).build();

    let statements = vec![Statement::single("SELECT 1"), Statement::single("SELECT 2")];
    let results: Vec<_> = executor.read_stream(statements).collect().await;

    assert_eq!(results.len(), 2);
    for result in results {
        let item = result.unwrap();
        assert!(!item.is_success());
        assert!(item.error().unwrap().to_string().contains("unavailable"));
    }
}

#[tokio::test]
async fn test_error_items_name_the_failing_statement() {
    let driver = MockExecutor::new().fail_writes("refused");
    let executor = BulkExecutor::builder(driver).fail_fast(false).build();

    let mut subscription = executor.write(Statement::single("INSERT INTO t"));
    subscription.request(1);

    let item = subscription.next().await.unwrap().unwrap();
    let error = item.error().unwrap();
    assert_eq!(error.statement().to_string(), "INSERT INTO t");
    assert!(error.to_string().contains("refused"));
    assert!(error.to_string().contains("INSERT INTO t"));
}

#[tokio::test]
async fn test_listener_observes_requests_and_rows() {
    let listener = Arc::new(MetricsListener::new());
    let driver = MockExecutor::new().with_read_pages(vec![rows(2), rows(1)]);
    let executor = BulkExecutor::builder(driver)
        .listener(Arc::clone(&listener) as Arc<dyn ExecutionListener>)
        .build();

    let results: Vec<_> = executor
        .read_stream(vec![Statement::single("SELECT")])
        .collect()
        .await;
    assert_eq!(results.len(), 3);

    let metrics = listener.snapshot();
    // One request per page fetch.
    assert_eq!(metrics.reads_started, 2);
    assert_eq!(metrics.reads_successful, 2);
    assert_eq!(metrics.reads_failed, 0);
    assert_eq!(metrics.rows_received, 3);
}

#[tokio::test]
async fn test_listener_observes_write_failures() {
    let listener = Arc::new(MetricsListener::new());
    let driver = MockExecutor::new().fail_writes("refused");
    let executor = BulkExecutor::builder(driver)
        .listener(Arc::clone(&listener) as Arc<dyn ExecutionListener>)
        .fail_fast(true)
        .build();

    let mut subscription = executor.write(Statement::single("INSERT"));
    subscription.request(1);
    assert!(subscription.next().await.unwrap().is_err());

    let metrics = listener.snapshot();
    assert_eq!(metrics.writes_started, 1);
    assert_eq!(metrics.writes_failed, 1);
    assert_eq!(metrics.writes_successful, 0);
}

#[tokio::test]
async fn test_executor_is_cheap_to_clone_and_share() {
    let driver = Arc::new(MockExecutor::new().with_latency(Duration::from_millis(5)));
    let executor = BulkExecutor::builder(Arc::clone(&driver))
        .max_in_flight_requests(4)
        .build();

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let executor = executor.clone();
            tokio::spawn(async move {
                let mut subscription = executor.write(Statement::single(format!("INSERT {i}")));
                subscription.request(1);
                subscription.next().await.unwrap()
            })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    // Clones share one admission controller.
    let stats = executor.admission_stats();
    assert_eq!(stats.acquired, 4);
    assert_eq!(stats.released, 4);
}

#[tokio::test]
async fn test_batched_pipeline_end_to_end() {
    let statements: Vec<Statement> = vec![
        BoundStatement::new("INSERT a").with_routing_key(&b"k1"[..]).into(),
        BoundStatement::new("INSERT b").with_routing_key(&b"k1"[..]).into(),
        BoundStatement::new("INSERT c").with_routing_key(&b"k2"[..]).into(),
        BoundStatement::new("INSERT d").with_routing_key(&b"k2"[..]).into(),
        BoundStatement::new("INSERT e").into(),
    ];
    let batcher = StatementBatcher::new(BatcherConfig::default());
    let batches = batcher.batch_by_grouping_key(statements);
    assert_eq!(batches.len(), 3);

    let driver = Arc::new(MockExecutor::new());
    let executor = BulkExecutor::builder(Arc::clone(&driver)).build();
    let results: Vec<_> = executor.write_stream(batches).collect().await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(driver.writes(), 3);
}
