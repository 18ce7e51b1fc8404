//! Admission control integration tests
//!
//! Verify that the shared throttles bound driver-side concurrency and that
//! permit accounting nets to zero across every termination path.

use bulkflow::prelude::*;
use bulkflow::testing::{rows, MockExecutor};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_in_flight_requests_never_exceed_the_cap() {
    let driver = Arc::new(MockExecutor::new().with_latency(Duration::from_millis(20)));
    let executor = BulkExecutor::builder(Arc::clone(&driver))
        .max_in_flight_requests(2)
        .build();

    let statements: Vec<_> = (0..8)
        .map(|i| Statement::single(format!("INSERT {i}")))
        .collect();
    let results: Vec<_> = executor.write_stream(statements).collect().await;

    assert_eq!(results.len(), 8);
    assert!(results.iter().all(|r| r.is_ok()));
    assert!(driver.peak_in_flight() <= 2);
    assert_eq!(driver.in_flight(), 0);
}

#[tokio::test]
async fn test_page_fetches_share_the_concurrency_budget() {
    let driver = Arc::new(
        MockExecutor::new()
            .with_read_pages(vec![rows(2), rows(2), rows(2)])
            .with_latency(Duration::from_millis(10)),
    );
    let executor = BulkExecutor::builder(Arc::clone(&driver))
        .max_in_flight_requests(3)
        .build();

    let statements: Vec<_> = (0..6)
        .map(|i| Statement::single(format!("SELECT {i}")))
        .collect();
    let results: Vec<_> = executor.read_stream(statements).collect().await;

    assert_eq!(results.len(), 6 * 6);
    assert!(driver.peak_in_flight() <= 3);

    let stats = executor.admission_stats();
    // One admission per page fetch: 6 statements of 3 pages each.
    assert_eq!(stats.acquired, 18);
    assert_eq!(stats.released, 18);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(driver.pages_fetched(), 12);
}

#[tokio::test]
async fn test_permits_are_released_on_failure() {
    let driver = MockExecutor::new().fail_writes("refused");
    let executor = BulkExecutor::builder(driver)
        .max_in_flight_requests(1)
        .fail_fast(true)
        .build();

    for _ in 0..5 {
        let mut subscription = executor.write(Statement::single("INSERT"));
        subscription.request(1);
        assert!(subscription.next().await.unwrap().is_err());
    }

    let stats = executor.admission_stats();
    assert_eq!(stats.acquired, 5);
    assert_eq!(stats.released, 5);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_permits_are_released_on_cancellation() {
    let driver = Arc::new(MockExecutor::new().with_latency(Duration::from_millis(10)));
    let executor = BulkExecutor::builder(Arc::clone(&driver))
        .max_in_flight_requests(4)
        .build();

    for _ in 0..4 {
        let subscription = executor.read(Statement::single("SELECT"));
        subscription.request(1);
        tokio::time::sleep(Duration::from_millis(2)).await;
        subscription.cancel();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = executor.admission_stats();
    assert_eq!(stats.acquired, stats.released);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_rate_limit_delays_admissions_beyond_the_burst() {
    let driver = MockExecutor::new();
    let executor = BulkExecutor::builder(driver)
        .max_requests_per_second(100)
        .build();

    // Capacity is rate + burst (100 + 10); exceed it.
    let statements: Vec<_> = (0..120)
        .map(|i| Statement::single(format!("INSERT {i}")))
        .collect();
    let start = std::time::Instant::now();
    let results: Vec<_> = executor.write_stream(statements).collect().await;

    assert_eq!(results.len(), 120);
    assert!(start.elapsed() >= Duration::from_millis(50));

    let stats = executor.admission_stats();
    assert!(stats.throttled > 0);
    assert!(stats.total_throttle_wait_ms > 0);
}

#[tokio::test]
async fn test_peak_in_flight_is_reported() {
    let driver = Arc::new(MockExecutor::new().with_latency(Duration::from_millis(20)));
    let executor = BulkExecutor::builder(Arc::clone(&driver))
        .max_in_flight_requests(3)
        .build();

    let statements: Vec<_> = (0..9)
        .map(|i| Statement::single(format!("INSERT {i}")))
        .collect();
    let _: Vec<_> = executor.write_stream(statements).collect().await;

    let stats = executor.admission_stats();
    assert!(stats.peak_in_flight >= 1);
    assert!(stats.peak_in_flight <= 3);
}
