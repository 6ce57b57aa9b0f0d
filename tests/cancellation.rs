//! Cancelling an execution while it runs against a mock LMS

mod common;

use common::{MockLms, engine_for, five_linked_pages, host_migration, wait_for_result};
use lms_qa::{ExecutionStatus, FindingKind};
use std::time::Duration;

#[tokio::test]
async fn cancel_mid_batch_stops_further_calls() {
    let lms = MockLms::start_with_delay(&five_linked_pages(), Duration::from_millis(150)).await;
    let temp_dir = tempfile::tempdir().unwrap();
    let engine = engine_for(&lms, &temp_dir).await;

    let id = engine.start(host_migration()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let execution = engine.status(id).await.unwrap();
            if execution.stats.items_processed >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("two items should be processed");

    engine.cancel(id).await.unwrap();
    let result = wait_for_result(&engine, id).await;

    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert!(result.stats.items_processed < 5);

    // Every replaced finding matches a write that actually happened
    let updates = lms.updates().await;
    let replaced: Vec<String> = result
        .findings_of(FindingKind::Replaced)
        .map(|f| f.content_id.clone().unwrap())
        .collect();
    let written: Vec<String> = updates.into_iter().map(|(url, _)| url).collect();
    assert_eq!(replaced, written);

    // Nothing is sent once the execution has ended
    let calls_at_end = lms.requests().await.len();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(lms.requests().await.len(), calls_at_end);
}

#[tokio::test]
async fn cancel_after_finish_is_rejected() {
    let lms = MockLms::start(&five_linked_pages()).await;
    let temp_dir = tempfile::tempdir().unwrap();
    let engine = engine_for(&lms, &temp_dir).await;

    let id = engine.start(host_migration()).await.unwrap();
    let result = wait_for_result(&engine, id).await;
    assert_eq!(result.status, ExecutionStatus::Completed);

    let err = engine.cancel(id).await.unwrap_err();
    assert!(matches!(err, lms_qa::Error::InvalidState { .. }), "{err:?}");
    assert_eq!(engine.status(id).await.unwrap().status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn shutdown_cancels_running_execution() {
    let lms = MockLms::start_with_delay(&five_linked_pages(), Duration::from_millis(150)).await;
    let temp_dir = tempfile::tempdir().unwrap();
    let engine = engine_for(&lms, &temp_dir).await;

    let id = engine.start(host_migration()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    engine.shutdown().await.unwrap();
    let result = wait_for_result(&engine, id).await;

    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert!(matches!(
        engine.start(host_migration()).await,
        Err(lms_qa::Error::ShuttingDown)
    ));
}
