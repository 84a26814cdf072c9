//! Test: SQLite Resume - a failed run picks up where it left off after a restart

use crate::helpers::*;
use nodeline::core::{RunStatus, StepStatus};
use nodeline::persistence::SqliteStore;
use nodeline::RunOutcome;
use std::sync::Arc;

const STEPS: [&str; 2] = ["first", "second"];

#[tokio::test]
async fn test_resume_from_reopened_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");

    let harness = Harness::with_backend(
        &["a", "b", "c"],
        Arc::new(SqliteStore::new(&path).await.unwrap()),
    );
    harness.fail_on("b|first");
    harness
        .engine
        .execute(&recording_pipeline(&STEPS), Some(1))
        .await
        .unwrap_err();
    let run_id = harness.started_runs()[0];

    // Nothing but the database file carries over
    let detached = harness.detach();
    let harness = detached.attach(Arc::new(SqliteStore::new(&path).await.unwrap()));
    harness.clear_failures();

    assert_eq!(harness.run_status(run_id).await, RunStatus::Errored);
    assert_eq!(
        harness.step_statuses(run_id).await,
        vec![StepStatus::Processed, StepStatus::Errored]
    );

    let RunOutcome::Finished { nodes, .. } = harness.engine.resume(run_id, Some(1)).await.unwrap()
    else {
        panic!("resumed run did not finish");
    };

    assert_eq!(harness.calls_for("first").len(), 3);
    assert_eq!(harness.call_count("second", "a|first"), 1);
    assert_eq!(harness.call_count("second", "b|first"), 2);
    assert_eq!(harness.call_count("second", "c|first"), 1);
    assert_eq!(
        sorted_values(&nodes),
        baseline(&["a", "b", "c"], &STEPS).await
    );
    assert_eq!(harness.run_status(run_id).await, RunStatus::Finished);
    assert_eq!(harness.output.save_count().await, 1);
}
