//! Test: Retry - a failed step is re-entered with the nodes it was given

use crate::helpers::*;
use nodeline::core::{PipelineError, RunStatus, StepStatus};
use nodeline::RunOutcome;
use std::collections::HashSet;

#[tokio::test]
async fn test_failed_step_marks_run_errored() {
    let harness = Harness::new(&["a", "b", "c"]);
    harness.fail_on("b|first");

    let err = harness
        .engine
        .execute(&recording_pipeline(&["first", "second"]), None)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Transform { ref step, .. } if step == "second"));
    assert!(!err.is_validation());

    let run_id = harness.started_runs()[0];
    assert_eq!(harness.run_status(run_id).await, RunStatus::Errored);
    assert_eq!(
        harness.step_statuses(run_id).await,
        vec![StepStatus::Processed, StepStatus::Errored]
    );
    assert!(harness.output.last().await.is_none());
}

#[tokio::test]
async fn test_retry_reenters_failed_step_with_same_nodes() {
    let harness = Harness::new(&["a", "b", "c"]);
    let config = recording_pipeline(&["first", "second"]);
    harness.fail_on("b|first");

    harness.engine.execute(&config, None).await.unwrap_err();
    let run_id = harness.started_runs()[0];
    let failed_inputs: HashSet<_> = harness
        .calls_for("second")
        .into_iter()
        .map(|c| c.node_id)
        .collect();

    harness.clear_failures();
    let outcome = harness.engine.retry(None).await.unwrap();

    let RunOutcome::Finished {
        run_id: retried,
        nodes,
    } = outcome
    else {
        panic!("retry did not finish");
    };
    assert_eq!(retried, run_id);
    assert_eq!(
        sorted_values(&nodes),
        vec!["a|first|second", "b|first|second", "c|first|second"]
    );

    // The whole batch failed, so all three nodes are handed over again
    let calls = harness.calls_for("second");
    let retried_inputs: HashSet<_> = calls[failed_inputs.len()..]
        .iter()
        .map(|c| c.node_id)
        .collect();
    assert_eq!(retried_inputs.len(), 3);
    assert!(failed_inputs.is_subset(&retried_inputs));

    assert_eq!(harness.calls_for("first").len(), 3);
    assert_eq!(harness.run_status(run_id).await, RunStatus::Finished);
    assert_eq!(
        harness.step_statuses(run_id).await,
        vec![StepStatus::Processed; 2]
    );
}

#[tokio::test]
async fn test_retry_without_errors_is_not_found() {
    let harness = Harness::new(&["a"]);

    let err = harness.engine.retry(None).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
    assert!(err.is_validation());

    harness
        .engine
        .execute(&recording_pipeline(&["only"]), None)
        .await
        .unwrap();
    assert!(matches!(
        harness.engine.ledger().last_failed_step().await,
        Err(PipelineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_last_failed_step_is_most_recent() {
    let harness = Harness::new(&["a"]);
    harness.fail_on("a");
    harness
        .engine
        .execute(&recording_pipeline(&["early"]), None)
        .await
        .unwrap_err();

    harness.clear_failures();
    harness.fail_on("a|one");
    harness
        .engine
        .execute(&recording_pipeline(&["one", "late"]), None)
        .await
        .unwrap_err();

    let runs = harness.started_runs();
    let step = harness.engine.ledger().last_failed_step().await.unwrap();
    assert_eq!(step.run_id, runs[1]);
    assert_eq!(step.name(), "late");
}
