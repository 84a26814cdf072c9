//! Test: Interruption - the stop gate either stops a run or carries on

use crate::helpers::*;
use nodeline::core::{RunStatus, StepStatus};
use nodeline::{ExecutionEvent, RunOutcome};

#[tokio::test]
async fn test_declined_stop_resumes_same_run() {
    let harness = Harness::with_answers(&["a", "b", "c"], vec!["n"]);
    harness.interrupt_on("b|load");

    let outcome = harness
        .engine
        .execute(&recording_pipeline(&["load", "clean", "store"]), None)
        .await
        .unwrap();

    let RunOutcome::Finished { run_id, nodes } = outcome else {
        panic!("run did not finish");
    };
    assert_eq!(harness.started_runs(), vec![run_id]);
    assert_eq!(nodes.len(), 3);
    assert_eq!(harness.confirmation.prompts().len(), 1);

    // Interrupted during the second step: nothing before it runs again
    assert_eq!(harness.calls_for("load").len(), 3);
    assert_eq!(harness.calls_for("clean").len(), 3);
    assert_eq!(harness.calls_for("store").len(), 3);

    assert!(harness.events().iter().any(|e| matches!(
        e,
        ExecutionEvent::RunResumed { run_id: resumed, position: 2, .. } if *resumed == run_id
    )));
    assert_eq!(harness.run_status(run_id).await, RunStatus::Finished);
}

#[tokio::test]
async fn test_only_explicit_y_stops() {
    let harness = Harness::with_answers(&["a"], vec!["yes"]);
    harness.interrupt_on("a");

    let outcome = harness
        .engine
        .execute(&recording_pipeline(&["one", "two"]), None)
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Finished { .. }));
    assert_eq!(harness.calls().len(), 2);
}

#[tokio::test]
async fn test_stop_before_first_step_keeps_loaded_input() {
    let harness = Harness::with_answers(&["a", "b"], vec!["y"]);
    harness.interrupt.raise();

    let RunOutcome::Stopped { run_id } = harness
        .engine
        .execute(&recording_pipeline(&["one", "two"]), None)
        .await
        .unwrap()
    else {
        panic!("run was not stopped");
    };
    assert!(harness.calls().is_empty());
    assert_eq!(
        harness.step_statuses(run_id).await,
        vec![StepStatus::Pending, StepStatus::Pending]
    );

    let RunOutcome::Finished { nodes, .. } = harness.engine.resume(run_id, None).await.unwrap()
    else {
        panic!("resumed run did not finish");
    };
    assert_eq!(sorted_values(&nodes), vec!["a|one|two", "b|one|two"]);

    let loads = harness
        .events()
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::InputLoaded { .. }))
        .count();
    assert_eq!(loads, 1);
}
