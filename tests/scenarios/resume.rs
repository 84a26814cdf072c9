//! Test: Resume - a stopped run continues at its first unprocessed step

use crate::helpers::*;
use nodeline::core::{PipelineError, RunStatus, StepStatus};
use nodeline::RunOutcome;

const STEPS: [&str; 3] = ["extract", "enrich", "publish"];

#[tokio::test]
async fn test_resume_after_stop_matches_uninterrupted_run() {
    let harness = Harness::with_answers(&["a", "b", "c"], vec!["y"]);
    harness.interrupt_on("b");

    let outcome = harness
        .engine
        .execute(&recording_pipeline(&STEPS), None)
        .await
        .unwrap();

    let RunOutcome::Stopped { run_id } = outcome else {
        panic!("run was not stopped");
    };
    assert_eq!(harness.run_status(run_id).await, RunStatus::Stopped);
    assert_eq!(
        harness.step_statuses(run_id).await,
        vec![
            StepStatus::Processed,
            StepStatus::Pending,
            StepStatus::Pending
        ]
    );
    assert!(harness.output.last().await.is_none());

    let resumed = harness.engine.resume(run_id, None).await.unwrap();

    let RunOutcome::Finished {
        run_id: finished,
        nodes,
    } = resumed
    else {
        panic!("resumed run did not finish");
    };
    assert_eq!(finished, run_id);
    assert_eq!(sorted_values(&nodes), baseline(&["a", "b", "c"], &STEPS).await);

    // The first step is not run again
    assert_eq!(harness.calls_for("extract").len(), 3);
    assert_eq!(harness.calls_for("enrich").len(), 3);
    assert_eq!(harness.run_status(run_id).await, RunStatus::Finished);
}

#[tokio::test]
async fn test_resume_hands_over_full_node_set() {
    let harness = Harness::with_answers(&["a", "b"], vec!["y"]);
    harness.interrupt_on("a|extract");

    let RunOutcome::Stopped { run_id } = harness
        .engine
        .execute(&recording_pipeline(&STEPS), None)
        .await
        .unwrap()
    else {
        panic!("run was not stopped");
    };
    let produced = harness
        .engine
        .ledger()
        .nodes()
        .output_nodes_of_step(&harness.step_named(run_id, "enrich").await)
        .await
        .unwrap();

    harness.engine.resume(run_id, None).await.unwrap();

    let publish_inputs: Vec<_> = harness
        .calls_for("publish")
        .into_iter()
        .map(|c| c.node_id)
        .collect();
    assert_eq!(publish_inputs.len(), produced.len());
    assert!(produced.iter().all(|n| publish_inputs.contains(&n.id)));
}

#[tokio::test]
async fn test_resume_of_finished_run_is_not_found() {
    let harness = Harness::new(&["a"]);
    let outcome = harness
        .engine
        .execute(&recording_pipeline(&["only"]), None)
        .await
        .unwrap();

    let err = harness
        .engine
        .resume(outcome.run_id(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
    assert_eq!(harness.calls().len(), 1);
}

#[tokio::test]
async fn test_resume_of_unknown_run_is_not_found() {
    let harness = Harness::new(&["a"]);
    let err = harness
        .engine
        .resume(uuid::Uuid::new_v4(), None)
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_restart_point_is_pure() {
    let harness = Harness::new(&["a", "b"]);
    harness.fail_on("b|extract");
    harness
        .engine
        .execute(&recording_pipeline(&STEPS), Some(1))
        .await
        .unwrap_err();

    let run_id = harness.started_runs()[0];
    let step = harness.step_named(run_id, "enrich").await;
    let ledger = harness.engine.ledger();

    let first = ledger.restart_from_step(&step).await.unwrap();
    let second = ledger.restart_from_step(&step).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.run.id, run_id);
    assert_eq!(first.remaining_steps.len(), 2);
    assert_eq!(first.input_nodes.len(), 2);
}

#[tokio::test]
async fn test_resume_after_failed_save_only_writes_output() {
    let harness = Harness::new(&["a", "b"]);
    harness.fail_saving(true);

    let err = harness
        .engine
        .execute(&recording_pipeline(&STEPS), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Output(_)));

    let run_id = harness.started_runs()[0];
    assert_eq!(harness.run_status(run_id).await, RunStatus::Errored);
    assert_eq!(
        harness.step_statuses(run_id).await,
        vec![StepStatus::Processed; 3]
    );
    assert_eq!(harness.output.save_count().await, 0);

    harness.fail_saving(false);
    let RunOutcome::Finished {
        run_id: finished,
        nodes,
    } = harness.engine.resume(run_id, None).await.unwrap()
    else {
        panic!("resumed run did not finish");
    };

    assert_eq!(finished, run_id);
    assert_eq!(sorted_values(&nodes), baseline(&["a", "b"], &STEPS).await);
    assert_eq!(harness.calls().len(), 6);
    assert_eq!(harness.output.save_count().await, 1);
    assert_eq!(harness.run_status(run_id).await, RunStatus::Finished);
}
