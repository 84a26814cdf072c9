//! Test: Partial Resume - work finished before a failure is kept

use crate::helpers::*;
use nodeline::core::{NodeStatus, StepStatus};
use nodeline::RunOutcome;

const STEPS: [&str; 2] = ["first", "second"];

#[tokio::test]
async fn test_retry_only_reprocesses_pending_nodes() {
    let harness = Harness::new(&["a", "b", "c"]);
    harness.fail_on("b|first");

    harness
        .engine
        .execute(&recording_pipeline(&STEPS), Some(1))
        .await
        .unwrap_err();
    let run_id = harness.started_runs()[0];

    // "a" made it through before "b" failed
    let kept = harness
        .engine
        .ledger()
        .nodes()
        .output_nodes_of_step(&harness.step_named(run_id, "second").await)
        .await
        .unwrap();
    assert_eq!(sorted_values(&kept), vec!["a|first|second"]);

    harness.clear_failures();
    let RunOutcome::Finished { nodes, .. } = harness.engine.retry(Some(1)).await.unwrap() else {
        panic!("retry did not finish");
    };

    assert_eq!(harness.call_count("second", "a|first"), 1);
    assert_eq!(harness.call_count("second", "b|first"), 2);
    assert_eq!(harness.call_count("second", "c|first"), 1);
    assert_eq!(harness.calls_for("first").len(), 3);

    assert_eq!(
        sorted_values(&nodes),
        baseline(&["a", "b", "c"], &STEPS).await
    );
    // The node produced before the failure is passed through as is
    assert!(nodes.iter().any(|n| n.id == kept[0].id));
}

#[tokio::test]
async fn test_restart_marks_finished_work_processed() {
    let harness = Harness::new(&["a", "b", "c"]);
    harness.fail_on("c|first");

    harness
        .engine
        .execute(&recording_pipeline(&STEPS), Some(1))
        .await
        .unwrap_err();
    let run_id = harness.started_runs()[0];
    let step = harness.step_named(run_id, "second").await;
    assert_eq!(step.status, StepStatus::Errored);

    let point = harness
        .engine
        .ledger()
        .restart_from_step(&step)
        .await
        .unwrap();

    let mut statuses: Vec<(String, NodeStatus)> = point
        .input_nodes
        .iter()
        .map(|n| (n.value.clone(), n.status))
        .collect();
    statuses.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        statuses,
        vec![
            ("a|first|second".to_string(), NodeStatus::Processed),
            ("b|first|second".to_string(), NodeStatus::Processed),
            ("c|first".to_string(), NodeStatus::Pending),
        ]
    );
    assert!(!point.reload_input);
}

#[tokio::test]
async fn test_resume_reprocesses_nothing_twice() {
    let harness = Harness::new(&["a", "b", "c", "d"]);
    harness.fail_on("c|first");

    harness
        .engine
        .execute(&recording_pipeline(&STEPS), Some(2))
        .await
        .unwrap_err();
    let run_id = harness.started_runs()[0];

    harness.clear_failures();
    harness.engine.resume(run_id, Some(2)).await.unwrap();

    // The first chunk ("a", "b") completed, the second one failed as a whole
    for value in ["a|first", "b|first"] {
        assert_eq!(harness.call_count("second", value), 1, "{}", value);
    }
    assert_eq!(harness.call_count("second", "c|first"), 2);
    assert_eq!(harness.call_count("second", "d|first"), 1);
}
