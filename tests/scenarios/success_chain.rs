//! Test: Success Chain - steps run once each, in order

use crate::helpers::*;
use nodeline::core::{RunStatus, StepConfig, StepStatus};
use nodeline::{ExecutionEvent, RunOutcome};
use serde_json::json;

#[tokio::test]
async fn test_success_chain() {
    let harness = Harness::new(&["a", "b"]);
    let config = recording_pipeline(&["plan", "implement", "review"]);

    let outcome = harness.engine.execute(&config, None).await.unwrap();

    let RunOutcome::Finished { run_id, nodes } = outcome else {
        panic!("run did not finish");
    };
    assert_eq!(
        sorted_values(&nodes),
        vec!["a|plan|implement|review", "b|plan|implement|review"]
    );
    assert_eq!(harness.run_status(run_id).await, RunStatus::Finished);
    assert_eq!(
        harness.step_statuses(run_id).await,
        vec![StepStatus::Processed; 3]
    );

    // Every call of a step happens before any call of the next one
    let order: Vec<String> = harness.calls().into_iter().map(|c| c.step).collect();
    assert_eq!(
        order,
        vec!["plan", "plan", "implement", "implement", "review", "review"]
    );

    assert_eq!(harness.output.save_count().await, 1);
    assert_eq!(harness.output.last().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_events_follow_step_order() {
    let harness = Harness::new(&["a"]);
    harness
        .engine
        .execute(&recording_pipeline(&["one", "two"]), None)
        .await
        .unwrap();

    let events = harness.events();
    assert!(matches!(
        events.first(),
        Some(ExecutionEvent::RunStarted { steps: 2, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunFinished { outputs: 1, .. })
    ));

    let started: Vec<(String, usize)> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StepStarted { step, position, .. } => Some((step.clone(), *position)),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![("one".to_string(), 0), ("two".to_string(), 1)]);
}

#[tokio::test]
async fn test_builtin_split_then_template() {
    let harness = Harness::new(&["red, green"]);
    let config = pipeline(vec![
        StepConfig::new("split", "separator")
            .with_name("colors")
            .with_parameter("separator", json!(",")),
        StepConfig::new("transform", "template")
            .with_name("sentence")
            .with_parameter("template", json!("{{ value }} (from {{ ancestors.colors }})")),
    ]);

    let RunOutcome::Finished { nodes, .. } = harness.engine.execute(&config, None).await.unwrap()
    else {
        panic!("run did not finish");
    };

    assert_eq!(
        sorted_values(&nodes),
        vec!["green (from red, green)", "red (from red, green)"]
    );
    for node in &nodes {
        assert_eq!(node.ancestors["colors"], json!("red, green"));
        assert_eq!(node.ancestors["sentence"], json!(node.value.split(' ').next().unwrap()));
    }
}

#[tokio::test]
async fn test_unknown_method_is_rejected_before_run_exists() {
    let harness = Harness::new(&["a"]);
    let config = pipeline(vec![StepConfig::new("test", "missing")]);

    let err = harness.engine.execute(&config, None).await.unwrap_err();

    assert!(err.is_validation());
    assert!(harness.started_runs().is_empty());
    assert!(harness.engine.ledger().summaries(10).await.unwrap().is_empty());
}
