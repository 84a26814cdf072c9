//! Test: Ablation - filtered nodes leave the pipeline but stay stored

use crate::helpers::*;
use nodeline::core::StepConfig;
use nodeline::RunOutcome;

fn pipeline_with_filter() -> nodeline::PipelineConfig {
    pipeline(vec![
        ablate_matching("drop_b", "^b"),
        StepConfig::new("test", "append").with_name("second"),
    ])
}

#[tokio::test]
async fn test_ablated_nodes_skip_later_steps() {
    let harness = Harness::new(&["apple", "banana", "cherry"]);

    let RunOutcome::Finished { run_id, nodes } = harness
        .engine
        .execute(&pipeline_with_filter(), None)
        .await
        .unwrap()
    else {
        panic!("run did not finish");
    };

    assert_eq!(
        sorted_values(&nodes),
        vec!["apple|second", "cherry|second"]
    );
    assert_eq!(harness.call_count("second", "banana"), 0);

    // Still in the store, flagged and annotated by the filtering step
    let filtered = harness
        .engine
        .ledger()
        .nodes()
        .output_nodes_of_step(&harness.step_named(run_id, "drop_b").await)
        .await
        .unwrap();
    let banana = filtered
        .iter()
        .find(|n| n.value == "banana")
        .expect("ablated node was deleted");
    assert!(banana.ablated);
    assert_eq!(banana.node_metadata[0].step, "drop_b");

    let stored = harness.engine.ledger().nodes().get_one(banana.id).await.unwrap();
    assert!(stored.ablated);
}

#[tokio::test]
async fn test_retry_does_not_bring_back_ablated_nodes() {
    let harness = Harness::new(&["apple", "banana", "cherry"]);
    harness.fail_on("cherry");

    harness
        .engine
        .execute(&pipeline_with_filter(), Some(1))
        .await
        .unwrap_err();

    harness.clear_failures();
    let RunOutcome::Finished { nodes, .. } = harness.engine.retry(Some(1)).await.unwrap() else {
        panic!("retry did not finish");
    };

    assert_eq!(
        sorted_values(&nodes),
        vec!["apple|second", "cherry|second"]
    );
    assert_eq!(harness.call_count("second", "banana"), 0);
    assert_eq!(harness.call_count("second", "apple"), 1);
}
