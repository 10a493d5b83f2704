//! Cost ledger pricing and aggregation across concurrent callers.

use std::sync::Arc;
use std::time::Duration;

use specforge_core::{CostLedger, ModelClass, PricingTable, Stage, Usage};

fn usage(model: &str, prompt: u64, completion: u64) -> Usage {
    Usage {
        model: model.to_string(),
        prompt_tokens: prompt,
        completion_tokens: completion,
    }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-12
}

#[test]
fn standard_model_is_priced_by_bracket() {
    let ledger = CostLedger::new(PricingTable::default());
    ledger.record_usage(Stage::Generation, &usage("gpt-3.5-turbo", 500, 0));
    assert!(approx(ledger.total_cost(), 500.0 * 0.0015 / 1024.0));

    let ledger = CostLedger::new(PricingTable::default());
    ledger.record_usage(Stage::Generation, &usage("gpt-3.5-turbo", 5000, 0));
    assert!(approx(ledger.total_cost(), 5000.0 * 0.002 / 1024.0));
}

#[test]
fn escalated_model_is_billed_separately() {
    let ledger = CostLedger::new(PricingTable::default());
    ledger.record_usage(Stage::DynamicRepair, &usage("gpt-4", 1000, 1000));
    ledger.record_usage(Stage::DynamicRepair, &usage("gpt-3.5-turbo", 1000, 1000));

    let stats = ledger.snapshot(1, Duration::from_secs(1));
    let stage = stats.stage(Stage::DynamicRepair);
    assert_eq!(stage.total_calls, 2);
    let escalated = &stage.per_model[&ModelClass::Escalated];
    assert!(approx(
        escalated.total_cost,
        1000.0 * 0.03 / 1024.0 + 1000.0 * 0.06 / 1024.0
    ));
    assert!(stage.per_model.contains_key(&ModelClass::Standard));
}

#[tokio::test]
async fn concurrent_recording_is_additive() {
    let ledger = Arc::new(CostLedger::new(PricingTable::default()));
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let ledger = Arc::clone(&ledger);
        tasks.spawn(async move {
            ledger.record_usage(Stage::StaticRepair, &usage("gpt-3.5-turbo", 100, 100));
            ledger.record_time(Stage::StaticRepair, Duration::from_millis(10));
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    let stats = ledger.snapshot(2, Duration::from_millis(50));
    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.total_calls, 16);
    assert_eq!(
        stats.stage(Stage::StaticRepair).total_time,
        Duration::from_millis(160)
    );
    assert_eq!(stats.stage(Stage::Generation).total_calls, 0);
    assert!(approx(stats.total_cost, ledger.total_cost()));
}

#[test]
fn stats_report_lists_every_stage() {
    let ledger = CostLedger::new(PricingTable::default());
    ledger.record_usage(Stage::Generation, &usage("gpt-3.5-turbo", 10, 10));
    let md = ledger.snapshot(1, Duration::from_millis(1_500)).to_markdown();

    assert!(md.starts_with("# Stats"));
    assert!(md.contains("## First stage (generation)"));
    assert!(md.contains("## Second stage (static repair)"));
    assert!(md.contains("## Third stage (dynamic repair)"));
    assert!(md.contains("Total time: 1sec 500ms"));
    assert!(md.contains("Attempts: 1"));
}
