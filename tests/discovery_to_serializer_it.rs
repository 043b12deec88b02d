//! Multi-component scenario: discovery scans synthetic rows into candidate
//! edges, the registry is persisted and reloaded, and the reconstructed
//! predicates reproduce the same entry decisions as the originals
//! (invariant 4, §8 of the spec this crate implements).

use std::collections::HashMap;

use edge_core::prelude::*;
use edge_core::discovery::DiscoveryRow;

fn synthetic_rows(n: usize) -> Vec<DiscoveryRow> {
    (0..n)
        .map(|i| {
            let imbalance = if i % 3 == 0 { 0.8 } else { -0.2 };
            let mut features = HashMap::new();
            features.insert("f_imbalance".to_string(), imbalance);
            features.insert("f_spread_bps".to_string(), 1.5);
            DiscoveryRow {
                features,
                forward_return: if imbalance > 0.5 { 0.002 } else { -0.0001 },
                regime: None,
            }
        })
        .collect()
}

#[test]
fn discovered_edges_survive_a_serialize_reload_round_trip() {
    let rows = synthetic_rows(300);
    let config = DiscoveryConfig {
        threshold_features: vec!["f_imbalance".to_string()],
        min_support: 20,
        ..Default::default()
    };

    let mut registry = EdgeRegistry::new();
    let report = EdgeDiscoveryPipeline::run(&rows, &config, &mut registry).unwrap();
    assert!(report.edge_candidates_registered > 0, "expected at least one significant pattern");
    assert_eq!(registry.get_stats().total, report.edge_candidates_registered);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edges.json");
    EdgeSerializer::write_atomic(&registry, &path, 1_000).unwrap();
    assert!(!path.with_extension("tmp").exists());

    let reloaded_file = EdgeSerializer::read(&path).unwrap();
    let reloaded = EdgeSerializer::deserialize(&reloaded_file).unwrap();
    assert_eq!(reloaded.get_stats().total, registry.get_stats().total);

    for (id, original_edge) in registry.iter() {
        let reloaded_edge = reloaded.get(id).expect("every persisted edge reloads");
        assert_eq!(reloaded_edge.status, original_edge.status);
        assert_eq!(reloaded_edge.stats.trades, original_edge.stats.trades);
        assert_eq!(reloaded_edge.confidence.score, original_edge.confidence.score);

        // Same predicate output on both a matching and a non-matching sample.
        for imbalance in [0.9, -0.5] {
            let mut features = HashMap::new();
            features.insert("f_imbalance".to_string(), imbalance);
            features.insert("f_spread_bps".to_string(), 1.5);
            let original = original_edge.evaluate_entry(&features, None);
            let reconstructed = reloaded_edge.evaluate_entry(&features, None);
            assert_eq!(original.active, reconstructed.active);
        }
    }
}

#[test]
fn edges_without_a_definition_are_skipped_with_a_warning_on_reload() {
    let mut registry = EdgeRegistry::new();
    let predicate = Box::new(AlwaysActiveEntry);
    let exit = Box::new(NeverExitCondition);
    registry.register(Edge::new("hand-rolled", "hand rolled edge", predicate, exit), None).unwrap();

    let file = EdgeSerializer::serialize(&registry, 0);
    let reloaded = EdgeSerializer::deserialize(&file).unwrap();
    assert!(reloaded.get("hand-rolled").is_none());
}

#[derive(Debug)]
struct AlwaysActiveEntry;
impl edge_core::edge::EntryPredicate for AlwaysActiveEntry {
    fn evaluate(&self, _features: &HashMap<String, f64>, _regime: Option<&str>) -> Result<edge_core::edge::EntryOutcome, String> {
        Ok(edge_core::edge::EntryOutcome { active: true, direction: None, confidence: None, reason: None })
    }
}

#[derive(Debug)]
struct NeverExitCondition;
impl edge_core::edge::ExitPredicate for NeverExitCondition {
    fn evaluate(
        &self,
        _features: &HashMap<String, f64>,
        _regime: Option<&str>,
        _entry_ts: i64,
        _now_ts: i64,
    ) -> Result<edge_core::edge::ExitOutcome, String> {
        Ok(edge_core::edge::ExitOutcome { exit: false, reason: None })
    }
}
