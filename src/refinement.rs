//! C11 — `BehaviorRefinementEngine`: turns feature-importance analyses
//! across the edge registry into prioritized refinement proposals. A
//! proposal is a recommendation, never an automatic mutation — applying
//! one is left to the caller (typically the scheduler in
//! `LearningScheduler`, C12).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::importance::ImportanceAnalysis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProposalKind {
    /// A feature is highly important to one specific edge's outcomes.
    /// `in_definition` records whether the edge's own `EdgeDefinition`
    /// pattern already conditions on it.
    WeightAdjust { feature: String, importance: f64, in_definition: bool },
    /// A feature is unimportant across enough edges that it's a candidate
    /// for removal from the feature set entirely (not an edge-retirement
    /// signal — see `EdgeRegistry::retire_underperforming_edges` for that).
    PruneCandidate { feature: String, low_importance_edge_count: usize },
    /// A feature correlates strongly with PnL across edges but is rarely
    /// used in any edge's definition — worth promoting into a new pattern
    /// condition or derived feature.
    NewFeatureSignal { feature: String, avg_abs_correlation: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementProposal {
    /// `None` for cross-edge proposals (`PruneCandidate`/`NewFeatureSignal`);
    /// `Some` for the single-edge `WeightAdjust` proposal.
    pub edge_id: Option<String>,
    pub kind: ProposalKind,
    pub reasoning: String,
    pub priority: Priority,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementConfig {
    pub high_importance_threshold: f64,
    pub low_importance_threshold: f64,
    pub min_edges_for_prune: usize,
    pub new_feature_correlation: f64,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            high_importance_threshold: 0.6,
            low_importance_threshold: 0.2,
            min_edges_for_prune: 3,
            new_feature_correlation: 0.5,
        }
    }
}

/// One edge's view as seen by the refinement engine: its latest
/// feature-importance analysis (if it has enough outcomes) and the set of
/// feature names already conditioned on by its `EdgeDefinition`, if any.
pub struct EdgeRefinementInput<'a> {
    pub edge_id: &'a str,
    pub definition_features: &'a [String],
    pub analysis: Option<&'a ImportanceAnalysis>,
}

#[derive(Debug, Default)]
pub struct BehaviorRefinementEngine {
    history: Vec<RefinementProposal>,
    max_history_size: usize,
}

impl BehaviorRefinementEngine {
    pub fn new(max_history_size: usize) -> Self {
        Self { history: Vec::new(), max_history_size: max_history_size.max(1) }
    }

    /// Generates proposals over the whole analyzed edge set in one pass —
    /// `PRUNE_CANDIDATE` and `NEW_FEATURE_SIGNAL` are feature-level
    /// aggregates across edges, so they cannot be produced edge-by-edge.
    /// Sorted `HIGH` -> `MEDIUM` -> `LOW`, and appended to a bounded
    /// history.
    pub fn generate(&mut self, edges: &[EdgeRefinementInput], config: &RefinementConfig, now: i64) -> Vec<RefinementProposal> {
        let mut proposals = Vec::new();

        // WEIGHT_ADJUST: per edge, per feature >= high_importance_threshold.
        for edge in edges {
            let Some(analysis) = edge.analysis else { continue };
            let mut by_feature: Vec<_> = analysis.by_feature.iter().collect();
            by_feature.sort_by(|a, b| a.0.cmp(b.0));
            for (feature, imp) in by_feature {
                if imp.importance < config.high_importance_threshold {
                    continue;
                }
                let in_definition = edge.definition_features.iter().any(|f| f == feature);
                let priority = if in_definition { Priority::Medium } else { Priority::High };
                proposals.push(RefinementProposal {
                    edge_id: Some(edge.edge_id.to_string()),
                    reasoning: format!(
                        "feature '{feature}' importance {:.3} >= threshold {:.3}{}",
                        imp.importance,
                        config.high_importance_threshold,
                        if in_definition { ", already in edge definition" } else { ", not yet in edge definition" }
                    ),
                    kind: ProposalKind::WeightAdjust { feature: feature.clone(), importance: imp.importance, in_definition },
                    priority,
                    created_at: now,
                });
            }
        }

        // Per-feature aggregates across every edge that has an analysis.
        let mut low_importance_counts: HashMap<&str, usize> = HashMap::new();
        let mut correlation_sums: HashMap<&str, (f64, usize)> = HashMap::new();
        let mut definition_usage: HashMap<&str, usize> = HashMap::new();
        let mut analyzed_edge_count = 0usize;

        for edge in edges {
            let Some(analysis) = edge.analysis else { continue };
            analyzed_edge_count += 1;
            for (feature, imp) in &analysis.by_feature {
                if imp.importance < config.low_importance_threshold {
                    *low_importance_counts.entry(feature.as_str()).or_insert(0) += 1;
                }
                let entry = correlation_sums.entry(feature.as_str()).or_insert((0.0, 0));
                entry.0 += imp.correlation.abs();
                entry.1 += 1;
            }
            for feature in &analysis.by_feature {
                if edge.definition_features.iter().any(|f| f == feature.0) {
                    *definition_usage.entry(feature.0.as_str()).or_insert(0) += 1;
                }
            }
        }

        // PRUNE_CANDIDATE: features unimportant across enough edges.
        let mut low_names: Vec<&&str> = low_importance_counts.keys().collect();
        low_names.sort();
        for feature in low_names {
            let count = low_importance_counts[feature];
            if count < config.min_edges_for_prune {
                continue;
            }
            let priority = if count >= 5 { Priority::High } else { Priority::Medium };
            proposals.push(RefinementProposal {
                edge_id: None,
                reasoning: format!("feature '{feature}' importance below {:.3} across {count} edges", config.low_importance_threshold),
                kind: ProposalKind::PruneCandidate { feature: feature.to_string(), low_importance_edge_count: count },
                priority,
                created_at: now,
            });
        }

        // NEW_FEATURE_SIGNAL: strongly correlated but rarely used in a definition.
        let mut corr_names: Vec<&&str> = correlation_sums.keys().collect();
        corr_names.sort();
        for feature in corr_names {
            let (sum, n) = correlation_sums[feature];
            if n == 0 {
                continue;
            }
            let avg_abs_corr = sum / n as f64;
            if avg_abs_corr < config.new_feature_correlation {
                continue;
            }
            let used_fraction = if analyzed_edge_count == 0 {
                0.0
            } else {
                *definition_usage.get(feature).unwrap_or(&0) as f64 / analyzed_edge_count as f64
            };
            if used_fraction >= 0.3 {
                continue;
            }
            let priority = if avg_abs_corr > 0.7 { Priority::High } else { Priority::Medium };
            proposals.push(RefinementProposal {
                edge_id: None,
                reasoning: format!("feature '{feature}' avg |correlation| {avg_abs_corr:.3} but used in only {:.0}% of edge definitions", used_fraction * 100.0),
                kind: ProposalKind::NewFeatureSignal { feature: feature.to_string(), avg_abs_correlation: avg_abs_corr },
                priority,
                created_at: now,
            });
        }

        proposals.sort_by(|a, b| b.priority.cmp(&a.priority));

        self.history.extend(proposals.iter().cloned());
        if self.history.len() > self.max_history_size {
            let excess = self.history.len() - self.max_history_size;
            self.history.drain(0..excess);
        }

        proposals
    }

    pub fn history(&self) -> &[RefinementProposal] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importance::FeatureImportance;
    use std::collections::HashMap as Map;

    fn analysis(edge_id: &str, features: &[(&str, f64, f64)]) -> ImportanceAnalysis {
        let mut by_feature = Map::new();
        for &(name, importance, correlation) in features {
            by_feature.insert(
                name.to_string(),
                FeatureImportance { correlation, t_stat: 0.0, p_value: 0.5, effect_size: 0.0, importance, win_rate_by_quartile: [0.5; 4] },
            );
        }
        ImportanceAnalysis { edge_id: edge_id.to_string(), outcomes_analyzed: 20, by_feature, analyzed_at: 0 }
    }

    #[test]
    fn high_importance_feature_not_in_definition_is_high_priority() {
        let mut engine = BehaviorRefinementEngine::new(10);
        let a = analysis("e1", &[("f_imbalance", 0.85, 0.8)]);
        let inputs = [EdgeRefinementInput { edge_id: "e1", definition_features: &[], analysis: Some(&a) }];
        let proposals = engine.generate(&inputs, &RefinementConfig::default(), 0);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].priority, Priority::High);
        assert!(matches!(proposals[0].kind, ProposalKind::WeightAdjust { in_definition: false, .. }));
    }

    #[test]
    fn high_importance_feature_already_in_definition_is_medium_priority() {
        let mut engine = BehaviorRefinementEngine::new(10);
        let a = analysis("e1", &[("f_imbalance", 0.85, 0.8)]);
        let def_features = vec!["f_imbalance".to_string()];
        let inputs = [EdgeRefinementInput { edge_id: "e1", definition_features: &def_features, analysis: Some(&a) }];
        let proposals = engine.generate(&inputs, &RefinementConfig::default(), 0);
        assert_eq!(proposals[0].priority, Priority::Medium);
    }

    #[test]
    fn feature_low_across_enough_edges_is_pruned() {
        let mut engine = BehaviorRefinementEngine::new(10);
        let analyses: Vec<ImportanceAnalysis> =
            (0..3).map(|i| analysis(&format!("e{i}"), &[("f_noise", 0.05, 0.02)])).collect();
        let inputs: Vec<EdgeRefinementInput> =
            analyses.iter().map(|a| EdgeRefinementInput { edge_id: &a.edge_id, definition_features: &[], analysis: Some(a) }).collect();
        let config = RefinementConfig { min_edges_for_prune: 3, ..Default::default() };
        let proposals = engine.generate(&inputs, &config, 0);
        assert!(proposals.iter().any(|p| matches!(&p.kind, ProposalKind::PruneCandidate { feature, .. } if feature == "f_noise")));
    }

    #[test]
    fn feature_below_prune_edge_count_is_not_proposed() {
        let mut engine = BehaviorRefinementEngine::new(10);
        let analyses: Vec<ImportanceAnalysis> =
            (0..2).map(|i| analysis(&format!("e{i}"), &[("f_noise", 0.05, 0.02)])).collect();
        let inputs: Vec<EdgeRefinementInput> =
            analyses.iter().map(|a| EdgeRefinementInput { edge_id: &a.edge_id, definition_features: &[], analysis: Some(a) }).collect();
        let config = RefinementConfig { min_edges_for_prune: 3, ..Default::default() };
        let proposals = engine.generate(&inputs, &config, 0);
        assert!(!proposals.iter().any(|p| matches!(p.kind, ProposalKind::PruneCandidate { .. })));
    }

    #[test]
    fn strongly_correlated_unused_feature_yields_new_feature_signal() {
        let mut engine = BehaviorRefinementEngine::new(10);
        let analyses: Vec<ImportanceAnalysis> =
            (0..4).map(|i| analysis(&format!("e{i}"), &[("f_micro_reversion", 0.4, 0.8)])).collect();
        let inputs: Vec<EdgeRefinementInput> =
            analyses.iter().map(|a| EdgeRefinementInput { edge_id: &a.edge_id, definition_features: &[], analysis: Some(a) }).collect();
        let proposals = engine.generate(&inputs, &RefinementConfig::default(), 0);
        let signal = proposals.iter().find(|p| matches!(p.kind, ProposalKind::NewFeatureSignal { .. }));
        assert!(signal.is_some());
        assert_eq!(signal.unwrap().priority, Priority::High);
    }

    #[test]
    fn feature_used_in_enough_definitions_does_not_get_new_feature_signal() {
        let mut engine = BehaviorRefinementEngine::new(10);
        let analyses: Vec<ImportanceAnalysis> =
            (0..4).map(|i| analysis(&format!("e{i}"), &[("f_micro_reversion", 0.4, 0.8)])).collect();
        let def_features = vec!["f_micro_reversion".to_string()];
        let inputs: Vec<EdgeRefinementInput> = analyses
            .iter()
            .map(|a| EdgeRefinementInput { edge_id: &a.edge_id, definition_features: &def_features, analysis: Some(a) })
            .collect();
        let proposals = engine.generate(&inputs, &RefinementConfig::default(), 0);
        assert!(!proposals.iter().any(|p| matches!(p.kind, ProposalKind::NewFeatureSignal { .. })));
    }

    #[test]
    fn proposals_sorted_high_to_low() {
        let mut engine = BehaviorRefinementEngine::new(10);
        let a = analysis("e1", &[("f_strong", 0.9, 0.9), ("f_weak", 0.05, 0.01)]);
        let b = analysis("e2", &[("f_weak", 0.05, 0.01)]);
        let c = analysis("e3", &[("f_weak", 0.05, 0.01)]);
        let inputs = [
            EdgeRefinementInput { edge_id: "e1", definition_features: &[], analysis: Some(&a) },
            EdgeRefinementInput { edge_id: "e2", definition_features: &[], analysis: Some(&b) },
            EdgeRefinementInput { edge_id: "e3", definition_features: &[], analysis: Some(&c) },
        ];
        let proposals = engine.generate(&inputs, &RefinementConfig::default(), 0);
        for pair in proposals.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
        }
    }
}
