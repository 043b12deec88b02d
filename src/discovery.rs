//! C5 — `EdgeDiscoveryPipeline`: a pure streaming scan over historical
//! feature/regime rows. Enumerates candidate patterns,
//! filters for statistical significance, and emits `CANDIDATE` edges with
//! registered `EdgeDefinition`s. Deterministic given the same rows and
//! `seed` — pattern enumeration order is fixed and any randomized sampling
//! uses a seeded `ChaCha8Rng` for reproducible scenario generation.

use std::collections::HashMap;

use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::edge::{Direction, Edge, EdgeDefinition, EdgeRegistry, EntryOutcome, EntryPredicate, ExitOutcome, ExitPredicate, Operator, Pattern, PatternCondition, TestResult};
use crate::error::{DiscoveryError, EdgeCoreResult};

/// One historical row available to the discovery scan: a resolved feature
/// vector, the forward return realized over the pattern's horizon, and an
/// optional regime label.
#[derive(Debug, Clone)]
pub struct DiscoveryRow {
    pub features: HashMap<String, f64>,
    pub forward_return: f64,
    pub regime: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub seed: u64,
    pub max_edges_per_run: usize,
    pub min_support: usize,
    pub return_threshold: f64,
    pub t_stat_threshold: f64,
    /// Feature names and candidate thresholds considered by the threshold
    /// pattern family. Cluster/quantile families derive their own
    /// thresholds from the data (quartiles of each feature's distribution).
    pub threshold_features: Vec<String>,
    pub threshold_quantiles: Vec<f64>,
    /// `[q_lo, q_hi]` pairs considered by the quantile-band family: each
    /// pair brackets a feature into `value ∈ [quantile(q_lo), quantile(q_hi)]`.
    pub quantile_bands: Vec<(f64, f64)>,
    pub horizon_ms: i64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_edges_per_run: 20,
            min_support: 30,
            return_threshold: 0.0005,
            t_stat_threshold: 2.0,
            threshold_features: Vec::new(),
            threshold_quantiles: vec![0.25, 0.5, 0.75],
            quantile_bands: vec![(0.25, 0.75), (0.1, 0.9)],
            horizon_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRunReport {
    pub patterns_scanned: usize,
    pub patterns_tested_significant: usize,
    pub edge_candidates_generated: usize,
    pub edge_candidates_registered: usize,
    pub metadata: HashMap<String, String>,
}

struct CandidatePattern {
    conditions: Vec<PatternCondition>,
    direction: Direction,
    mean_return: f64,
    std_return: f64,
    t_stat: f64,
    support: usize,
    forward_returns: Vec<f64>,
}

#[derive(Debug)]
struct ThresholdPredicate {
    conditions: Vec<PatternCondition>,
    direction: Direction,
}
impl EntryPredicate for ThresholdPredicate {
    fn evaluate(&self, features: &HashMap<String, f64>, _regime: Option<&str>) -> Result<EntryOutcome, String> {
        for cond in &self.conditions {
            let v = *features.get(&cond.feature).ok_or_else(|| format!("missing feature '{}'", cond.feature))?;
            if !cond.operator.evaluate(v, cond.value) {
                return Ok(EntryOutcome { active: false, direction: None, confidence: None, reason: None });
            }
        }
        Ok(EntryOutcome { active: true, direction: Some(self.direction), confidence: None, reason: None })
    }
}
#[derive(Debug)]
struct NeverExit;
impl ExitPredicate for NeverExit {
    fn evaluate(&self, _f: &HashMap<String, f64>, _r: Option<&str>, _e: i64, _n: i64) -> Result<ExitOutcome, String> {
        Ok(ExitOutcome { exit: false, reason: None })
    }
}

pub struct EdgeDiscoveryPipeline;

impl EdgeDiscoveryPipeline {
    /// Streams `rows` through enumeration, significance filtering, and
    /// candidate generation, registering surviving edges into `registry`.
    pub fn run(rows: &[DiscoveryRow], config: &DiscoveryConfig, registry: &mut EdgeRegistry) -> EdgeCoreResult<DiscoveryRunReport> {
        if rows.is_empty() {
            return Err(DiscoveryError::EmptyDataset.into());
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let feature_names = feature_universe(rows, config);

        let mut patterns_scanned = 0usize;
        let mut candidates: Vec<CandidatePattern> = Vec::new();

        for feature in &feature_names {
            let values: Vec<f64> = rows.iter().filter_map(|r| r.features.get(feature).copied()).collect();
            if values.len() < config.min_support {
                continue;
            }
            for quantile in &config.threshold_quantiles {
                for (operator, direction) in [(Operator::Gt, Direction::Long), (Operator::Lt, Direction::Short)] {
                    patterns_scanned += 1;
                    let threshold = quantile_of(&values, *quantile);
                    let condition = PatternCondition { feature: feature.clone(), operator, value: threshold };
                    if let Some(candidate) = evaluate_candidate(rows, std::slice::from_ref(&condition), direction, config) {
                        candidates.push(candidate);
                    }
                }
            }
        }

        // Cluster family: conjunctions of two features' top/bottom quartiles.
        for pair in feature_names.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let a_values: Vec<f64> = rows.iter().filter_map(|r| r.features.get(a).copied()).collect();
            let b_values: Vec<f64> = rows.iter().filter_map(|r| r.features.get(b).copied()).collect();
            if a_values.len() < config.min_support || b_values.len() < config.min_support {
                continue;
            }
            patterns_scanned += 1;
            let a_threshold = quantile_of(&a_values, 0.75);
            let b_threshold = quantile_of(&b_values, 0.75);
            let conditions = vec![
                PatternCondition { feature: a.clone(), operator: Operator::Gt, value: a_threshold },
                PatternCondition { feature: b.clone(), operator: Operator::Gt, value: b_threshold },
            ];
            if let Some(candidate) = evaluate_candidate(rows, &conditions, Direction::Long, config) {
                candidates.push(candidate);
            }
        }

        // Quantile-band family: a feature bracketed into [quantile(q_lo),
        // quantile(q_hi)], i.e. a Ge+Le conjunction rather than a
        // one-sided threshold.
        for feature in &feature_names {
            let values: Vec<f64> = rows.iter().filter_map(|r| r.features.get(feature).copied()).collect();
            if values.len() < config.min_support {
                continue;
            }
            for &(q_lo, q_hi) in &config.quantile_bands {
                for direction in [Direction::Long, Direction::Short] {
                    patterns_scanned += 1;
                    let lo = quantile_of(&values, q_lo);
                    let hi = quantile_of(&values, q_hi);
                    let conditions = vec![
                        PatternCondition { feature: feature.clone(), operator: Operator::Ge, value: lo },
                        PatternCondition { feature: feature.clone(), operator: Operator::Le, value: hi },
                    ];
                    if let Some(candidate) = evaluate_candidate(rows, &conditions, direction, config) {
                        candidates.push(candidate);
                    }
                }
            }
        }

        let patterns_tested_significant = candidates.len();

        // Higher |t_stat| first; a per-candidate seeded tie-break key keeps
        // the ordering deterministic without biasing the ranking.
        let tie_breaks: Vec<u64> = (0..candidates.len()).map(|_| rng.random()).collect();
        let mut indexed: Vec<(usize, CandidatePattern)> = candidates.into_iter().enumerate().collect();
        indexed.sort_by(|(ia, a), (ib, b)| {
            b.t_stat
                .abs()
                .partial_cmp(&a.t_stat.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| tie_breaks[*ia].cmp(&tie_breaks[*ib]))
        });
        let candidates: Vec<CandidatePattern> = indexed.into_iter().map(|(_, c)| c).collect();

        let edge_candidates_generated = candidates.len();
        let mut registered = 0usize;

        for (i, candidate) in candidates.into_iter().take(config.max_edges_per_run).enumerate() {
            let pattern = Pattern {
                conditions: candidate.conditions.clone(),
                direction: candidate.direction,
                horizon_ms: config.horizon_ms,
                regimes: Default::default(),
                support: candidate.support,
                forward_returns: candidate.forward_returns.clone(),
            };
            let test_result = TestResult {
                mean_return: candidate.mean_return,
                std_return: candidate.std_return,
                t_stat: candidate.t_stat,
                support: candidate.support,
            };
            let id = format!("disc-{}-{}", config.seed, i);
            let entry = Box::new(ThresholdPredicate { conditions: candidate.conditions, direction: candidate.direction });
            let exit = Box::new(NeverExit);
            let mut edge = Edge::new(id, format!("discovered pattern #{i}"), entry, exit);
            edge.time_horizon_ms = config.horizon_ms;
            edge.expected_advantage.mean = candidate.mean_return;
            edge.expected_advantage.std = candidate.std_return;
            if registry.register(edge, Some(EdgeDefinition { pattern, test_result })).is_ok() {
                registered += 1;
            }
        }

        Ok(DiscoveryRunReport {
            patterns_scanned,
            patterns_tested_significant,
            edge_candidates_generated,
            edge_candidates_registered: registered,
            metadata: HashMap::from([("seed".to_string(), config.seed.to_string())]),
        })
    }
}

fn feature_universe(rows: &[DiscoveryRow], config: &DiscoveryConfig) -> Vec<String> {
    if !config.threshold_features.is_empty() {
        return config.threshold_features.clone();
    }
    let mut names: Vec<String> = rows
        .first()
        .map(|r| r.features.keys().cloned().collect())
        .unwrap_or_default();
    names.sort();
    names
}

fn quantile_of(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((sorted.len() as f64 - 1.0) * q).round().max(0.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn evaluate_candidate(rows: &[DiscoveryRow], conditions: &[PatternCondition], direction: Direction, config: &DiscoveryConfig) -> Option<CandidatePattern> {
    let matching: Vec<f64> = rows
        .iter()
        .filter(|r| conditions.iter().all(|c| r.features.get(&c.feature).is_some_and(|&v| c.operator.evaluate(v, c.value))))
        .map(|r| r.forward_return)
        .collect();

    let support = matching.len();
    if support < config.min_support {
        return None;
    }

    let mean = matching.iter().sum::<f64>() / support as f64;
    if mean.abs() < config.return_threshold {
        return None;
    }

    let variance = matching.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / support as f64;
    let std = variance.max(0.0).sqrt();
    if std == 0.0 {
        return None;
    }
    let t_stat = mean / (std / (support as f64).sqrt());
    if t_stat.abs() < config.t_stat_threshold {
        return None;
    }

    Some(CandidatePattern {
        conditions: conditions.to_vec(),
        direction,
        mean_return: mean,
        std_return: std,
        t_stat,
        support,
        forward_returns: matching,
    })
}
