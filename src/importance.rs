//! C10 — `FeatureImportanceTracker`: per-edge importance of entry features
//! against realized PnL, from the aligned arrays of `TradeOutcome`s a
//! closed-loop learning run has collected for that edge.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::outcomes::TradeOutcome;

const MIN_OUTCOMES_PER_EDGE: usize = 10;
const QUARTILE_BINS: usize = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub correlation: f64,
    pub t_stat: f64,
    pub p_value: f64,
    pub effect_size: f64,
    pub importance: f64,
    /// Win rate within each of the 4 value quartiles (lowest to highest);
    /// the last bin absorbs any remainder from integer-division binning.
    pub win_rate_by_quartile: [f64; QUARTILE_BINS],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportanceAnalysis {
    pub edge_id: String,
    pub outcomes_analyzed: usize,
    pub by_feature: HashMap<String, FeatureImportance>,
    pub analyzed_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportanceConfig {
    pub max_history_size: usize,
    pub min_outcomes_per_edge: usize,
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self { max_history_size: 10, min_outcomes_per_edge: MIN_OUTCOMES_PER_EDGE }
    }
}

#[derive(Debug, Default)]
pub struct FeatureImportanceTracker {
    config_max_history: HashMap<String, usize>,
    history: HashMap<String, Vec<ImportanceAnalysis>>,
}

impl FeatureImportanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyzes `outcomes` (already filtered to one edge) and, if there are
    /// at least `config.min_outcomes_per_edge`, appends the analysis to that
    /// edge's bounded rolling history. Returns the analysis, or `None` if
    /// there weren't enough outcomes.
    pub fn analyze(&mut self, edge_id: &str, outcomes: &[TradeOutcome], config: &ImportanceConfig, now: i64) -> Option<ImportanceAnalysis> {
        if outcomes.len() < config.min_outcomes_per_edge {
            return None;
        }

        let feature_names = common_feature_names(outcomes);
        let mut by_feature = HashMap::new();
        for feature in &feature_names {
            let values: Vec<f64> = outcomes.iter().map(|o| o.entry_features[feature]).collect();
            let pnls: Vec<f64> = outcomes.iter().map(|o| o.pnl).collect();
            by_feature.insert(feature.clone(), analyze_one(&values, &pnls));
        }

        let analysis = ImportanceAnalysis { edge_id: edge_id.to_string(), outcomes_analyzed: outcomes.len(), by_feature, analyzed_at: now };

        self.config_max_history.insert(edge_id.to_string(), config.max_history_size);
        let history = self.history.entry(edge_id.to_string()).or_default();
        history.push(analysis.clone());
        if history.len() > config.max_history_size {
            history.remove(0);
        }

        Some(analysis)
    }

    pub fn history(&self, edge_id: &str) -> &[ImportanceAnalysis] {
        self.history.get(edge_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `RISING`/`FALLING`/`STABLE` for one feature of one edge, derived from
    /// the last 5 stored analyses' importance deltas (threshold ±0.1).
    pub fn trend(&self, edge_id: &str, feature: &str) -> Trend {
        let history = self.history(edge_id);
        let recent: Vec<f64> = history
            .iter()
            .rev()
            .take(5)
            .rev()
            .filter_map(|a| a.by_feature.get(feature).map(|f| f.importance))
            .collect();
        if recent.len() < 2 {
            return Trend::Stable;
        }
        let delta = recent.last().unwrap() - recent.first().unwrap();
        if delta > 0.1 {
            Trend::Rising
        } else if delta < -0.1 {
            Trend::Falling
        } else {
            Trend::Stable
        }
    }
}

fn common_feature_names(outcomes: &[TradeOutcome]) -> Vec<String> {
    let Some(first) = outcomes.first() else { return Vec::new() };
    let mut names: Vec<String> = first
        .entry_features
        .keys()
        .filter(|k| outcomes.iter().all(|o| o.entry_features.contains_key(k.as_str())))
        .cloned()
        .collect();
    names.sort();
    names
}

fn analyze_one(values: &[f64], pnls: &[f64]) -> FeatureImportance {
    let n = values.len();
    let r = pearson_correlation(values, pnls);
    let t_stat = if n > 2 && r.abs() < 1.0 {
        r * (((n - 2) as f64) / (1.0 - r * r)).sqrt()
    } else {
        0.0
    };
    let p_value = bucketed_p_value(t_stat);
    let effect_size = cohens_d_effect_size(values, pnls);
    let importance = (0.5 * r.abs() + 0.3 * (1.0 - p_value) + 0.2 * effect_size).clamp(0.0, 1.0);
    let win_rate_by_quartile = win_rate_by_quartile(values, pnls);

    FeatureImportance { correlation: r, t_stat, p_value, effect_size, importance, win_rate_by_quartile }
}

fn pearson_correlation(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&x, &y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0)
}

fn bucketed_p_value(t_stat: f64) -> f64 {
    let t = t_stat.abs();
    if t > 2.6 {
        0.01
    } else if t > 2.0 {
        0.05
    } else if t > 1.5 {
        0.15
    } else {
        0.5
    }
}

/// Cohen's-d-style effect size between the feature-value distributions of
/// winning vs. losing trades, normalized to `[0,1]` as `min(1, d/0.8)`.
fn cohens_d_effect_size(values: &[f64], pnls: &[f64]) -> f64 {
    let wins: Vec<f64> = values.iter().zip(pnls).filter(|(_, &p)| p > 0.0).map(|(&v, _)| v).collect();
    let losses: Vec<f64> = values.iter().zip(pnls).filter(|(_, &p)| p <= 0.0).map(|(&v, _)| v).collect();
    if wins.is_empty() || losses.is_empty() {
        return 0.0;
    }
    let mean_w = wins.iter().sum::<f64>() / wins.len() as f64;
    let mean_l = losses.iter().sum::<f64>() / losses.len() as f64;
    let var_w = variance(&wins, mean_w);
    let var_l = variance(&losses, mean_l);
    let pooled_sd = (((wins.len() as f64 - 1.0) * var_w + (losses.len() as f64 - 1.0) * var_l) / ((wins.len() + losses.len()) as f64 - 2.0)).max(0.0).sqrt();
    if pooled_sd == 0.0 {
        return 0.0;
    }
    let d = (mean_w - mean_l).abs() / pooled_sd;
    (d / 0.8).min(1.0)
}

fn variance(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() as f64 - 1.0)
}

/// 4-bin win rate by value quartile; the last bin absorbs the remainder
/// when `n` doesn't divide evenly by `QUARTILE_BINS`.
fn win_rate_by_quartile(values: &[f64], pnls: &[f64]) -> [f64; QUARTILE_BINS] {
    let mut indexed: Vec<(f64, f64)> = values.iter().copied().zip(pnls.iter().copied()).collect();
    indexed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let n = indexed.len();
    let base = n / QUARTILE_BINS;
    let mut out = [0.0; QUARTILE_BINS];
    let mut start = 0;
    for (bin, slot) in out.iter_mut().enumerate() {
        let end = if bin == QUARTILE_BINS - 1 { n } else { start + base };
        let bucket = &indexed[start..end];
        *slot = if bucket.is_empty() {
            0.0
        } else {
            bucket.iter().filter(|(_, pnl)| *pnl > 0.0).count() as f64 / bucket.len() as f64
        };
        start = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn outcome(feature_value: f64, pnl: f64, i: i64) -> TradeOutcome {
        TradeOutcome {
            trade_id: format!("t{i}"),
            edge_id: "e1".to_string(),
            direction: "LONG".to_string(),
            entry_price: 100.0,
            entry_timestamp: i,
            entry_features: Map::from([("f_imbalance".to_string(), feature_value)]),
            entry_regime: None,
            exit_price: 100.0 + pnl,
            exit_timestamp: i + 1,
            pnl,
            exit_reason: "TP".to_string(),
            holding_period_ms: 1,
        }
    }

    #[test]
    fn fewer_than_minimum_outcomes_yields_no_analysis() {
        let mut tracker = FeatureImportanceTracker::new();
        let outcomes: Vec<TradeOutcome> = (0..5).map(|i| outcome(i as f64, 0.1, i)).collect();
        assert!(tracker.analyze("e1", &outcomes, &ImportanceConfig::default(), 0).is_none());
    }

    #[test]
    fn positively_correlated_feature_gets_high_importance() {
        let mut tracker = FeatureImportanceTracker::new();
        // feature value strictly increasing alongside pnl: r should be close to 1.
        let outcomes: Vec<TradeOutcome> = (0..20).map(|i| outcome(i as f64, i as f64 * 0.01 - 0.05, i)).collect();
        let analysis = tracker.analyze("e1", &outcomes, &ImportanceConfig::default(), 0).unwrap();
        let imp = &analysis.by_feature["f_imbalance"];
        assert!(imp.correlation > 0.9);
        assert!(imp.importance > 0.5);
    }

    #[test]
    fn constant_feature_has_zero_correlation() {
        let mut tracker = FeatureImportanceTracker::new();
        let outcomes: Vec<TradeOutcome> = (0..15).map(|i| outcome(1.0, if i % 2 == 0 { 0.1 } else { -0.1 }, i)).collect();
        let analysis = tracker.analyze("e1", &outcomes, &ImportanceConfig::default(), 0).unwrap();
        assert_eq!(analysis.by_feature["f_imbalance"].correlation, 0.0);
    }

    #[test]
    fn history_is_bounded_and_trend_reflects_recent_deltas() {
        let mut tracker = FeatureImportanceTracker::new();
        let config = ImportanceConfig { max_history_size: 3, min_outcomes_per_edge: 10 };
        for round in 0..5 {
            let outcomes: Vec<TradeOutcome> =
                (0..20).map(|i| outcome(i as f64, (i as f64 + round as f64) * 0.01 - 0.1, i)).collect();
            tracker.analyze("e1", &outcomes, &config, round);
        }
        assert_eq!(tracker.history("e1").len(), 3);
    }
}
