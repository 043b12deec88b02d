//! C8 — `EdgeConfidenceUpdater`: EMA update of edge
//! confidence from realized outcomes, plus drift detection against a
//! per-edge baseline set explicitly by the caller (never inferred).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::edge::{Edge, TradeResult};
use crate::outcomes::TradeOutcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    pub min_sample_size: u32,
    pub decay_weight: f64,
    pub confidence_drop_threshold: f64,
    pub consecutive_losses_threshold: u32,
    pub win_rate_drop_threshold: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 30,
            decay_weight: 0.05,
            confidence_drop_threshold: 0.15,
            consecutive_losses_threshold: 10,
            win_rate_drop_threshold: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceBaseline {
    pub confidence: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriftAlertKind {
    ConfidenceDrop,
    ConsecutiveLosses,
    WinrateDrop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriftAlert {
    pub kind: DriftAlertKind,
}

#[derive(Debug, Default)]
pub struct EdgeConfidenceUpdater {
    baselines: HashMap<String, ConfidenceBaseline>,
}

impl EdgeConfidenceUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicitly sets (or replaces) the baseline an edge's confidence and
    /// win rate are compared against for drift detection.
    pub fn set_baseline(&mut self, edge_id: impl Into<String>, baseline: ConfidenceBaseline) {
        self.baselines.insert(edge_id.into(), baseline);
    }

    /// Updates `edge.stats` (delegated to `Edge::update_stats`) and, once
    /// `min_sample_size` is reached, the EMA confidence. Returns any drift
    /// alerts fired against a previously set baseline, or `None`.
    pub fn record_outcome(&mut self, edge: &mut Edge, outcome: &TradeOutcome, config: &ConfidenceConfig) -> Option<Vec<DriftAlert>> {
        let is_win = outcome.pnl > 0.0;
        edge.update_stats(&TradeResult {
            return_abs: outcome.pnl,
            return_pct: if outcome.entry_price != 0.0 { outcome.pnl / outcome.entry_price } else { 0.0 },
            ts: outcome.exit_timestamp,
        });

        if edge.stats.trades >= config.min_sample_size {
            let win_indicator = if is_win { 1.0 } else { 0.0 };
            edge.confidence.score = (1.0 - config.decay_weight) * edge.confidence.score + config.decay_weight * win_indicator;
        }

        let baseline = self.baselines.get(&edge.id).copied()?;
        let mut alerts = Vec::new();

        if baseline.confidence - edge.confidence.score > config.confidence_drop_threshold {
            alerts.push(DriftAlert { kind: DriftAlertKind::ConfidenceDrop });
        }
        if edge.stats.consecutive_losses >= config.consecutive_losses_threshold {
            alerts.push(DriftAlert { kind: DriftAlertKind::ConsecutiveLosses });
        }
        if edge.stats.trades >= config.min_sample_size {
            let current_win_rate = edge.stats.wins as f64 / edge.stats.trades as f64;
            if baseline.win_rate - current_win_rate > config.win_rate_drop_threshold {
                alerts.push(DriftAlert { kind: DriftAlertKind::WinrateDrop });
            }
        }

        if alerts.is_empty() {
            None
        } else {
            Some(alerts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{Edge, EntryOutcome, EntryPredicate, ExitOutcome, ExitPredicate};
    use std::collections::HashMap as Map;

    #[derive(Debug)]
    struct Never;
    impl EntryPredicate for Never {
        fn evaluate(&self, _f: &Map<String, f64>, _r: Option<&str>) -> Result<EntryOutcome, String> {
            Ok(EntryOutcome { active: false, direction: None, confidence: None, reason: None })
        }
    }
    impl ExitPredicate for Never {
        fn evaluate(&self, _f: &Map<String, f64>, _r: Option<&str>, _e: i64, _n: i64) -> Result<ExitOutcome, String> {
            Ok(ExitOutcome { exit: false, reason: None })
        }
    }

    fn outcome(ts: i64, pnl: f64) -> TradeOutcome {
        TradeOutcome {
            trade_id: format!("t{ts}"),
            edge_id: "e1".to_string(),
            direction: "LONG".to_string(),
            entry_price: 100.0,
            entry_timestamp: ts - 1,
            entry_features: Map::new(),
            entry_regime: None,
            exit_price: 100.0 + pnl,
            exit_timestamp: ts,
            pnl,
            exit_reason: "TP".to_string(),
            holding_period_ms: 1,
        }
    }

    #[test]
    fn e4_confidence_drop_fires_after_losing_streak() {
        let mut edge = Edge::new("e1", "edge", Box::new(Never), Box::new(Never));
        edge.stats.trades = 50;
        edge.stats.wins = 30;
        edge.confidence.score = 0.75;

        let mut updater = EdgeConfidenceUpdater::new();
        updater.set_baseline("e1", ConfidenceBaseline { confidence: 0.75, win_rate: 0.6 });

        let config = ConfidenceConfig::default();
        let mut alerts = None;
        for i in 0..30 {
            alerts = updater.record_outcome(&mut edge, &outcome(i + 1, -0.1), &config);
        }
        let alerts = alerts.expect("drift alerts expected after losing streak");
        assert!(alerts.iter().any(|a| a.kind == DriftAlertKind::ConfidenceDrop));
    }

    #[test]
    fn no_alerts_without_a_baseline() {
        let mut edge = Edge::new("e2", "edge", Box::new(Never), Box::new(Never));
        let mut updater = EdgeConfidenceUpdater::new();
        let result = updater.record_outcome(&mut edge, &outcome(1, 0.1), &ConfidenceConfig::default());
        assert!(result.is_none());
    }

    #[test]
    fn invariant_5_ema_confidence_law() {
        let mut edge = Edge::new("e3", "edge", Box::new(Never), Box::new(Never));
        edge.stats.trades = 30; // already at min_sample_size
        let c0 = 0.5;
        edge.confidence.score = c0;
        let config = ConfidenceConfig { min_sample_size: 30, decay_weight: 0.05, ..Default::default() };
        let wins = [1.0, 0.0, 1.0, 1.0, 0.0];
        let mut updater = EdgeConfidenceUpdater::new();
        for (i, &w) in wins.iter().enumerate() {
            updater.record_outcome(&mut edge, &outcome(i as i64 + 1, if w > 0.0 { 0.1 } else { -0.1 }), &config);
        }
        let alpha = config.decay_weight;
        let mut expected = c0;
        for &w in &wins {
            expected = (1.0 - alpha) * expected + alpha * w;
        }
        assert!((edge.confidence.score - expected).abs() < 1e-9);
    }
}
