//! C3 — `Edge` + `EdgeRegistry`: parametric, evaluable
//! "market-pattern contracts" with lifecycle status, health scoring, and
//! auto-retirement. Also carries the `EdgeDefinition`/`Pattern` shapes from
//! §3/§4.4 since the registry stores `(Edge, EdgeDefinition?)` side by side
//! and predicate reconstruction (C4) operates directly on `Pattern`.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::warn;

use crate::error::EdgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum EdgeStatus {
    Candidate,
    Validated,
    Deployed,
    Retired,
}

/// The closed alphabet of pattern-condition operators
/// (`operator ∈ {'>','<','==','>=','<='}`). A closed enum, not a string, so
/// an unknown operator fails at parse time rather than at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Gt,
    Lt,
    Eq,
    Ge,
    Le,
}

impl Operator {
    pub fn evaluate(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Gt => lhs > rhs,
            Operator::Lt => lhs < rhs,
            Operator::Eq => lhs == rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Le => lhs <= rhs,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Eq => "==",
            Operator::Ge => ">=",
            Operator::Le => "<=",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EdgeError> {
        match s {
            ">" => Ok(Operator::Gt),
            "<" => Ok(Operator::Lt),
            "==" => Ok(Operator::Eq),
            ">=" => Ok(Operator::Ge),
            "<=" => Ok(Operator::Le),
            other => Err(EdgeError::InvalidOperator(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternCondition {
    pub feature: String,
    pub operator: Operator,
    pub value: f64,
}

/// A language-neutral description of an entry pattern: enough
/// to reconstruct the entry predicate deterministically via
/// [`Pattern::to_entry_predicate`], without ever serializing a closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub conditions: Vec<PatternCondition>,
    pub direction: Direction,
    pub horizon_ms: i64,
    pub regimes: HashSet<String>,
    pub support: usize,
    pub forward_returns: Vec<f64>,
}

impl Pattern {
    pub fn to_entry_predicate(&self) -> Box<dyn EntryPredicate> {
        Box::new(PatternEntryPredicate { conditions: self.conditions.clone(), direction: self.direction })
    }

    pub fn to_exit_predicate(&self) -> Box<dyn ExitPredicate> {
        Box::new(TimeHorizonOnlyExitPredicate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub mean_return: f64,
    pub std_return: f64,
    pub t_stat: f64,
    pub support: usize,
}

/// `{pattern, testResult}` — stored alongside an `Edge` in the registry so
/// reload (C4) can reconstruct evaluable predicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub pattern: Pattern,
    pub test_result: TestResult,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExpectedAdvantage {
    pub mean: f64,
    pub std: f64,
    pub sharpe: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskProfile {
    pub max_position_pct: f64,
    pub stop_loss_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub enum DecayFunction {
    #[default]
    None,
    Linear {
        half_life_ms: i64,
    },
    Exponential {
        half_life_ms: i64,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EdgeStats {
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_return: f64,
    pub avg_return: f64,
    pub consecutive_losses: u32,
    pub last_updated: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Confidence {
    pub score: f64,
}

impl Default for Confidence {
    fn default() -> Self {
        Self { score: 0.5 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EntryOutcome {
    pub active: bool,
    pub direction: Option<Direction>,
    pub confidence: Option<f64>,
    pub reason: Option<&'static str>,
}

impl EntryOutcome {
    fn inactive(reason: &'static str) -> Self {
        Self { active: false, direction: None, confidence: None, reason: Some(reason) }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExitOutcome {
    pub exit: bool,
    pub reason: Option<&'static str>,
}

/// One realized trade used by `Edge::update_stats` (a trimmed view of the
/// full C7 trade outcome — only the fields the stats update needs).
#[derive(Debug, Clone, Copy)]
pub struct TradeResult {
    pub return_abs: f64,
    pub return_pct: f64,
    pub ts: i64,
}

/// The polymorphic entry predicate.
/// Implementations may fail; a failure is trapped by `Edge::evaluate_entry`
/// and surfaced as `{active:false, reason:'evaluation_error'}` — it is never
/// propagated as a Rust panic or `Result::Err` out of the edge.
pub trait EntryPredicate: fmt::Debug + Send + Sync {
    fn evaluate(&self, features: &HashMap<String, f64>, regime: Option<&str>) -> Result<EntryOutcome, String>;
}

pub trait ExitPredicate: fmt::Debug + Send + Sync {
    fn evaluate(
        &self,
        features: &HashMap<String, f64>,
        regime: Option<&str>,
        entry_ts: i64,
        now_ts: i64,
    ) -> Result<ExitOutcome, String>;
}

#[derive(Debug)]
struct PatternEntryPredicate {
    conditions: Vec<PatternCondition>,
    direction: Direction,
}

impl EntryPredicate for PatternEntryPredicate {
    fn evaluate(&self, features: &HashMap<String, f64>, _regime: Option<&str>) -> Result<EntryOutcome, String> {
        for cond in &self.conditions {
            let value = *features
                .get(&cond.feature)
                .ok_or_else(|| format!("missing feature '{}'", cond.feature))?;
            if !cond.operator.evaluate(value, cond.value) {
                return Ok(EntryOutcome { active: false, direction: None, confidence: None, reason: None });
            }
        }
        Ok(EntryOutcome { active: true, direction: Some(self.direction), confidence: None, reason: None })
    }
}

#[derive(Debug)]
struct TimeHorizonOnlyExitPredicate;

impl ExitPredicate for TimeHorizonOnlyExitPredicate {
    fn evaluate(&self, _features: &HashMap<String, f64>, _regime: Option<&str>, _entry_ts: i64, _now_ts: i64) -> Result<ExitOutcome, String> {
        Ok(ExitOutcome { exit: false, reason: None })
    }
}

/// A reconstructed or freshly discovered market-pattern contract.
#[derive(Debug)]
pub struct Edge {
    pub id: String,
    pub name: String,
    pub regimes: HashSet<String>,
    pub time_horizon_ms: i64,
    pub expected_advantage: ExpectedAdvantage,
    pub risk_profile: RiskProfile,
    pub decay_function: DecayFunction,
    pub status: EdgeStatus,
    pub stats: EdgeStats,
    pub confidence: Confidence,
    pub discovered_at: Option<i64>,
    /// Internal fast-path flag set by `update_stats`; the registry is the
    /// sole authority that flips `status` to `RETIRED` (see DESIGN.md, Open
    /// Question (b)).
    pending_retirement: bool,
    entry_condition: Box<dyn EntryPredicate>,
    exit_condition: Box<dyn ExitPredicate>,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        entry_condition: Box<dyn EntryPredicate>,
        exit_condition: Box<dyn ExitPredicate>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            regimes: HashSet::new(),
            time_horizon_ms: 60_000,
            expected_advantage: ExpectedAdvantage::default(),
            risk_profile: RiskProfile::default(),
            decay_function: DecayFunction::default(),
            status: EdgeStatus::Candidate,
            stats: EdgeStats::default(),
            confidence: Confidence::default(),
            discovered_at: None,
            pending_retirement: false,
            entry_condition,
            exit_condition,
        }
    }

    pub fn evaluate_entry(&self, features: &HashMap<String, f64>, regime: Option<&str>) -> EntryOutcome {
        if !self.regimes.is_empty() {
            if let Some(r) = regime {
                if !self.regimes.contains(r) {
                    return EntryOutcome::inactive("regime_mismatch");
                }
            } else {
                return EntryOutcome::inactive("regime_mismatch");
            }
        }
        if matches!(self.status, EdgeStatus::Retired) {
            return EntryOutcome::inactive("retired");
        }
        match self.entry_condition.evaluate(features, regime) {
            Ok(outcome) => outcome,
            Err(msg) => {
                warn!(edge_id = %self.id, error = %msg, "entry condition evaluation failed");
                EntryOutcome::inactive("evaluation_error")
            }
        }
    }

    pub fn evaluate_exit(&self, features: &HashMap<String, f64>, regime: Option<&str>, entry_ts: i64, now_ts: i64) -> ExitOutcome {
        if now_ts - entry_ts > self.time_horizon_ms {
            return ExitOutcome { exit: true, reason: Some("time_horizon_exceeded") };
        }
        match self.exit_condition.evaluate(features, regime, entry_ts, now_ts) {
            Ok(outcome) => outcome,
            Err(msg) => {
                warn!(edge_id = %self.id, error = %msg, "exit condition evaluation failed");
                ExitOutcome { exit: false, reason: Some("evaluation_error") }
            }
        }
    }

    /// Classifies the trade, updates counters, consecutive-loss streak,
    /// `avg_return`, and `last_updated`. Sets the internal fast-path flag
    /// but does not itself flip `status` — see `EdgeRegistry::retire_underperforming_edges`.
    pub fn update_stats(&mut self, trade: &TradeResult) {
        self.stats.trades += 1;
        if trade.return_abs > 0.0 {
            self.stats.wins += 1;
            self.stats.consecutive_losses = 0;
        } else {
            self.stats.losses += 1;
            self.stats.consecutive_losses += 1;
        }
        self.stats.total_return += trade.return_abs;
        self.stats.avg_return = self.stats.total_return / self.stats.trades as f64;
        self.stats.last_updated = trade.ts;

        self.pending_retirement = self.stats.trades > 50 && self.stats.avg_return < -0.001;
    }

    pub fn pending_retirement(&self) -> bool {
        self.pending_retirement
    }

    pub fn health_score(&self) -> f64 {
        if self.stats.trades == 0 {
            return self.confidence.score;
        }
        let win_rate = self.stats.wins as f64 / self.stats.trades as f64;
        let performance_score = (win_rate * 2.0).clamp(0.0, 1.0);
        let trade_score = (self.stats.trades as f64 / 100.0).min(1.0);
        0.5 * performance_score + 0.3 * self.confidence.score + 0.2 * trade_score
    }

    pub fn should_retire(&self) -> bool {
        if matches!(self.status, EdgeStatus::Retired) {
            return true;
        }
        if self.stats.trades >= 30 && self.stats.avg_return < -0.001 {
            return true;
        }
        if self.stats.trades >= 30 && self.stats.trades < 100 {
            let win_rate = self.stats.wins as f64 / self.stats.trades as f64;
            if win_rate < 0.3 {
                return true;
            }
        }
        self.health_score() < 0.2
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EdgeRegistryStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub total_trades: u64,
    pub avg_health_score: f64,
}

/// `id -> (Edge, EdgeDefinition?)` — owned by a single orchestrator at a
/// time.
#[derive(Debug, Default)]
pub struct EdgeRegistry {
    entries: HashMap<String, (Edge, Option<EdgeDefinition>)>,
}

impl EdgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, edge: Edge, definition: Option<EdgeDefinition>) -> Result<(), EdgeError> {
        if self.entries.contains_key(&edge.id) {
            return Err(EdgeError::DuplicateEdge(edge.id));
        }
        self.entries.insert(edge.id.clone(), (edge, definition));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Edge> {
        self.entries.get(id).map(|(e, _)| e)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Edge> {
        self.entries.get_mut(id).map(|(e, _)| e)
    }

    pub fn get_definition(&self, id: &str) -> Option<&EdgeDefinition> {
        self.entries.get(id).and_then(|(_, d)| d.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Edge)> {
        self.entries.iter().map(|(id, (e, _))| (id, e))
    }

    pub fn get_active_edges(&self, features: &HashMap<String, f64>, regime: Option<&str>) -> Vec<&Edge> {
        self.entries
            .values()
            .map(|(e, _)| e)
            .filter(|e| !matches!(e.status, EdgeStatus::Retired))
            .filter(|e| e.evaluate_entry(features, regime).active)
            .collect()
    }

    pub fn update_edge_stats(&mut self, id: &str, trade: &TradeResult) -> Result<(), EdgeError> {
        let (edge, _) = self.entries.get_mut(id).ok_or_else(|| EdgeError::UnknownEdge(id.to_string()))?;
        edge.update_stats(trade);
        Ok(())
    }

    /// Sole authority for flipping status to `RETIRED` (Open Question (b)).
    pub fn retire_underperforming_edges(&mut self) -> Vec<String> {
        let mut retired = Vec::new();
        for (id, (edge, _)) in self.entries.iter_mut() {
            if !matches!(edge.status, EdgeStatus::Retired) && edge.should_retire() {
                edge.status = EdgeStatus::Retired;
                retired.push(id.clone());
            }
        }
        retired
    }

    pub fn get_stats(&self) -> EdgeRegistryStats {
        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut total_trades = 0u64;
        let mut health_sum = 0.0;
        for (edge, _) in self.entries.values() {
            *by_status.entry(edge.status.to_string()).or_insert(0) += 1;
            total_trades += edge.stats.trades as u64;
            health_sum += edge.health_score();
        }
        let total = self.entries.len();
        EdgeRegistryStats {
            total,
            by_status,
            total_trades,
            avg_health_score: if total == 0 { 0.0 } else { health_sum / total as f64 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always_active_edge(id: &str) -> Edge {
        #[derive(Debug)]
        struct AlwaysActive;
        impl EntryPredicate for AlwaysActive {
            fn evaluate(&self, _features: &HashMap<String, f64>, _regime: Option<&str>) -> Result<EntryOutcome, String> {
                Ok(EntryOutcome { active: true, direction: Some(Direction::Long), confidence: None, reason: None })
            }
        }
        impl ExitPredicate for AlwaysActive {
            fn evaluate(&self, _f: &HashMap<String, f64>, _r: Option<&str>, _e: i64, _n: i64) -> Result<ExitOutcome, String> {
                Ok(ExitOutcome { exit: false, reason: None })
            }
        }
        Edge::new(id, "always-active", Box::new(AlwaysActive), Box::new(AlwaysActive))
    }

    #[test]
    fn e3_auto_retire_via_registry() {
        let mut registry = EdgeRegistry::new();
        let mut edge = always_active_edge("e1");
        edge.status = EdgeStatus::Deployed;
        registry.register(edge, None).unwrap();

        for i in 0..35 {
            registry
                .update_edge_stats("e1", &TradeResult { return_abs: -0.002, return_pct: -0.2, ts: i })
                .unwrap();
        }

        let retired = registry.retire_underperforming_edges();
        assert!(retired.contains(&"e1".to_string()));
        assert!(matches!(registry.get("e1").unwrap().status, EdgeStatus::Retired));
    }

    #[test]
    fn invariant_8_auto_retire_all_losses() {
        let mut edge = always_active_edge("e8");
        edge.status = EdgeStatus::Deployed;
        for i in 0..60 {
            edge.update_stats(&TradeResult { return_abs: -0.002, return_pct: -0.2, ts: i });
        }
        assert!(edge.should_retire());
    }

    #[test]
    fn retired_edge_is_inactive_for_entry() {
        let mut edge = always_active_edge("e2");
        edge.status = EdgeStatus::Retired;
        let outcome = edge.evaluate_entry(&HashMap::new(), None);
        assert!(!outcome.active);
        assert_eq!(outcome.reason, Some("retired"));
    }

    #[test]
    fn regime_mismatch_short_circuits_before_entry_condition() {
        let mut edge = always_active_edge("e3");
        edge.regimes.insert("trend_up".to_string());
        let outcome = edge.evaluate_entry(&HashMap::new(), Some("trend_down"));
        assert!(!outcome.active);
        assert_eq!(outcome.reason, Some("regime_mismatch"));
    }

    #[test]
    fn pattern_predicate_requires_all_conditions() {
        let pattern = Pattern {
            conditions: vec![
                PatternCondition { feature: "f_imbalance".to_string(), operator: Operator::Gt, value: 0.2 },
                PatternCondition { feature: "f_vol_10s".to_string(), operator: Operator::Lt, value: 0.01 },
            ],
            direction: Direction::Long,
            horizon_ms: 10_000,
            regimes: HashSet::new(),
            support: 50,
            forward_returns: vec![0.001, 0.002],
        };
        let predicate = pattern.to_entry_predicate();
        let mut features = HashMap::new();
        features.insert("f_imbalance".to_string(), 0.3);
        features.insert("f_vol_10s".to_string(), 0.02);
        let outcome = predicate.evaluate(&features, None).unwrap();
        assert!(!outcome.active);

        features.insert("f_vol_10s".to_string(), 0.005);
        let outcome = predicate.evaluate(&features, None).unwrap();
        assert!(outcome.active);
        assert_eq!(outcome.direction, Some(Direction::Long));
    }
}
