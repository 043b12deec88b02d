//! C13 — Evaluation Gate: a pure, fail-fast rule chain over
//! a `Decision` and a `PolicySnapshot`. Rules run in fixed order and the
//! first hit wins — this ordering is load-bearing so it is
//! expressed as a straight-line sequence of early returns, not a table the
//! implementer could accidentally reorder.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    pub side: Side,
    pub confidence: f64,
    pub risk: f64,
    pub ts_valid_until: i64,
    pub policy_version: u32,
}

/// Immutable map of rule parameters valid at a point in time. A result
/// clones it for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub min_confidence: f64,
    pub blocked_symbols: HashSet<String>,
    pub allowed_sides: HashSet<Side>,
    pub risk_cap: f64,
    pub cooldown_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateVerdict {
    Accepted,
    Rejected,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateReason {
    TimeExpired,
    LowConfidence,
    PolicyViolation,
    Cooldown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub verdict: GateVerdict,
    pub reason: Option<GateReason>,
    pub policy_snapshot: PolicySnapshot,
    pub policy_version: u32,
}

/// Tracks the last accepted decision's `ts_valid_until`-independent
/// acceptance time per `(symbol, side)`, which the cooldown rule consults.
#[derive(Debug, Default)]
pub struct GateState {
    last_accepted_at: std::collections::HashMap<(String, Side), i64>,
}

impl GateState {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(symbol: &str, side: Side) -> (String, Side) {
        (symbol.to_string(), side)
    }

    pub fn record_accepted(&mut self, symbol: &str, side: Side, now: i64) {
        self.last_accepted_at.insert(Self::key(symbol, side), now);
    }
}

pub fn evaluate_decision(decision: &Decision, policy: &PolicySnapshot, state: &GateState, now: i64) -> GateResult {
    let result = |verdict: GateVerdict, reason: Option<GateReason>| GateResult {
        verdict,
        reason,
        policy_snapshot: policy.clone(),
        policy_version: decision.policy_version,
    };

    if decision.ts_valid_until < now {
        return result(GateVerdict::Rejected, Some(GateReason::TimeExpired));
    }

    if decision.confidence < policy.min_confidence {
        return result(GateVerdict::Rejected, Some(GateReason::LowConfidence));
    }

    if policy.blocked_symbols.contains(&decision.symbol) || !policy.allowed_sides.contains(&decision.side) || decision.risk > policy.risk_cap {
        return result(GateVerdict::Rejected, Some(GateReason::PolicyViolation));
    }

    let key = GateState::key(&decision.symbol, decision.side);
    if let Some(&last) = state.last_accepted_at.get(&key) {
        if now - last < policy.cooldown_ms {
            return result(GateVerdict::Skipped, Some(GateReason::Cooldown));
        }
    }

    result(GateVerdict::Accepted, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PolicySnapshot {
        PolicySnapshot {
            min_confidence: 0.6,
            blocked_symbols: HashSet::new(),
            allowed_sides: HashSet::from([Side::Buy, Side::Sell]),
            risk_cap: 1.0,
            cooldown_ms: 5_000,
        }
    }

    fn decision(now: i64) -> Decision {
        Decision {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            confidence: 0.9,
            risk: 0.1,
            ts_valid_until: now + 1_000,
            policy_version: 1,
        }
    }

    #[test]
    fn e6_validity_checked_before_confidence() {
        let now = 10_000;
        let mut d = decision(now);
        d.ts_valid_until = now - 1;
        d.confidence = 0.1;
        let result = evaluate_decision(&d, &policy(), &GateState::new(), now);
        assert_eq!(result.verdict, GateVerdict::Rejected);
        assert_eq!(result.reason, Some(GateReason::TimeExpired));
    }

    #[test]
    fn cooldown_skips_repeat_decision() {
        let now = 10_000;
        let mut state = GateState::new();
        state.record_accepted("BTCUSDT", Side::Buy, now - 100);
        let result = evaluate_decision(&decision(now), &policy(), &state, now);
        assert_eq!(result.verdict, GateVerdict::Skipped);
        assert_eq!(result.reason, Some(GateReason::Cooldown));
    }

    #[test]
    fn accepted_when_all_rules_pass() {
        let now = 10_000;
        let result = evaluate_decision(&decision(now), &policy(), &GateState::new(), now);
        assert_eq!(result.verdict, GateVerdict::Accepted);
        assert_eq!(result.policy_version, 1);
    }
}
