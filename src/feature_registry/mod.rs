//! C2 — Streaming Feature Registry.
//!
//! `FeatureRegistry::create_feature_builder(symbol, config)` resolves the
//! enabled feature set into a DAG, topologically sorts it (Kahn's
//! algorithm — unknown dependencies and cycles fail at construction, never
//! at runtime), and returns a [`FeatureBuilder`] that folds one [`BboEvent`]
//! at a time into a full feature vector once every enabled feature has
//! produced a value.

pub mod operators;

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::domain::BboEvent;
use crate::error::{EdgeCoreResult, FeatureError};

/// A streaming operator driven directly by raw events (the reference
/// operators: `MidPrice`, `Spread`, `EMA`, `RSI`, ...).
pub trait StreamingFeature: std::fmt::Debug + Send + Sync {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64>;
    fn reset(&mut self);
}

/// A feature computed from the already-resolved values of its declared
/// dependencies rather than from raw events (`BehaviorDivergence`,
/// `VolatilityCompressionScore`). The registry only invokes `compute` once
/// every dependency has produced `Some` value for the current event.
pub trait DerivedFeature: std::fmt::Debug + Send + Sync {
    fn dependencies(&self) -> &[&'static str];
    fn compute(&mut self, resolved_deps: &[f64]) -> Option<f64>;
    fn reset(&mut self);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureParams {
    pub period: Option<u32>,
    pub window_size: Option<u32>,
    pub short_window: Option<u32>,
    pub long_window: Option<u32>,
    pub k: Option<f64>,
    pub lookback: Option<u32>,
    pub low_threshold: Option<f64>,
    pub high_threshold: Option<f64>,
    pub slope_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureRegistryConfig {
    pub enabled_features: Vec<String>,
    #[serde(default)]
    pub params: HashMap<String, FeatureParams>,
}

impl FeatureRegistryConfig {
    fn params_for(&self, name: &str) -> FeatureParams {
        self.params.get(name).cloned().unwrap_or_default()
    }
}

enum FeatureNode {
    Raw(Box<dyn StreamingFeature>),
    Derived(Box<dyn DerivedFeature>),
}

fn build_node(name: &str, params: &FeatureParams) -> EdgeCoreResult<FeatureNode> {
    use operators::*;

    Ok(match name {
        "mid_price" => FeatureNode::Raw(Box::new(MidPrice)),
        "spread" => FeatureNode::Raw(Box::new(Spread)),
        "microprice" => FeatureNode::Raw(Box::new(Microprice)),
        "imbalance" => FeatureNode::Raw(Box::new(ImbalanceRaw)),
        "return_1" => FeatureNode::Raw(Box::new(Return1::default())),
        "volatility" => FeatureNode::Raw(Box::new(Volatility::new(params))),
        "ema" => FeatureNode::Raw(Box::new(Ema::new(params))),
        "rsi" => FeatureNode::Raw(Box::new(Rsi::new(params))),
        "atr" => FeatureNode::Raw(Box::new(Atr::new(params))),
        "roc" => FeatureNode::Raw(Box::new(Roc::new(params))),
        "volatility_regime" => FeatureNode::Raw(Box::new(VolatilityRegime::new(params))),
        "trend_regime" => FeatureNode::Raw(Box::new(TrendRegime::new(params))),
        "spread_regime" => FeatureNode::Raw(Box::new(SpreadRegime::new(params))),
        "imbalance_ema" => FeatureNode::Raw(Box::new(ImbalanceEma::new(params))),
        "ema_slope" => FeatureNode::Raw(Box::new(EmaSlope::new(params))),
        "bollinger_position" => FeatureNode::Raw(Box::new(BollingerPosition::new(params))),
        "liquidity_pressure" => FeatureNode::Raw(Box::new(LiquidityPressure::new(params))),
        "return_momentum" => FeatureNode::Raw(Box::new(ReturnMomentum::new(params))),
        "regime_stability" => FeatureNode::Raw(Box::new(RegimeStability::new(params))),
        "spread_compression" => FeatureNode::Raw(Box::new(SpreadCompression::new(params))),
        "imbalance_acceleration" => FeatureNode::Raw(Box::new(ImbalanceAcceleration::default())),
        "micro_reversion" => FeatureNode::Raw(Box::new(MicroReversion)),
        "quote_intensity" => FeatureNode::Raw(Box::new(QuoteIntensity::new(params))),
        "behavior_divergence" => FeatureNode::Derived(Box::new(BehaviorDivergence)),
        "volatility_compression_score" => FeatureNode::Derived(Box::new(VolatilityCompressionScore)),
        other => {
            return Err(FeatureError::InvalidConfig {
                feature: other.to_string(),
                msg: "unknown feature name".to_string(),
            }
            .into())
        }
    })
}

/// Stateless factory for [`FeatureBuilder`]s: `create_feature_builder(symbol,
/// config) -> Builder`.
#[derive(Debug, Default)]
pub struct FeatureRegistry;

impl FeatureRegistry {
    pub fn create_feature_builder(&self, symbol: impl Into<String>, config: &FeatureRegistryConfig) -> EdgeCoreResult<FeatureBuilder> {
        let order = topological_order(config)?;

        let mut nodes = Vec::with_capacity(order.len());
        for name in &order {
            let params = config.params_for(name);
            nodes.push((name.clone(), build_node(name, &params)?));
        }

        Ok(FeatureBuilder { symbol: symbol.into(), nodes, order })
    }
}

/// Resolves `config.enabled_features` into a dependency-respecting
/// construction order via Kahn's algorithm. Raw features have no
/// dependencies; derived features declare theirs via
/// [`DerivedFeature::dependencies`]. A dependency outside the enabled set,
/// or a cycle, fails here — never mid-stream.
fn topological_order(config: &FeatureRegistryConfig) -> EdgeCoreResult<Vec<String>> {
    let enabled: Vec<String> = config.enabled_features.clone();
    let enabled_set: std::collections::HashSet<&str> = enabled.iter().map(String::as_str).collect();

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for name in &enabled {
        in_degree.entry(name.as_str()).or_insert(0);
    }

    for name in &enabled {
        let params = FeatureParams::default();
        let deps: Vec<&'static str> = match build_node(name, &params)? {
            FeatureNode::Raw(_) => Vec::new(),
            FeatureNode::Derived(d) => d.dependencies().to_vec(),
        };
        for dep in deps {
            if !enabled_set.contains(dep) {
                return Err(FeatureError::UnknownDependency(name.clone(), dep.to_string()).into());
            }
            dependents.entry(dep).or_default().push(name.as_str());
            *in_degree.entry(name.as_str()).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&name, _)| name)
        .collect();
    // Deterministic order: process the enabled list in declared order among ready nodes.
    queue.make_contiguous().sort_by_key(|n| enabled.iter().position(|e| e == n));

    let mut order = Vec::with_capacity(enabled.len());
    let mut in_degree = in_degree;
    while let Some(name) = queue.pop_front() {
        order.push(name.to_string());
        if let Some(deps) = dependents.get(name) {
            for &next in deps {
                let deg = in_degree.get_mut(next).expect("in_degree tracked for every enabled feature");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(next);
                }
            }
        }
        queue.make_contiguous().sort_by_key(|n| enabled.iter().position(|e| e == n));
    }

    if order.len() != enabled.len() {
        let stuck = enabled.iter().find(|n| !order.contains(n)).cloned().unwrap_or_default();
        return Err(FeatureError::Cycle(stuck).into());
    }

    Ok(order)
}

/// Per-symbol streaming builder returned by [`FeatureRegistry`]. Call
/// [`FeatureBuilder::on_event`] once per event, in `(ts_event, seq)` order.
#[derive(Debug)]
pub struct FeatureBuilder {
    symbol: String,
    nodes: Vec<(String, FeatureNode)>,
    order: Vec<String>,
}

impl FeatureBuilder {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn feature_names(&self) -> &[String] {
        &self.order
    }

    /// Folds one event into the builder's state. Returns `Some(vector)`
    /// only once every enabled feature has produced a non-null value for
    /// this event; otherwise `None`.
    pub fn on_event(&mut self, event: &BboEvent) -> Option<HashMap<String, f64>> {
        let mut resolved: HashMap<String, f64> = HashMap::with_capacity(self.nodes.len());

        for (name, node) in &mut self.nodes {
            let value = match node {
                FeatureNode::Raw(f) => f.on_event(event),
                FeatureNode::Derived(d) => {
                    let deps = d.dependencies();
                    let mut dep_values = Vec::with_capacity(deps.len());
                    let mut all_present = true;
                    for dep in deps {
                        match resolved.get(*dep) {
                            Some(&v) => dep_values.push(v),
                            None => {
                                all_present = false;
                                break;
                            }
                        }
                    }
                    if all_present {
                        d.compute(&dep_values)
                    } else {
                        None
                    }
                }
            };
            match value {
                Some(v) => {
                    resolved.insert(name.clone(), v);
                }
                None => return None,
            }
        }

        Some(resolved)
    }

    pub fn reset(&mut self) {
        for (_, node) in &mut self.nodes {
            match node {
                FeatureNode::Raw(f) => f.reset(),
                FeatureNode::Derived(d) => d.reset(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Price, Qty, Seq, TsEventNanos};

    fn evt(ts_ms: i64, bid: f64, ask: f64) -> BboEvent {
        BboEvent {
            ts_event: TsEventNanos(ts_ms * 1_000_000),
            seq: Seq(0),
            bid_price: Price(bid),
            ask_price: Price(ask),
            bid_qty: Qty(10.0),
            ask_qty: Qty(8.0),
            symbol: "BTCUSDT".into(),
        }
    }

    #[test]
    fn unknown_dependency_fails_at_construction() {
        let config = FeatureRegistryConfig {
            enabled_features: vec!["behavior_divergence".to_string()],
            params: HashMap::new(),
        };
        let err = FeatureRegistry.create_feature_builder("BTCUSDT", &config);
        assert!(err.is_err());
    }

    #[test]
    fn simple_raw_features_emit_immediately() {
        let config = FeatureRegistryConfig {
            enabled_features: vec!["mid_price".to_string(), "spread".to_string()],
            params: HashMap::new(),
        };
        let mut builder = FeatureRegistry.create_feature_builder("BTCUSDT", &config).unwrap();
        let vector = builder.on_event(&evt(0, 100.0, 100.2)).unwrap();
        assert_eq!(vector["mid_price"], 100.1);
        assert_eq!(vector["spread"], 0.2_f64);
    }

    #[test]
    fn derived_feature_resolves_after_dependencies_warm() {
        let config = FeatureRegistryConfig {
            enabled_features: vec![
                "trend_regime".to_string(),
                "imbalance_ema".to_string(),
                "behavior_divergence".to_string(),
            ],
            params: HashMap::from([
                ("trend_regime".to_string(), FeatureParams { short_window: Some(2), long_window: Some(3), ..Default::default() }),
                ("imbalance_ema".to_string(), FeatureParams { period: Some(2), ..Default::default() }),
            ]),
        };
        let mut builder = FeatureRegistry.create_feature_builder("BTCUSDT", &config).unwrap();
        let mut last = None;
        for i in 0..10 {
            last = builder.on_event(&evt(i * 1000, 100.0 + i as f64 * 0.01, 100.2 + i as f64 * 0.01));
        }
        let vector = last.expect("should be warm after 10 events");
        assert!(vector.contains_key("behavior_divergence"));
        assert!((-1.0..=1.0).contains(&vector["behavior_divergence"]));
    }

    #[test]
    fn reset_clears_warm_state() {
        let config = FeatureRegistryConfig {
            enabled_features: vec!["return_1".to_string()],
            params: HashMap::new(),
        };
        let mut builder = FeatureRegistry.create_feature_builder("BTCUSDT", &config).unwrap();
        assert!(builder.on_event(&evt(0, 100.0, 100.2)).is_none());
        assert!(builder.on_event(&evt(1000, 101.0, 101.2)).is_some());
        builder.reset();
        assert!(builder.on_event(&evt(2000, 102.0, 102.2)).is_none());
    }
}
