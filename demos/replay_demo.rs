//! End-to-end smoke run: discover a candidate edge from synthetic BBO
//! history, persist the registry, then replay a handful of events through
//! it with a trivial strategy. Run with `cargo run --example replay_demo`.

use std::collections::HashMap;

use anyhow::{Context, Result};
use edge_core::discovery::DiscoveryRow;
use edge_core::domain::{BboEvent, Price, Qty, Seq, TsEventNanos};
use edge_core::prelude::*;
use edge_core::replay::{EventErrorPolicy, OrderContext, OrderRequest, OrderSide, OrderingPolicy, ReplayRunner, RunConfig, StrategyContext};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let rows = synthetic_rows(300);
    let config = DiscoveryConfig { threshold_features: vec!["f_imbalance".to_string()], min_support: 20, ..Default::default() };

    let mut registry = EdgeRegistry::new();
    let report = EdgeDiscoveryPipeline::run(&rows, &config, &mut registry)?;
    info!(candidates = report.edge_candidates_registered, "discovery finished");

    let out_dir = std::env::temp_dir().join("edge-core-demo");
    std::fs::create_dir_all(&out_dir).context("creating demo output directory")?;
    let registry_path = out_dir.join("edges.json");
    EdgeSerializer::write_atomic(&registry, &registry_path, 1_000)?;
    info!(path = %registry_path.display(), "registry persisted");

    let run_config = RunConfig {
        seed: 7,
        dataset_id: "demo-dataset".to_string(),
        strategy_id: "buy-on-positive-imbalance".to_string(),
        version: "v1".to_string(),
        strategy_config: serde_json::json!({"threshold": 0.5}),
        ordering_policy: OrderingPolicy::Strict,
        error_policy: EventErrorPolicy::SkipAndLog,
    };
    let mut runner = ReplayRunner::new(run_config)?;
    runner.initialize()?;
    runner.start()?;

    let mut strategy = BuyOnPositiveImbalance;
    for (i, event) in synthetic_events(20).iter().enumerate() {
        let mut features = HashMap::new();
        features.insert("f_imbalance".to_string(), if i % 3 == 0 { 0.8 } else { -0.2 });
        runner.on_event(event, &features, &mut strategy)?;
    }
    runner.finalize()?;

    let snapshot = runner.snapshot(&strategy);
    info!(run_id = %runner.run_id(), fills = snapshot.execution.fills, fills_hash = %snapshot.fills_hash, "replay finished");
    Ok(())
}

fn synthetic_rows(n: usize) -> Vec<DiscoveryRow> {
    (0..n)
        .map(|i| {
            let imbalance = if i % 3 == 0 { 0.8 } else { -0.2 };
            let mut features = HashMap::new();
            features.insert("f_imbalance".to_string(), imbalance);
            features.insert("f_spread_bps".to_string(), 1.5);
            DiscoveryRow { features, forward_return: if imbalance > 0.5 { 0.002 } else { -0.0001 }, regime: None }
        })
        .collect()
}

fn synthetic_events(n: usize) -> Vec<BboEvent> {
    (0..n)
        .map(|i| BboEvent {
            ts_event: TsEventNanos(i as i64 * 1_000_000),
            seq: Seq(i as i64),
            bid_price: Price(100.0 - 0.01),
            ask_price: Price(100.0 + 0.01),
            bid_qty: Qty(1.0),
            ask_qty: Qty(1.0),
            symbol: "BTCUSDT".to_string(),
        })
        .collect()
}

struct BuyOnPositiveImbalance;
impl StrategyContext for BuyOnPositiveImbalance {
    fn on_event(&mut self, _event: &BboEvent, features: &HashMap<String, f64>, ctx: &mut OrderContext) -> Result<(), String> {
        if features.get("f_imbalance").copied().unwrap_or(0.0) > 0.5 {
            ctx.place_order(OrderRequest { side: OrderSide::Buy, qty: 1.0 });
        }
        Ok(())
    }
}
