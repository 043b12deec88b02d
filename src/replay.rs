//! C14 — Deterministic Replay Runner: drives a strategy over an ordered
//! `BboEvent` stream through an explicit lifecycle state machine, enforces
//! the `(ts_event, seq)` total order from `domain.rs`, and derives a
//! reproducible `run_id` from the run's seed/dataset/strategy/config the
//! same way `feature_builder_v1.rs` hashes its own config for determinism.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum_macros::Display;
use tracing::warn;

use crate::domain::BboEvent;
use crate::error::{EdgeCoreResult, ReplayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum RunState {
    Created,
    Initializing,
    Ready,
    Running,
    Paused,
    Finalizing,
    Done,
    Failed,
    Canceled,
}

impl RunState {
    /// The finite set of legal next states for each state, per the run
    /// lifecycle: `CREATED -> INITIALIZING -> READY -> RUNNING ->
    /// (PAUSED <-> RUNNING) -> FINALIZING -> (DONE | FAILED | CANCELED)`,
    /// with `FAILED`/`CANCELED` reachable directly from any in-flight state.
    fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Created, Initializing) => true,
            (Initializing, Ready) => true,
            (Ready, Running) => true,
            (Running, Paused) => true,
            (Paused, Running) => true,
            (Running, Finalizing) => true,
            (Finalizing, Done) => true,
            (_, Failed) | (_, Canceled) => !matches!(self, Done | Failed | Canceled),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderingPolicy {
    /// Abort the run on the first out-of-order event.
    Strict,
    /// Log and drop the offending event, continue the run.
    Warn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventErrorPolicy {
    FailFast,
    SkipAndLog,
    Quarantine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub seed: u64,
    pub dataset_id: String,
    pub strategy_id: String,
    pub version: String,
    pub strategy_config: serde_json::Value,
    pub ordering_policy: OrderingPolicy,
    pub error_policy: EventErrorPolicy,
}

/// Derives a reproducible run id from the fields that fully determine a
/// run's outcome. Two runs with identical `RunConfig`s get identical ids.
pub fn run_id(config: &RunConfig) -> EdgeCoreResult<String> {
    let basis = serde_json::json!({
        "seed": config.seed,
        "dataset_id": config.dataset_id,
        "strategy_id": config.strategy_id,
        "version": config.version,
        "config": config.strategy_config,
    });
    let bytes = serde_json::to_vec(&basis).map_err(crate::error::IoError::Json)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub side: OrderSide,
    pub qty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillResult {
    pub ts_event: i64,
    pub seq: i64,
    pub side_is_buy: bool,
    pub qty: f64,
    pub price: f64,
}

/// What the strategy sees and can act on for each inbound event. `place_order`
/// fills immediately at the current mid — this runner models execution
/// determinism, not market-impact realism.
pub struct OrderContext<'a> {
    event: &'a BboEvent,
    fills: &'a mut Vec<FillResult>,
}

impl<'a> OrderContext<'a> {
    pub fn place_order(&mut self, order: OrderRequest) -> FillResult {
        let fill = FillResult {
            ts_event: self.event.ts_event.0,
            seq: self.event.seq.0,
            side_is_buy: matches!(order.side, OrderSide::Buy),
            qty: order.qty,
            price: self.event.mid(),
        };
        self.fills.push(fill.clone());
        fill
    }
}

/// Strategy hook invoked once per admitted event, with the resolved feature
/// vector for that event (empty if no feature registry was attached). An
/// `Err` is handled per the run's `EventErrorPolicy` rather than aborting
/// unconditionally.
pub trait StrategyContext: Send {
    fn on_event(&mut self, event: &BboEvent, features: &HashMap<String, f64>, ctx: &mut OrderContext) -> Result<(), String>;
    /// Opaque, serializable strategy-internal state captured into snapshots.
    fn state(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub events_processed: u64,
    pub events_skipped: u64,
    pub fills: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySnapshot {
    pub run_id: String,
    pub state: RunState,
    pub cursor: Option<(i64, i64)>,
    pub execution: ExecutionState,
    pub strategy_state: serde_json::Value,
    /// SHA-256 over the ordered fill sequence so two runs that produced the
    /// same fills in the same order hash identically.
    pub fills_hash: String,
}

pub struct ReplayRunner {
    config: RunConfig,
    run_id: String,
    state: RunState,
    last_key: Option<(i64, i64)>,
    fills: Vec<FillResult>,
    execution: ExecutionState,
}

impl ReplayRunner {
    pub fn new(config: RunConfig) -> EdgeCoreResult<Self> {
        let run_id = run_id(&config)?;
        Ok(Self {
            config,
            run_id,
            state: RunState::Created,
            last_key: None,
            fills: Vec::new(),
            execution: ExecutionState { events_processed: 0, events_skipped: 0, fills: 0 },
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) -> EdgeCoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ReplayError::InvalidTransition { from: self.state.to_string(), to: next.to_string() }.into());
        }
        self.state = next;
        Ok(())
    }

    pub fn initialize(&mut self) -> EdgeCoreResult<()> {
        self.transition(RunState::Initializing)?;
        self.transition(RunState::Ready)
    }

    pub fn start(&mut self) -> EdgeCoreResult<()> {
        self.transition(RunState::Running)
    }

    pub fn pause(&mut self) -> EdgeCoreResult<()> {
        self.transition(RunState::Paused)
    }

    pub fn resume(&mut self) -> EdgeCoreResult<()> {
        self.transition(RunState::Running)
    }

    pub fn cancel(&mut self) -> EdgeCoreResult<()> {
        self.transition(RunState::Canceled)
    }

    /// Feeds one event through ordering enforcement and the strategy. Must
    /// be called while `RUNNING`.
    pub fn on_event(
        &mut self,
        event: &BboEvent,
        features: &HashMap<String, f64>,
        strategy: &mut dyn StrategyContext,
    ) -> EdgeCoreResult<()> {
        if self.state != RunState::Running {
            return Err(ReplayError::InvalidTransition { from: self.state.to_string(), to: "RUNNING (event ingestion)".to_string() }.into());
        }

        let key = (event.ts_event.0, event.seq.0);
        if let Some(prev) = self.last_key {
            if key <= prev {
                let violation = ReplayError::OrderingViolation { prev_ts: prev.0, prev_seq: prev.1, ts: key.0, seq: key.1 };
                match self.config.ordering_policy {
                    OrderingPolicy::Strict => {
                        self.state = RunState::Failed;
                        return Err(violation.into());
                    }
                    OrderingPolicy::Warn => {
                        warn!(prev_ts = prev.0, prev_seq = prev.1, ts = key.0, seq = key.1, "dropping out-of-order replay event");
                        self.execution.events_skipped += 1;
                        return Ok(());
                    }
                }
            }
        }
        self.last_key = Some(key);

        let mut ctx = OrderContext { event, fills: &mut self.fills };
        let result = strategy.on_event(event, features, &mut ctx);

        match result {
            Ok(()) => {
                self.execution.events_processed += 1;
                self.execution.fills = self.fills.len();
                Ok(())
            }
            Err(msg) => match self.config.error_policy {
                EventErrorPolicy::FailFast => {
                    self.state = RunState::Failed;
                    Err(ReplayError::Construction(format!("strategy error on event ({}, {}): {msg}", key.0, key.1)).into())
                }
                EventErrorPolicy::SkipAndLog => {
                    warn!(ts = key.0, seq = key.1, error = %msg, "strategy error on event, skipping");
                    self.execution.events_skipped += 1;
                    Ok(())
                }
                EventErrorPolicy::Quarantine => {
                    warn!(ts = key.0, seq = key.1, error = %msg, "strategy error on event, quarantining and continuing");
                    self.execution.events_skipped += 1;
                    Ok(())
                }
            },
        }
    }

    pub fn finalize(&mut self) -> EdgeCoreResult<()> {
        self.transition(RunState::Finalizing)?;
        self.transition(RunState::Done)
    }

    pub fn snapshot(&self, strategy: &dyn StrategyContext) -> ReplaySnapshot {
        ReplaySnapshot {
            run_id: self.run_id.clone(),
            state: self.state,
            cursor: self.last_key,
            execution: self.execution.clone(),
            strategy_state: strategy.state(),
            fills_hash: hash_fills(&self.fills),
        }
    }

    pub fn fills(&self) -> &[FillResult] {
        &self.fills
    }
}

fn hash_fills(fills: &[FillResult]) -> String {
    let mut hasher = Sha256::new();
    for fill in fills {
        hasher.update(fill.ts_event.to_le_bytes());
        hasher.update(fill.seq.to_le_bytes());
        hasher.update([fill.side_is_buy as u8]);
        hasher.update(fill.qty.to_le_bytes());
        hasher.update(fill.price.to_le_bytes());
    }
    hex_encode(&hasher.finalize())
}
