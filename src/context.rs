//! C14 evaluation context facade — not a standalone component of its own,
//! but the in-process composition root that wires the streaming feature
//! registry, the edge registry, the evaluation gate, and the closed-loop
//! learning collaborators together from constructor-injected config.
//! Analogous to how the teacher's `gym::trading::factory::{make, load}`
//! assembles an `Environment` from injected config without itself being
//! a CLI or owning any I/O.

use std::path::PathBuf;

use crate::confidence::{ConfidenceConfig, EdgeConfidenceUpdater};
use crate::edge::EdgeRegistry;
use crate::error::EdgeCoreResult;
use crate::feature_registry::{FeatureBuilder, FeatureRegistry, FeatureRegistryConfig};
use crate::importance::{FeatureImportanceTracker, ImportanceConfig};
use crate::outcomes::{OutcomeCollectorConfig, TradeOutcomeCollector};
use crate::refinement::{BehaviorRefinementEngine, RefinementConfig};
use crate::revalidation::{EdgeRevalidationRunner, RevalidationConfig};
use crate::scheduler::{LearningScheduler, SchedulerConfig};

/// The complete set of configuration a caller supplies up front; nothing
/// in this crate reaches for environment variables or ambient global state.
#[derive(Debug, Clone)]
pub struct EdgeCoreConfig {
    pub symbol: String,
    pub feature_registry: FeatureRegistryConfig,
    pub outcomes: OutcomeCollectorConfig,
    pub confidence: ConfidenceConfig,
    pub revalidation: RevalidationConfig,
    pub importance: ImportanceConfig,
    pub refinement: RefinementConfig,
    pub refinement_history_size: usize,
    pub scheduler_output_dir: PathBuf,
}

/// Owns one feature builder, one edge registry, and the learning
/// subsystem's collaborators for a single symbol. Holds no file handles
/// beyond what `TradeOutcomeCollector` opens for its current segment.
pub struct EdgeCoreContext {
    pub feature_builder: FeatureBuilder,
    pub edge_registry: EdgeRegistry,
    pub outcome_collector: TradeOutcomeCollector,
    pub confidence_updater: EdgeConfidenceUpdater,
    pub importance_tracker: FeatureImportanceTracker,
    pub refinement_engine: BehaviorRefinementEngine,
    pub scheduler: LearningScheduler,
}

impl EdgeCoreContext {
    pub fn build(config: &EdgeCoreConfig, now_ms: i64, now_iso: &str) -> EdgeCoreResult<Self> {
        let feature_builder = FeatureRegistry.create_feature_builder(config.symbol.clone(), &config.feature_registry)?;
        let outcome_collector = TradeOutcomeCollector::new(config.outcomes.clone(), now_ms, now_iso)?;
        let scheduler_config = SchedulerConfig {
            output_dir: config.scheduler_output_dir.clone(),
            confidence: config.confidence.clone(),
            importance: config.importance.clone(),
            refinement: config.refinement.clone(),
        };
        let scheduler = LearningScheduler::new(scheduler_config, EdgeRevalidationRunner::new(config.revalidation.clone()));

        Ok(Self {
            feature_builder,
            edge_registry: EdgeRegistry::new(),
            outcome_collector,
            confidence_updater: EdgeConfidenceUpdater::new(),
            importance_tracker: FeatureImportanceTracker::new(),
            refinement_engine: BehaviorRefinementEngine::new(config.refinement_history_size),
            scheduler,
        })
    }

    /// The revalidation runner actually used by this context's scheduler.
    pub fn revalidation_runner(&self) -> &EdgeRevalidationRunner {
        self.scheduler.revalidation_runner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn build_wires_all_collaborators_from_injected_config() {
        let dir = tempdir().unwrap();
        let config = EdgeCoreConfig {
            symbol: "BTCUSDT".to_string(),
            feature_registry: FeatureRegistryConfig { enabled_features: vec!["mid_price".to_string()], params: Default::default() },
            outcomes: OutcomeCollectorConfig { log_dir: dir.path().join("outcomes"), ..Default::default() },
            confidence: ConfidenceConfig::default(),
            revalidation: RevalidationConfig::default(),
            importance: ImportanceConfig::default(),
            refinement: RefinementConfig::default(),
            refinement_history_size: 10,
            scheduler_output_dir: dir.path().join("scheduler"),
        };

        let ctx = EdgeCoreContext::build(&config, 0, "1970-01-01T00-00-00Z").unwrap();
        assert_eq!(ctx.feature_builder.symbol(), "BTCUSDT");
        assert!(ctx.edge_registry.iter().next().is_none());
    }
}
