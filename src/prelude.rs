//! Convenience re-export of the types most callers reach for first.

// Domain primitives
pub use crate::domain::{BboEvent, EventKey, Price, Qty, Seq, TsEventNanos};

// Errors
pub use crate::error::{
    DiscoveryError, EdgeCoreError, EdgeCoreResult, EdgeError, FeatureError, IoError, LearningError, ReplayError,
};

// C1-C2: feature computation
pub use crate::feature_builder_v1::FeatureBuilderV1;
pub use crate::feature_registry::{FeatureBuilder, FeatureRegistry, FeatureRegistryConfig};
pub use crate::feature_vector::FeatureVectorV1;

// C3-C5: edges
pub use crate::discovery::{DiscoveryConfig, EdgeDiscoveryPipeline};
pub use crate::edge::{Edge, EdgeRegistry, EdgeStatus, Operator, Pattern, PatternCondition};
pub use crate::edge_serializer::EdgeSerializer;

// C7-C12: closed-loop learning
pub use crate::confidence::{ConfidenceConfig, EdgeConfidenceUpdater};
pub use crate::importance::{FeatureImportanceTracker, ImportanceConfig};
pub use crate::outcomes::{OutcomeCollectorConfig, TradeOutcome, TradeOutcomeCollector};
pub use crate::refinement::{BehaviorRefinementEngine, EdgeRefinementInput, ProposalKind, RefinementConfig, RefinementProposal};
pub use crate::revalidation::{EdgeRevalidationRunner, RevalidationConfig};
pub use crate::scheduler::{LearningScheduler, SchedulerConfig};

// C13-C14: gate, replay, composition root
pub use crate::context::{EdgeCoreConfig, EdgeCoreContext};
pub use crate::gate::{evaluate_decision, Decision, GateResult, GateState, PolicySnapshot};
pub use crate::replay::{ReplayRunner, RunConfig, RunState, StrategyContext};
