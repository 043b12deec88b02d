use thiserror::Error;

pub type EdgeCoreResult<T> = Result<T, EdgeCoreError>;

#[derive(Debug, Error)]
pub enum EdgeCoreError {
    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Edge(#[from] EdgeError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Learning(#[from] LearningError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Errors raised while constructing or composing streaming feature operators (C2).
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("feature dependency cycle detected starting at '{0}'")]
    Cycle(String),

    #[error("feature '{0}' depends on unknown feature '{1}'")]
    UnknownDependency(String, String),

    #[error("feature '{0}' is registered more than once")]
    DuplicateFeature(String),

    #[error("invalid configuration for feature '{feature}': {msg}")]
    InvalidConfig { feature: String, msg: String },
}

/// Errors related to the edge registry and its serialized form (C3/C4).
#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("unknown edge id: {0}")]
    UnknownEdge(String),

    #[error("duplicate edge id: {0}")]
    DuplicateEdge(String),

    #[error("unsupported edge file version: {0}")]
    UnsupportedVersion(u32),

    #[error("invalid pattern condition operator: '{0}'")]
    InvalidOperator(String),
}

/// Errors raised while scanning historical data for candidate edges (C5).
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery dataset is empty")]
    EmptyDataset,

    #[error("invalid discovery configuration: {0}")]
    InvalidConfig(String),
}

/// Errors from the closed-loop learning subsystem (C7-C12).
#[derive(Debug, Error)]
pub enum LearningError {
    #[error("malformed outcome record: {0}")]
    MalformedOutcome(String),

    #[error("invalid learning configuration: {0}")]
    InvalidConfig(String),
}

/// Errors from the deterministic replay runner (C14).
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("event ordering violation: ({prev_ts}, {prev_seq}) -> ({ts}, {seq})")]
    OrderingViolation {
        prev_ts: i64,
        prev_seq: i64,
        ts: i64,
        seq: i64,
    },

    #[error("invalid run state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("replay run construction failed: {0}")]
    Construction(String),
}

/// Errors related to atomic file persistence and wire formats (C4/C7/C11/C12).
#[derive(Debug, Error)]
pub enum IoError {
    #[error("io operation failed")]
    Io(#[from] std::io::Error),

    #[error("serialization failed")]
    Json(#[from] serde_json::Error),

    #[error("unreadable dataset: {0}")]
    Dataset(String),

    #[error("atomic write failed for '{path}': {msg}")]
    AtomicWrite { path: String, msg: String },
}
