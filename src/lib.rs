// === Domain & shared error taxonomy ===
mod macros;
pub mod domain;
pub mod error;

// === C1-C2: feature computation ===
pub mod feature_builder_v1;
pub mod feature_registry;
pub mod feature_vector;

// === C3-C5: edge registry, persistence, discovery ===
pub mod discovery;
pub mod edge;
pub mod edge_serializer;

// === C7-C12: closed-loop learning subsystem ===
pub mod confidence;
pub mod importance;
pub mod outcomes;
pub mod refinement;
pub mod revalidation;
pub mod scheduler;

// === C13-C14: evaluation gate, deterministic replay, composition root ===
pub mod context;
pub mod gate;
pub mod replay;

pub mod prelude;
