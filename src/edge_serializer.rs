//! C4 — `EdgeSerializer`: round-trip persistence of an `EdgeRegistry` by
//! serializing edge *definitions*, never predicate closures, and
//! reconstructing evaluable predicates from `Pattern` on load. Writes are
//! atomic: `.tmp` → fsync → rename, matching the persistence style in
//! `io.rs`.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::edge::{
    Confidence, DecayFunction, Edge, EdgeDefinition, EdgeRegistry, EdgeStats, EdgeStatus, ExpectedAdvantage, RiskProfile,
};
use crate::error::{EdgeCoreResult, IoError};

/// The persisted, predicate-free view of one edge.
#[derive(Debug, Serialize, Deserialize)]
pub struct EdgeJson {
    pub id: String,
    pub name: String,
    pub regimes: Vec<String>,
    pub time_horizon_ms: i64,
    pub expected_advantage: ExpectedAdvantage,
    pub risk_profile: RiskProfile,
    pub decay_function: DecayFunction,
    pub status: EdgeStatus,
    pub stats: EdgeStats,
    pub confidence: Confidence,
    pub discovered_at: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EdgeFileEntry {
    #[serde(flatten)]
    pub edge: EdgeJson,
    pub definition: Option<EdgeDefinition>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EdgeFile {
    pub version: u32,
    pub timestamp: i64,
    pub edges: Vec<EdgeFileEntry>,
    pub stats: crate::edge::EdgeRegistryStats,
}

const CURRENT_VERSION: u32 = 1;

pub struct EdgeSerializer;

impl EdgeSerializer {
    /// Builds the wire representation of `registry` (predicates omitted).
    pub fn serialize(registry: &EdgeRegistry, now: i64) -> EdgeFile {
        let mut edges = Vec::new();
        for (id, edge) in registry.iter() {
            let definition = registry.get_definition(id).cloned();
            edges.push(EdgeFileEntry {
                edge: EdgeJson {
                    id: edge.id.clone(),
                    name: edge.name.clone(),
                    regimes: edge.regimes.iter().cloned().collect(),
                    time_horizon_ms: edge.time_horizon_ms,
                    expected_advantage: edge.expected_advantage,
                    risk_profile: edge.risk_profile.clone(),
                    decay_function: edge.decay_function,
                    status: edge.status,
                    stats: edge.stats,
                    confidence: edge.confidence,
                    discovered_at: edge.discovered_at,
                },
                definition,
            });
        }
        EdgeFile { version: CURRENT_VERSION, timestamp: now, edges, stats: registry.get_stats() }
    }

    /// Writes `registry` atomically to `path` as JSON.
    pub fn write_atomic(registry: &EdgeRegistry, path: &Path, now: i64) -> EdgeCoreResult<()> {
        let file = Self::serialize(registry, now);
        let json = serde_json::to_vec_pretty(&file).map_err(IoError::Json)?;
        atomic_write(path, &json)
    }

    /// Reconstructs an `EdgeRegistry` from a previously persisted file.
    /// Entries with no `definition` are skipped with a warning — never
    /// guessed.
    pub fn deserialize(file: &EdgeFile) -> EdgeCoreResult<EdgeRegistry> {
        if file.version != CURRENT_VERSION {
            return Err(crate::error::EdgeError::UnsupportedVersion(file.version).into());
        }
        let mut registry = EdgeRegistry::new();
        for entry in &file.edges {
            let Some(definition) = entry.definition.clone() else {
                warn!(edge_id = %entry.edge.id, "skipping edge with no definition on reload");
                continue;
            };
            let entry_predicate = definition.pattern.to_entry_predicate();
            let exit_predicate = definition.pattern.to_exit_predicate();
            let mut edge = Edge::new(entry.edge.id.clone(), entry.edge.name.clone(), entry_predicate, exit_predicate);
            edge.regimes = entry.edge.regimes.iter().cloned().collect();
            edge.time_horizon_ms = entry.edge.time_horizon_ms;
            edge.expected_advantage = entry.edge.expected_advantage;
            edge.risk_profile = entry.edge.risk_profile.clone();
            edge.decay_function = entry.edge.decay_function;
            edge.status = entry.edge.status;
            edge.stats = entry.edge.stats;
            edge.confidence = entry.edge.confidence;
            edge.discovered_at = entry.edge.discovered_at;
            registry.register(edge, Some(definition))?;
        }
        Ok(registry)
    }

    pub fn read(path: &Path) -> EdgeCoreResult<EdgeFile> {
        let bytes = fs::read(path).map_err(IoError::Io)?;
        serde_json::from_slice(&bytes).map_err(|e| IoError::Json(e).into())
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> EdgeCoreResult<()> {
    let tmp_path = path.with_extension("tmp");
    let write_result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(IoError::AtomicWrite { path: path.display().to_string(), msg: e.to_string() }.into());
    }
    fs::rename(&tmp_path, path).map_err(|e| IoError::AtomicWrite { path: path.display().to_string(), msg: e.to_string() })?;
    Ok(())
}
