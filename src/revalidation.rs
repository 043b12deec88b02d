//! C9 — `EdgeRevalidationRunner`: alert-driven and scheduled
//! re-validation with a per-edge cooldown and a global concurrency cap.
//! The cap models *logical* concurrency — re-validations here
//! run on a `rayon` scoped pool sized to `max_concurrent` so the cap is
//! structural, not just a counter, while still settling in a single
//! deterministic history vector (ordered by submission, not completion).

use std::collections::HashMap;
use std::sync::Mutex;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::confidence::DriftAlert;
use crate::edge::{EdgeRegistry, EdgeStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevalidationConfig {
    pub min_data_rows: usize,
    pub cooldown_hours: i64,
    pub max_concurrent: usize,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self { min_data_rows: 500, cooldown_hours: 24, max_concurrent: 3 }
    }
}

/// The external validation pipeline (C6), out of this spec's depth — only
/// its interface matters here.
pub trait ValidationPipeline: Send + Sync {
    fn revalidate(&self, edge_id: &str, dataset_rows: usize) -> Result<(EdgeStatus, f64), String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevalidationHistoryEntry {
    pub edge_id: String,
    pub previous_status: Option<EdgeStatus>,
    pub new_status: Option<EdgeStatus>,
    pub score: Option<f64>,
    pub trigger: String,
    pub revalidated_at: i64,
    pub status_changed: bool,
    pub skipped_reason: Option<String>,
    pub error: Option<String>,
}

pub struct EdgeRevalidationRunner {
    config: RevalidationConfig,
    last_revalidation: Mutex<HashMap<String, i64>>,
    running: Mutex<std::collections::HashSet<String>>,
}

impl EdgeRevalidationRunner {
    pub fn new(config: RevalidationConfig) -> Self {
        Self { config, last_revalidation: Mutex::new(HashMap::new()), running: Mutex::new(std::collections::HashSet::new()) }
    }

    pub fn clear_cooldown(&self, edge_id: &str) {
        self.last_revalidation.lock().unwrap().remove(edge_id);
    }

    pub fn process_alerts(
        &self,
        alerts: &[(String, DriftAlert)],
        dataset_rows: usize,
        registry: &mut EdgeRegistry,
        pipeline: &dyn ValidationPipeline,
        now: i64,
    ) -> Vec<RevalidationHistoryEntry> {
        let edge_ids: Vec<String> = alerts.iter().map(|(id, _)| id.clone()).collect();
        self.revalidate_edges(&edge_ids, dataset_rows, registry, pipeline, now, "alert")
    }

    pub fn revalidate_all(
        &self,
        dataset_rows: usize,
        registry: &mut EdgeRegistry,
        pipeline: &dyn ValidationPipeline,
        now: i64,
    ) -> Vec<RevalidationHistoryEntry> {
        let edge_ids: Vec<String> = registry.iter().map(|(id, _)| id.clone()).collect();
        self.revalidate_edges(&edge_ids, dataset_rows, registry, pipeline, now, "scheduled")
    }

    fn revalidate_edges(
        &self,
        edge_ids: &[String],
        dataset_rows: usize,
        registry: &mut EdgeRegistry,
        pipeline: &dyn ValidationPipeline,
        now: i64,
        trigger: &str,
    ) -> Vec<RevalidationHistoryEntry> {
        if dataset_rows < self.config.min_data_rows {
            return Vec::new();
        }

        let cooldown_ms = self.config.cooldown_hours * 3_600_000;
        let mut eligible = Vec::new();
        let mut history = Vec::new();

        {
            let mut running = self.running.lock().unwrap();
            let last = self.last_revalidation.lock().unwrap();
            for edge_id in edge_ids {
                if running.contains(edge_id) {
                    history.push(skipped(edge_id, trigger, now, "ALREADY_RUNNING"));
                    continue;
                }
                if running.len() + eligible.len() >= self.config.max_concurrent {
                    history.push(skipped(edge_id, trigger, now, "MAX_CONCURRENT_REACHED"));
                    continue;
                }
                if let Some(&last_ts) = last.get(edge_id) {
                    if now - last_ts < cooldown_ms {
                        history.push(skipped(edge_id, trigger, now, "COOLDOWN"));
                        continue;
                    }
                }
                eligible.push(edge_id.clone());
            }
            for edge_id in &eligible {
                running.insert(edge_id.clone());
            }
        }

        // The actual pipeline calls run on a thread pool capped at
        // `max_concurrent` workers — a structural cap, not just the
        // bookkeeping counter above. `par_iter().map().collect()` preserves
        // input order in the result vector regardless of completion order,
        // so history stays ordered by submission as the spec requires.
        let previous_statuses: Vec<Option<EdgeStatus>> = eligible.iter().map(|id| registry.get(id).map(|e| e.status)).collect();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_concurrent.max(1))
            .build()
            .expect("revalidation thread pool build");
        let results: Vec<Result<(EdgeStatus, f64), String>> =
            pool.install(|| eligible.par_iter().map(|edge_id| pipeline.revalidate(edge_id, dataset_rows)).collect());

        for ((edge_id, previous_status), result) in eligible.iter().zip(previous_statuses).zip(results) {
            match result {
                Ok((new_status, score)) => {
                    if let Some(edge) = registry.get_mut(edge_id) {
                        edge.status = new_status;
                    }
                    self.last_revalidation.lock().unwrap().insert(edge_id.clone(), now);
                    history.push(RevalidationHistoryEntry {
                        edge_id: edge_id.clone(),
                        previous_status,
                        new_status: Some(new_status),
                        score: Some(score),
                        trigger: trigger.to_string(),
                        revalidated_at: now,
                        status_changed: previous_status != Some(new_status),
                        skipped_reason: None,
                        error: None,
                    });
                }
                Err(msg) => {
                    warn!(edge_id, error = %msg, "revalidation pipeline failed");
                    history.push(RevalidationHistoryEntry {
                        edge_id: edge_id.clone(),
                        previous_status,
                        new_status: None,
                        score: None,
                        trigger: trigger.to_string(),
                        revalidated_at: now,
                        status_changed: false,
                        skipped_reason: None,
                        error: Some(msg),
                    });
                }
            }
            self.running.lock().unwrap().remove(edge_id);
        }

        history
    }
}

fn skipped(edge_id: &str, trigger: &str, now: i64, reason: &str) -> RevalidationHistoryEntry {
    RevalidationHistoryEntry {
        edge_id: edge_id.to_string(),
        previous_status: None,
        new_status: None,
        score: None,
        trigger: trigger.to_string(),
        revalidated_at: now,
        status_changed: false,
        skipped_reason: Some(reason.to_string()),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{Edge, EntryOutcome, EntryPredicate, ExitOutcome, ExitPredicate};
    use std::collections::HashMap as Map;

    #[derive(Debug)]
    struct Never;
    impl EntryPredicate for Never {
        fn evaluate(&self, _f: &Map<String, f64>, _r: Option<&str>) -> Result<EntryOutcome, String> {
            Ok(EntryOutcome { active: false, direction: None, confidence: None, reason: None })
        }
    }
    impl ExitPredicate for Never {
        fn evaluate(&self, _f: &Map<String, f64>, _r: Option<&str>, _e: i64, _n: i64) -> Result<ExitOutcome, String> {
            Ok(ExitOutcome { exit: false, reason: None })
        }
    }

    struct AlwaysValidated;
    impl ValidationPipeline for AlwaysValidated {
        fn revalidate(&self, _edge_id: &str, _dataset_rows: usize) -> Result<(EdgeStatus, f64), String> {
            Ok((EdgeStatus::Validated, 0.8))
        }
    }

    fn registry_with_one_edge() -> EdgeRegistry {
        let mut registry = EdgeRegistry::new();
        registry.register(Edge::new("e1", "edge", Box::new(Never), Box::new(Never)), None).unwrap();
        registry
    }

    #[test]
    fn below_min_data_rows_yields_no_history() {
        let runner = EdgeRevalidationRunner::new(RevalidationConfig::default());
        let mut registry = registry_with_one_edge();
        let history = runner.revalidate_all(10, &mut registry, &AlwaysValidated, 0);
        assert!(history.is_empty());
    }

    #[test]
    fn e5_second_call_within_cooldown_is_skipped() {
        let runner = EdgeRevalidationRunner::new(RevalidationConfig::default());
        let mut registry = registry_with_one_edge();

        let first = runner.revalidate_all(500, &mut registry, &AlwaysValidated, 0);
        assert_eq!(first.len(), 1);
        assert!(first[0].skipped_reason.is_none());
        assert_eq!(registry.get("e1").unwrap().status, EdgeStatus::Validated);

        let second = runner.revalidate_all(500, &mut registry, &AlwaysValidated, 1_000);
        assert_eq!(second.len(), 1);
        assert!(second[0].skipped_reason.as_deref().unwrap().starts_with("COOLDOWN"));
    }

    #[test]
    fn clear_cooldown_allows_immediate_retry() {
        let runner = EdgeRevalidationRunner::new(RevalidationConfig::default());
        let mut registry = registry_with_one_edge();

        runner.revalidate_all(500, &mut registry, &AlwaysValidated, 0);
        runner.clear_cooldown("e1");
        let retried = runner.revalidate_all(500, &mut registry, &AlwaysValidated, 1_000);
        assert_eq!(retried.len(), 1);
        assert!(retried[0].skipped_reason.is_none());
    }
}
