//! C12 — `LearningScheduler`: orchestrates the closed learning loop
//! (outcome collection, confidence/drift, revalidation, feature importance,
//! and behavior refinement) on daily/weekly/monthly cadences, and persists
//! each cycle's refinement proposals atomically the same way
//! `EdgeSerializer` persists the registry.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::info;

use crate::confidence::{ConfidenceBaseline, ConfidenceConfig, EdgeConfidenceUpdater};
use crate::edge::EdgeRegistry;
use crate::error::{EdgeCoreResult, IoError};
use crate::importance::{FeatureImportanceTracker, ImportanceConfig};
use crate::outcomes::{OutcomeReadFilter, TradeOutcome};
use crate::refinement::{BehaviorRefinementEngine, EdgeRefinementInput, RefinementConfig, RefinementProposal};
use crate::revalidation::{EdgeRevalidationRunner, RevalidationHistoryEntry, ValidationPipeline};

const ONE_DAY_MS: i64 = 86_400_000;
const THIRTY_DAYS_MS: i64 = 30 * ONE_DAY_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RunKind {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub kind: RunKind,
    pub started_at: i64,
    pub outcomes_processed: usize,
    pub drift_alerts_fired: usize,
    pub revalidations: Vec<RevalidationHistoryEntry>,
    pub proposals: Vec<RefinementProposal>,
    pub retired_edges: Vec<String>,
    pub proposals_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub output_dir: PathBuf,
    pub confidence: ConfidenceConfig,
    pub importance: ImportanceConfig,
    pub refinement: RefinementConfig,
}

pub struct LearningScheduler {
    config: SchedulerConfig,
    confidence_updater: EdgeConfidenceUpdater,
    revalidation_runner: EdgeRevalidationRunner,
    importance_tracker: FeatureImportanceTracker,
    refinement_engine: BehaviorRefinementEngine,
    history: Vec<RunRecord>,
}

impl LearningScheduler {
    pub fn new(config: SchedulerConfig, revalidation_runner: EdgeRevalidationRunner) -> Self {
        Self {
            config,
            confidence_updater: EdgeConfidenceUpdater::new(),
            revalidation_runner,
            importance_tracker: FeatureImportanceTracker::new(),
            refinement_engine: BehaviorRefinementEngine::new(50),
            history: Vec::new(),
        }
    }

    pub fn set_confidence_baseline(&mut self, edge_id: impl Into<String>, baseline: ConfidenceBaseline) {
        self.confidence_updater.set_baseline(edge_id, baseline);
    }

    /// The revalidation runner actually driving this scheduler's daily and
    /// weekly cycles, for callers that need to e.g. `clear_cooldown` a
    /// specific edge between runs.
    pub fn revalidation_runner(&self) -> &EdgeRevalidationRunner {
        &self.revalidation_runner
    }

    /// Applies every outcome from the last 24h's confidence/drift update,
    /// then feeds any fired alerts into the revalidation runner.
    pub fn run_daily(&mut self, registry: &mut EdgeRegistry, outcome_log_dir: &Path, pipeline: &dyn ValidationPipeline, now: i64) -> EdgeCoreResult<RunRecord> {
        let filter = OutcomeReadFilter { since: Some(now - ONE_DAY_MS), edge_id: None, limit: None };
        let outcomes = TradeOutcome::read_for_scheduler(outcome_log_dir, &filter)?;

        let mut alerts = Vec::new();
        for outcome in &outcomes {
            let Some(edge) = registry.get_mut(&outcome.edge_id) else { continue };
            if let Some(fired) = self.confidence_updater.record_outcome(edge, outcome, &self.config.confidence) {
                for alert in fired {
                    alerts.push((outcome.edge_id.clone(), alert));
                }
            }
        }

        let dataset_rows = outcomes.len();
        let revalidations = self.revalidation_runner.process_alerts(&alerts, dataset_rows, registry, pipeline, now);

        let record = RunRecord {
            kind: RunKind::Daily,
            started_at: now,
            outcomes_processed: outcomes.len(),
            drift_alerts_fired: alerts.len(),
            revalidations,
            proposals: Vec::new(),
            retired_edges: Vec::new(),
            proposals_file: None,
        };
        self.push_history(record.clone());
        info!(kind = %record.kind, outcomes = record.outcomes_processed, alerts = record.drift_alerts_fired, "learning run complete");
        Ok(record)
    }

    /// Runs the daily cycle, then scheduled revalidation of all edges.
    pub fn run_weekly(&mut self, registry: &mut EdgeRegistry, outcome_log_dir: &Path, pipeline: &dyn ValidationPipeline, now: i64) -> EdgeCoreResult<RunRecord> {
        let mut daily = self.run_daily(registry, outcome_log_dir, pipeline, now)?;

        let all_outcomes = TradeOutcome::read_for_scheduler(outcome_log_dir, &OutcomeReadFilter::default())?;
        let dataset_rows = all_outcomes.len();
        let scheduled_revalidations = self.revalidation_runner.revalidate_all(dataset_rows, registry, pipeline, now);

        daily.kind = RunKind::Weekly;
        daily.revalidations.extend(scheduled_revalidations);
        self.history.pop();
        self.push_history(daily.clone());
        Ok(daily)
    }

    /// Runs the weekly cycle, then feature-importance analysis over the
    /// last 30 days of outcomes, refinement proposals persisted to
    /// `output_dir/refinement-proposals-<iso>.json`, and the registry's own
    /// retirement rule over every edge still standing.
    pub fn run_monthly(
        &mut self,
        registry: &mut EdgeRegistry,
        outcome_log_dir: &Path,
        pipeline: &dyn ValidationPipeline,
        now: i64,
        now_iso: &str,
    ) -> EdgeCoreResult<RunRecord> {
        let mut weekly = self.run_weekly(registry, outcome_log_dir, pipeline, now)?;

        let monthly_filter = OutcomeReadFilter { since: Some(now - THIRTY_DAYS_MS), edge_id: None, limit: None };
        let monthly_outcomes = TradeOutcome::read_for_scheduler(outcome_log_dir, &monthly_filter)?;

        let edge_ids: Vec<String> = registry.iter().map(|(id, _)| id.clone()).collect();
        let mut analyses = Vec::with_capacity(edge_ids.len());
        for edge_id in &edge_ids {
            let outcomes_for_edge: Vec<TradeOutcome> = monthly_outcomes.iter().filter(|o| &o.edge_id == edge_id).cloned().collect();
            let analysis = self.importance_tracker.analyze(edge_id, &outcomes_for_edge, &self.config.importance, now);
            analyses.push((edge_id.clone(), analysis));
        }

        let definition_features: Vec<Vec<String>> = edge_ids
            .iter()
            .map(|id| {
                registry
                    .get_definition(id)
                    .map(|d| d.pattern.conditions.iter().map(|c| c.feature.clone()).collect())
                    .unwrap_or_default()
            })
            .collect();
        let inputs: Vec<EdgeRefinementInput> = edge_ids
            .iter()
            .zip(&analyses)
            .zip(&definition_features)
            .map(|((edge_id, (_, analysis)), def_features)| EdgeRefinementInput {
                edge_id,
                definition_features: def_features,
                analysis: analysis.as_ref(),
            })
            .collect();
        let proposals = self.refinement_engine.generate(&inputs, &self.config.refinement, now);
        let proposals_file = self.persist_proposals(&proposals, now_iso)?;

        let retired = registry.retire_underperforming_edges();

        weekly.kind = RunKind::Monthly;
        weekly.proposals = proposals;
        weekly.proposals_file = Some(proposals_file);
        weekly.retired_edges = retired;
        self.history.pop();
        self.push_history(weekly.clone());
        Ok(weekly)
    }

    pub fn history(&self, kind: Option<RunKind>, since: Option<i64>, limit: Option<usize>) -> Vec<&RunRecord> {
        let mut matches: Vec<&RunRecord> = self
            .history
            .iter()
            .filter(|r| kind.is_none_or(|k| r.kind == k))
            .filter(|r| since.is_none_or(|s| r.started_at >= s))
            .collect();
        if let Some(limit) = limit {
            let start = matches.len().saturating_sub(limit);
            matches = matches.split_off(start);
        }
        matches
    }

    fn push_history(&mut self, record: RunRecord) {
        self.history.push(record);
    }

    fn persist_proposals(&self, proposals: &[RefinementProposal], now_iso: &str) -> EdgeCoreResult<PathBuf> {
        fs::create_dir_all(&self.config.output_dir).map_err(IoError::Io)?;
        let path = self.config.output_dir.join(format!("refinement-proposals-{now_iso}.json"));
        let json = serde_json::to_vec_pretty(proposals).map_err(IoError::Json)?;
        atomic_write(&path, &json)?;
        Ok(path)
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

/// Thin adapter so the scheduler depends only on the read-side of the
/// outcome log, independent of a live `TradeOutcomeCollector` instance.
trait OutcomeSource {
    fn read_for_scheduler(log_dir: &Path, filter: &OutcomeReadFilter) -> EdgeCoreResult<Vec<TradeOutcome>>;
}

impl OutcomeSource for TradeOutcome {
    fn read_for_scheduler(log_dir: &Path, filter: &OutcomeReadFilter) -> EdgeCoreResult<Vec<TradeOutcome>> {
        crate::outcomes::TradeOutcomeCollector::read(log_dir, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{Edge, EdgeStatus, EntryOutcome, EntryPredicate, ExitOutcome, ExitPredicate};
    use crate::outcomes::{EntrySnapshot, OutcomeCollectorConfig, TradeOutcomeCollector};
    use tempfile::tempdir;

    #[derive(Debug)]
    struct Never;
    impl EntryPredicate for Never {
        fn evaluate(&self, _f: &std::collections::HashMap<String, f64>, _r: Option<&str>) -> Result<EntryOutcome, String> {
            Ok(EntryOutcome { active: false, direction: None, confidence: None, reason: None })
        }
    }
    impl ExitPredicate for Never {
        fn evaluate(&self, _f: &std::collections::HashMap<String, f64>, _r: Option<&str>, _e: i64, _n: i64) -> Result<ExitOutcome, String> {
            Ok(ExitOutcome { exit: false, reason: None })
        }
    }

    struct AlwaysDeployed;
    impl ValidationPipeline for AlwaysDeployed {
        fn revalidate(&self, _edge_id: &str, _dataset_rows: usize) -> Result<(EdgeStatus, f64), String> {
            Ok((EdgeStatus::Deployed, 0.9))
        }
    }

    fn write_outcomes(dir: &Path, edge_id: &str, n: usize) {
        let config = OutcomeCollectorConfig { log_dir: dir.to_path_buf(), ..Default::default() };
        let mut collector = TradeOutcomeCollector::new(config, 0, "1970-01-01T00-00-00Z").unwrap();
        for i in 0..n {
            collector.record_entry(
                format!("t{i}"),
                EntrySnapshot {
                    edge_id: edge_id.to_string(),
                    direction: "LONG".to_string(),
                    price: 100.0,
                    timestamp: i as i64,
                    features: std::collections::HashMap::from([("f_imbalance".to_string(), i as f64 * 0.01)]),
                    regime: None,
                },
            );
            collector.record_exit(&format!("t{i}"), 100.1, i as i64 + 1, 0.01, "TP", i as i64 + 1, "1970-01-01T00-00-00Z");
        }
        collector.flush(n as i64 + 1, "1970-01-01T00-00-00Z").unwrap();
    }

    /// Like `write_outcomes` but with `f_imbalance` strongly correlated to
    /// pnl, so `FeatureImportanceTracker` scores the feature high enough to
    /// trigger a `WeightAdjust` proposal.
    fn write_correlated_outcomes(dir: &Path, edge_id: &str, n: usize) {
        let config = OutcomeCollectorConfig { log_dir: dir.to_path_buf(), ..Default::default() };
        let mut collector = TradeOutcomeCollector::new(config, 0, "1970-01-01T00-00-00Z").unwrap();
        for i in 0..n {
            collector.record_entry(
                format!("t{i}"),
                EntrySnapshot {
                    edge_id: edge_id.to_string(),
                    direction: "LONG".to_string(),
                    price: 100.0,
                    timestamp: i as i64,
                    features: std::collections::HashMap::from([("f_imbalance".to_string(), i as f64 * 0.01)]),
                    regime: None,
                },
            );
            let pnl = (i as f64 - (n as f64) / 2.0) * 0.01;
            collector.record_exit(&format!("t{i}"), 100.1, i as i64 + 1, pnl, "TP", i as i64 + 1, "1970-01-01T00-00-00Z");
        }
        collector.flush(n as i64 + 1, "1970-01-01T00-00-00Z").unwrap();
    }

    #[test]
    fn daily_run_updates_confidence_and_records_history() {
        let dir = tempdir().unwrap();
        write_outcomes(dir.path(), "e1", 5);

        let mut registry = EdgeRegistry::new();
        registry.register(Edge::new("e1", "edge", Box::new(Never), Box::new(Never)), None).unwrap();

        let config = SchedulerConfig { output_dir: dir.path().join("out"), confidence: ConfidenceConfig::default(), importance: ImportanceConfig::default(), refinement: RefinementConfig::default() };
        let mut scheduler = LearningScheduler::new(config, EdgeRevalidationRunner::new(Default::default()));
        let record = scheduler.run_daily(&mut registry, dir.path(), &AlwaysDeployed, 100_000).unwrap();

        assert_eq!(record.outcomes_processed, 5);
        assert_eq!(scheduler.history(Some(RunKind::Daily), None, None).len(), 1);
    }

    #[test]
    fn weekly_run_does_not_persist_proposals() {
        let dir = tempdir().unwrap();
        write_outcomes(dir.path(), "e1", 5);

        let mut registry = EdgeRegistry::new();
        registry.register(Edge::new("e1", "edge", Box::new(Never), Box::new(Never)), None).unwrap();

        let config = SchedulerConfig { output_dir: dir.path().join("out"), confidence: ConfidenceConfig::default(), importance: ImportanceConfig::default(), refinement: RefinementConfig::default() };
        let mut scheduler = LearningScheduler::new(config, EdgeRevalidationRunner::new(Default::default()));
        let record = scheduler.run_weekly(&mut registry, dir.path(), &AlwaysDeployed, 200_000).unwrap();

        assert!(record.proposals.is_empty());
        assert!(record.proposals_file.is_none());
        assert_eq!(scheduler.history(Some(RunKind::Weekly), None, None).len(), 1);
    }

    #[test]
    fn monthly_run_persists_proposals_file() {
        let dir = tempdir().unwrap();
        write_correlated_outcomes(dir.path(), "e1", 15);

        let mut registry = EdgeRegistry::new();
        let edge = Edge::new("e1", "edge", Box::new(Never), Box::new(Never));
        registry.register(edge, None).unwrap();

        let config = SchedulerConfig { output_dir: dir.path().join("out"), confidence: ConfidenceConfig::default(), importance: ImportanceConfig::default(), refinement: RefinementConfig::default() };
        let mut scheduler = LearningScheduler::new(config, EdgeRevalidationRunner::new(Default::default()));
        let record = scheduler.run_monthly(&mut registry, dir.path(), &AlwaysDeployed, 200_000, "2026-07-28T00-00-00Z").unwrap();

        let path = record.proposals_file.expect("monthly run must persist a proposals file");
        assert!(path.exists());
        assert!(!record.proposals.is_empty());
    }
}
