//! C7 — `TradeOutcomeCollector`: an append-only JSONL log of
//! entry/exit pairs with compacted feature vectors, buffered writes, byte-
//! threshold rotation, and strict (skip-and-warn) reads. Atomicity follows
//! the `.tmp -> fsync -> rename` convention used elsewhere in this crate
//! for the segment currently being closed out.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, Write as _};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EdgeCoreResult, IoError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub trade_id: String,
    pub edge_id: String,
    pub direction: String,
    pub entry_price: f64,
    pub entry_timestamp: i64,
    pub entry_features: HashMap<String, f64>,
    pub entry_regime: Option<String>,
    pub exit_price: f64,
    pub exit_timestamp: i64,
    pub pnl: f64,
    pub exit_reason: String,
    pub holding_period_ms: i64,
}

#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub edge_id: String,
    pub direction: String,
    pub price: f64,
    pub timestamp: i64,
    pub features: HashMap<String, f64>,
    pub regime: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeCollectorConfig {
    pub log_dir: PathBuf,
    pub flush_interval_ms: i64,
    pub feature_decimals: u32,
    pub max_file_size_bytes: u64,
}

impl Default for OutcomeCollectorConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("."),
            flush_interval_ms: 5_000,
            feature_decimals: 6,
            max_file_size_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct OutcomeReadFilter {
    pub since: Option<i64>,
    pub edge_id: Option<String>,
    pub limit: Option<usize>,
}

const FLUSH_BATCH_SIZE: usize = 100;

pub struct TradeOutcomeCollector {
    config: OutcomeCollectorConfig,
    pending_entries: HashMap<String, EntrySnapshot>,
    buffer: Vec<TradeOutcome>,
    current_segment: PathBuf,
    bytes_written_current_segment: u64,
    last_flush_ms: i64,
}

impl TradeOutcomeCollector {
    /// `now_iso` names the initial segment (`outcomes-<now_iso>.jsonl`, per
    /// the wire format in spec.md §6); rotation on `flush` reuses the most
    /// recently supplied ISO string rather than fabricating one from `now_ms`.
    pub fn new(config: OutcomeCollectorConfig, now_ms: i64, now_iso: &str) -> EdgeCoreResult<Self> {
        fs::create_dir_all(&config.log_dir).map_err(IoError::Io)?;
        let current_segment = segment_path(&config.log_dir, now_iso);
        Ok(Self {
            bytes_written_current_segment: current_segment.metadata().map(|m| m.len()).unwrap_or(0),
            config,
            pending_entries: HashMap::new(),
            buffer: Vec::new(),
            current_segment,
            last_flush_ms: now_ms,
        })
    }

    /// Buffers an entry snapshot. Paired by `record_exit` later.
    pub fn record_entry(&mut self, trade_id: impl Into<String>, snapshot: EntrySnapshot) {
        self.pending_entries.insert(trade_id.into(), snapshot);
    }

    /// Completes the pair and buffers the outcome for writing. Returns
    /// `None` with a warning (never an error) if `trade_id` has no pending
    /// entry — a missing entry is never an abort path.
    pub fn record_exit(
        &mut self,
        trade_id: &str,
        exit_price: f64,
        exit_timestamp: i64,
        pnl: f64,
        exit_reason: impl Into<String>,
        now_ms: i64,
        now_iso: &str,
    ) -> Option<TradeOutcome> {
        let Some(entry) = self.pending_entries.remove(trade_id) else {
            warn!(trade_id, "record_exit called with no matching entry");
            return None;
        };

        let outcome = TradeOutcome {
            trade_id: trade_id.to_string(),
            edge_id: entry.edge_id,
            direction: entry.direction,
            entry_price: entry.price,
            entry_timestamp: entry.timestamp,
            entry_features: compact(&entry.features, self.config.feature_decimals),
            entry_regime: entry.regime,
            exit_price,
            exit_timestamp,
            pnl,
            exit_reason: exit_reason.into(),
            holding_period_ms: exit_timestamp - entry.timestamp,
        };

        self.buffer.push(outcome.clone());
        if self.buffer.len() >= FLUSH_BATCH_SIZE || now_ms - self.last_flush_ms >= self.config.flush_interval_ms {
            let _ = self.flush(now_ms, now_iso);
        }
        Some(outcome)
    }

    /// Appends buffered outcomes to the current segment, rotating first if
    /// the segment has grown past `max_file_size_bytes`. `now_iso` names
    /// the new segment if rotation happens; it is not consulted otherwise.
    pub fn flush(&mut self, now_ms: i64, now_iso: &str) -> EdgeCoreResult<()> {
        if self.buffer.is_empty() {
            self.last_flush_ms = now_ms;
            return Ok(());
        }

        if self.bytes_written_current_segment >= self.config.max_file_size_bytes {
            self.current_segment = segment_path(&self.config.log_dir, now_iso);
            self.bytes_written_current_segment = 0;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current_segment)
            .map_err(IoError::Io)?;

        for outcome in self.buffer.drain(..) {
            let mut line = serde_json::to_string(&outcome).map_err(IoError::Json)?;
            line.push('\n');
            file.write_all(line.as_bytes()).map_err(IoError::Io)?;
            self.bytes_written_current_segment += line.len() as u64;
        }
        file.sync_all().map_err(IoError::Io)?;
        self.last_flush_ms = now_ms;
        Ok(())
    }

    pub fn close(&mut self, now_ms: i64, now_iso: &str) -> EdgeCoreResult<()> {
        self.flush(now_ms, now_iso)
    }

    /// Strict read: parses each line of every segment under `log_dir`,
    /// skipping (and warning on) malformed lines, applying `filter`.
    pub fn read(log_dir: &Path, filter: &OutcomeReadFilter) -> EdgeCoreResult<Vec<TradeOutcome>> {
        let mut segments: Vec<PathBuf> = fs::read_dir(log_dir)
            .map_err(IoError::Io)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
            .collect();
        segments.sort();

        let mut results = Vec::new();
        for segment in segments {
            let file = File::open(&segment).map_err(IoError::Io)?;
            for (i, line) in std::io::BufReader::new(file).lines().enumerate() {
                let line = line.map_err(IoError::Io)?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<TradeOutcome>(&line) {
                    Ok(outcome) => {
                        if let Some(since) = filter.since {
                            if outcome.exit_timestamp < since {
                                continue;
                            }
                        }
                        if let Some(edge_id) = &filter.edge_id {
                            if &outcome.edge_id != edge_id {
                                continue;
                            }
                        }
                        results.push(outcome);
                    }
                    Err(e) => warn!(segment = %segment.display(), line_no = i, error = %e, "skipping malformed outcome line"),
                }
                if let Some(limit) = filter.limit {
                    if results.len() >= limit {
                        return Ok(results);
                    }
                }
            }
        }
        Ok(results)
    }
}

fn segment_path(log_dir: &Path, now_iso: &str) -> PathBuf {
    log_dir.join(format!("outcomes-{now_iso}.jsonl"))
}

fn compact(features: &HashMap<String, f64>, decimals: u32) -> HashMap<String, f64> {
    let factor = 10f64.powi(decimals as i32);
    features.iter().map(|(k, v)| (k.clone(), (v * factor).round() / factor)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn snapshot() -> EntrySnapshot {
        EntrySnapshot {
            edge_id: "e1".to_string(),
            direction: "LONG".to_string(),
            price: 100.0,
            timestamp: 0,
            features: HashMap::from([("f_mid".to_string(), 100.123456789)]),
            regime: Some("trend_up".to_string()),
        }
    }

    #[test]
    fn record_exit_without_entry_returns_none() {
        let dir = tempdir().unwrap();
        let mut collector = TradeOutcomeCollector::new(
            OutcomeCollectorConfig { log_dir: dir.path().to_path_buf(), ..Default::default() },
            0,
            "1970-01-01T00-00-00Z",
        )
        .unwrap();
        assert!(collector.record_exit("missing", 101.0, 1000, 1.0, "TP", 1000, "1970-01-01T00-00-00Z").is_none());
    }

    #[test]
    fn round_trip_through_disk() {
        let dir = tempdir().unwrap();
        let mut collector = TradeOutcomeCollector::new(
            OutcomeCollectorConfig { log_dir: dir.path().to_path_buf(), ..Default::default() },
            0,
            "1970-01-01T00-00-00Z",
        )
        .unwrap();
        collector.record_entry("t1", snapshot());
        let outcome = collector.record_exit("t1", 101.0, 1000, 1.0, "TAKE_PROFIT", 1000, "1970-01-01T00-00-00Z").unwrap();
        assert_eq!(outcome.holding_period_ms, 1000);
        collector.close(1000, "1970-01-01T00-00-00Z").unwrap();

        let read = TradeOutcomeCollector::read(dir.path(), &OutcomeReadFilter::default()).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].trade_id, "t1");
        assert_eq!(read[0].entry_features["f_mid"], 100.123457);
    }

    #[test]
    fn segment_file_name_uses_caller_supplied_iso_string() {
        let dir = tempdir().unwrap();
        let mut collector = TradeOutcomeCollector::new(
            OutcomeCollectorConfig { log_dir: dir.path().to_path_buf(), ..Default::default() },
            0,
            "2026-07-28T00-00-00Z",
        )
        .unwrap();
        collector.record_entry("t1", snapshot());
        collector.record_exit("t1", 101.0, 1000, 1.0, "TAKE_PROFIT", 1000, "2026-07-28T00-00-00Z");
        collector.close(1000, "2026-07-28T00-00-00Z").unwrap();
        assert!(dir.path().join("outcomes-2026-07-28T00-00-00Z.jsonl").exists());
    }

    #[test]
    fn read_skips_malformed_lines() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("outcomes-2026-07-28T00-00-00Z.jsonl"), "not json\n").unwrap();
        let read = TradeOutcomeCollector::read(dir.path(), &OutcomeReadFilter::default()).unwrap();
        assert!(read.is_empty());
    }
}
