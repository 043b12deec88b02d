//! The fixed v1 feature/label schema. Field declaration
//! order is the wire order: it drives struct serialization, the Parquet
//! column order, and the `meta.json` sidecar's `columns` list from one
//! source of truth.

use serde::{Deserialize, Serialize};

/// One row of the v1 feature schema, produced per accepted BBO event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVectorV1 {
    pub ts_event: i64,
    pub f_mid: f64,
    pub f_spread: f64,
    pub f_spread_bps: f64,
    pub f_imbalance: f64,
    pub f_microprice: f64,
    pub f_ret_1s: f64,
    pub f_ret_5s: f64,
    pub f_ret_10s: f64,
    pub f_ret_30s: f64,
    pub f_vol_10s: f64,
    pub label_dir_10s: i32,
}

impl FeatureVectorV1 {
    /// Column names in fixed wire order, matching the external Parquet
    /// schema exactly.
    pub const COLUMNS: [&'static str; 12] = [
        "ts_event",
        "f_mid",
        "f_spread",
        "f_spread_bps",
        "f_imbalance",
        "f_microprice",
        "f_ret_1s",
        "f_ret_5s",
        "f_ret_10s",
        "f_ret_30s",
        "f_vol_10s",
        "label_dir_10s",
    ];

    /// True iff every feature and the label are finite — the acceptance
    /// rule applied by the batch builder before a row is emitted.
    pub fn all_finite(&self) -> bool {
        [
            self.f_mid,
            self.f_spread,
            self.f_spread_bps,
            self.f_imbalance,
            self.f_microprice,
            self.f_ret_1s,
            self.f_ret_5s,
            self.f_ret_10s,
            self.f_ret_30s,
            self.f_vol_10s,
        ]
        .into_iter()
        .all(f64::is_finite)
            && (self.label_dir_10s == 0 || self.label_dir_10s == 1)
    }
}

/// Sidecar metadata written alongside a Parquet partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSetMeta {
    pub featureset_version: String,
    pub label_horizon_sec: u32,
    pub symbol: String,
    pub date: String,
    pub columns: Vec<String>,
    pub formulas_version: String,
    pub rows: usize,
    pub ts_min: i64,
    pub ts_max: i64,
    pub config_hash: String,
}

impl FeatureSetMeta {
    pub fn new(symbol: impl Into<String>, date: impl Into<String>, rows: &[FeatureVectorV1], config_hash: String) -> Self {
        let ts_min = rows.iter().map(|r| r.ts_event).min().unwrap_or_default();
        let ts_max = rows.iter().map(|r| r.ts_event).max().unwrap_or_default();
        Self {
            featureset_version: "v1".to_string(),
            label_horizon_sec: 10,
            symbol: symbol.into(),
            date: date.into(),
            columns: FeatureVectorV1::COLUMNS.iter().map(|s| s.to_string()).collect(),
            formulas_version: "v1".to_string(),
            rows: rows.len(),
            ts_min,
            ts_max,
            config_hash,
        }
    }
}
