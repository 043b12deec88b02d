//! C1 — `FeatureBuilderV1`: a deterministic batch pass over a sorted BBO
//! table producing the fixed v1 feature/label schema.
//!
//! This is the one place in the crate where a columnar/offline pass makes
//! sense; everything downstream of this module is either a streaming
//! operator (C2) or a pure function over already-materialized feature
//! vectors. The implementation is plain `Vec`-based: it operates row-by-row
//! with explicit sliding windows so the sort/window/label semantics are
//! auditable line by line and bitwise reproducible across runs (see
//! DESIGN.md for why this crate does not pull in a columnar dependency for
//! that: parquet I/O is an external, opaque concern per the crate's scope,
//! and the in-memory row array this builder receives has no remaining use
//! for one).

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

use crate::domain::BboEvent;
use crate::feature_vector::FeatureVectorV1;

/// Version tag and formula identifiers hashed into `config_hash`. Changing
/// any of these invalidates previously computed feature sets.
const CONFIG_VERSION_TAG: &str = "feature-builder-v1";
const FORMULAS: &[&str] = &[
    "mid=(bid+ask)/2",
    "ret=ln(mid_t/mid_t-dt)",
    "vol_10s=sqrt(max(0,var(ret_1s over trailing 10s)))",
    "microprice=(bid*ask_qty+ask*bid_qty)/(bid_qty+ask_qty)",
    "label_dir_10s=1{mid_t+10s>mid_t}",
];

/// `ts_event` is nanoseconds; every `_MS` constant below is a millisecond
/// quantity and must be scaled by this factor before it is compared
/// against or subtracted from a raw `ts_event` value.
const NANOS_PER_MS: i64 = 1_000_000;

const COLD_START_MS: i64 = 30_000;
const LABEL_HORIZON_MS: i64 = 10_000;
const RET_WINDOWS_MS: [(i64, fn(&mut FeatureVectorV1, f64)); 4] = [
    (1_000, |v, x| v.f_ret_1s = x),
    (5_000, |v, x| v.f_ret_5s = x),
    (10_000, |v, x| v.f_ret_10s = x),
    (30_000, |v, x| v.f_ret_30s = x),
];
const VOL_WINDOW_MS: i64 = 10_000;

/// Deterministic SHA-256 hash of the builder's version tag and formula
/// identifiers. Stable across implementations: any two
/// implementations emitting this string layout for the same version and
/// formula set produce the same hash.
pub fn config_hash() -> String {
    let mut hasher = Sha256::new();
    hasher.update(CONFIG_VERSION_TAG.as_bytes());
    for formula in FORMULAS {
        hasher.update(b"\n");
        hasher.update(formula.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Runs the full batch pass over `rows`, returning only the *accepted*
/// rows (cold-start, forward-label, and finiteness filters applied).
pub fn build(rows: &[BboEvent]) -> Vec<FeatureVectorV1> {
    if rows.is_empty() {
        return Vec::new();
    }

    // Step 1: stable sort by (ts_event, seq), compared as i64 pairs.
    let mut sorted: Vec<&BboEvent> = rows.iter().collect();
    sorted.sort_by(|a, b| (a.ts_event.0, a.seq.0).cmp(&(b.ts_event.0, b.seq.0)));

    let ts: Vec<i64> = sorted.iter().map(|e| e.ts_event.0).collect();
    let mid: Vec<f64> = sorted.iter().map(|e| e.mid()).collect();
    let first_ts = ts[0];

    // Step 2: ret_1s[i] (and the 5s/10s/30s variants) via predecessor lookup.
    let ret_1s: Vec<f64> = (0..ts.len()).map(|i| log_return_at(&ts, &mid, i, 1_000 * NANOS_PER_MS)).collect();

    // Step 3: incremental sliding-window volatility over ret_1s.
    let vol_10s = rolling_volatility(&ts, &ret_1s, VOL_WINDOW_MS * NANOS_PER_MS);

    let mut out = Vec::with_capacity(sorted.len());
    for i in 0..sorted.len() {
        // Step 4: cold-start filter.
        if ts[i] < first_ts + COLD_START_MS * NANOS_PER_MS {
            continue;
        }

        // Step 5: forward label, drop if no forward sample exists.
        let target_ts = ts[i] + LABEL_HORIZON_MS * NANOS_PER_MS;
        let Some(k) = first_index_with_ts_at_least(&ts, i, target_ts) else {
            continue;
        };
        let label = i32::from(mid[k] > mid[i]);

        let e = sorted[i];
        let spread = e.spread();
        let m = mid[i];
        let imbalance = order_book_imbalance(e.bid_qty.0, e.ask_qty.0);
        let microprice = microprice(e.bid_price.0, e.ask_price.0, e.bid_qty.0, e.ask_qty.0);

        let mut v = FeatureVectorV1 {
            ts_event: ts[i],
            f_mid: m,
            f_spread: spread,
            f_spread_bps: if m != 0.0 { spread / m * 10_000.0 } else { f64::NAN },
            f_imbalance: imbalance,
            f_microprice: microprice,
            f_ret_1s: 0.0,
            f_ret_5s: 0.0,
            f_ret_10s: 0.0,
            f_ret_30s: 0.0,
            f_vol_10s: vol_10s[i],
            label_dir_10s: label,
        };

        for (window_ms, setter) in RET_WINDOWS_MS {
            let r = if window_ms == 1_000 {
                ret_1s[i]
            } else {
                log_return_at(&ts, &mid, i, window_ms * NANOS_PER_MS)
            };
            setter(&mut v, r);
        }

        // Step 6: drop any row with a non-finite feature or label.
        if !v.all_finite() {
            continue;
        }

        out.push(v);
    }

    out
}

/// `microprice = (bid*ask_qty + ask*bid_qty) / (bid_qty+ask_qty)`, weighted
/// by the *opposite* side's quantity. Falls back to the mid price when both
/// sizes are zero.
pub fn microprice(bid: f64, ask: f64, bid_qty: f64, ask_qty: f64) -> f64 {
    let denom = bid_qty + ask_qty;
    if denom == 0.0 {
        return (bid + ask) / 2.0;
    }
    (bid * ask_qty + ask * bid_qty) / denom
}

/// Signed order-book imbalance in `[-1, 1]`; zero when both sides are empty.
pub fn order_book_imbalance(bid_qty: f64, ask_qty: f64) -> f64 {
    let denom = bid_qty + ask_qty;
    if denom == 0.0 {
        0.0
    } else {
        (bid_qty - ask_qty) / denom
    }
}

/// `ln(mid[i] / mid[j])` where `j` is the last index with
/// `ts[j] <= ts[i] - window_ns`. Missing predecessor yields `NaN`.
fn log_return_at(ts: &[i64], mid: &[f64], i: usize, window_ns: i64) -> f64 {
    let threshold = ts[i] - window_ns;
    match last_index_with_ts_at_most(ts, i, threshold) {
        Some(j) => (mid[i] / mid[j]).ln(),
        None => f64::NAN,
    }
}

fn last_index_with_ts_at_most(ts: &[i64], upto: usize, threshold: i64) -> Option<usize> {
    // ts[0..=upto] is sorted ascending; binary search for the last index
    // whose value is <= threshold.
    let slice = &ts[..=upto];
    match slice.binary_search(&threshold) {
        Ok(idx) => {
            // There may be duplicate timestamps; walk to the last match.
            let mut idx = idx;
            while idx + 1 < slice.len() && slice[idx + 1] == threshold {
                idx += 1;
            }
            Some(idx)
        }
        Err(insert_at) => insert_at.checked_sub(1),
    }
}

fn first_index_with_ts_at_least(ts: &[i64], from: usize, target: i64) -> Option<usize> {
    let slice = &ts[from..];
    match slice.binary_search(&target) {
        Ok(mut idx) => {
            while idx > 0 && slice[idx - 1] == target {
                idx -= 1;
            }
            Some(from + idx)
        }
        Err(insert_at) => {
            if insert_at < slice.len() {
                Some(from + insert_at)
            } else {
                None
            }
        }
    }
}

/// Incremental sliding-window standard deviation of `ret_1s` over the last
/// `window_ns`, using running `sum`/`sum_sq`. Only
/// finite samples participate in the window; fewer than two finite samples
/// in the window yields `NaN`.
fn rolling_volatility(ts: &[i64], ret_1s: &[f64], window_ns: i64) -> Vec<f64> {
    let mut out = vec![f64::NAN; ts.len()];
    let mut window: VecDeque<(i64, f64)> = VecDeque::new();
    let mut sum = 0.0;
    let mut sum_sq = 0.0;

    for i in 0..ts.len() {
        if ret_1s[i].is_finite() {
            window.push_back((ts[i], ret_1s[i]));
            sum += ret_1s[i];
            sum_sq += ret_1s[i] * ret_1s[i];
        }

        let cutoff = ts[i] - window_ns;
        while let Some(&(front_ts, front_val)) = window.front() {
            if front_ts < cutoff {
                sum -= front_val;
                sum_sq -= front_val * front_val;
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= 2 {
            let n = window.len() as f64;
            let mean = sum / n;
            let var = sum_sq / n - mean * mean;
            out[i] = var.max(0.0).sqrt();
        }
    }

    out
}
