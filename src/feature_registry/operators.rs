//! Concrete streaming feature operators. Each operator is a
//! small, independently resettable state machine operating on one scalar
//! (usually the mid price, spread, or order-book imbalance) per event.
//!
//! The shared `Ewm` and `Sma` helpers mirror
//! `math::indicator::{StreamingEwm, StreamingSma}` almost verbatim: same
//! recursive formula, same "initialize on first sample, warm after N
//! observations" contract. Everything downstream (EMA, RSI, ATR,
//! ImbalanceEMA, dual-EMA trend detection) is built on top of those two
//! primitives, the same way `StreamingRsi` is built on top of
//! `StreamingEwm` there.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::domain::BboEvent;

use super::{DerivedFeature, FeatureParams, StreamingFeature};

fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

// ================================================================================================
// Shared primitives
// ================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ewm {
    alpha: f64,
    mean: f64,
    initialized: bool,
    warm_after: usize,
    count: usize,
}

impl Ewm {
    fn new(alpha: f64, warm_after: usize) -> Self {
        Self { alpha, mean: 0.0, initialized: false, warm_after, count: 0 }
    }

    fn update(&mut self, value: f64) -> Option<f64> {
        if !self.initialized {
            self.mean = value;
            self.initialized = true;
            self.count = 1;
        } else {
            self.mean = self.alpha * value + (1.0 - self.alpha) * self.mean;
            self.count += 1;
        }
        (self.count >= self.warm_after).then_some(self.mean)
    }

    fn reset(&mut self) {
        self.initialized = false;
        self.mean = 0.0;
        self.count = 0;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sma {
    window: usize,
    buffer: VecDeque<f64>,
    sum: f64,
}

impl Sma {
    fn new(window: usize) -> Self {
        Self { window, buffer: VecDeque::with_capacity(window), sum: 0.0 }
    }

    fn update(&mut self, value: f64) -> Option<f64> {
        self.buffer.push_back(value);
        self.sum += value;
        if self.buffer.len() > self.window {
            if let Some(removed) = self.buffer.pop_front() {
                self.sum -= removed;
            }
        }
        (self.buffer.len() >= self.window).then(|| self.sum / self.buffer.len() as f64)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.sum = 0.0;
    }
}

/// Rolling population standard deviation over the last `window` samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RollingStd {
    window: usize,
    buffer: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
}

impl RollingStd {
    fn new(window: usize) -> Self {
        Self { window, buffer: VecDeque::with_capacity(window), sum: 0.0, sum_sq: 0.0 }
    }

    fn update(&mut self, value: f64) -> Option<f64> {
        self.buffer.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;
        if self.buffer.len() > self.window {
            if let Some(removed) = self.buffer.pop_front() {
                self.sum -= removed;
                self.sum_sq -= removed * removed;
            }
        }
        if self.buffer.len() < self.window {
            return None;
        }
        let n = self.buffer.len() as f64;
        let mean = self.sum / n;
        let var = self.sum_sq / n - mean * mean;
        Some(var.max(0.0).sqrt())
    }

    fn last_mean(&self) -> Option<f64> {
        (!self.buffer.is_empty()).then_some(self.sum / self.buffer.len() as f64)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
    }
}

fn window_param(params: &FeatureParams, default: u32) -> usize {
    params
        .period
        .or(params.window_size)
        .unwrap_or(default) as usize
}

// ================================================================================================
// Stateless-per-event primitives
// ================================================================================================

#[derive(Debug, Default)]
pub struct MidPrice;
impl StreamingFeature for MidPrice {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        Some(event.mid())
    }
    fn reset(&mut self) {}
}

#[derive(Debug, Default)]
pub struct Spread;
impl StreamingFeature for Spread {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        Some(event.spread())
    }
    fn reset(&mut self) {}
}

#[derive(Debug, Default)]
pub struct Microprice;
impl StreamingFeature for Microprice {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        Some(crate::feature_builder_v1::microprice(
            event.bid_price.0,
            event.ask_price.0,
            event.bid_qty.0,
            event.ask_qty.0,
        ))
    }
    fn reset(&mut self) {}
}

#[derive(Debug, Default)]
pub struct ImbalanceRaw;
impl StreamingFeature for ImbalanceRaw {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        Some(crate::feature_builder_v1::order_book_imbalance(
            event.bid_qty.0,
            event.ask_qty.0,
        ))
    }
    fn reset(&mut self) {}
}

// ================================================================================================
// Return1: proportional change in mid price between consecutive events.
// ================================================================================================

#[derive(Debug, Default)]
pub struct Return1 {
    prev_mid: Option<f64>,
}
impl StreamingFeature for Return1 {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let mid = event.mid();
        let out = self.prev_mid.map(|prev| (mid - prev) / prev);
        self.prev_mid = Some(mid);
        out
    }
    fn reset(&mut self) {
        self.prev_mid = None;
    }
}

// ================================================================================================
// Volatility: rolling std of proportional Return1, window by sample count.
//
// Open Question (a) resolution: this drops samples strictly by index count
// equal to `window`, not by elapsed wall-clock time. Kept intentionally —
// see DESIGN.md.
// ================================================================================================

#[derive(Debug)]
pub struct Volatility {
    ret: Return1,
    std: RollingStd,
}
impl Volatility {
    pub fn new(params: &FeatureParams) -> Self {
        let window = window_param(params, 10);
        Self { ret: Return1::default(), std: RollingStd::new(window) }
    }
}
impl StreamingFeature for Volatility {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let r = self.ret.on_event(event)?;
        self.std.update(r)
    }
    fn reset(&mut self) {
        self.ret.reset();
        self.std.reset();
    }
}

// ================================================================================================
// EMA / RSI over mid price (teacher's StreamingEwm / StreamingRsi, adapted)
// ================================================================================================

#[derive(Debug)]
pub struct Ema {
    inner: Ewm,
}
impl Ema {
    pub fn new(params: &FeatureParams) -> Self {
        let window = window_param(params, 10);
        let alpha = 2.0 / (window as f64 + 1.0);
        Self { inner: Ewm::new(alpha, window) }
    }
}
impl StreamingFeature for Ema {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        self.inner.update(event.mid())
    }
    fn reset(&mut self) {
        self.inner.reset();
    }
}

#[derive(Debug)]
pub struct Rsi {
    prev: Option<f64>,
    avg_gain: Ewm,
    avg_loss: Ewm,
}
impl Rsi {
    pub fn new(params: &FeatureParams) -> Self {
        let window = window_param(params, 14);
        let alpha = 1.0 / window as f64;
        Self { prev: None, avg_gain: Ewm::new(alpha, window), avg_loss: Ewm::new(alpha, window) }
    }
}
impl StreamingFeature for Rsi {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let value = event.mid();
        let prev = match self.prev {
            Some(p) => p,
            None => {
                self.prev = Some(value);
                return None;
            }
        };
        let delta = value - prev;
        self.prev = Some(value);
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, delta.abs()) };
        match (self.avg_gain.update(gain), self.avg_loss.update(loss)) {
            (Some(ag), Some(al)) => {
                if al == 0.0 {
                    Some(if ag == 0.0 { 50.0 } else { 100.0 })
                } else {
                    let rs = ag / al;
                    Some(100.0 - 100.0 / (1.0 + rs))
                }
            }
            _ => None,
        }
    }
    fn reset(&mut self) {
        self.prev = None;
        self.avg_gain.reset();
        self.avg_loss.reset();
    }
}

// ================================================================================================
// ATR: SMA of max(spread, |delta mid|)
// ================================================================================================

#[derive(Debug)]
pub struct Atr {
    prev_mid: Option<f64>,
    sma: Sma,
}
impl Atr {
    pub fn new(params: &FeatureParams) -> Self {
        Self { prev_mid: None, sma: Sma::new(window_param(params, 14)) }
    }
}
impl StreamingFeature for Atr {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let mid = event.mid();
        let true_range = match self.prev_mid {
            Some(prev) => event.spread().max((mid - prev).abs()),
            None => event.spread(),
        };
        self.prev_mid = Some(mid);
        self.sma.update(true_range)
    }
    fn reset(&mut self) {
        self.prev_mid = None;
        self.sma.reset();
    }
}

// ================================================================================================
// ROC: proportional change over N steps (ring buffer of last N mids)
// ================================================================================================

#[derive(Debug)]
pub struct Roc {
    window: usize,
    buffer: VecDeque<f64>,
}
impl Roc {
    pub fn new(params: &FeatureParams) -> Self {
        Self { window: window_param(params, 10), buffer: VecDeque::new() }
    }
}
impl StreamingFeature for Roc {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let mid = event.mid();
        self.buffer.push_back(mid);
        if self.buffer.len() > self.window + 1 {
            self.buffer.pop_front();
        }
        if self.buffer.len() <= self.window {
            return None;
        }
        let oldest = self.buffer.front().copied().unwrap();
        Some((mid - oldest) / oldest)
    }
    fn reset(&mut self) {
        self.buffer.clear();
    }
}

// ================================================================================================
// VolatilityRegime: ratio of short-window vol to long-window vol -> {0,1,2}
// ================================================================================================

#[derive(Debug)]
pub struct VolatilityRegime {
    short: Volatility,
    long: Volatility,
    low_t: f64,
    high_t: f64,
    last: Option<f64>,
}
impl VolatilityRegime {
    pub fn new(params: &FeatureParams) -> Self {
        let short_params = FeatureParams { period: params.short_window.or(Some(5)), ..Default::default() };
        let long_params = FeatureParams { period: params.long_window.or(Some(30)), ..Default::default() };
        Self {
            short: Volatility::new(&short_params),
            long: Volatility::new(&long_params),
            low_t: params.low_threshold.unwrap_or(0.7),
            high_t: params.high_threshold.unwrap_or(1.3),
            last: None,
        }
    }
}
impl StreamingFeature for VolatilityRegime {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let s = self.short.on_event(event);
        let l = self.long.on_event(event);
        // A zero long-window volatility (a perfectly still long window) is
        // a reachable, not a cold-start, state once warm; hold the last
        // emitted regime bucket rather than regressing to null (invariant:
        // a feature that has emitted once does not regress to null before
        // `reset()`).
        match (s, l) {
            (Some(s), Some(l)) if l != 0.0 => {
                let ratio = s / l;
                let regime = if ratio < self.low_t {
                    0.0
                } else if ratio > self.high_t {
                    2.0
                } else {
                    1.0
                };
                self.last = Some(regime);
                Some(regime)
            }
            (Some(_), Some(_)) => self.last,
            _ => None,
        }
    }
    fn reset(&mut self) {
        self.short.reset();
        self.long.reset();
        self.last = None;
    }
}

// ================================================================================================
// TrendRegime: dual EMA + slope threshold -> {-1,0,1}
// ================================================================================================

#[derive(Debug)]
pub struct TrendRegime {
    short: Ewm,
    long: Ewm,
    slope_threshold: f64,
    last: Option<f64>,
}
impl TrendRegime {
    pub fn new(params: &FeatureParams) -> Self {
        let short_window = params.short_window.unwrap_or(5);
        let long_window = params.long_window.unwrap_or(30);
        Self {
            short: Ewm::new(2.0 / (short_window as f64 + 1.0), short_window as usize),
            long: Ewm::new(2.0 / (long_window as f64 + 1.0), long_window as usize),
            slope_threshold: params.slope_threshold.unwrap_or(0.0005),
            last: None,
        }
    }
}
impl StreamingFeature for TrendRegime {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let mid = event.mid();
        // A zero long EMA (mid price at exactly zero) holds the last
        // emitted regime rather than regressing to null once warm.
        match (self.short.update(mid), self.long.update(mid)) {
            (Some(s), Some(l)) if l != 0.0 => {
                let diff = (s - l) / l;
                let regime = if diff > self.slope_threshold {
                    1.0
                } else if diff < -self.slope_threshold {
                    -1.0
                } else {
                    0.0
                };
                self.last = Some(regime);
                Some(regime)
            }
            (Some(_), Some(_)) => self.last,
            _ => None,
        }
    }
    fn reset(&mut self) {
        self.short.reset();
        self.long.reset();
        self.last = None;
    }
}

// ================================================================================================
// SpreadRegime: current/avg spread -> {0,1,2}
// ================================================================================================

#[derive(Debug)]
pub struct SpreadRegime {
    sma: Sma,
    low_t: f64,
    high_t: f64,
    last: Option<f64>,
}
impl SpreadRegime {
    pub fn new(params: &FeatureParams) -> Self {
        Self {
            sma: Sma::new(window_param(params, 30)),
            low_t: params.low_threshold.unwrap_or(0.8),
            high_t: params.high_threshold.unwrap_or(1.2),
            last: None,
        }
    }
}
impl StreamingFeature for SpreadRegime {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let spread = event.spread();
        // A locked market (bid == ask, spread == 0 across the whole
        // window) is a reachable zero average spread, not a cold-start
        // state; hold the last emitted regime rather than regressing to
        // null once warm.
        match self.sma.update(spread) {
            Some(avg) if avg != 0.0 => {
                let ratio = spread / avg;
                let regime = if ratio < self.low_t {
                    0.0
                } else if ratio > self.high_t {
                    2.0
                } else {
                    1.0
                };
                self.last = Some(regime);
                Some(regime)
            }
            Some(_) => self.last,
            None => None,
        }
    }
    fn reset(&mut self) {
        self.sma.reset();
        self.last = None;
    }
}

// ================================================================================================
// ImbalanceEMA
// ================================================================================================

#[derive(Debug)]
pub struct ImbalanceEma {
    inner: Ewm,
}
impl ImbalanceEma {
    pub fn new(params: &FeatureParams) -> Self {
        let window = window_param(params, 10);
        Self { inner: Ewm::new(2.0 / (window as f64 + 1.0), window) }
    }
}
impl StreamingFeature for ImbalanceEma {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let imb = crate::feature_builder_v1::order_book_imbalance(event.bid_qty.0, event.ask_qty.0);
        self.inner.update(imb)
    }
    fn reset(&mut self) {
        self.inner.reset();
    }
}

// ================================================================================================
// EMASlope(lookback): proportional change of the EMA over `lookback` samples
// ================================================================================================

#[derive(Debug)]
pub struct EmaSlope {
    ema: Ewm,
    lookback: usize,
    history: VecDeque<f64>,
}
impl EmaSlope {
    pub fn new(params: &FeatureParams) -> Self {
        let window = window_param(params, 10);
        let lookback = params.lookback.unwrap_or(5) as usize;
        Self {
            ema: Ewm::new(2.0 / (window as f64 + 1.0), window),
            lookback,
            history: VecDeque::new(),
        }
    }
}
impl StreamingFeature for EmaSlope {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let ema = self.ema.update(event.mid())?;
        self.history.push_back(ema);
        if self.history.len() > self.lookback + 1 {
            self.history.pop_front();
        }
        if self.history.len() <= self.lookback {
            return None;
        }
        let oldest = self.history.front().copied().unwrap();
        if oldest == 0.0 {
            return None;
        }
        Some((ema - oldest) / oldest)
    }
    fn reset(&mut self) {
        self.ema.reset();
        self.history.clear();
    }
}

// ================================================================================================
// BollingerPosition(period, k): (mid - sma) / (k * std)
// ================================================================================================

#[derive(Debug)]
pub struct BollingerPosition {
    std: RollingStd,
    k: f64,
}
impl BollingerPosition {
    pub fn new(params: &FeatureParams) -> Self {
        Self { std: RollingStd::new(window_param(params, 20)), k: params.k.unwrap_or(2.0) }
    }
}
impl StreamingFeature for BollingerPosition {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let mid = event.mid();
        let std = self.std.update(mid)?;
        let mean = self.std.last_mean()?;
        if std == 0.0 {
            return Some(0.0);
        }
        Some((mid - mean) / (self.k * std))
    }
    fn reset(&mut self) {
        self.std.reset();
    }
}

// ================================================================================================
// LiquidityPressure in [-1,1]: EMA-smoothed order-book imbalance.
// ================================================================================================

#[derive(Debug)]
pub struct LiquidityPressure {
    inner: Ewm,
}
impl LiquidityPressure {
    pub fn new(params: &FeatureParams) -> Self {
        let window = window_param(params, 5);
        Self { inner: Ewm::new(2.0 / (window as f64 + 1.0), window) }
    }
}
impl StreamingFeature for LiquidityPressure {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let imb = crate::feature_builder_v1::order_book_imbalance(event.bid_qty.0, event.ask_qty.0);
        self.inner.update(imb).map(|v| clamp(v, -1.0, 1.0))
    }
    fn reset(&mut self) {
        self.inner.reset();
    }
}

// ================================================================================================
// ReturnMomentum in [-1,1]: tanh of the average recent Return1 over a scale.
// ================================================================================================

#[derive(Debug)]
pub struct ReturnMomentum {
    ret: Return1,
    sma: Sma,
    scale: f64,
}
impl ReturnMomentum {
    pub fn new(params: &FeatureParams) -> Self {
        Self {
            ret: Return1::default(),
            sma: Sma::new(window_param(params, 10)),
            scale: params.k.unwrap_or(0.001),
        }
    }
}
impl StreamingFeature for ReturnMomentum {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let r = self.ret.on_event(event)?;
        self.sma.update(r).map(|avg| (avg / self.scale).tanh())
    }
    fn reset(&mut self) {
        self.ret.reset();
        self.sma.reset();
    }
}

// ================================================================================================
// RegimeStability in [0,1]: fraction of the last `window` dual-EMA trend
// signs matching the most recent sign.
// ================================================================================================

#[derive(Debug)]
pub struct RegimeStability {
    short: Ewm,
    long: Ewm,
    window: usize,
    history: VecDeque<i8>,
    last: Option<f64>,
}
impl RegimeStability {
    pub fn new(params: &FeatureParams) -> Self {
        let short_window = params.short_window.unwrap_or(5);
        let long_window = params.long_window.unwrap_or(30);
        Self {
            short: Ewm::new(2.0 / (short_window as f64 + 1.0), short_window as usize),
            long: Ewm::new(2.0 / (long_window as f64 + 1.0), long_window as usize),
            window: window_param(params, 20),
            history: VecDeque::new(),
            last: None,
        }
    }
}
impl StreamingFeature for RegimeStability {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let mid = event.mid();
        let (s, l) = (self.short.update(mid), self.long.update(mid));
        let (Some(s), Some(l)) = (s, l) else { return None };
        // A zero long EMA is a reachable steady state once warm, not a
        // cold-start condition; hold the last emitted stability score
        // rather than regressing to null.
        if l == 0.0 {
            return self.last;
        }
        let sign: i8 = if s > l { 1 } else if s < l { -1 } else { 0 };
        self.history.push_back(sign);
        if self.history.len() > self.window {
            self.history.pop_front();
        }
        if self.history.len() < self.window {
            return None;
        }
        let latest = *self.history.back().unwrap();
        let matches = self.history.iter().filter(|&&s| s == latest).count();
        let stability = matches as f64 / self.history.len() as f64;
        self.last = Some(stability);
        Some(stability)
    }
    fn reset(&mut self) {
        self.short.reset();
        self.long.reset();
        self.history.clear();
        self.last = None;
    }
}

// ================================================================================================
// SpreadCompression in [-1,1]: (avg - current) / avg, clamped.
// ================================================================================================

#[derive(Debug)]
pub struct SpreadCompression {
    sma: Sma,
    last: Option<f64>,
}
impl SpreadCompression {
    pub fn new(params: &FeatureParams) -> Self {
        Self { sma: Sma::new(window_param(params, 30)), last: None }
    }
}
impl StreamingFeature for SpreadCompression {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let spread = event.spread();
        // A zero average spread (locked market over the whole window) is
        // reachable once warm; hold the last emitted value.
        match self.sma.update(spread) {
            Some(avg) if avg != 0.0 => {
                let value = clamp((avg - spread) / avg, -1.0, 1.0);
                self.last = Some(value);
                Some(value)
            }
            Some(_) => self.last,
            None => None,
        }
    }
    fn reset(&mut self) {
        self.sma.reset();
        self.last = None;
    }
}

// ================================================================================================
// ImbalanceAcceleration in [-1,1]: delta of order-book imbalance, clamped.
// ================================================================================================

#[derive(Debug, Default)]
pub struct ImbalanceAcceleration {
    prev: Option<f64>,
}
impl StreamingFeature for ImbalanceAcceleration {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let imb = crate::feature_builder_v1::order_book_imbalance(event.bid_qty.0, event.ask_qty.0);
        let out = self.prev.map(|prev| clamp(imb - prev, -1.0, 1.0));
        self.prev = Some(imb);
        out
    }
    fn reset(&mut self) {
        self.prev = None;
    }
}

// ================================================================================================
// MicroReversion in [0,1]: normalized distance of microprice from mid.
// ================================================================================================

#[derive(Debug, Default)]
pub struct MicroReversion;
impl StreamingFeature for MicroReversion {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let spread = event.spread();
        if spread <= 0.0 {
            return Some(0.0);
        }
        let mid = event.mid();
        let micro = crate::feature_builder_v1::microprice(
            event.bid_price.0,
            event.ask_price.0,
            event.bid_qty.0,
            event.ask_qty.0,
        );
        Some(clamp((micro - mid).abs() / spread, 0.0, 1.0))
    }
    fn reset(&mut self) {}
}

// ================================================================================================
// QuoteIntensity in [0,1]: percentile rank of trailing events/sec over a
// long rolling history of such rates.
// ================================================================================================

#[derive(Debug)]
pub struct QuoteIntensity {
    window_ns: i64,
    recent_events: VecDeque<i64>,
    rate_history: VecDeque<f64>,
    history_cap: usize,
}
impl QuoteIntensity {
    pub fn new(params: &FeatureParams) -> Self {
        let window_sec = params.period.unwrap_or(60) as i64;
        Self {
            window_ns: window_sec * 1_000_000_000,
            recent_events: VecDeque::new(),
            rate_history: VecDeque::new(),
            history_cap: window_param(params, 100),
        }
    }
}
impl StreamingFeature for QuoteIntensity {
    fn on_event(&mut self, event: &BboEvent) -> Option<f64> {
        let ts = event.ts_event.0;
        self.recent_events.push_back(ts);
        while let Some(&front) = self.recent_events.front() {
            if ts - front > self.window_ns {
                self.recent_events.pop_front();
            } else {
                break;
            }
        }
        let rate = self.recent_events.len() as f64;

        self.rate_history.push_back(rate);
        if self.rate_history.len() > self.history_cap {
            self.rate_history.pop_front();
        }
        if self.rate_history.len() < self.history_cap.min(10) {
            return None;
        }
        let below = self.rate_history.iter().filter(|&&r| r <= rate).count();
        Some(below as f64 / self.rate_history.len() as f64)
    }
    fn reset(&mut self) {
        self.recent_events.clear();
        self.rate_history.clear();
    }
}

// ================================================================================================
// Derived features: consume the resolved current vector, not raw events.
// ================================================================================================

/// Disagreement between trend direction and order-flow imbalance direction.
/// In `[-1, 1]`: 0 when they agree, extremal when they disagree strongly.
#[derive(Debug, Default)]
pub struct BehaviorDivergence;
impl DerivedFeature for BehaviorDivergence {
    fn dependencies(&self) -> &[&'static str] {
        &["trend_regime", "imbalance_ema"]
    }
    fn compute(&mut self, deps: &[f64]) -> Option<f64> {
        let trend = deps[0];
        let imbalance_component = clamp(deps[1] * 2.0, -1.0, 1.0);
        Some(clamp((trend - imbalance_component) / 2.0, -1.0, 1.0))
    }
    fn reset(&mut self) {}
}

/// Composite `[0,1]` score that's high when volatility is in its low regime
/// and the spread is compressed relative to its recent average — a signal
/// that the market is in a "coiled" state.
#[derive(Debug, Default)]
pub struct VolatilityCompressionScore;
impl DerivedFeature for VolatilityCompressionScore {
    fn dependencies(&self) -> &[&'static str] {
        &["volatility_regime", "spread_compression"]
    }
    fn compute(&mut self, deps: &[f64]) -> Option<f64> {
        let vol_regime = deps[0];
        let spread_compression = deps[1];
        let vol_component = if vol_regime == 0.0 { 1.0 } else { 0.0 };
        let spread_component = clamp(spread_compression, 0.0, 1.0);
        Some(clamp(0.5 * vol_component + 0.5 * spread_component, 0.0, 1.0))
    }
    fn reset(&mut self) {}
}
