//! Strong newtype wrappers over the primitive quantities that flow through
//! the BBO pipeline: thin wrappers with arithmetic derived via
//! `impl_from_primitive!` /
//! `impl_add_sub_mul_div_primitive!`, so a `Price` can never be added to a
//! `Qty` by accident.

use serde::{Deserialize, Serialize};

use crate::{impl_add_sub_mul_div_primitive, impl_from_primitive, impl_neg_primitive};

/// Event timestamp in nanoseconds since the epoch. Monotone non-decreasing
/// within one symbol's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TsEventNanos(pub i64);
impl_from_primitive!(TsEventNanos, i64);

impl TsEventNanos {
    pub fn plus_millis(self, ms: i64) -> Self {
        Self(self.0 + ms * 1_000_000)
    }

    pub fn minus_millis(self, ms: i64) -> Self {
        Self(self.0 - ms * 1_000_000)
    }

    pub fn as_millis(self) -> i64 {
        self.0 / 1_000_000
    }
}

/// Per-symbol sequence number. Together with `TsEventNanos` forms the
/// stable total order `(ts_event, seq)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Seq(pub i64);
impl_from_primitive!(Seq, i64);

/// A top-of-book price level (bid or ask).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Price(pub f64);
impl_from_primitive!(Price, f64);
impl_add_sub_mul_div_primitive!(Price, f64);
impl_neg_primitive!(Price, f64);

/// A top-of-book quantity (bid or ask size).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Qty(pub f64);
impl_from_primitive!(Qty, f64);
impl_add_sub_mul_div_primitive!(Qty, f64);

/// The ordered total-order key for one event: `(ts_event, seq)`. Compared as
/// a pair of `i64`s, never coerced through `f64`, so timestamps and
/// sequence numbers beyond 53 bits sort correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey(pub TsEventNanos, pub Seq);

/// A single top-of-book market data event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BboEvent {
    pub ts_event: TsEventNanos,
    pub seq: Seq,
    pub bid_price: Price,
    pub ask_price: Price,
    pub bid_qty: Qty,
    pub ask_qty: Qty,
    pub symbol: String,
}

impl BboEvent {
    pub fn key(&self) -> EventKey {
        EventKey(self.ts_event, self.seq)
    }

    pub fn mid(&self) -> f64 {
        (self.bid_price.0 + self.ask_price.0) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask_price.0 - self.bid_price.0
    }
}
