//! Immutable order book snapshots
//!
//! An [`OrderBook`] is produced once per applied book message and never
//! mutated afterwards. Derived metrics are computed on first access and
//! memoized on the instance.
//!
//! All ratios guard their denominator: an empty side or a zero total
//! yields 0 rather than NaN or infinity.

use std::sync::OnceLock;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use types::ids::InstrumentId;
use types::time::Timestamped;

use crate::events::BookEventType;
use crate::order_book::OrderBookLevel;

#[derive(Debug, Clone, Default)]
struct Memo {
    spread: OnceLock<f64>,
    mid: OnceLock<f64>,
    bid_value: OnceLock<f64>,
    ask_value: OnceLock<f64>,
    bid_quantity: OnceLock<f64>,
    ask_quantity: OnceLock<f64>,
    wap: OnceLock<f64>,
    cross_wap: OnceLock<f64>,
}

/// Frozen fixed-depth view of a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    symbol: InstrumentId,
    timestamp: NaiveDateTime,
    event_type: BookEventType,
    sequence: u64,
    /// Best first, EMPTY padded.
    bids: Box<[OrderBookLevel]>,
    /// Best first, EMPTY padded.
    asks: Box<[OrderBookLevel]>,
    #[serde(skip)]
    memo: Memo,
}

impl OrderBook {
    pub fn new(
        symbol: InstrumentId,
        timestamp: NaiveDateTime,
        event_type: BookEventType,
        sequence: u64,
        bids: &[OrderBookLevel],
        asks: &[OrderBookLevel],
    ) -> Self {
        Self {
            symbol,
            timestamp,
            event_type,
            sequence,
            bids: bids.into(),
            asks: asks.into(),
            memo: Memo::default(),
        }
    }

    pub fn symbol(&self) -> &InstrumentId {
        &self.symbol
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn event_type(&self) -> BookEventType {
        self.event_type
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn bids(&self) -> &[OrderBookLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[OrderBookLevel] {
        &self.asks
    }

    fn filled(levels: &[OrderBookLevel]) -> impl Iterator<Item = &OrderBookLevel> {
        levels.iter().take_while(|l| !l.is_empty())
    }

    fn top(levels: &[OrderBookLevel]) -> OrderBookLevel {
        levels.first().copied().unwrap_or(OrderBookLevel::EMPTY)
    }

    /// Best bid price, 0 when the side is empty.
    pub fn best_bid(&self) -> f64 {
        Self::top(&self.bids).price
    }

    /// Best ask price, 0 when the side is empty.
    pub fn best_ask(&self) -> f64 {
        Self::top(&self.asks).price
    }

    pub fn best_bid_quantity(&self) -> f64 {
        Self::top(&self.bids).quantity
    }

    pub fn best_ask_quantity(&self) -> f64 {
        Self::top(&self.asks).quantity
    }

    fn has_both_sides(&self) -> bool {
        !Self::top(&self.bids).is_empty() && !Self::top(&self.asks).is_empty()
    }

    /// `ask0 - bid0`, 0 unless both sides are present.
    pub fn spread(&self) -> f64 {
        *self.memo.spread.get_or_init(|| {
            if self.has_both_sides() {
                self.best_ask() - self.best_bid()
            } else {
                0.0
            }
        })
    }

    /// Midpoint of the best prices, 0 unless both sides are present.
    pub fn mid(&self) -> f64 {
        *self.memo.mid.get_or_init(|| {
            if self.has_both_sides() {
                (self.best_ask() + self.best_bid()) / 2.0
            } else {
                0.0
            }
        })
    }

    /// Σ price × quantity over the bid side.
    pub fn bid_value(&self) -> f64 {
        *self
            .memo
            .bid_value
            .get_or_init(|| Self::filled(&self.bids).map(OrderBookLevel::value).sum())
    }

    /// Σ price × quantity over the ask side.
    pub fn ask_value(&self) -> f64 {
        *self
            .memo
            .ask_value
            .get_or_init(|| Self::filled(&self.asks).map(OrderBookLevel::value).sum())
    }

    /// Total quantity resting on the bid side.
    pub fn bid_quantity(&self) -> f64 {
        *self
            .memo
            .bid_quantity
            .get_or_init(|| Self::filled(&self.bids).map(|l| l.quantity).sum())
    }

    /// Total quantity resting on the ask side.
    pub fn ask_quantity(&self) -> f64 {
        *self
            .memo
            .ask_quantity
            .get_or_init(|| Self::filled(&self.asks).map(|l| l.quantity).sum())
    }

    pub fn value_ratio(&self) -> f64 {
        ratio(self.bid_value(), self.ask_value())
    }

    pub fn quantity_ratio(&self) -> f64 {
        ratio(self.bid_quantity(), self.ask_quantity())
    }

    /// Volume-weighted price over every level of both sides.
    pub fn wap(&self) -> f64 {
        *self.memo.wap.get_or_init(|| {
            ratio(
                self.bid_value() + self.ask_value(),
                self.bid_quantity() + self.ask_quantity(),
            )
        })
    }

    /// Cross-weighted price over matching depths.
    ///
    /// At each depth `i` with both sides present, the bid price is weighted
    /// by the ask quantity and vice versa.
    pub fn cross_wap(&self) -> f64 {
        *self.memo.cross_wap.get_or_init(|| {
            let (weighted, quantity) = Self::filled(&self.bids)
                .zip(Self::filled(&self.asks))
                .fold((0.0, 0.0), |(weighted, quantity), (bid, ask)| {
                    (
                        weighted + bid.price * ask.quantity + ask.price * bid.quantity,
                        quantity + bid.quantity + ask.quantity,
                    )
                });
            ratio(weighted, quantity)
        })
    }

    /// Volume-order imbalance `bidQty / (bidQty + askQty)`, 0 without bids.
    pub fn voi(&self) -> f64 {
        let bids = self.bid_quantity();
        if bids <= 0.0 {
            return 0.0;
        }
        ratio(bids, bids + self.ask_quantity())
    }
}

impl PartialEq for OrderBook {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.timestamp == other.timestamp
            && self.event_type == other.event_type
            && self.sequence == other.sequence
            && self.bids == other.bids
            && self.asks == other.asks
    }
}

impl Timestamped for OrderBook {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}
