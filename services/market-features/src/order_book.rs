//! Fixed-depth order book state builder
//!
//! Mirrors the top `depth` levels of an upstream book from snapshot and
//! update messages. Each side is a fixed-size slice kept in sort order:
//! asks ascending, bids descending, with EMPTY sentinels always last.
//!
//! Per incoming level `(price, qty)`:
//! - `qty <= 0` → remove the level if present, shift the tail up, pad EMPTY
//! - level present → replace its quantity in place
//! - otherwise → insert before the first level it must precede, shifting
//!   the rest down and dropping whatever falls off the end; a level worse
//!   than a full book is dropped
//!
//! Sequence gaps on updates are data-integrity warnings: they are logged
//! and reported but the message is still applied.

use std::cmp::Ordering;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use types::ids::InstrumentId;

use crate::events::{BookEventType, BookMessage};
use crate::snapshot::OrderBook;

/// A single (price, quantity) level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: f64,
    pub quantity: f64,
}

impl OrderBookLevel {
    /// Sentinel occupying an unfilled depth slot.
    pub const EMPTY: OrderBookLevel = OrderBookLevel {
        price: 0.0,
        quantity: 0.0,
    };

    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }

    pub fn is_empty(&self) -> bool {
        self.price == 0.0 && self.quantity == 0.0
    }

    /// Notional resting at this level.
    pub fn value(&self) -> f64 {
        self.price * self.quantity
    }
}

/// Book side, which fixes the sort order of its levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    /// Order of two levels on this side; EMPTY sorts after every real level.
    pub fn compare(&self, a: &OrderBookLevel, b: &OrderBookLevel) -> Ordering {
        match (a.is_empty(), b.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => match self {
                BookSide::Ask => a.price.total_cmp(&b.price),
                BookSide::Bid => b.price.total_cmp(&a.price),
            },
        }
    }
}

/// Outcome of applying one level to a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelChange {
    Inserted(usize),
    Updated(usize),
    Deleted(usize),
    /// Deletion of a price that was not present.
    Absent,
    /// Too deep to fit within the configured depth.
    Dropped,
    /// Non-finite or non-positive price.
    Rejected,
}

/// One side of the book: exactly `depth` slots, best level first.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSet {
    side: BookSide,
    levels: Vec<OrderBookLevel>,
}

impl LevelSet {
    pub fn new(side: BookSide, depth: usize) -> Self {
        Self {
            side,
            levels: vec![OrderBookLevel::EMPTY; depth.max(1)],
        }
    }

    pub fn side(&self) -> BookSide {
        self.side
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// All slots, including trailing EMPTY sentinels.
    pub fn levels(&self) -> &[OrderBookLevel] {
        &self.levels
    }

    /// Number of non-empty levels.
    pub fn filled(&self) -> usize {
        self.levels.iter().take_while(|l| !l.is_empty()).count()
    }

    pub fn best(&self) -> Option<&OrderBookLevel> {
        self.levels.first().filter(|l| !l.is_empty())
    }

    fn position(&self, price: f64) -> Option<usize> {
        self.levels
            .iter()
            .take_while(|l| !l.is_empty())
            .position(|l| l.price == price)
    }

    /// Apply one incoming level.
    pub fn apply(&mut self, level: OrderBookLevel) -> LevelChange {
        if !level.price.is_finite() || level.price <= 0.0 {
            return LevelChange::Rejected;
        }

        let existing = self.position(level.price);

        if level.quantity <= 0.0 || level.quantity.is_nan() {
            return match existing {
                Some(idx) => {
                    self.remove_at(idx);
                    LevelChange::Deleted(idx)
                }
                None => LevelChange::Absent,
            };
        }

        if let Some(idx) = existing {
            self.levels[idx].quantity = level.quantity;
            return LevelChange::Updated(idx);
        }

        let side = self.side;
        let slot = self
            .levels
            .iter()
            .position(|current| side.compare(&level, current) != Ordering::Greater);

        match slot {
            Some(idx) => {
                self.insert_at(idx, level);
                LevelChange::Inserted(idx)
            }
            None => LevelChange::Dropped,
        }
    }

    fn remove_at(&mut self, idx: usize) {
        let last = self.levels.len() - 1;
        self.levels.copy_within(idx + 1.., idx);
        self.levels[last] = OrderBookLevel::EMPTY;
    }

    fn insert_at(&mut self, idx: usize, level: OrderBookLevel) {
        let last = self.levels.len() - 1;
        self.levels.copy_within(idx..last, idx + 1);
        self.levels[idx] = level;
    }

    /// Reset every slot to EMPTY.
    pub fn clear(&mut self) {
        self.levels.fill(OrderBookLevel::EMPTY);
    }
}

/// A sequence id that did not follow its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceGap {
    pub expected: u64,
    pub received: u64,
}

/// Mirrored fixed-depth book for a single instrument.
#[derive(Debug, Clone)]
pub struct OrderBookState {
    pub symbol: InstrumentId,
    bids: LevelSet,
    asks: LevelSet,
    last_sequence: Option<u64>,
    last_timestamp: Option<NaiveDateTime>,
    gaps: u64,
    dropped_levels: u64,
}

impl OrderBookState {
    /// Create an empty book keeping `depth` levels per side.
    pub fn new(symbol: InstrumentId, depth: usize) -> Self {
        info!(symbol = %symbol, depth, "Order book initialized");
        Self {
            symbol,
            bids: LevelSet::new(BookSide::Bid, depth),
            asks: LevelSet::new(BookSide::Ask, depth),
            last_sequence: None,
            last_timestamp: None,
            gaps: 0,
            dropped_levels: 0,
        }
    }

    /// Apply a snapshot or update message.
    ///
    /// Returns the sequence gap when an update does not follow the previous
    /// message. The message is applied regardless. Snapshots replace both
    /// sides and re-baseline the sequence.
    pub fn apply(&mut self, message: &BookMessage) -> Option<SequenceGap> {
        let gap = match (message.kind, self.last_sequence) {
            (BookEventType::Update, Some(previous))
                if message.sequence != previous.wrapping_add(1) =>
            {
                let gap = SequenceGap {
                    expected: previous.wrapping_add(1),
                    received: message.sequence,
                };
                warn!(
                    symbol = %self.symbol,
                    expected = gap.expected,
                    received = gap.received,
                    "Order book sequence gap, book may be stale"
                );
                self.gaps += 1;
                Some(gap)
            }
            _ => None,
        };

        if message.kind == BookEventType::Snapshot {
            self.bids.clear();
            self.asks.clear();
        }

        for level in &message.bids {
            self.apply_level(BookSide::Bid, *level);
        }
        for level in &message.asks {
            self.apply_level(BookSide::Ask, *level);
        }

        self.last_sequence = Some(message.sequence);
        self.last_timestamp = Some(message.timestamp);

        debug!(
            symbol = %self.symbol,
            sequence = message.sequence,
            kind = ?message.kind,
            bid_levels = self.bids.filled(),
            ask_levels = self.asks.filled(),
            "Book message applied"
        );
        gap
    }

    fn apply_level(&mut self, side: BookSide, level: OrderBookLevel) -> LevelChange {
        let levels = match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        };
        let change = levels.apply(level);
        match change {
            LevelChange::Dropped => self.dropped_levels += 1,
            LevelChange::Rejected => {
                warn!(symbol = %self.symbol, price = level.price, side = ?side, "Ignoring level with invalid price");
            }
            _ => {}
        }
        change
    }

    /// Freeze the current state into an immutable snapshot.
    pub fn to_immutable_book(&self, event_type: BookEventType) -> OrderBook {
        OrderBook::new(
            self.symbol.clone(),
            self.last_timestamp.unwrap_or_default(),
            event_type,
            self.last_sequence.unwrap_or(0),
            self.bids.levels(),
            self.asks.levels(),
        )
    }

    pub fn bids(&self) -> &LevelSet {
        &self.bids
    }

    pub fn asks(&self) -> &LevelSet {
        &self.asks
    }

    pub fn depth(&self) -> usize {
        self.bids.depth()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Gaps detected since construction.
    pub fn gaps(&self) -> u64 {
        self.gaps
    }

    /// Levels discarded for being deeper than the book.
    pub fn dropped_levels(&self) -> u64 {
        self.dropped_levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(secs: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 0, secs)
            .unwrap()
    }

    fn lvl(price: f64, quantity: f64) -> OrderBookLevel {
        OrderBookLevel::new(price, quantity)
    }

    fn prices(set: &LevelSet) -> Vec<f64> {
        set.levels().iter().map(|l| l.price).collect()
    }

    fn make_book() -> OrderBookState {
        OrderBookState::new(InstrumentId::new("BTC/USDT"), 5)
    }

    #[test]
    fn test_empty_sorts_last_on_both_sides() {
        for side in [BookSide::Bid, BookSide::Ask] {
            assert_eq!(
                side.compare(&OrderBookLevel::EMPTY, &lvl(1.0, 1.0)),
                Ordering::Greater
            );
            assert_eq!(
                side.compare(&lvl(1.0, 1.0), &OrderBookLevel::EMPTY),
                Ordering::Less
            );
        }
    }

    #[test]
    fn test_ask_levels_ascending() {
        let mut asks = LevelSet::new(BookSide::Ask, 5);
        asks.apply(lvl(102.0, 1.0));
        asks.apply(lvl(100.0, 1.0));
        asks.apply(lvl(101.0, 1.0));
        assert_eq!(prices(&asks), vec![100.0, 101.0, 102.0, 0.0, 0.0]);
        assert_eq!(asks.filled(), 3);
    }

    #[test]
    fn test_bid_levels_descending() {
        let mut bids = LevelSet::new(BookSide::Bid, 3);
        bids.apply(lvl(99.0, 1.0));
        bids.apply(lvl(100.0, 1.0));
        bids.apply(lvl(98.0, 1.0));
        assert_eq!(prices(&bids), vec![100.0, 99.0, 98.0]);
        assert_eq!(bids.best().unwrap().price, 100.0);
    }

    #[test]
    fn test_update_in_place() {
        let mut bids = LevelSet::new(BookSide::Bid, 3);
        bids.apply(lvl(100.0, 1.0));
        bids.apply(lvl(99.0, 1.0));
        assert_eq!(bids.apply(lvl(99.0, 7.0)), LevelChange::Updated(1));
        assert_eq!(bids.levels()[1], lvl(99.0, 7.0));
    }

    #[test]
    fn test_delete_shifts_and_pads() {
        let mut asks = LevelSet::new(BookSide::Ask, 3);
        asks.apply(lvl(100.0, 1.0));
        asks.apply(lvl(101.0, 2.0));
        asks.apply(lvl(102.0, 3.0));

        assert_eq!(asks.apply(lvl(100.0, 0.0)), LevelChange::Deleted(0));
        assert_eq!(
            asks.levels(),
            &[lvl(101.0, 2.0), lvl(102.0, 3.0), OrderBookLevel::EMPTY]
        );

        assert_eq!(asks.apply(lvl(500.0, 0.0)), LevelChange::Absent);
    }

    #[test]
    fn test_insert_worse_than_full_book_is_noop() {
        let mut bids = LevelSet::new(BookSide::Bid, 2);
        bids.apply(lvl(100.0, 1.0));
        bids.apply(lvl(99.0, 1.0));
        let before = bids.clone();

        assert_eq!(bids.apply(lvl(98.0, 1.0)), LevelChange::Dropped);
        assert_eq!(bids, before);
    }

    #[test]
    fn test_insert_in_middle_drops_tail() {
        let mut asks = LevelSet::new(BookSide::Ask, 3);
        asks.apply(lvl(100.0, 1.0));
        asks.apply(lvl(102.0, 1.0));
        asks.apply(lvl(103.0, 1.0));

        assert_eq!(asks.apply(lvl(101.0, 5.0)), LevelChange::Inserted(1));
        assert_eq!(prices(&asks), vec![100.0, 101.0, 102.0]);
    }

    #[test]
    fn test_invalid_price_rejected() {
        let mut asks = LevelSet::new(BookSide::Ask, 3);
        assert_eq!(asks.apply(lvl(0.0, 1.0)), LevelChange::Rejected);
        assert_eq!(asks.apply(lvl(f64::NAN, 1.0)), LevelChange::Rejected);
        assert_eq!(asks.filled(), 0);
    }

    #[test]
    fn test_snapshot_replaces_book() {
        let mut book = make_book();
        book.apply(&BookMessage::snapshot(
            1,
            at(0),
            vec![lvl(99.0, 1.0), lvl(98.0, 2.0)],
            vec![lvl(101.0, 1.0)],
        ));
        book.apply(&BookMessage::snapshot(
            10,
            at(1),
            vec![lvl(95.0, 1.0)],
            vec![lvl(105.0, 1.0)],
        ));

        assert_eq!(book.bids().filled(), 1);
        assert_eq!(book.bids().best().unwrap().price, 95.0);
        assert_eq!(book.asks().best().unwrap().price, 105.0);
        assert_eq!(book.last_sequence(), Some(10));
        assert_eq!(book.gaps(), 0);
    }

    #[test]
    fn test_sequence_gap_is_reported_but_applied() {
        let mut book = make_book();
        book.apply(&BookMessage::snapshot(1, at(0), vec![lvl(99.0, 1.0)], vec![]));
        assert!(book
            .apply(&BookMessage::update(2, at(1), vec![lvl(98.0, 1.0)], vec![]))
            .is_none());

        let gap = book
            .apply(&BookMessage::update(5, at(2), vec![lvl(97.0, 1.0)], vec![]))
            .unwrap();
        assert_eq!(
            gap,
            SequenceGap {
                expected: 3,
                received: 5
            }
        );
        assert_eq!(book.bids().filled(), 3);
        assert_eq!(book.last_sequence(), Some(5));
        assert_eq!(book.gaps(), 1);
    }

    #[test]
    fn test_first_update_has_no_gap() {
        let mut book = make_book();
        assert!(book
            .apply(&BookMessage::update(42, at(0), vec![lvl(99.0, 1.0)], vec![]))
            .is_none());
    }

    #[test]
    fn test_immutable_book_is_independent_copy() {
        let mut book = make_book();
        book.apply(&BookMessage::snapshot(
            1,
            at(0),
            vec![lvl(99.0, 1.0)],
            vec![lvl(101.0, 1.0)],
        ));
        let frozen = book.to_immutable_book(BookEventType::Snapshot);

        book.apply(&BookMessage::update(2, at(1), vec![lvl(99.0, 0.0)], vec![]));

        assert_eq!(frozen.bids()[0], lvl(99.0, 1.0));
        assert_eq!(frozen.sequence(), 1);
        assert_eq!(frozen.timestamp(), at(0));
        assert_eq!(book.bids().filled(), 0);
    }
}
