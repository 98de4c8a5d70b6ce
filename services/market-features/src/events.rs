//! Market event definitions consumed by the feature pipeline
//!
//! Every event is immutable once created and compared structurally.
//! `MarketEvent` is the ingestion envelope accepted by
//! [`crate::pipeline::InstrumentPipeline::record`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use types::time::Timestamped;

use crate::order_book::OrderBookLevel;

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A public trade print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: NaiveDateTime,
    pub price: f64,
    pub quantity: f64,
    /// Aggressor side.
    pub side: TradeSide,
}

impl Trade {
    /// Traded value (price × quantity).
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }

    /// Quantity signed by aggressor side (buys positive).
    pub fn signed_quantity(&self) -> f64 {
        match self.side {
            TradeSide::Buy => self.quantity,
            TradeSide::Sell => -self.quantity,
        }
    }
}

impl Timestamped for Trade {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// An OHLCV bar covering `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Timestamped for Bar {
    /// Bars are stamped at their close.
    fn timestamp(&self) -> NaiveDateTime {
        self.end
    }
}

/// Which kind of book message produced an order book state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookEventType {
    /// Full replacement of both sides.
    Snapshot,
    /// Incremental level changes.
    Update,
}

/// Order book message from the upstream feed.
///
/// For `Snapshot` the level lists are the complete book. For `Update`
/// each level is a change: a zero quantity deletes the price level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookMessage {
    pub kind: BookEventType,
    /// Upstream sequence id, expected to increase by exactly one.
    pub sequence: u64,
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub bids: Vec<OrderBookLevel>,
    #[serde(default)]
    pub asks: Vec<OrderBookLevel>,
}

impl BookMessage {
    pub fn snapshot(
        sequence: u64,
        timestamp: NaiveDateTime,
        bids: Vec<OrderBookLevel>,
        asks: Vec<OrderBookLevel>,
    ) -> Self {
        Self {
            kind: BookEventType::Snapshot,
            sequence,
            timestamp,
            bids,
            asks,
        }
    }

    pub fn update(
        sequence: u64,
        timestamp: NaiveDateTime,
        bids: Vec<OrderBookLevel>,
        asks: Vec<OrderBookLevel>,
    ) -> Self {
        Self {
            kind: BookEventType::Update,
            sequence,
            timestamp,
            bids,
            asks,
        }
    }
}

impl Timestamped for BookMessage {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// Ingestion envelope for all events accepted by an instrument pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum MarketEvent {
    Book(BookMessage),
    Trade(Trade),
    Bar(Bar),
    /// Carries no data; lets the scheduler observe time during quiet markets.
    Heartbeat { timestamp: NaiveDateTime },
}

impl MarketEvent {
    /// Get the event type as a string label for logging.
    pub fn event_type_label(&self) -> &'static str {
        match self {
            MarketEvent::Book(msg) => match msg.kind {
                BookEventType::Snapshot => "BookSnapshot",
                BookEventType::Update => "BookUpdate",
            },
            MarketEvent::Trade(_) => "Trade",
            MarketEvent::Bar(_) => "Bar",
            MarketEvent::Heartbeat { .. } => "Heartbeat",
        }
    }
}

impl Timestamped for MarketEvent {
    fn timestamp(&self) -> NaiveDateTime {
        match self {
            MarketEvent::Book(msg) => msg.timestamp,
            MarketEvent::Trade(trade) => trade.timestamp,
            MarketEvent::Bar(bar) => bar.end,
            MarketEvent::Heartbeat { timestamp } => *timestamp,
        }
    }
}
