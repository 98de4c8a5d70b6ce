//! Per-event feature extractors
//!
//! A [`Feature`] maps one event to one `f64`. Features are pure and carry a
//! stable identifier, which becomes part of an indicator's state key.
//!
//! The standard extractors live in a [`FeatureCatalog`] that is built once
//! and passed around by reference, so independent pipelines never share
//! hidden mutable state.

use std::collections::BTreeMap;
use std::fmt;

use types::errors::FeatureError;

use crate::events::{Bar, Trade};
use crate::scheduler::PeriodicFeatureResult;
use crate::snapshot::OrderBook;

/// Pure extractor from one event to one value.
pub trait Feature<T>: Send + Sync {
    /// Stable identifier of this feature.
    fn id(&self) -> &str;

    fn extract(&self, event: &T) -> f64;
}

/// A named function-pointer feature.
pub struct NamedFeature<T> {
    name: &'static str,
    extractor: fn(&T) -> f64,
}

impl<T> NamedFeature<T> {
    pub const fn new(name: &'static str, extractor: fn(&T) -> f64) -> Self {
        Self { name, extractor }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for NamedFeature<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NamedFeature<T> {}

impl<T> fmt::Debug for NamedFeature<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NamedFeature").field(&self.name).finish()
    }
}

impl<T> Feature<T> for NamedFeature<T> {
    fn id(&self) -> &str {
        self.name
    }

    fn extract(&self, event: &T) -> f64 {
        (self.extractor)(event)
    }
}

/// Reads one named value from a periodic result; 0 when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultField {
    name: String,
}

impl ResultField {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Feature<PeriodicFeatureResult> for ResultField {
    fn id(&self) -> &str {
        &self.name
    }

    fn extract(&self, event: &PeriodicFeatureResult) -> f64 {
        event.get(&self.name).unwrap_or(0.0)
    }
}

const BOOK_FEATURES: &[NamedFeature<OrderBook>] = &[
    NamedFeature::new("best_bid", OrderBook::best_bid),
    NamedFeature::new("best_ask", OrderBook::best_ask),
    NamedFeature::new("bid_quantity", OrderBook::best_bid_quantity),
    NamedFeature::new("ask_quantity", OrderBook::best_ask_quantity),
    NamedFeature::new("spread", OrderBook::spread),
    NamedFeature::new("mid", OrderBook::mid),
    NamedFeature::new("bid_value", OrderBook::bid_value),
    NamedFeature::new("ask_value", OrderBook::ask_value),
    NamedFeature::new("value_ratio", OrderBook::value_ratio),
    NamedFeature::new("quantity_ratio", OrderBook::quantity_ratio),
    NamedFeature::new("wap", OrderBook::wap),
    NamedFeature::new("cross_wap", OrderBook::cross_wap),
    NamedFeature::new("voi", OrderBook::voi),
];

fn trade_price(trade: &Trade) -> f64 {
    trade.price
}

fn trade_quantity(trade: &Trade) -> f64 {
    trade.quantity
}

fn bar_open(bar: &Bar) -> f64 {
    bar.open
}

fn bar_high(bar: &Bar) -> f64 {
    bar.high
}

fn bar_low(bar: &Bar) -> f64 {
    bar.low
}

fn bar_close(bar: &Bar) -> f64 {
    bar.close
}

fn bar_volume(bar: &Bar) -> f64 {
    bar.volume
}

const TRADE_FEATURES: &[NamedFeature<Trade>] = &[
    NamedFeature::new("price", trade_price),
    NamedFeature::new("quantity", trade_quantity),
    NamedFeature::new("notional", Trade::notional),
    NamedFeature::new("signed_quantity", Trade::signed_quantity),
];

const BAR_FEATURES: &[NamedFeature<Bar>] = &[
    NamedFeature::new("open", bar_open),
    NamedFeature::new("high", bar_high),
    NamedFeature::new("low", bar_low),
    NamedFeature::new("close", bar_close),
    NamedFeature::new("volume", bar_volume),
];

/// Registry of the standard extractors, keyed by name per event type.
#[derive(Debug, Clone)]
pub struct FeatureCatalog {
    book: BTreeMap<&'static str, NamedFeature<OrderBook>>,
    trades: BTreeMap<&'static str, NamedFeature<Trade>>,
    bars: BTreeMap<&'static str, NamedFeature<Bar>>,
}

fn index<T>(features: &[NamedFeature<T>]) -> BTreeMap<&'static str, NamedFeature<T>> {
    features.iter().map(|f| (f.name(), *f)).collect()
}

fn lookup<'a, T>(
    features: &'a BTreeMap<&'static str, NamedFeature<T>>,
    name: &str,
) -> Result<&'a NamedFeature<T>, FeatureError> {
    features.get(name).ok_or_else(|| FeatureError::UnknownFeature {
        name: name.to_string(),
    })
}

impl FeatureCatalog {
    pub fn standard() -> Self {
        Self {
            book: index(BOOK_FEATURES),
            trades: index(TRADE_FEATURES),
            bars: index(BAR_FEATURES),
        }
    }

    pub fn book(&self, name: &str) -> Result<&NamedFeature<OrderBook>, FeatureError> {
        lookup(&self.book, name)
    }

    pub fn trade(&self, name: &str) -> Result<&NamedFeature<Trade>, FeatureError> {
        lookup(&self.trades, name)
    }

    pub fn bar(&self, name: &str) -> Result<&NamedFeature<Bar>, FeatureError> {
        lookup(&self.bars, name)
    }

    pub fn book_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.book.keys().copied()
    }

    pub fn trade_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.trades.keys().copied()
    }

    pub fn bar_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.bars.keys().copied()
    }
}

impl Default for FeatureCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
