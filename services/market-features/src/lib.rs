//! Market Feature Pipeline
//!
//! Turns an unbounded stream of market events (order book messages,
//! trades, bars) into:
//! - Bounded, time-ordered histories sliced by duration, count or predicate
//! - Immutable order book snapshots with memoized derived metrics
//! - Reductions and stateful indicators (EMA, RSI) over any window
//! - One periodic feature result per trading-calendar period, with
//!   catch-up and filler semantics
//!
//! All time-based decisions go through an injected [`types::time::Clock`],
//! so the same journal always replays to the same results.
//!
//! # Architecture
//!
//! ```text
//!   MarketEvent
//!        │
//!   ┌────┴──────────┬────────────┐
//!   │               │            │
//! ┌─▼─────────┐  ┌──▼───┐    ┌───▼──┐
//! │Order book │  │Trades│    │ Bars │      History<T>
//! │ engine    │  └──┬───┘    └───┬──┘
//! └─┬─────────┘     │            │
//!   │ OrderBook     │            │
//! ┌─▼──────────┐    │            │
//! │Book history│    │            │
//! └─┬──────────┘    │            │
//!   │  Source (window / filter)  │
//! ┌─▼───────────────▼────────────▼──┐
//! │ SetFeature ◄── ResultStore LRU  │
//! └───────────────┬─────────────────┘
//!                 │ per period
//!        ┌────────▼─────────┐
//!        │Periodic scheduler│ ◄── TradingCalendar
//!        └────────┬─────────┘
//!                 │
//!        History<PeriodicFeatureResult> ──► listeners
//! ```

pub mod calendar;
pub mod config;
pub mod events;
pub mod features;
pub mod history;
pub mod indicators;
pub mod lru;
pub mod manager;
pub mod metrics;
pub mod order_book;
pub mod parameters;
pub mod pipeline;
pub mod registry;
pub mod replay;
pub mod scheduler;
pub mod set_features;
pub mod snapshot;
pub mod source;

pub use config::PipelineConfig;
pub use features::{Feature, FeatureCatalog};
pub use history::History;
pub use pipeline::InstrumentPipeline;
pub use scheduler::{PeriodicFeatureResult, PeriodicUpdateScheduler};
pub use set_features::{SetFeature, INVALID_RESULT};
pub use snapshot::OrderBook;
pub use source::{Source, WindowSpec};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
