//! Per-instrument pipeline
//!
//! Owns one independent set of core components for a single instrument:
//! the mirrored order book, book/trade/bar histories wrapped in feature
//! managers, and the periodic scheduler with its results history. Nothing
//! is shared between instruments except the read-only feature catalog and
//! the clock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use types::errors::{ConfigError, FeatureError, HistoryError};
use types::ids::InstrumentId;
use types::time::Clock;

use crate::calendar::SessionCalendar;
use crate::config::{EventStream, FeatureSpec, PipelineConfig};
use crate::events::{Bar, BookMessage, MarketEvent, Trade};
use crate::features::{FeatureCatalog, ResultField};
use crate::history::History;
use crate::manager::FeatureManager;
use crate::metrics::PipelineMetrics;
use crate::order_book::{OrderBookState, SequenceGap};
use crate::registry::ResultStoreRegistry;
use crate::scheduler::{
    Period, PeriodicComputation, PeriodicFeatureResult, PeriodicUpdateScheduler, ResultListener,
    TickOutcome,
};
use crate::snapshot::OrderBook;

pub struct InstrumentPipeline {
    instrument: InstrumentId,
    book: OrderBookState,
    books: FeatureManager<OrderBook>,
    trades: FeatureManager<Trade>,
    bars: FeatureManager<Bar>,
    results_registry: ResultStoreRegistry,
    scheduler: PeriodicUpdateScheduler,
    calendar: SessionCalendar,
    catalog: Arc<FeatureCatalog>,
    clock: Arc<dyn Clock>,
    features: Vec<FeatureSpec>,
    metrics: Arc<PipelineMetrics>,
}

impl InstrumentPipeline {
    /// Build a pipeline from a configuration, failing fast on invalid
    /// settings or feature names the catalog does not know.
    pub fn new(
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
        catalog: Arc<FeatureCatalog>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        for spec in &config.features {
            check_feature(spec, &catalog)?;
        }

        let capacity = config.registry.capacity;
        let results = History::new(config.results.as_history(), clock.clone());

        info!(
            instrument = %config.instrument,
            features = config.features.len(),
            depth = config.book.depth,
            "Instrument pipeline initialized"
        );

        Ok(Self {
            book: OrderBookState::new(config.instrument.clone(), config.book.depth),
            books: FeatureManager::new(History::new(config.history, clock.clone()), capacity),
            trades: FeatureManager::new(History::new(config.history, clock.clone()), capacity),
            bars: FeatureManager::new(History::new(config.history, clock.clone()), capacity),
            results_registry: ResultStoreRegistry::new(capacity),
            scheduler: PeriodicUpdateScheduler::new(&config.scheduler, results),
            calendar: config.calendar,
            instrument: config.instrument,
            catalog,
            clock,
            features: config.features,
            metrics: Arc::new(PipelineMetrics::new()),
        })
    }

    /// Ingest one market event.
    ///
    /// Book messages update the mirrored book and record its immutable
    /// snapshot. A detected sequence gap is returned but does not fail the
    /// call. Events older than the latest of their stream are rejected
    /// without touching any state.
    pub fn record(&mut self, event: MarketEvent) -> Result<Option<SequenceGap>, HistoryError> {
        let label = event.event_type_label();
        let outcome = match event {
            MarketEvent::Book(message) => self.record_book(message),
            MarketEvent::Trade(trade) => self.trades.record(trade).map(|_| None),
            MarketEvent::Bar(bar) => self.bars.record(bar).map(|_| None),
            MarketEvent::Heartbeat { .. } => return Ok(None),
        };

        match &outcome {
            Ok(gap) => {
                self.metrics.record_event();
                if gap.is_some() {
                    self.metrics.record_gap();
                }
                debug!(instrument = %self.instrument, event_type = label, "Event recorded");
            }
            Err(_) => self.metrics.record_rejected(),
        }
        self.refresh_storage_metrics();
        outcome
    }

    fn record_book(&mut self, message: BookMessage) -> Result<Option<SequenceGap>, HistoryError> {
        if let Some(latest) = self.books.history().latest() {
            if message.timestamp < latest.timestamp() {
                warn!(
                    instrument = %self.instrument,
                    last = %latest.timestamp(),
                    received = %message.timestamp,
                    "Rejecting out-of-order book message"
                );
                return Err(HistoryError::OutOfOrder {
                    last: latest.timestamp().to_string(),
                    received: message.timestamp.to_string(),
                });
            }
        }

        let gap = self.book.apply(&message);
        let snapshot = self.book.to_immutable_book(message.kind);
        self.books.record(snapshot)?;
        Ok(gap)
    }

    /// Drive the scheduler to the clock's current time, evaluating every
    /// configured feature once per due trading period.
    pub fn on_tick(&mut self) -> TickOutcome {
        let started = Instant::now();
        let now = self.clock.now();

        let mut evaluator = SpecEvaluator {
            streams: Streams {
                books: &mut self.books,
                trades: &mut self.trades,
                bars: &mut self.bars,
                results_registry: &mut self.results_registry,
                catalog: self.catalog.as_ref(),
            },
            features: &self.features,
            metrics: self.metrics.as_ref(),
        };
        let outcome = self.scheduler.on_tick(now, &self.calendar, &mut evaluator);

        let latency_ns = started.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
        self.metrics
            .record_tick(outcome.recorded, outcome.skipped, outcome.filler, latency_ns);
        self.refresh_storage_metrics();
        outcome
    }

    /// Evaluate a feature against the current state, outside the schedule.
    pub fn evaluate(&mut self, spec: &FeatureSpec) -> Result<f64, FeatureError> {
        let mut streams = Streams {
            books: &mut self.books,
            trades: &mut self.trades,
            bars: &mut self.bars,
            results_registry: &mut self.results_registry,
            catalog: self.catalog.as_ref(),
        };
        streams.evaluate(spec, self.scheduler.results())
    }

    pub fn add_listener(&mut self, listener: impl ResultListener + 'static) {
        self.scheduler.add_listener(listener);
    }

    pub fn results(&self) -> &History<PeriodicFeatureResult> {
        self.scheduler.results()
    }

    /// Most recent immutable book snapshot.
    pub fn latest_book(&self) -> Option<&OrderBook> {
        self.books.history().latest()
    }

    pub fn book(&self) -> &OrderBookState {
        &self.book
    }

    pub fn books(&self) -> &FeatureManager<OrderBook> {
        &self.books
    }

    pub fn trades(&self) -> &FeatureManager<Trade> {
        &self.trades
    }

    pub fn bars(&self) -> &FeatureManager<Bar> {
        &self.bars
    }

    pub fn scheduler(&self) -> &PeriodicUpdateScheduler {
        &self.scheduler
    }

    pub fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    fn refresh_storage_metrics(&self) {
        let prunes = self.books.history().prunes()
            + self.trades.history().prunes()
            + self.bars.history().prunes()
            + self.scheduler.results().prunes();
        let evictions = self.books.registry().evictions()
            + self.trades.registry().evictions()
            + self.bars.registry().evictions()
            + self.results_registry.evictions();
        self.metrics.set_storage(prunes, evictions);
    }
}

/// Make sure `spec` names a feature its stream can extract.
fn check_feature(spec: &FeatureSpec, catalog: &FeatureCatalog) -> Result<(), ConfigError> {
    let known = match spec.stream {
        EventStream::Book => catalog.book(&spec.feature).map(|_| ()),
        EventStream::Trades => catalog.trade(&spec.feature).map(|_| ()),
        EventStream::Bars => catalog.bar(&spec.feature).map(|_| ()),
        EventStream::Results => Ok(()),
    };
    known.map_err(ConfigError::Feature)
}

/// Mutable view over every event stream of a pipeline.
struct Streams<'p> {
    books: &'p mut FeatureManager<OrderBook>,
    trades: &'p mut FeatureManager<Trade>,
    bars: &'p mut FeatureManager<Bar>,
    results_registry: &'p mut ResultStoreRegistry,
    catalog: &'p FeatureCatalog,
}

impl Streams<'_> {
    fn evaluate(
        &mut self,
        spec: &FeatureSpec,
        results: &History<PeriodicFeatureResult>,
    ) -> Result<f64, FeatureError> {
        let FeatureSpec {
            set_feature,
            feature,
            window,
            parameters,
            ..
        } = spec;
        match spec.stream {
            EventStream::Book => {
                let feature = self.catalog.book(feature)?;
                self.books.get(*set_feature, feature, window, parameters)
            }
            EventStream::Trades => {
                let feature = self.catalog.trade(feature)?;
                self.trades.get(*set_feature, feature, window, parameters)
            }
            EventStream::Bars => {
                let feature = self.catalog.bar(feature)?;
                self.bars.get(*set_feature, feature, window, parameters)
            }
            EventStream::Results => {
                let field = ResultField::new(feature.as_str());
                let source = results
                    .source_for(window)
                    .with_filter(|result: &PeriodicFeatureResult| !result.is_filler);
                set_feature.compute(&field, &source, parameters, self.results_registry)
            }
        }
    }
}

/// Evaluates the configured features for each due period.
struct SpecEvaluator<'p> {
    streams: Streams<'p>,
    features: &'p [FeatureSpec],
    metrics: &'p PipelineMetrics,
}

impl PeriodicComputation for SpecEvaluator<'_> {
    fn compute(
        &mut self,
        period: &Period,
        results: &History<PeriodicFeatureResult>,
    ) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::new();
        for spec in self.features {
            match self.streams.evaluate(spec, results) {
                Ok(value) => {
                    values.insert(spec.name.clone(), value);
                }
                Err(err) => {
                    self.metrics.record_feature_failure();
                    warn!(feature = %spec.name, period = %period, error = %err, "Feature evaluation failed");
                }
            }
        }
        debug!(period = %period, values = values.len(), "Period evaluated");
        values
    }
}
