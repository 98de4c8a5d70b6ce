//! Deterministic replay
//!
//! Drives a fresh [`InstrumentPipeline`] through a recorded event journal
//! with a [`ManualClock`] that follows the event timestamps, ticking the
//! scheduler after every event. The recorded periodic results are hashed so
//! that two replays of the same journal can be compared by checksum.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use types::errors::{ConfigError, FeatureError, HistoryError};
use types::time::{ManualClock, Timestamped};

use crate::config::{FeatureSpec, PipelineConfig};
use crate::events::MarketEvent;
use crate::features::FeatureCatalog;
use crate::metrics::{Alert, AlertThresholds, MetricsSnapshot};
use crate::pipeline::InstrumentPipeline;
use crate::scheduler::PeriodicFeatureResult;
use crate::snapshot::OrderBook;

/// Metrics collected during replay.
#[derive(Debug, Clone)]
pub struct ReplayMetrics {
    pub events_replayed: u64,
    pub ticks: u64,
    pub duration_ms: u128,
    pub events_per_second: f64,
    /// SHA-256 over the recorded periodic results.
    pub state_checksum: String,
    pub pipeline: MetricsSnapshot,
    /// Flat counter export of the pipeline metrics.
    pub counters: BTreeMap<String, u64>,
    /// Threshold breaches at the end of the journal.
    pub alerts: Vec<Alert>,
}

#[derive(Debug)]
pub struct ReplayResult {
    pub results: Vec<PeriodicFeatureResult>,
    pub latest_book: Option<OrderBook>,
    /// Probe features evaluated once the journal is exhausted.
    pub final_values: BTreeMap<String, f64>,
    pub metrics: ReplayMetrics,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplayError {
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("probe feature failed: {0}")]
    Feature(#[from] FeatureError),

    #[error("event {index} rejected: {source}")]
    History {
        index: usize,
        #[source]
        source: HistoryError,
    },

    #[error("journal not time-ordered at event {index}: {received} after {last}")]
    NonMonotonic {
        index: usize,
        last: String,
        received: String,
    },

    #[error("state checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Replays a journal through a fresh pipeline.
///
/// Deterministic: the same events in the same order yield identical
/// results and checksum.
pub struct ReplayEngine {
    config: PipelineConfig,
    catalog: Arc<FeatureCatalog>,
    probes: Vec<FeatureSpec>,
    expected_checksum: Option<String>,
    strict_ordering: bool,
    thresholds: AlertThresholds,
}

impl ReplayEngine {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            catalog: Arc::new(FeatureCatalog::standard()),
            probes: Vec::new(),
            expected_checksum: None,
            strict_ordering: true,
            thresholds: AlertThresholds::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<FeatureCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Evaluate `spec` after the last event and report it in
    /// [`ReplayResult::final_values`].
    pub fn with_probe(mut self, spec: FeatureSpec) -> Self {
        self.probes.push(spec);
        self
    }

    /// Set the expected state checksum for post-replay validation.
    pub fn with_expected_checksum(mut self, checksum: String) -> Self {
        self.expected_checksum = Some(checksum);
        self
    }

    pub fn with_alert_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Skip out-of-order events instead of failing (for recovery scenarios).
    pub fn with_relaxed_ordering(mut self) -> Self {
        self.strict_ordering = false;
        self
    }

    pub fn replay(&self, events: &[MarketEvent]) -> Result<ReplayResult, ReplayError> {
        let started = Instant::now();
        info!(
            instrument = %self.config.instrument,
            event_count = events.len(),
            "Starting event replay"
        );

        let start_time = events.first().map(|e| e.timestamp()).unwrap_or_default();
        let clock = Arc::new(ManualClock::new(start_time));
        let mut pipeline =
            InstrumentPipeline::new(self.config.clone(), clock.clone(), self.catalog.clone())?;

        let mut last = None;
        let mut events_replayed: u64 = 0;
        let mut ticks: u64 = 0;

        for (index, event) in events.iter().enumerate() {
            let timestamp = event.timestamp();
            if let Some(last) = last {
                if timestamp < last {
                    if self.strict_ordering {
                        return Err(ReplayError::NonMonotonic {
                            index,
                            last: last.to_string(),
                            received: timestamp.to_string(),
                        });
                    }
                    warn!(index, received = %timestamp, "Skipping out-of-order journal event");
                    continue;
                }
            }

            clock.set(timestamp);
            if let Err(source) = pipeline.record(event.clone()) {
                if self.strict_ordering {
                    return Err(ReplayError::History { index, source });
                }
                warn!(index, error = %source, "Skipping rejected journal event");
                continue;
            }
            if pipeline.on_tick().elapsed > 0 {
                ticks += 1;
            }

            last = Some(timestamp);
            events_replayed += 1;
        }

        let mut final_values = BTreeMap::new();
        for probe in &self.probes {
            final_values.insert(probe.name.clone(), pipeline.evaluate(probe)?);
        }

        let results = pipeline.results().events().to_vec();
        let state_checksum = compute_results_checksum(&results);

        if let Some(ref expected) = self.expected_checksum {
            if &state_checksum != expected {
                error!(
                    expected = %expected,
                    actual = %state_checksum,
                    "State checksum mismatch after replay"
                );
                return Err(ReplayError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual: state_checksum,
                });
            }
        }

        let duration_ms = started.elapsed().as_millis();
        let events_per_second = if duration_ms > 0 {
            (events_replayed as f64 / duration_ms as f64) * 1000.0
        } else {
            events_replayed as f64
        };

        let pipeline_metrics = pipeline.metrics();
        let alerts = pipeline_metrics.check_thresholds(&self.thresholds);
        for alert in &alerts {
            warn!(
                level = ?alert.level,
                metric = %alert.metric,
                "{}", alert.message
            );
        }

        let metrics = ReplayMetrics {
            events_replayed,
            ticks,
            duration_ms,
            events_per_second,
            state_checksum,
            pipeline: pipeline_metrics.snapshot(),
            counters: pipeline_metrics.export(),
            alerts,
        };

        info!(
            events_replayed = metrics.events_replayed,
            results = results.len(),
            duration_ms = metrics.duration_ms,
            eps = %format!("{:.0}", metrics.events_per_second),
            "Replay completed successfully"
        );

        Ok(ReplayResult {
            latest_book: pipeline.latest_book().cloned(),
            results,
            final_values,
            metrics,
        })
    }
}

/// Checksum over every recorded result, in order.
///
/// Values are hashed by bit pattern so that `-0.0` and NaN payloads are
/// distinguished.
pub fn compute_results_checksum(results: &[PeriodicFeatureResult]) -> String {
    let mut hasher = Sha256::new();

    for result in results {
        hasher.update(result.period_start.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(result.period_end.to_string().as_bytes());
        hasher.update(if result.is_filler { b"F" } else { b"G" });

        for (name, value) in &result.values {
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.to_bits().to_be_bytes());
            hasher.update(b",");
        }
        hasher.update(b"===");
    }

    format!("{:x}", hasher.finalize())
}
