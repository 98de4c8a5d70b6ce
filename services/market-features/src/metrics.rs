//! Pipeline metrics
//!
//! Lock-free counters updated on the hot path, plus a bounded latency
//! sample for scheduler ticks. `export()` gives a flat name → value map for
//! Prometheus-style exposition; `snapshot()` a serde-able copy.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Counters for one instrument pipeline.
pub struct PipelineMetrics {
    // Ingestion
    pub events_recorded: AtomicU64,
    pub events_rejected: AtomicU64,
    pub sequence_gaps: AtomicU64,

    // Storage
    pub history_prunes: AtomicU64,
    pub registry_evictions: AtomicU64,

    // Scheduling
    pub periods_recorded: AtomicU64,
    pub periods_skipped: AtomicU64,
    pub fillers_emitted: AtomicU64,
    pub feature_failures: AtomicU64,
    pub tick_ns: Mutex<LatencyTracker>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            events_recorded: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            sequence_gaps: AtomicU64::new(0),
            history_prunes: AtomicU64::new(0),
            registry_evictions: AtomicU64::new(0),
            periods_recorded: AtomicU64::new(0),
            periods_skipped: AtomicU64::new(0),
            fillers_emitted: AtomicU64::new(0),
            feature_failures: AtomicU64::new(0),
            tick_ns: Mutex::new(LatencyTracker::new(1000)),
        }
    }

    pub fn record_event(&self) {
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gap(&self) {
        self.sequence_gaps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_feature_failure(&self) {
        self.feature_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record what one scheduler tick did.
    pub fn record_tick(&self, recorded: usize, skipped: usize, filler: bool, latency_ns: u64) {
        self.periods_recorded.fetch_add(recorded as u64, Ordering::Relaxed);
        self.periods_skipped.fetch_add(skipped as u64, Ordering::Relaxed);
        if filler {
            self.fillers_emitted.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut tracker) = self.tick_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    /// Overwrite the storage gauges, which are owned by the histories and
    /// registries themselves.
    pub fn set_storage(&self, history_prunes: u64, registry_evictions: u64) {
        self.history_prunes.store(history_prunes, Ordering::Relaxed);
        self.registry_evictions.store(registry_evictions, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let tick_p99_ns = self.tick_ns.lock().ok().and_then(|t| t.percentile(99));
        MetricsSnapshot {
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
            history_prunes: self.history_prunes.load(Ordering::Relaxed),
            registry_evictions: self.registry_evictions.load(Ordering::Relaxed),
            periods_recorded: self.periods_recorded.load(Ordering::Relaxed),
            periods_skipped: self.periods_skipped.load(Ordering::Relaxed),
            fillers_emitted: self.fillers_emitted.load(Ordering::Relaxed),
            feature_failures: self.feature_failures.load(Ordering::Relaxed),
            tick_p99_ns,
        }
    }

    /// Check alert thresholds and generate alerts.
    pub fn check_thresholds(&self, thresholds: &AlertThresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let gaps = self.sequence_gaps.load(Ordering::Relaxed);
        if gaps > thresholds.max_sequence_gaps {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                metric: "sequence_gaps".to_string(),
                message: format!("Sequence gaps: {} > threshold {}", gaps, thresholds.max_sequence_gaps),
            });
        }

        let rejected = self.events_rejected.load(Ordering::Relaxed);
        if rejected > thresholds.max_events_rejected {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "events_rejected".to_string(),
                message: format!("Events rejected: {} > threshold {}", rejected, thresholds.max_events_rejected),
            });
        }

        if let Ok(tracker) = self.tick_ns.lock() {
            if let Some(p99) = tracker.percentile(99) {
                if p99 > thresholds.max_tick_p99_ns {
                    alerts.push(Alert {
                        level: AlertLevel::Warning,
                        metric: "tick_p99".to_string(),
                        message: format!("Tick p99: {}ns > threshold {}ns", p99, thresholds.max_tick_p99_ns),
                    });
                }
            }
        }

        alerts
    }

    /// Export counters as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let s = self.snapshot();
        let mut m = BTreeMap::new();
        m.insert("events_recorded".to_string(), s.events_recorded);
        m.insert("events_rejected".to_string(), s.events_rejected);
        m.insert("sequence_gaps".to_string(), s.sequence_gaps);
        m.insert("history_prunes".to_string(), s.history_prunes);
        m.insert("registry_evictions".to_string(), s.registry_evictions);
        m.insert("periods_recorded".to_string(), s.periods_recorded);
        m.insert("periods_skipped".to_string(), s.periods_skipped);
        m.insert("fillers_emitted".to_string(), s.fillers_emitted);
        m.insert("feature_failures".to_string(), s.feature_failures);
        m
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub events_recorded: u64,
    pub events_rejected: u64,
    pub sequence_gaps: u64,
    pub history_prunes: u64,
    pub registry_evictions: u64,
    pub periods_recorded: u64,
    pub periods_skipped: u64,
    pub fillers_emitted: u64,
    pub feature_failures: u64,
    pub tick_p99_ns: Option<u64>,
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let idx = (p.min(100) as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        sorted.get(idx).copied()
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// An alert triggered by threshold breach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub metric: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Gaps mean the mirrored book may be stale.
    pub max_sequence_gaps: u64,
    pub max_events_rejected: u64,
    pub max_tick_p99_ns: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_sequence_gaps: 0,
            max_events_rejected: 100,
            max_tick_p99_ns: 10_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = PipelineMetrics::new();
        metrics.record_event();
        metrics.record_event();
        metrics.record_rejected();
        metrics.record_gap();

        let exported = metrics.export();
        assert_eq!(exported["events_recorded"], 2);
        assert_eq!(exported["events_rejected"], 1);
        assert_eq!(exported["sequence_gaps"], 1);
    }

    #[test]
    fn test_tick_recording() {
        let metrics = PipelineMetrics::new();
        metrics.record_tick(5, 0, true, 1_000);
        metrics.record_tick(1, 2, false, 3_000);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.periods_recorded, 6);
        assert_eq!(snapshot.periods_skipped, 2);
        assert_eq!(snapshot.fillers_emitted, 1);
        assert_eq!(snapshot.tick_p99_ns, Some(1_000));
    }

    #[test]
    fn test_storage_gauges_overwrite() {
        let metrics = PipelineMetrics::new();
        metrics.set_storage(3, 7);
        metrics.set_storage(4, 7);
        let exported = metrics.export();
        assert_eq!(exported["history_prunes"], 4);
        assert_eq!(exported["registry_evictions"], 7);
    }

    #[test]
    fn test_latency_tracker_window_eviction() {
        let mut tracker = LatencyTracker::new(3);
        for value in [10, 20, 30, 40] {
            tracker.record(value);
        }
        assert_eq!(tracker.count(), 3);
        assert_eq!(tracker.percentile(0), Some(20));
        assert_eq!(tracker.percentile(100), Some(40));
    }

    #[test]
    fn test_gap_alert_is_critical() {
        let metrics = PipelineMetrics::new();
        assert!(metrics.check_thresholds(&AlertThresholds::default()).is_empty());

        metrics.record_gap();
        let alerts = metrics.check_thresholds(&AlertThresholds::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert_eq!(alerts[0].metric, "sequence_gaps");
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = PipelineMetrics::new();
        metrics.record_event();
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.events_recorded, 1);
    }
}
