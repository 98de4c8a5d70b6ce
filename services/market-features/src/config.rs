//! Pipeline configuration
//!
//! Every section has defaults, so an empty JSON object is a valid
//! configuration. [`PipelineConfig::validate`] fails fast on settings the
//! pipeline cannot run with.

use std::path::Path;

use chrono::{NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use types::errors::{ConfigError, FeatureError};
use types::ids::InstrumentId;

use crate::calendar::SessionCalendar;
use crate::parameters::Parameters;
use crate::set_features::SetFeature;
use crate::source::WindowSpec;

/// Bounds of one event history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Size above which the history is pruned.
    pub max_size: usize,
    /// Age, relative to the clock, of the oldest event kept by a prune.
    pub retention_millis: i64,
    /// Entries in the duration-window index cache.
    pub index_cache_capacity: usize,
}

impl HistoryConfig {
    pub fn retention(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.retention_millis.max(0))
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_size: 600_000,
            retention_millis: 90 * 60 * 1_000,
            index_cache_capacity: 25,
        }
    }
}

/// Bounds of the periodic results history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    pub max_size: usize,
    pub retention_millis: i64,
}

impl ResultsConfig {
    pub fn as_history(&self) -> HistoryConfig {
        HistoryConfig {
            max_size: self.max_size,
            retention_millis: self.retention_millis,
            ..HistoryConfig::default()
        }
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            max_size: 100_000,
            retention_millis: 24 * 60 * 60 * 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    /// Levels kept per side.
    pub depth: usize,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self { depth: 5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Anchor of the period grid on each day.
    pub daily_start: NaiveTime,
    pub period_millis: i64,
}

impl SchedulerConfig {
    /// Period length, at least one millisecond.
    pub fn period(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.period_millis.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            period_millis: 60_000,
        }
    }
}

/// Event history a feature reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStream {
    Book,
    Trades,
    Bars,
    /// Previously recorded periodic results.
    Results,
}

/// One feature recorded every scheduler period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Name of the value in each periodic result.
    pub name: String,
    pub stream: EventStream,
    pub set_feature: SetFeature,
    /// Catalog feature name (or result value name for `results`).
    pub feature: String,
    pub window: WindowSpec,
    #[serde(default)]
    pub parameters: Parameters,
}

impl FeatureSpec {
    pub fn new(
        name: impl Into<String>,
        stream: EventStream,
        set_feature: SetFeature,
        feature: impl Into<String>,
        window: WindowSpec,
    ) -> Self {
        Self {
            name: name.into(),
            stream,
            set_feature,
            feature: feature.into(),
            window,
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Check that this spec can be evaluated at all.
    pub fn validate(&self) -> Result<(), FeatureError> {
        if self.set_feature.is_stateful() {
            match self.window.intended_size() {
                None => {
                    return Err(FeatureError::MissingIntendedSize {
                        indicator: self.set_feature.name().to_string(),
                    })
                }
                Some(0) => {
                    return Err(FeatureError::InvalidParameter {
                        name: "intended_size".to_string(),
                        reason: format!("{} needs at least one period", self.name),
                    })
                }
                Some(_) => {}
            }
            self.parameters.precision()?;
        }
        if self.set_feature == SetFeature::Decay {
            self.parameters.decay_factor()?;
            self.parameters.decay_time_unit()?;
        }
        Ok(())
    }
}

/// Complete configuration of one instrument pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub instrument: InstrumentId,
    pub history: HistoryConfig,
    pub results: ResultsConfig,
    pub registry: RegistryConfig,
    pub book: BookConfig,
    pub scheduler: SchedulerConfig,
    pub calendar: SessionCalendar,
    pub features: Vec<FeatureSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            instrument: InstrumentId::new("UNKNOWN"),
            history: HistoryConfig::default(),
            results: ResultsConfig::default(),
            registry: RegistryConfig::default(),
            book: BookConfig::default(),
            scheduler: SchedulerConfig::default(),
            calendar: SessionCalendar::default(),
            features: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        info!(
            instrument = %config.instrument,
            features = config.features.len(),
            "Pipeline configuration loaded"
        );
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Cannot read pipeline configuration");
            ConfigError::Io(e.to_string())
        })?;
        Self::from_json_str(&json)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| {
            error!(field, reason, "Invalid pipeline configuration");
            ConfigError::Invalid {
                field: field.to_string(),
                reason: reason.to_string(),
            }
        };

        if self.book.depth == 0 {
            return Err(invalid("book.depth", "must be at least 1"));
        }
        if self.scheduler.period_millis <= 0 {
            return Err(invalid("scheduler.period_millis", "must be positive"));
        }
        if self.registry.capacity == 0 {
            return Err(invalid("registry.capacity", "must be at least 1"));
        }
        if self.history.max_size < 2 {
            return Err(invalid("history.max_size", "must be at least 2"));
        }
        if self.results.max_size < 2 {
            return Err(invalid("results.max_size", "must be at least 2"));
        }
        for calendar_phase in &self.calendar.phases {
            if calendar_phase.start >= calendar_phase.end {
                return Err(invalid("calendar.phases", "phase must end after it starts"));
            }
        }

        let mut names = std::collections::BTreeSet::new();
        for spec in &self.features {
            if !names.insert(spec.name.as_str()) {
                return Err(invalid("features", "feature names must be unique"));
            }
            spec.validate().map_err(|e| {
                error!(feature = %spec.name, error = %e, "Invalid feature specification");
                ConfigError::Feature(e)
            })?;
        }
        Ok(())
    }
}
