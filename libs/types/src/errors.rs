//! Error types for the feature pipeline
//!
//! Error taxonomy using thiserror. Only configuration mistakes and
//! contract violations surface as errors; empty or warming-up windows are
//! answered with sentinel values and sequence gaps are reported as
//! warnings, never as errors.

use thiserror::Error;

/// Invalid-argument errors raised at the feature call site
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("{indicator} requires an intended period count on its source")]
    MissingIntendedSize { indicator: String },

    #[error("Parameter {name} has type {actual}, expected {expected}")]
    ParameterType {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Unknown feature: {name}")]
    UnknownFeature { name: String },
}

/// Errors raised when appending to a history
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HistoryError {
    #[error("Out-of-order event: last={last}, received={received}")]
    OutOfOrder { last: String, received: String },
}

/// Configuration loading and validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration field {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),
}
