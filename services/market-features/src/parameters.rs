//! Named parameters for set-features
//!
//! A small immutable map of typed values with defaulting accessors.
//! Parameters are compared and hashed by value (floats bitwise) because
//! they form part of an indicator's state key.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use types::errors::FeatureError;

/// Base of the per-step decay applied by the `Decay` set-feature.
pub const DECAY_FACTOR: &str = "decayFactor";
/// Time unit (milliseconds) used to count decay steps.
pub const DECAY_TIME_UNIT: &str = "decayTimeUnit";
/// Decimal places kept in stateful indicator output.
pub const PRECISION: &str = "precision";

pub const DEFAULT_DECAY_FACTOR: f64 = 0.25;
pub const DEFAULT_DECAY_TIME_UNIT_MILLIS: i64 = 1_000;
pub const DEFAULT_PRECISION: u32 = 3;

/// A single typed parameter value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterValue {
    Float(f64),
    Integer(i64),
    Millis(i64),
}

impl ParameterValue {
    fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::Float(_) => "float",
            ParameterValue::Integer(_) => "integer",
            ParameterValue::Millis(_) => "millis",
        }
    }

    fn hash_bits(&self) -> (u8, u64) {
        match *self {
            ParameterValue::Float(v) => (0, v.to_bits()),
            ParameterValue::Integer(v) => (1, v as u64),
            ParameterValue::Millis(v) => (2, v as u64),
        }
    }
}

impl PartialEq for ParameterValue {
    fn eq(&self, other: &Self) -> bool {
        self.hash_bits() == other.hash_bits()
    }
}

impl Eq for ParameterValue {}

impl Hash for ParameterValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_bits().hash(state);
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Float(v) => write!(f, "{v}"),
            ParameterValue::Integer(v) => write!(f, "{v}"),
            ParameterValue::Millis(v) => write!(f, "{v}ms"),
        }
    }
}

/// Immutable set of named parameter values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters {
    values: BTreeMap<String, ParameterValue>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a float value.
    pub fn with_float(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), ParameterValue::Float(value));
        self
    }

    /// Builder-style insert of an integer value.
    pub fn with_integer(mut self, name: impl Into<String>, value: i64) -> Self {
        self.values.insert(name.into(), ParameterValue::Integer(value));
        self
    }

    /// Builder-style insert of a duration value.
    pub fn with_duration(mut self, name: impl Into<String>, value: TimeDelta) -> Self {
        self.values
            .insert(name.into(), ParameterValue::Millis(value.num_milliseconds()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Float value of `name`, or `default` when absent.
    ///
    /// Integer values are widened; any other type is rejected.
    pub fn float_or(&self, name: &str, default: f64) -> Result<f64, FeatureError> {
        match self.values.get(name) {
            None => Ok(default),
            Some(ParameterValue::Float(v)) => Ok(*v),
            Some(ParameterValue::Integer(v)) => Ok(*v as f64),
            Some(other) => Err(type_mismatch(name, "float", other)),
        }
    }

    /// Integer value of `name`, or `default` when absent.
    pub fn integer_or(&self, name: &str, default: i64) -> Result<i64, FeatureError> {
        match self.values.get(name) {
            None => Ok(default),
            Some(ParameterValue::Integer(v)) => Ok(*v),
            Some(other) => Err(type_mismatch(name, "integer", other)),
        }
    }

    /// Duration value of `name`, or `default` when absent.
    pub fn duration_or(&self, name: &str, default: TimeDelta) -> Result<TimeDelta, FeatureError> {
        match self.values.get(name) {
            None => Ok(default),
            Some(ParameterValue::Millis(v)) => Ok(TimeDelta::milliseconds(*v)),
            Some(other) => Err(type_mismatch(name, "millis", other)),
        }
    }

    /// Output precision in decimal places.
    pub fn precision(&self) -> Result<u32, FeatureError> {
        let precision = self.integer_or(PRECISION, DEFAULT_PRECISION as i64)?;
        u32::try_from(precision)
            .ok()
            .filter(|p| *p <= 16)
            .ok_or_else(|| FeatureError::InvalidParameter {
                name: PRECISION.to_string(),
                reason: format!("{precision} is outside 0..=16"),
            })
    }

    /// Per-unit decay base.
    pub fn decay_factor(&self) -> Result<f64, FeatureError> {
        self.float_or(DECAY_FACTOR, DEFAULT_DECAY_FACTOR)
    }

    /// Length of one decay step.
    pub fn decay_time_unit(&self) -> Result<TimeDelta, FeatureError> {
        let unit = self.duration_or(
            DECAY_TIME_UNIT,
            TimeDelta::milliseconds(DEFAULT_DECAY_TIME_UNIT_MILLIS),
        )?;
        if unit <= TimeDelta::zero() {
            return Err(FeatureError::InvalidParameter {
                name: DECAY_TIME_UNIT.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(unit)
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}

fn type_mismatch(name: &str, expected: &str, actual: &ParameterValue) -> FeatureError {
    FeatureError::ParameterType {
        name: name.to_string(),
        expected: expected.to_string(),
        actual: actual.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(params: &Parameters) -> u64 {
        let mut hasher = DefaultHasher::new();
        params.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_defaults_when_absent() {
        let params = Parameters::new();
        assert_eq!(params.decay_factor().unwrap(), DEFAULT_DECAY_FACTOR);
        assert_eq!(params.precision().unwrap(), DEFAULT_PRECISION);
        assert_eq!(params.decay_time_unit().unwrap(), TimeDelta::seconds(1));
    }

    #[test]
    fn test_typed_accessors() {
        let params = Parameters::new()
            .with_float(DECAY_FACTOR, 0.5)
            .with_integer(PRECISION, 2)
            .with_duration(DECAY_TIME_UNIT, TimeDelta::minutes(1));

        assert_eq!(params.decay_factor().unwrap(), 0.5);
        assert_eq!(params.precision().unwrap(), 2);
        assert_eq!(params.decay_time_unit().unwrap(), TimeDelta::minutes(1));
    }

    #[test]
    fn test_wrong_type_fails_fast() {
        let params = Parameters::new().with_float(PRECISION, 2.5);
        let err = params.precision().unwrap_err();
        assert!(matches!(err, FeatureError::ParameterType { .. }));
    }

    #[test]
    fn test_negative_precision_rejected() {
        let params = Parameters::new().with_integer(PRECISION, -1);
        assert!(matches!(
            params.precision(),
            Err(FeatureError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_equal_parameters_hash_equal() {
        let a = Parameters::new().with_float(DECAY_FACTOR, 0.3).with_integer(PRECISION, 4);
        let b = Parameters::new().with_integer(PRECISION, 4).with_float(DECAY_FACTOR, 0.3);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = Parameters::new().with_float(DECAY_FACTOR, 0.31);
        assert_ne!(a, c);
    }

    #[test]
    fn test_parameters_deserialize() {
        let json = r#"{"decayFactor":{"float":0.5},"precision":{"integer":2}}"#;
        let params: Parameters = serde_json::from_str(json).unwrap();
        assert_eq!(params.decay_factor().unwrap(), 0.5);
        assert_eq!(params.precision().unwrap(), 2);
        assert_eq!(params.to_string(), "{decayFactor=0.5, precision=2}");
    }
}
