//! Set-features: reductions of a source to one value
//!
//! Each variant applies one numeric policy to the feature values visible
//! through a [`Source`]. Empty or insufficient input is a normal warm-up
//! condition and yields a sentinel (0 or [`INVALID_RESULT`]) instead of an
//! error. Errors are reserved for misconfiguration.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use types::errors::FeatureError;
use types::time::Timestamped;

use crate::features::Feature;
use crate::indicators;
use crate::parameters::Parameters;
use crate::registry::ResultStoreRegistry;
use crate::source::Source;

/// Returned by stateful indicators that have not seen enough periods.
pub const INVALID_RESULT: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetFeature {
    Average,
    Open,
    Close,
    Minimum,
    Maximum,
    Range,
    StandardDeviation,
    Decay,
    #[serde(alias = "ewma")]
    ExponentialWeightedMovingAverage,
    #[serde(alias = "rsi")]
    RelativeStrengthIndex,
}

impl SetFeature {
    pub const ALL: [SetFeature; 10] = [
        SetFeature::Average,
        SetFeature::Open,
        SetFeature::Close,
        SetFeature::Minimum,
        SetFeature::Maximum,
        SetFeature::Range,
        SetFeature::StandardDeviation,
        SetFeature::Decay,
        SetFeature::ExponentialWeightedMovingAverage,
        SetFeature::RelativeStrengthIndex,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SetFeature::Average => "Average",
            SetFeature::Open => "Open",
            SetFeature::Close => "Close",
            SetFeature::Minimum => "Minimum",
            SetFeature::Maximum => "Maximum",
            SetFeature::Range => "Range",
            SetFeature::StandardDeviation => "StandardDeviation",
            SetFeature::Decay => "Decay",
            SetFeature::ExponentialWeightedMovingAverage => "ExponentialWeightedMovingAverage",
            SetFeature::RelativeStrengthIndex => "RelativeStrengthIndex",
        }
    }

    /// Whether the result depends on state carried across calls.
    pub fn is_stateful(&self) -> bool {
        matches!(
            self,
            SetFeature::ExponentialWeightedMovingAverage | SetFeature::RelativeStrengthIndex
        )
    }

    /// Reduce the values of `feature` over `source`.
    ///
    /// Stateful variants read and update their state in `registry`.
    pub fn compute<T, F>(
        &self,
        feature: &F,
        source: &Source<'_, T>,
        parameters: &Parameters,
        registry: &mut ResultStoreRegistry,
    ) -> Result<f64, FeatureError>
    where
        T: Timestamped,
        F: Feature<T> + ?Sized,
    {
        let values = || source.iter().map(move |event| feature.extract(event));

        let result = match self {
            SetFeature::Average => average(values()),
            SetFeature::Open => source.earliest().map_or(0.0, |e| feature.extract(e)),
            SetFeature::Close => source.latest().map_or(0.0, |e| feature.extract(e)),
            SetFeature::Minimum => values().reduce(f64::min).unwrap_or(0.0),
            SetFeature::Maximum => values().reduce(f64::max).unwrap_or(0.0),
            SetFeature::Range => range(values()),
            SetFeature::StandardDeviation => population_std_dev(values()),
            SetFeature::Decay => decay(feature, source, parameters)?,
            SetFeature::ExponentialWeightedMovingAverage => {
                indicators::ewma(feature, source, parameters, registry)?
            }
            SetFeature::RelativeStrengthIndex => {
                indicators::rsi(feature, source, parameters, registry)?
            }
        };
        Ok(result)
    }
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn range(values: impl Iterator<Item = f64>) -> f64 {
    values
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .map_or(0.0, |(lo, hi)| hi - lo)
}

/// Population standard deviation via Welford's online update.
fn population_std_dev(values: impl Iterator<Item = f64>) -> f64 {
    let mut n = 0usize;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for value in values {
        n += 1;
        let delta = value - mean;
        mean += delta / n as f64;
        m2 += delta * (value - mean);
    }
    if n < 2 {
        return 0.0;
    }
    (m2 / n as f64).max(0.0).sqrt()
}

/// Sequential fold decaying the running sum between consecutive events.
///
/// Before adding each event after the first, the running result is
/// multiplied by `decayFactor^steps`, where `steps` is the number of whole
/// `decayTimeUnit`s since the previous event, at least 1.
fn decay<T, F>(
    feature: &F,
    source: &Source<'_, T>,
    parameters: &Parameters,
) -> Result<f64, FeatureError>
where
    T: Timestamped,
    F: Feature<T> + ?Sized,
{
    let factor = parameters.decay_factor()?;
    let unit = parameters.decay_time_unit()?;

    let mut result = 0.0;
    let mut previous: Option<NaiveDateTime> = None;
    for event in source.iter() {
        let at = event.timestamp();
        if let Some(before) = previous {
            let elapsed = (at - before).num_milliseconds().max(0);
            let steps = (elapsed / unit.num_milliseconds()).max(1);
            result *= factor.powf(steps as f64);
        }
        result += feature.extract(event);
        previous = Some(at);
    }
    Ok(result)
}
