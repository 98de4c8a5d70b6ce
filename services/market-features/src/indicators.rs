//! Stateful technical indicators
//!
//! EWMA and RSI carry running values across calls in a
//! [`ResultStore`](crate::registry::ResultStore) selected by
//! [`Key`]. Both are idempotent: asking again about a source that exposes
//! the same data returns the cached output without advancing state.
//!
//! Outputs are rounded half away from zero to `precision` decimal places
//! through `rust_decimal`, so the same inputs always print the same way.
//! Running state is kept unrounded.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;
use types::errors::FeatureError;
use types::time::Timestamped;

use crate::features::Feature;
use crate::parameters::Parameters;
use crate::registry::{Key, ResultStoreRegistry};
use crate::set_features::{SetFeature, INVALID_RESULT};
use crate::source::Source;

const EMA: &str = "ema";
const AVERAGE_GAIN: &str = "averageGain";
const AVERAGE_LOSS: &str = "averageLoss";
const PREVIOUS: &str = "previous";

/// Round `value` to `precision` decimal places, half away from zero.
///
/// Values outside the decimal range (including NaN and infinities) are
/// returned unchanged.
pub fn round_to(value: f64, precision: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Intended period count of `source`, required by stateful indicators.
fn intended_periods<T>(indicator: SetFeature, source: &Source<'_, T>) -> Result<usize, FeatureError> {
    match source.intended_size() {
        Some(0) => Err(FeatureError::InvalidParameter {
            name: "intended_size".to_string(),
            reason: format!("{} needs at least one period", indicator.name()),
        }),
        Some(periods) => Ok(periods),
        None => Err(FeatureError::MissingIntendedSize {
            indicator: indicator.name().to_string(),
        }),
    }
}

/// Exponentially weighted moving average.
///
/// Seeded with the latest raw value on its first call; valid only once the source
/// holds at least `P` events, [`INVALID_RESULT`] before.
pub fn ewma<T, F>(
    feature: &F,
    source: &Source<'_, T>,
    parameters: &Parameters,
    registry: &mut ResultStoreRegistry,
) -> Result<f64, FeatureError>
where
    T: Timestamped,
    F: Feature<T> + ?Sized,
{
    let indicator = SetFeature::ExponentialWeightedMovingAverage;
    let periods = intended_periods(indicator, source)?;
    let precision = parameters.precision()?;

    let store = registry.register_and_get(Key::new(indicator, feature.id(), periods, parameters));
    let observation = source.observation();
    if let Some(cached) = store.result_for(&observation) {
        return Ok(cached);
    }

    let Some(latest) = source.latest().map(|e| feature.extract(e)) else {
        return Ok(INVALID_RESULT);
    };

    let ema = match store.get(EMA) {
        None => latest,
        Some(previous) => (latest - previous) * (2.0 / (periods as f64 + 1.0)) + previous,
    };
    store.set(EMA, ema);

    let result = if source.len() >= periods {
        round_to(ema, precision)
    } else {
        INVALID_RESULT
    };
    store.set_result(result, observation);

    debug!(feature = feature.id(), periods, ema, result, "EWMA updated");
    Ok(result)
}

/// Relative strength index with Wilder smoothing.
///
/// Computed from the first call even when fewer than `P` events are
/// available. The first call sees zero change.
pub fn rsi<T, F>(
    feature: &F,
    source: &Source<'_, T>,
    parameters: &Parameters,
    registry: &mut ResultStoreRegistry,
) -> Result<f64, FeatureError>
where
    T: Timestamped,
    F: Feature<T> + ?Sized,
{
    let indicator = SetFeature::RelativeStrengthIndex;
    let periods = intended_periods(indicator, source)?;
    let precision = parameters.precision()?;

    let store = registry.register_and_get(Key::new(indicator, feature.id(), periods, parameters));
    let observation = source.observation();
    if let Some(cached) = store.result_for(&observation) {
        return Ok(cached);
    }

    let Some(latest) = source.latest().map(|e| feature.extract(e)) else {
        return Ok(INVALID_RESULT);
    };

    let previous = store.get_or(PREVIOUS, latest);
    let change = latest - previous;
    let gain = change.max(0.0);
    let loss = (-change).max(0.0);

    let p = periods as f64;
    let average_gain = (store.get_or(AVERAGE_GAIN, 0.0) * (p - 1.0) + gain) / p;
    let average_loss = (store.get_or(AVERAGE_LOSS, 0.0) * (p - 1.0) + loss) / p;

    let rs = average_gain / average_loss.max(f64::MIN_POSITIVE);
    let rsi = 100.0 - 100.0 / (1.0 + rs);
    let result = round_to(rsi.clamp(0.0, 100.0), precision);

    store.set(AVERAGE_GAIN, average_gain);
    store.set(AVERAGE_LOSS, average_loss);
    store.set(PREVIOUS, latest);
    store.set_result(result, observation);

    debug!(feature = feature.id(), periods, average_gain, average_loss, result, "RSI updated");
    Ok(result)
}
