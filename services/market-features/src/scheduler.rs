//! Periodic update scheduler
//!
//! Records one [`PeriodicFeatureResult`] per elapsed period, with periods
//! anchored to a daily start time plus whole multiples of the period
//! length.
//!
//! On each tick:
//! 1. `elapsed = floor((now - last_boundary) / period)`; zero means no-op.
//! 2. Walk the elapsed periods one by one. A period whose start falls in a
//!    non-trading phase is skipped but the boundary still advances, so
//!    periods resume on the grid right after a break.
//! 3. If more than one period elapsed and at least one genuine result was
//!    produced, exactly one filler result is appended before the batch.
//!
//! Listeners are notified once for the filler and once for the batch.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use types::time::Timestamped;

use crate::calendar::TradingCalendar;
use crate::config::SchedulerConfig;
use crate::history::History;

/// A `[start, end)` recording period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}→{}", self.start.format("%H:%M:%S"), self.end.format("%H:%M:%S"))
    }
}

/// Feature values recorded for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicFeatureResult {
    pub period_start: NaiveDateTime,
    pub period_end: NaiveDateTime,
    pub values: BTreeMap<String, f64>,
    /// Catch-up placeholder carrying no feature values.
    pub is_filler: bool,
}

impl PeriodicFeatureResult {
    pub fn genuine(
        period_start: NaiveDateTime,
        period_end: NaiveDateTime,
        values: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            period_start,
            period_end,
            values,
            is_filler: false,
        }
    }

    /// Zero-length filler marking a discontinuity at `at`.
    pub fn filler(at: NaiveDateTime) -> Self {
        Self {
            period_start: at,
            period_end: at,
            values: BTreeMap::new(),
            is_filler: true,
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn period(&self) -> Period {
        Period {
            start: self.period_start,
            end: self.period_end,
        }
    }
}

impl Timestamped for PeriodicFeatureResult {
    fn timestamp(&self) -> NaiveDateTime {
        self.period_end
    }
}

/// Work performed once per genuine period.
///
/// `results` holds everything recorded before the current tick.
pub trait PeriodicComputation {
    fn compute(
        &mut self,
        period: &Period,
        results: &History<PeriodicFeatureResult>,
    ) -> BTreeMap<String, f64>;
}

impl<F> PeriodicComputation for F
where
    F: FnMut(&Period) -> BTreeMap<String, f64>,
{
    fn compute(
        &mut self,
        period: &Period,
        _results: &History<PeriodicFeatureResult>,
    ) -> BTreeMap<String, f64> {
        self(period)
    }
}

/// Consumer of newly recorded results.
pub trait ResultListener: Send {
    fn on_results(&mut self, results: &[PeriodicFeatureResult]);
}

impl<F> ResultListener for F
where
    F: FnMut(&[PeriodicFeatureResult]) + Send,
{
    fn on_results(&mut self, results: &[PeriodicFeatureResult]) {
        self(results)
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickOutcome {
    pub elapsed: usize,
    pub recorded: usize,
    pub skipped: usize,
    pub filler: bool,
}

pub struct PeriodicUpdateScheduler {
    period: TimeDelta,
    daily_start: NaiveTime,
    last_boundary: Option<NaiveDateTime>,
    results: History<PeriodicFeatureResult>,
    updated_in_last_cycle: bool,
    listeners: Vec<Box<dyn ResultListener>>,
}

impl PeriodicUpdateScheduler {
    pub fn new(config: &SchedulerConfig, results: History<PeriodicFeatureResult>) -> Self {
        let period = config.period();
        info!(
            period_millis = period.num_milliseconds(),
            daily_start = %config.daily_start,
            "Periodic scheduler initialized"
        );
        Self {
            period,
            daily_start: config.daily_start,
            last_boundary: None,
            results,
            updated_in_last_cycle: false,
            listeners: Vec::new(),
        }
    }

    /// Anchor the first period at `boundary` instead of the daily start.
    pub fn start_at(mut self, boundary: NaiveDateTime) -> Self {
        self.last_boundary = Some(boundary);
        self
    }

    pub fn add_listener(&mut self, listener: impl ResultListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn results(&self) -> &History<PeriodicFeatureResult> {
        &self.results
    }

    pub fn last_boundary(&self) -> Option<NaiveDateTime> {
        self.last_boundary
    }

    pub fn updated_in_last_cycle(&self) -> bool {
        self.updated_in_last_cycle
    }

    pub fn period(&self) -> TimeDelta {
        self.period
    }

    /// Latest grid boundary at or before `now` on the day of `now`.
    ///
    /// Before the daily start the day's start itself is returned.
    fn anchor_for(&self, now: NaiveDateTime) -> NaiveDateTime {
        let day_start = now.date().and_time(self.daily_start);
        if now <= day_start {
            return day_start;
        }
        let whole = (now - day_start).num_milliseconds() / self.period.num_milliseconds();
        day_start + TimeDelta::milliseconds(whole * self.period.num_milliseconds())
    }

    /// Advance to `now`, recording a result for each due trading period.
    pub fn on_tick<C>(
        &mut self,
        now: NaiveDateTime,
        calendar: &dyn TradingCalendar,
        computation: &mut C,
    ) -> TickOutcome
    where
        C: PeriodicComputation + ?Sized,
    {
        let last = match self.last_boundary {
            Some(last) => last,
            None => {
                let anchor = self.anchor_for(now);
                debug!(anchor = %anchor, "Scheduler anchored");
                self.last_boundary = Some(anchor);
                anchor
            }
        };

        let period_millis = self.period.num_milliseconds();
        let elapsed = if now > last {
            ((now - last).num_milliseconds() / period_millis) as usize
        } else {
            0
        };

        if elapsed == 0 {
            self.updated_in_last_cycle = false;
            return TickOutcome::default();
        }

        let mut genuine = Vec::new();
        let mut skipped = 0;
        let mut start = last;
        for _ in 0..elapsed {
            let period = Period {
                start,
                end: start + self.period,
            };
            if calendar.phase_for_time(period.start).is_trading_session {
                let values = computation.compute(&period, &self.results);
                genuine.push(PeriodicFeatureResult::genuine(period.start, period.end, values));
            } else {
                skipped += 1;
            }
            start = period.end;
        }
        self.last_boundary = Some(start);

        let filler = match genuine.first() {
            Some(first) if elapsed > 1 => Some(PeriodicFeatureResult::filler(first.period_start)),
            _ => None,
        };

        if let Some(filler) = &filler {
            info!(
                elapsed,
                skipped,
                at = %filler.period_start,
                "Catch-up batch, recording filler"
            );
            self.append(filler.clone());
            self.notify(std::slice::from_ref(filler));
        }
        for result in &genuine {
            self.append(result.clone());
        }
        if !genuine.is_empty() {
            self.notify(&genuine);
        }

        self.updated_in_last_cycle = !genuine.is_empty();
        debug!(
            elapsed,
            recorded = genuine.len(),
            skipped,
            boundary = %start,
            "Scheduler tick"
        );

        TickOutcome {
            elapsed,
            recorded: genuine.len(),
            skipped,
            filler: filler.is_some(),
        }
    }

    fn append(&mut self, result: PeriodicFeatureResult) {
        if let Err(err) = self.results.record(result) {
            warn!(error = %err, "Dropping periodic result");
        }
    }

    fn notify(&mut self, results: &[PeriodicFeatureResult]) {
        for listener in &mut self.listeners {
            listener.on_results(results);
        }
    }
}
