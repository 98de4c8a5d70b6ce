//! Trading calendar
//!
//! The scheduler asks the calendar which phase a period boundary falls in.
//! Session times come from configuration; nothing here hardcodes a market.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Kind of session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    PreOpen,
    Continuous,
    /// Intraday pause, e.g. a lunch break.
    Break,
    Closed,
}

/// Phase of the market at some instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPhase {
    pub kind: PhaseKind,
    pub is_trading_session: bool,
    pub is_market_open: bool,
}

impl TradingPhase {
    pub fn of(kind: PhaseKind) -> Self {
        let (is_trading_session, is_market_open) = match kind {
            PhaseKind::PreOpen => (true, false),
            PhaseKind::Continuous => (true, true),
            PhaseKind::Break | PhaseKind::Closed => (false, false),
        };
        Self {
            kind,
            is_trading_session,
            is_market_open,
        }
    }
}

/// Phase lookup consumed by the scheduler.
pub trait TradingCalendar: Send + Sync {
    fn phase_for_time(&self, time: NaiveDateTime) -> TradingPhase;
}

/// Calendar that is always in continuous trading.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContinuousCalendar;

impl TradingCalendar for ContinuousCalendar {
    fn phase_for_time(&self, _time: NaiveDateTime) -> TradingPhase {
        TradingPhase::of(PhaseKind::Continuous)
    }
}

/// A `[start, end)` time-of-day range with its phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPhase {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub kind: PhaseKind,
}

impl SessionPhase {
    pub fn new(start: NaiveTime, end: NaiveTime, kind: PhaseKind) -> Self {
        Self { start, end, kind }
    }

    fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }
}

/// Calendar configured as a list of daily phases.
///
/// Times not covered by any phase are `Closed`, as is every time on a
/// closed weekday. The first matching phase wins.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionCalendar {
    #[serde(default)]
    pub phases: Vec<SessionPhase>,
    #[serde(default)]
    pub closed_weekdays: Vec<Weekday>,
}

impl SessionCalendar {
    pub fn new(phases: Vec<SessionPhase>, closed_weekdays: Vec<Weekday>) -> Self {
        info!(
            phases = phases.len(),
            closed_weekdays = closed_weekdays.len(),
            "Session calendar initialized"
        );
        Self {
            phases,
            closed_weekdays,
        }
    }

    /// Continuous trading all day with one intraday break.
    pub fn with_break(open: NaiveTime, break_start: NaiveTime, break_end: NaiveTime, close: NaiveTime) -> Self {
        Self::new(
            vec![
                SessionPhase::new(open, break_start, PhaseKind::Continuous),
                SessionPhase::new(break_start, break_end, PhaseKind::Break),
                SessionPhase::new(break_end, close, PhaseKind::Continuous),
            ],
            Vec::new(),
        )
    }

    pub fn is_continuous(&self) -> bool {
        self.phases.is_empty() && self.closed_weekdays.is_empty()
    }
}

impl TradingCalendar for SessionCalendar {
    fn phase_for_time(&self, time: NaiveDateTime) -> TradingPhase {
        if self.closed_weekdays.contains(&time.weekday()) {
            return TradingPhase::of(PhaseKind::Closed);
        }
        if self.phases.is_empty() {
            return TradingPhase::of(PhaseKind::Continuous);
        }
        let clock_time = time.time();
        self.phases
            .iter()
            .find(|phase| phase.contains(clock_time))
            .map_or(TradingPhase::of(PhaseKind::Closed), |phase| {
                TradingPhase::of(phase.kind)
            })
    }
}
