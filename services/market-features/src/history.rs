//! Windowed history store
//!
//! Append-only, bounded sequence of timestamped events of one type.
//! Histories hand out read-only [`Source`] views without copying.
//!
//! Bounding: once the store grows past `max_size`, it is pruned to the
//! events within `retention` of the clock's current time. The two most
//! recent events (latest/previous) always survive a prune.
//!
//! Duration windows are resolved by binary search on the timestamps.
//! A small `(now, duration) -> index` cache avoids repeated scans when the
//! same instant is queried with several durations inside one tick.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDateTime, TimeDelta};
use tracing::{debug, info, warn};
use types::errors::HistoryError;
use types::time::{Clock, Timestamped};

use crate::config::HistoryConfig;
use crate::source::{Source, Window, WindowSpec};

/// Cache of earliest eligible indices for one clock instant.
///
/// Cleared wholesale when the instant changes, when it outgrows its
/// capacity, and whenever the backing store changes.
#[derive(Debug)]
struct IndexCache {
    as_of: Option<NaiveDateTime>,
    entries: HashMap<TimeDelta, usize>,
    capacity: usize,
}

impl IndexCache {
    fn new(capacity: usize) -> Self {
        Self {
            as_of: None,
            entries: HashMap::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn lookup(&mut self, now: NaiveDateTime, duration: TimeDelta) -> Option<usize> {
        if self.as_of != Some(now) {
            self.entries.clear();
            self.as_of = Some(now);
            return None;
        }
        self.entries.get(&duration).copied()
    }

    fn store(&mut self, duration: TimeDelta, index: usize) {
        if self.entries.len() >= self.capacity {
            self.entries.clear();
        }
        self.entries.insert(duration, index);
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.as_of = None;
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Append-only bounded event store.
pub struct History<T> {
    events: Vec<T>,
    config: HistoryConfig,
    clock: Arc<dyn Clock>,
    index_cache: RefCell<IndexCache>,
    /// Events ever recorded, including pruned ones.
    recorded: u64,
    prunes: u64,
}

impl<T: Timestamped> History<T> {
    pub fn new(config: HistoryConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            max_size = config.max_size,
            retention_millis = config.retention_millis,
            "History initialized"
        );
        let index_cache = RefCell::new(IndexCache::new(config.index_cache_capacity));
        Self {
            events: Vec::new(),
            config,
            clock,
            index_cache,
            recorded: 0,
            prunes: 0,
        }
    }

    /// Append an event.
    ///
    /// Events must arrive in non-decreasing timestamp order; an older event
    /// is rejected and the store is left untouched.
    pub fn record(&mut self, event: T) -> Result<(), HistoryError> {
        if let Some(last) = self.events.last() {
            if event.timestamp() < last.timestamp() {
                warn!(
                    last = %last.timestamp(),
                    received = %event.timestamp(),
                    "Rejecting out-of-order event"
                );
                return Err(HistoryError::OutOfOrder {
                    last: last.timestamp().to_string(),
                    received: event.timestamp().to_string(),
                });
            }
        }

        self.events.push(event);
        self.recorded += 1;
        self.index_cache.get_mut().clear();

        if self.events.len() > self.config.max_size {
            self.prune();
        }
        Ok(())
    }

    /// Drop events older than the retention window, keeping latest/previous.
    fn prune(&mut self) -> usize {
        let cutoff = self.clock.now() - self.config.retention();
        let first_retained = self
            .events
            .partition_point(|e| e.timestamp() < cutoff)
            .min(self.events.len().saturating_sub(2));

        if first_retained > 0 {
            self.events.drain(..first_retained);
            self.prunes += 1;
            self.index_cache.get_mut().clear();
        }

        debug!(
            removed = first_retained,
            retained = self.events.len(),
            cutoff = %cutoff,
            "History pruned"
        );
        first_retained
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Most recent event.
    pub fn latest(&self) -> Option<&T> {
        self.events.last()
    }

    /// Event recorded just before the latest.
    pub fn previous(&self) -> Option<&T> {
        self.events.len().checked_sub(2).map(|idx| &self.events[idx])
    }

    /// Total events ever recorded (monotonic across prunes).
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Number of prunes that removed at least one event.
    pub fn prunes(&self) -> u64 {
        self.prunes
    }

    /// All stored events in recording order.
    pub fn events(&self) -> &[T] {
        &self.events
    }

    /// The whole history.
    pub fn as_source(&self) -> Source<'_, T> {
        Source::new(&self.events, Window::All, Some(self.clock.now()))
            .with_first_sequence(self.sequence_of(0))
    }

    /// Events no older than `now - duration` (boundary inclusive).
    pub fn as_source_within(&self, duration: TimeDelta) -> Source<'_, T> {
        let now = self.clock.now();
        let start = self.earliest_index_within(now, duration);
        Source::new(&self.events[start..], Window::Within(duration), Some(now))
            .with_first_sequence(self.sequence_of(start))
    }

    /// The most recent `count` events; intended size is `count`.
    pub fn as_source_last(&self, count: usize) -> Source<'_, T> {
        let start = self.events.len() - count.min(self.events.len());
        Source::new(
            &self.events[start..],
            Window::Last(count),
            Some(self.clock.now()),
        )
        .with_first_sequence(self.sequence_of(start))
    }

    /// Duration window restricted to events matching `predicate`.
    pub fn as_source_within_where<'a>(
        &'a self,
        duration: TimeDelta,
        predicate: impl Fn(&T) -> bool + 'a,
    ) -> Source<'a, T> {
        self.as_source_within(duration).with_filter(predicate)
    }

    /// Count window restricted to events matching `predicate`.
    pub fn as_source_last_where<'a>(
        &'a self,
        count: usize,
        predicate: impl Fn(&T) -> bool + 'a,
    ) -> Source<'a, T> {
        self.as_source_last(count).with_filter(predicate)
    }

    /// Source for a configured window request.
    pub fn source_for(&self, spec: &WindowSpec) -> Source<'_, T> {
        let source = match spec.window() {
            Window::All => self.as_source(),
            Window::Within(duration) => self.as_source_within(duration),
            Window::Last(count) => self.as_source_last(count),
        };
        match spec.intended_size() {
            Some(intended) => source.with_intended_size(intended),
            None => source,
        }
    }

    /// Recording sequence of the event stored at `index`.
    fn sequence_of(&self, index: usize) -> u64 {
        self.recorded - self.events.len() as u64 + index as u64
    }

    /// Index of the first event with `timestamp >= now - duration`.
    fn earliest_index_within(&self, now: NaiveDateTime, duration: TimeDelta) -> usize {
        let duration = duration.max(TimeDelta::zero());
        let mut cache = self.index_cache.borrow_mut();
        if let Some(index) = cache.lookup(now, duration) {
            return index;
        }

        let cutoff = now - duration;
        let index = self.events.partition_point(|e| e.timestamp() < cutoff);

        cache.store(duration, index);
        index
    }

    #[cfg(test)]
    fn cached_indices(&self) -> usize {
        self.index_cache.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use types::time::ManualClock;

    #[derive(Debug, Clone, PartialEq)]
    struct Tick {
        at: NaiveDateTime,
        value: f64,
    }

    impl Timestamped for Tick {
        fn timestamp(&self) -> NaiveDateTime {
            self.at
        }
    }

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn tick(offset_secs: i64, value: f64) -> Tick {
        Tick {
            at: base() + TimeDelta::seconds(offset_secs),
            value,
        }
    }

    fn make_history(config: HistoryConfig) -> (History<Tick>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(base()));
        (History::new(config, clock.clone()), clock)
    }

    fn values(source: &Source<'_, Tick>) -> Vec<f64> {
        source.iter().map(|t| t.value).collect()
    }

    #[test]
    fn test_empty_history() {
        let (history, _) = make_history(HistoryConfig::default());
        assert!(history.is_empty());
        assert!(history.latest().is_none());
        assert!(history.previous().is_none());
        assert!(history.as_source().is_empty());
    }

    #[test]
    fn test_latest_and_previous() {
        let (mut history, _) = make_history(HistoryConfig::default());
        history.record(tick(0, 1.0)).unwrap();
        assert_eq!(history.latest().unwrap().value, 1.0);
        assert!(history.previous().is_none());

        history.record(tick(1, 2.0)).unwrap();
        assert_eq!(history.latest().unwrap().value, 2.0);
        assert_eq!(history.previous().unwrap().value, 1.0);
    }

    #[test]
    fn test_rejects_out_of_order() {
        let (mut history, _) = make_history(HistoryConfig::default());
        history.record(tick(10, 1.0)).unwrap();
        let err = history.record(tick(5, 2.0)).unwrap_err();
        assert!(matches!(err, HistoryError::OutOfOrder { .. }));
        assert_eq!(history.len(), 1);

        // Equal timestamps are allowed
        history.record(tick(10, 3.0)).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_duration_window_is_boundary_inclusive() {
        let (mut history, clock) = make_history(HistoryConfig::default());
        for i in 0..10 {
            history.record(tick(i, i as f64)).unwrap();
        }
        clock.set(base() + TimeDelta::seconds(9));

        // now - 3s = t+6, which must be included
        let source = history.as_source_within(TimeDelta::seconds(3));
        assert_eq!(values(&source), vec![6.0, 7.0, 8.0, 9.0]);
        assert_eq!(source.requested_duration(), Some(TimeDelta::seconds(3)));
    }

    #[test]
    fn test_duration_window_older_than_history_is_empty() {
        let (mut history, clock) = make_history(HistoryConfig::default());
        for i in 0..5 {
            history.record(tick(i, i as f64)).unwrap();
        }
        clock.set(base() + TimeDelta::hours(1));

        let source = history.as_source_within(TimeDelta::seconds(30));
        assert!(source.is_empty());
        assert_eq!(source.requested_duration(), Some(TimeDelta::seconds(30)));
    }

    #[test]
    fn test_count_window() {
        let (mut history, _) = make_history(HistoryConfig::default());
        for i in 0..5 {
            history.record(tick(i, i as f64)).unwrap();
        }

        assert_eq!(values(&history.as_source_last(3)), vec![2.0, 3.0, 4.0]);
        assert_eq!(history.as_source_last(10).len(), 5);

        let none = history.as_source_last(0);
        assert!(none.is_empty());
        assert_eq!(none.intended_size(), Some(0));
    }

    #[test]
    fn test_count_window_on_empty_history_reports_intended_size() {
        let (history, _) = make_history(HistoryConfig::default());
        let source = history.as_source_last(14);
        assert!(source.is_empty());
        assert_eq!(source.intended_size(), Some(14));
    }

    #[test]
    fn test_filtered_windows() {
        let (mut history, clock) = make_history(HistoryConfig::default());
        for i in 0..6 {
            history.record(tick(i, i as f64)).unwrap();
        }
        clock.set(base() + TimeDelta::seconds(5));

        let odd = history.as_source_last_where(4, |t| t.value as i64 % 2 == 1);
        assert_eq!(values(&odd), vec![3.0, 5.0]);

        let big = history.as_source_within_where(TimeDelta::seconds(2), |t| t.value > 100.0);
        assert!(big.is_empty());
    }

    #[test]
    fn test_index_cache_bounded_and_reset_on_new_instant() {
        let config = HistoryConfig {
            index_cache_capacity: 3,
            ..HistoryConfig::default()
        };
        let (mut history, clock) = make_history(config);
        for i in 0..20 {
            history.record(tick(i, i as f64)).unwrap();
        }
        clock.set(base() + TimeDelta::seconds(19));

        for secs in 1..=3 {
            history.as_source_within(TimeDelta::seconds(secs));
        }
        assert_eq!(history.cached_indices(), 3);

        // Overflow clears wholesale, then stores the new entry
        history.as_source_within(TimeDelta::seconds(4));
        assert_eq!(history.cached_indices(), 1);

        // Repeat query hits the cache and stays consistent
        let first = values(&history.as_source_within(TimeDelta::seconds(4)));
        assert_eq!(first, vec![15.0, 16.0, 17.0, 18.0, 19.0]);

        clock.advance(TimeDelta::seconds(1));
        let advanced = history.as_source_within(TimeDelta::seconds(4));
        assert_eq!(values(&advanced), vec![16.0, 17.0, 18.0, 19.0]);
        assert_eq!(history.cached_indices(), 1);
    }

    #[test]
    fn test_prune_keeps_retention_window() {
        let config = HistoryConfig {
            max_size: 10,
            retention_millis: 5_000,
            index_cache_capacity: 25,
        };
        let (mut history, clock) = make_history(config);
        for i in 0..11 {
            clock.set(base() + TimeDelta::seconds(i));
            history.record(tick(i, i as f64)).unwrap();
        }

        // now = t+10, retention 5s keeps t+5..=t+10
        assert_eq!(history.len(), 6);
        assert_eq!(history.as_source().earliest().unwrap().value, 5.0);
        assert_eq!(history.recorded(), 11);
        assert_eq!(history.prunes(), 1);
        // Sequences keep counting from the first event ever recorded
        assert_eq!(history.as_source().latest_sequence(), Some(10));
        assert_eq!(history.as_source_last(1).latest_sequence(), Some(10));
    }

    #[test]
    fn test_latest_sequence_separates_equal_timestamps() {
        let (mut history, _) = make_history(HistoryConfig::default());
        history.record(tick(0, 1.0)).unwrap();
        history.record(tick(1, 2.0)).unwrap();
        let before = history.as_source_last(2).observation();

        history.record(tick(1, 3.0)).unwrap();
        let after = history.as_source_last(2).observation();

        assert_eq!(before.len, after.len);
        assert_eq!(before.latest, after.latest);
        assert_eq!(before.latest_sequence, Some(1));
        assert_eq!(after.latest_sequence, Some(2));
        assert_ne!(before, after);
    }

    #[test]
    fn test_prune_never_drops_latest_and_previous() {
        let config = HistoryConfig {
            max_size: 3,
            retention_millis: 1_000,
            index_cache_capacity: 25,
        };
        let (mut history, clock) = make_history(config);
        for i in 0..4 {
            history.record(tick(i, i as f64)).unwrap();
        }
        // Everything is far older than the retention window
        clock.set(base() + TimeDelta::hours(2));
        history.record(tick(4, 4.0)).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history.latest().unwrap().value, 4.0);
        assert_eq!(history.previous().unwrap().value, 3.0);
    }

    #[test]
    fn test_source_for_window_spec() {
        let (mut history, clock) = make_history(HistoryConfig::default());
        for i in 0..10 {
            history.record(tick(i, i as f64)).unwrap();
        }
        clock.set(base() + TimeDelta::seconds(9));

        let spec = WindowSpec::within_periods(TimeDelta::seconds(4), 5);
        let source = history.source_for(&spec);
        assert_eq!(source.len(), 5);
        assert_eq!(source.intended_size(), Some(5));

        let last = history.source_for(&WindowSpec::last(2));
        assert_eq!(values(&last), vec![8.0, 9.0]);
    }
}
