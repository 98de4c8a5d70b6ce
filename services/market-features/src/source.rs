//! Read-only windows over a history
//!
//! A `Source` borrows a contiguous slice of a [`crate::history::History`]
//! (or any slice, for tests) and optionally a predicate. It never copies or
//! mutates the backing events. Predicate-filtered sources compute their
//! size and bounds lazily, on first request.
//!
//! Besides its actual element count a source may carry an *intended size*:
//! the number of periods an indicator was configured for, independent of
//! how many events are currently available.

use std::cell::OnceCell;
use std::fmt;

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use types::time::Timestamped;

/// How a source was requested from its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// The whole history.
    All,
    /// Events no older than `now - duration`.
    Within(TimeDelta),
    /// The most recent `n` events.
    Last(usize),
}

/// Window request as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowSpec {
    All {
        #[serde(default)]
        intended_size: Option<usize>,
    },
    Within {
        millis: i64,
        #[serde(default)]
        intended_size: Option<usize>,
    },
    Last {
        count: usize,
    },
}

impl WindowSpec {
    pub fn all() -> Self {
        WindowSpec::All {
            intended_size: None,
        }
    }

    pub fn within(duration: TimeDelta) -> Self {
        WindowSpec::Within {
            millis: duration.num_milliseconds(),
            intended_size: None,
        }
    }

    /// Duration window that an indicator expects to hold `periods` events.
    pub fn within_periods(duration: TimeDelta, periods: usize) -> Self {
        WindowSpec::Within {
            millis: duration.num_milliseconds(),
            intended_size: Some(periods),
        }
    }

    pub fn last(count: usize) -> Self {
        WindowSpec::Last { count }
    }

    /// Runtime window for this request.
    pub fn window(&self) -> Window {
        match *self {
            WindowSpec::All { .. } => Window::All,
            WindowSpec::Within { millis, .. } => Window::Within(TimeDelta::milliseconds(millis)),
            WindowSpec::Last { count } => Window::Last(count),
        }
    }

    /// Intended size carried by the resulting source.
    pub fn intended_size(&self) -> Option<usize> {
        match *self {
            WindowSpec::All { intended_size } => intended_size,
            WindowSpec::Within { intended_size, .. } => intended_size,
            WindowSpec::Last { count } => Some(count),
        }
    }
}

/// What a source exposed at one instant.
///
/// Stateful indicators compare observations to stay idempotent when asked
/// repeatedly about unchanged data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub as_of: Option<NaiveDateTime>,
    pub latest: Option<NaiveDateTime>,
    /// Recording sequence of the latest visible event.
    pub latest_sequence: Option<u64>,
    pub len: usize,
}

/// Lazily computed bounds of a filtered source.
#[derive(Debug, Clone, Copy)]
struct FilteredBounds {
    len: usize,
    first: Option<usize>,
    last: Option<usize>,
}

type Predicate<'a, T> = Box<dyn Fn(&T) -> bool + 'a>;

/// A bounded, read-only view over recorded events.
pub struct Source<'a, T> {
    items: &'a [T],
    window: Window,
    intended_size: Option<usize>,
    as_of: Option<NaiveDateTime>,
    /// Recording sequence of `items[0]`.
    first_sequence: u64,
    filter: Option<Predicate<'a, T>>,
    filtered: OnceCell<FilteredBounds>,
}

impl<'a, T> Source<'a, T> {
    pub(crate) fn new(items: &'a [T], window: Window, as_of: Option<NaiveDateTime>) -> Self {
        let intended_size = match window {
            Window::Last(n) => Some(n),
            _ => None,
        };
        Self {
            items,
            window,
            intended_size,
            as_of,
            first_sequence: 0,
            filter: None,
            filtered: OnceCell::new(),
        }
    }

    /// Number the first item with its position in the recording order.
    pub(crate) fn with_first_sequence(mut self, first_sequence: u64) -> Self {
        self.first_sequence = first_sequence;
        self
    }

    /// Attach the number of periods an indicator expects from this source.
    pub fn with_intended_size(mut self, intended_size: usize) -> Self {
        self.intended_size = Some(intended_size);
        self
    }

    /// Restrict the source to events matching `predicate`.
    pub fn with_filter(mut self, predicate: impl Fn(&T) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(predicate));
        self.filtered = OnceCell::new();
        self
    }

    /// Override the instant this source was taken at.
    pub fn with_as_of(mut self, as_of: NaiveDateTime) -> Self {
        self.as_of = Some(as_of);
        self
    }

    fn bounds(&self) -> Option<&FilteredBounds> {
        let filter = self.filter.as_ref()?;
        Some(self.filtered.get_or_init(|| {
            let mut bounds = FilteredBounds {
                len: 0,
                first: None,
                last: None,
            };
            for (idx, item) in self.items.iter().enumerate() {
                if filter(item) {
                    bounds.len += 1;
                    bounds.first.get_or_insert(idx);
                    bounds.last = Some(idx);
                }
            }
            bounds
        }))
    }

    /// Number of events visible through this source.
    pub fn len(&self) -> usize {
        match self.bounds() {
            Some(bounds) => bounds.len,
            None => self.items.len(),
        }
    }

    /// Whether no event is visible. A filtered source is empty when no
    /// event satisfies its predicate, even if the window itself is not.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Oldest visible event.
    pub fn earliest(&self) -> Option<&'a T> {
        let items = self.items;
        match self.bounds() {
            Some(bounds) => bounds.first.map(|idx| &items[idx]),
            None => items.first(),
        }
    }

    /// Most recent visible event.
    pub fn latest(&self) -> Option<&'a T> {
        let items = self.items;
        self.latest_index().map(|idx| &items[idx])
    }

    fn latest_index(&self) -> Option<usize> {
        match self.bounds() {
            Some(bounds) => bounds.last,
            None => self.items.len().checked_sub(1),
        }
    }

    /// Recording sequence of the most recent visible event.
    ///
    /// Distinguishes events that share a timestamp, which the timestamp
    /// alone cannot.
    pub fn latest_sequence(&self) -> Option<u64> {
        self.latest_index().map(|idx| self.first_sequence + idx as u64)
    }

    /// Iterate visible events in recording order.
    pub fn iter(&self) -> SourceIter<'_, T> {
        SourceIter {
            inner: self.items.iter(),
            filter: self.filter.as_deref(),
        }
    }

    /// The window this source was requested with.
    pub fn window(&self) -> Window {
        self.window
    }

    /// Requested duration, kept even when the source is empty.
    pub fn requested_duration(&self) -> Option<TimeDelta> {
        match self.window {
            Window::Within(duration) => Some(duration),
            _ => None,
        }
    }

    /// Requested count, kept even when the source is empty.
    pub fn requested_count(&self) -> Option<usize> {
        match self.window {
            Window::Last(n) => Some(n),
            _ => None,
        }
    }

    /// Number of periods an indicator was configured for, if any.
    pub fn intended_size(&self) -> Option<usize> {
        self.intended_size
    }

    /// Intended size if set, else the actual size.
    pub fn period_count(&self) -> usize {
        self.intended_size.unwrap_or_else(|| self.len())
    }

    /// Clock instant at which the source was taken.
    pub fn as_of(&self) -> Option<NaiveDateTime> {
        self.as_of
    }
}

impl<'a, T: Timestamped> Source<'a, T> {
    /// Source over an explicit slice, taken as of its last element.
    pub fn from_slice(items: &'a [T]) -> Self {
        let as_of = items.last().map(|item| item.timestamp());
        Self::new(items, Window::All, as_of)
    }

    /// Snapshot of what this source currently exposes.
    pub fn observation(&self) -> Observation {
        Observation {
            as_of: self.as_of,
            latest: self.latest().map(|item| item.timestamp()),
            latest_sequence: self.latest_sequence(),
            len: self.len(),
        }
    }
}

impl<T> fmt::Debug for Source<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("window", &self.window)
            .field("len", &self.len())
            .field("intended_size", &self.intended_size)
            .field("as_of", &self.as_of)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// Iterator over the visible events of a [`Source`].
pub struct SourceIter<'s, T> {
    inner: std::slice::Iter<'s, T>,
    filter: Option<&'s (dyn Fn(&T) -> bool + 's)>,
}

impl<'s, T> Iterator for SourceIter<'s, T> {
    type Item = &'s T;

    fn next(&mut self) -> Option<Self::Item> {
        match self.filter {
            Some(filter) => self.inner.by_ref().find(|&item| filter(item)),
            None => self.inner.next(),
        }
    }
}
