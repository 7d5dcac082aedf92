//! Trading calendars, looked up by identifier.
//!
//! Calendars validate session ranges during ingestion. The built-ins are
//! deliberately simple (no exchange holidays); richer calendars plug in through
//! [`TradingCalendar`] and [`CalendarRegistry::insert`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Weekday};

use crate::error::BundleError;

/// A set of trading sessions, one per calendar day at most.
pub trait TradingCalendar: Send + Sync {
    /// Identifier this calendar is registered under.
    fn name(&self) -> &str;

    fn first_session(&self) -> NaiveDate;

    fn last_session(&self) -> NaiveDate;

    /// Whether `date` is a trading session.
    fn is_session(&self, date: NaiveDate) -> bool;

    /// All sessions in `[start, end]`, ascending.
    fn sessions_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let start = start.max(self.first_session());
        let end = end.min(self.last_session());
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_session(*d))
            .collect()
    }
}

fn default_first_session() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 1, 2).unwrap_or(NaiveDate::MIN)
}

fn default_last_session() -> NaiveDate {
    NaiveDate::from_ymd_opt(2099, 12, 31).unwrap_or(NaiveDate::MAX)
}

/// Monday through Friday sessions.
#[derive(Debug, Clone)]
pub struct WeekdayCalendar {
    name: String,
    first: NaiveDate,
    last: NaiveDate,
}

impl WeekdayCalendar {
    pub fn new(name: impl Into<String>, first: NaiveDate, last: NaiveDate) -> Self {
        Self {
            name: name.into(),
            first,
            last,
        }
    }
}

impl TradingCalendar for WeekdayCalendar {
    fn name(&self) -> &str {
        &self.name
    }

    fn first_session(&self) -> NaiveDate {
        self.first
    }

    fn last_session(&self) -> NaiveDate {
        self.last
    }

    fn is_session(&self, date: NaiveDate) -> bool {
        date >= self.first
            && date <= self.last
            && !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

/// Every calendar day is a session (crypto venues).
#[derive(Debug, Clone)]
pub struct AlwaysOpenCalendar {
    name: String,
    first: NaiveDate,
    last: NaiveDate,
}

impl AlwaysOpenCalendar {
    pub fn new(name: impl Into<String>, first: NaiveDate, last: NaiveDate) -> Self {
        Self {
            name: name.into(),
            first,
            last,
        }
    }
}

impl TradingCalendar for AlwaysOpenCalendar {
    fn name(&self) -> &str {
        &self.name
    }

    fn first_session(&self) -> NaiveDate {
        self.first
    }

    fn last_session(&self) -> NaiveDate {
        self.last
    }

    fn is_session(&self, date: NaiveDate) -> bool {
        date >= self.first && date <= self.last
    }
}

/// Sessions an ingestion covers: a calendar clamped to `[start, end]`.
#[derive(Clone)]
pub struct SessionRange {
    calendar: Arc<dyn TradingCalendar>,
    start: NaiveDate,
    end: NaiveDate,
    minutes_per_day: u32,
}

impl SessionRange {
    /// Clamp the requested range to `calendar`. A missing start means the
    /// calendar's first session, a missing end its last session.
    ///
    /// Fails with [`BundleError::EmptySessionRange`] when nothing is left
    /// after clamping.
    pub fn resolve(
        calendar: Arc<dyn TradingCalendar>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        minutes_per_day: u32,
    ) -> Result<Self, BundleError> {
        let first = calendar.first_session();
        let last = calendar.last_session();
        let start = start.map_or(first, |s| s.max(first));
        let end = end.map_or(last, |e| e.min(last));
        if start > end {
            return Err(BundleError::EmptySessionRange {
                calendar: calendar.name().to_string(),
                start,
                end,
            });
        }
        Ok(Self {
            calendar,
            start,
            end,
            minutes_per_day,
        })
    }

    pub fn calendar(&self) -> &dyn TradingCalendar {
        self.calendar.as_ref()
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn minutes_per_day(&self) -> u32 {
        self.minutes_per_day
    }

    /// Whether `date` is a session of the calendar inside the range.
    pub fn contains_session(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end && self.calendar.is_session(date)
    }

    pub fn sessions(&self) -> Vec<NaiveDate> {
        self.calendar.sessions_in_range(self.start, self.end)
    }
}

impl std::fmt::Debug for SessionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRange")
            .field("calendar", &self.calendar.name())
            .field("start", &self.start)
            .field("end", &self.end)
            .field("minutes_per_day", &self.minutes_per_day)
            .finish()
    }
}

/// Calendar lookup keyed by identifier.
#[derive(Clone, Default)]
pub struct CalendarRegistry {
    calendars: BTreeMap<String, Arc<dyn TradingCalendar>>,
}

impl CalendarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `NYSE`/`XNYS` (weekdays) and `24/7`/`OPEN` (every day).
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        let first = default_first_session();
        let last = default_last_session();
        for name in ["NYSE", "XNYS"] {
            reg.insert(Arc::new(WeekdayCalendar::new(name, first, last)));
        }
        for name in ["24/7", "OPEN"] {
            reg.insert(Arc::new(AlwaysOpenCalendar::new(name, first, last)));
        }
        reg
    }

    /// Add or replace a calendar under its own name.
    pub fn insert(&mut self, calendar: Arc<dyn TradingCalendar>) {
        self.calendars.insert(calendar.name().to_string(), calendar);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn TradingCalendar>, BundleError> {
        self.calendars
            .get(name)
            .cloned()
            .ok_or_else(|| BundleError::UnknownCalendar(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.calendars.keys().map(|s| s.as_str()).collect()
    }
}

impl std::fmt::Debug for CalendarRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendarRegistry")
            .field("calendars", &self.names())
            .finish()
    }
}
