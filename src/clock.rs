use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};

use crate::model::Ms;

/// Source of "now" for every date decision the engine makes.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;

    /// Current calendar date, UTC.
    fn today(&self) -> NaiveDate {
        DateTime::<Utc>::from_timestamp_millis(self.now_ms())
            .map(|dt| dt.date_naive())
            .unwrap_or(NaiveDate::MIN)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: Ms) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    /// Start at midnight UTC of `date`.
    pub fn at_date(date: NaiveDate) -> Self {
        Self::new(midnight_ms(date))
    }

    pub fn set(&self, now_ms: Ms) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn set_date(&self, date: NaiveDate) {
        self.set(midnight_ms(date));
    }

    pub fn advance_days(&self, days: i64) {
        self.now.fetch_add(days * 86_400_000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}

fn midnight_ms(date: NaiveDate) -> Ms {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or(0)
}
