//! Monthly time buckets.

use std::fmt;

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// A time bucket identified by the calendar month it starts in.
///
/// The bucket length is not stored here; it is the configured
/// `time_frequency_months` and is passed in where needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    /// Creates a period for the given year and month (1-12).
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// The period containing `date`.
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// First day of the period's month.
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Inclusive calendar interval covered by a bucket of `months` months.
    ///
    /// Runs from the first of this month to the day before the first of the
    /// month `months` later, e.g. `2020-01` with 3 months is
    /// `2020-01-01 .. 2020-03-31`.
    pub fn interval(&self, months: u32) -> (NaiveDate, NaiveDate) {
        let start = self.first_day();
        let end = start
            .checked_add_months(Months::new(months.max(1)))
            .and_then(|next| next.pred_opt())
            .unwrap_or(start);
        (start, end)
    }

    /// STAC `datetime` range string for the bucket, `YYYY-MM-DD/YYYY-MM-DD`.
    pub fn datetime_range(&self, months: u32) -> String {
        let (start, end) = self.interval(months);
        format!("{}/{}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
    }

    /// Number of whole months from `origin` to this period.
    pub fn months_since(&self, origin: &Period) -> i64 {
        12 * (self.year as i64 - origin.year as i64) + (self.month as i64 - origin.month as i64)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Days between the Unix epoch and `date`, the encoding of the `time` coordinate.
pub fn days_since_epoch(date: NaiveDate) -> i64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN);
    (date - epoch).num_days()
}
