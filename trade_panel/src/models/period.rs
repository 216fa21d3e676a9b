//! Calendar periods used to bucket observations.
//!
//! A [`Period`] is a fixed number of calendar months (1, 3 or 12). Bucketing
//! is done on a linear month index relative to 1970-01, so period ids are
//! stable across years and month lengths never matter:
//!
//! ```
//! use chrono::NaiveDate;
//! use trade_panel::models::period::Period;
//!
//! let d = NaiveDate::from_ymd_opt(2020, 2, 14).unwrap();
//! assert_eq!(Period::Quarter.end_of(d), NaiveDate::from_ymd_opt(2020, 3, 31).unwrap());
//! assert_eq!("Q".parse::<Period>().unwrap(), Period::Quarter);
//! ```

use std::{fmt, str::FromStr};

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected period spelling.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown period: {0:?} (expected M, Q or A)")]
pub struct ParsePeriodError(pub String);

/// Sampling period of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Period {
    /// Calendar month
    Month,
    /// Calendar quarter, ending March, June, September, December
    Quarter,
    /// Calendar year
    Year,
}

impl Period {
    /// Width of the period in months.
    pub const fn months(self) -> u32 {
        match self {
            Period::Month => 1,
            Period::Quarter => 3,
            Period::Year => 12,
        }
    }

    /// Id of the period containing `date`.
    pub fn period_id(self, date: NaiveDate) -> i64 {
        let idx = (date.year() as i64 - 1970) * 12 + (date.month0() as i64);
        idx.div_euclid(self.months() as i64)
    }

    /// First calendar day of period `id`.
    pub fn period_start(self, id: i64) -> NaiveDate {
        let start_idx = id * self.months() as i64;
        let year = 1970 + start_idx.div_euclid(12);
        let month = start_idx.rem_euclid(12) as u32 + 1;
        NaiveDate::from_ymd_opt(year as i32, month, 1).unwrap_or(NaiveDate::MAX)
    }

    /// Last calendar day of period `id`.
    pub fn period_end(self, id: i64) -> NaiveDate {
        let start = self.period_start(id);
        start
            .checked_add_months(Months::new(self.months()))
            .and_then(|next| next.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    /// Last calendar day of the period containing `date`.
    pub fn end_of(self, date: NaiveDate) -> NaiveDate {
        self.period_end(self.period_id(date))
    }

    /// True if `date` is the last day of its period.
    pub fn is_period_end(self, date: NaiveDate) -> bool {
        self.end_of(date) == date
    }

    /// Short label such as `2020Q1`, `2020-03` or `2020`.
    pub fn label(self, date: NaiveDate) -> String {
        match self {
            Period::Month => format!("{}-{:02}", date.year(), date.month()),
            Period::Quarter => format!("{}Q{}", date.year(), date.month0() / 3 + 1),
            Period::Year => format!("{}", date.year()),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Period::Month => "M",
            Period::Quarter => "Q",
            Period::Year => "A",
        };
        f.write_str(s)
    }
}

impl FromStr for Period {
    type Err = ParsePeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // single letters are case-sensitive ("m" is not a month), words are not
        match s.trim() {
            "M" => return Ok(Period::Month),
            "Q" | "q" => return Ok(Period::Quarter),
            "A" | "Y" | "a" | "y" => return Ok(Period::Year),
            _ => {}
        }
        match s.trim().to_lowercase().as_str() {
            "month" | "monthly" => Ok(Period::Month),
            "quarter" | "quarterly" => Ok(Period::Quarter),
            "year" | "yearly" | "annual" => Ok(Period::Year),
            _ => Err(ParsePeriodError(s.to_string())),
        }
    }
}

impl TryFrom<String> for Period {
    type Error = ParsePeriodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.to_string()
    }
}
