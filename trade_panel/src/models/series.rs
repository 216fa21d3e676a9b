//! A single named time series of dated observations.

use std::fmt;

use chrono::NaiveDate;

/// One dated value. `None` is the explicit missing marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

impl Observation {
    pub fn new(date: NaiveDate, value: Option<f64>) -> Self {
        // NaN and infinities never travel further than this
        Self {
            date,
            value: value.filter(|v| v.is_finite()),
        }
    }

    pub fn present(date: NaiveDate, value: f64) -> Self {
        Self::new(date, Some(value))
    }

    pub fn missing(date: NaiveDate) -> Self {
        Self { date, value: None }
    }
}

/// A named sequence of observations.
///
/// Construction does not check ordering: series straight out of a file may be
/// unsorted or carry duplicates. [`TimeSeries::check_time_index`] reports the
/// first violation, and the frequency normalizer refuses such input.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub name: String,
    pub observations: Vec<Observation>,
}

/// Where a strictly increasing date index is broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexViolation {
    /// Row of the offending observation.
    pub row: usize,
    pub previous: NaiveDate,
    pub date: NaiveDate,
}

impl TimeSeries {
    pub fn new(name: impl Into<String>, observations: Vec<Observation>) -> Self {
        Self {
            name: name.into(),
            observations,
        }
    }

    /// Builds a series from `(date, value)` pairs, all present.
    pub fn from_pairs(name: impl Into<String>, pairs: &[(NaiveDate, f64)]) -> Self {
        Self::new(
            name,
            pairs
                .iter()
                .map(|&(date, value)| Observation::present(date, value))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.observations.iter().map(|o| o.date)
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.observations.iter().map(|o| o.date).min()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.observations.iter().map(|o| o.date).max()
    }

    /// Value stored for `date`; `None` both when the date is absent and when
    /// it is present but missing.
    pub fn value_at(&self, date: NaiveDate) -> Option<f64> {
        self.observations
            .iter()
            .find(|o| o.date == date)
            .and_then(|o| o.value)
    }

    /// Number of non-missing observations.
    pub fn present_count(&self) -> usize {
        self.observations
            .iter()
            .filter(|o| o.value.is_some())
            .count()
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stable sort by date. Duplicate dates are kept.
    pub fn sorted(mut self) -> Self {
        self.observations.sort_by_key(|o| o.date);
        self
    }

    /// Checks that dates are strictly increasing.
    pub fn check_time_index(&self) -> Result<(), IndexViolation> {
        match self
            .observations
            .windows(2)
            .position(|w| w[1].date <= w[0].date)
        {
            Some(i) => Err(IndexViolation {
                row: i + 1,
                previous: self.observations[i].date,
                date: self.observations[i + 1].date,
            }),
            None => Ok(()),
        }
    }

    pub fn coverage(&self) -> SeriesCoverage {
        SeriesCoverage {
            name: self.name.clone(),
            first: self.first_date(),
            last: self.last_date(),
            observations: self.present_count(),
        }
    }
}

/// Date range of a series, used to explain why an alignment came out empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesCoverage {
    pub name: String,
    pub first: Option<NaiveDate>,
    pub last: Option<NaiveDate>,
    /// Non-missing observations.
    pub observations: usize,
}

impl fmt::Display for SeriesCoverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.first, self.last) {
            (Some(first), Some(last)) => write!(
                f,
                "{}: {first}..{last} ({} obs)",
                self.name, self.observations
            ),
            _ => write!(f, "{}: no observations", self.name),
        }
    }
}
