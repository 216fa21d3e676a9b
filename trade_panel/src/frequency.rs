//! Frequency normalizer: resample a series onto calendar periods.
//!
//! Every period between the first and the last observed period gets exactly
//! one row, dated at the period's last calendar day. A period that received
//! no usable observation is kept as an explicit missing value, never as zero.
//! A series already at the target frequency comes back unchanged apart from
//! its dates, which are re-stamped to period ends.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use chrono::NaiveDate;

use crate::models::period::Period;
use crate::models::series::{Observation, TimeSeries};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrequencyError {
    /// Dates are not strictly increasing (unsorted or duplicated).
    #[error(
        "series `{series}` is not time-indexed: row {row} ({date}) does not come after {previous}"
    )]
    InputNotTimeIndexed {
        series: String,
        row: usize,
        previous: NaiveDate,
        date: NaiveDate,
    },
}

/// How the observations falling into one period are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Arithmetic mean (index levels, rates)
    #[default]
    Mean,
    /// Sum (flows reported per month)
    Sum,
    /// First observation of the period
    First,
    /// Last observation of the period (end-of-period stocks)
    Last,
}

impl Aggregation {
    fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Aggregation::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Aggregation::Sum => Some(values.iter().sum()),
            Aggregation::First => values.first().copied(),
            Aggregation::Last => values.last().copied(),
        }
    }
}

/// Resamples `series` to `period`, combining observations with `how`.
///
/// Missing input values do not contribute. Empty input yields an empty
/// series.
pub fn to_period(
    series: &TimeSeries,
    period: Period,
    how: Aggregation,
) -> Result<TimeSeries, FrequencyError> {
    series
        .check_time_index()
        .map_err(|v| FrequencyError::InputNotTimeIndexed {
            series: series.name.clone(),
            row: v.row,
            previous: v.previous,
            date: v.date,
        })?;

    let (Some(first), Some(last)) = (series.observations.first(), series.observations.last())
    else {
        return Ok(TimeSeries::new(series.name.clone(), Vec::new()));
    };
    let first_id = period.period_id(first.date);
    let last_id = period.period_id(last.date);

    let mut out = Vec::with_capacity((last_id - first_id + 1) as usize);
    let mut rest = series.observations.iter().peekable();
    let mut bucket = Vec::new();
    for id in first_id..=last_id {
        bucket.clear();
        while let Some(obs) = rest.next_if(|o| period.period_id(o.date) == id) {
            if let Some(v) = obs.value {
                bucket.push(v);
            }
        }
        out.push(Observation::new(period.period_end(id), how.apply(&bucket)));
    }

    debug!(
        series = %series.name,
        %period,
        input_rows = series.len(),
        output_rows = out.len(),
        "resampled series"
    );
    Ok(TimeSeries::new(series.name.clone(), out))
}

/// Quarterly means, the usual normalization for monthly trade and production data.
pub fn to_quarterly(series: &TimeSeries) -> Result<TimeSeries, FrequencyError> {
    to_period(series, Period::Quarter, Aggregation::Mean)
}

/// True if no two observations fall into the same `period`.
pub fn is_at_period(series: &TimeSeries, period: Period) -> bool {
    let mut ids: Vec<i64> = series.dates().map(|d| period.period_id(d)).collect();
    let n = ids.len();
    ids.sort_unstable();
    ids.dedup();
    ids.len() == n
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn monthly_to_quarterly_means() {
        let s = TimeSeries::from_pairs(
            "IIP",
            &[
                (d(2019, 1, 1), 1.0),
                (d(2019, 2, 1), 2.0),
                (d(2019, 3, 1), 6.0),
                (d(2019, 4, 1), 10.0),
            ],
        );
        let q = to_quarterly(&s).unwrap();
        assert_eq!(q.name, "IIP");
        assert_eq!(q.len(), 2);
        assert_eq!(q.observations[0], Observation::present(d(2019, 3, 31), 3.0));
        assert_eq!(q.observations[1], Observation::present(d(2019, 6, 30), 10.0));
    }

    #[test]
    fn empty_quarter_is_missing_not_zero() {
        let s = TimeSeries::from_pairs("x", &[(d(2019, 1, 15), 4.0), (d(2019, 7, 15), 8.0)]);
        let q = to_quarterly(&s).unwrap();
        assert_eq!(q.len(), 3);
        assert_eq!(q.observations[1], Observation::missing(d(2019, 6, 30)));
    }

    #[test]
    fn missing_inputs_do_not_contribute() {
        let s = TimeSeries::new(
            "x",
            vec![
                Observation::present(d(2019, 1, 1), 4.0),
                Observation::missing(d(2019, 2, 1)),
                Observation::present(d(2019, 3, 1), 6.0),
                Observation::missing(d(2019, 4, 1)),
            ],
        );
        let q = to_quarterly(&s).unwrap();
        assert_eq!(q.observations[0].value, Some(5.0));
        assert_eq!(q.observations[1], Observation::missing(d(2019, 6, 30)));
    }

    #[test]
    fn quarterly_input_is_restamped_copy() {
        let s = TimeSeries::from_pairs(
            "REER",
            &[(d(2012, 1, 1), 100.0), (d(2012, 4, 1), 101.0), (d(2012, 7, 1), 99.0)],
        );
        assert!(is_at_period(&s, Period::Quarter));
        let q = to_quarterly(&s).unwrap();
        let expected = TimeSeries::from_pairs(
            "REER",
            &[(d(2012, 3, 31), 100.0), (d(2012, 6, 30), 101.0), (d(2012, 9, 30), 99.0)],
        );
        assert_eq!(q, expected);
    }

    #[test]
    fn other_aggregations() {
        let s = TimeSeries::from_pairs(
            "x",
            &[(d(2019, 1, 1), 1.0), (d(2019, 2, 1), 2.0), (d(2019, 3, 1), 4.0)],
        );
        let v = |how| to_period(&s, Period::Quarter, how).unwrap().observations[0].value;
        assert_eq!(v(Aggregation::Sum), Some(7.0));
        assert_eq!(v(Aggregation::First), Some(1.0));
        assert_eq!(v(Aggregation::Last), Some(4.0));
        let y = to_period(&s, Period::Year, Aggregation::Mean).unwrap();
        assert_eq!(y.observations, vec![Observation::present(d(2019, 12, 31), 7.0 / 3.0)]);
    }

    #[test]
    fn rejects_unsorted_and_duplicate_dates() {
        let dup = TimeSeries::from_pairs("x", &[(d(2019, 1, 1), 1.0), (d(2019, 1, 1), 2.0)]);
        assert_eq!(
            to_quarterly(&dup),
            Err(FrequencyError::InputNotTimeIndexed {
                series: "x".into(),
                row: 1,
                previous: d(2019, 1, 1),
                date: d(2019, 1, 1),
            })
        );
        let unsorted = TimeSeries::from_pairs("x", &[(d(2019, 5, 1), 1.0), (d(2019, 1, 1), 2.0)]);
        assert!(matches!(
            to_quarterly(&unsorted),
            Err(FrequencyError::InputNotTimeIndexed { row: 1, .. })
        ));
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let q = to_quarterly(&TimeSeries::new("x", vec![])).unwrap();
        assert!(q.is_empty());
    }

    fn month_date(quarter: usize, month_in_quarter: usize) -> NaiveDate {
        let idx = quarter * 3 + month_in_quarter;
        d(2000 + (idx / 12) as i32, (idx % 12) as u32 + 1, 15)
    }

    proptest! {
        #[test]
        fn one_row_per_quarter_with_means(
            mut counts in proptest::collection::vec(0usize..=3, 1..16),
            values in proptest::collection::vec(-1.0e3f64..1.0e3, 48),
        ) {
            let q = counts.len();
            counts[0] = counts[0].max(1);
            counts[q - 1] = counts[q - 1].max(1);

            let mut pairs = Vec::new();
            for (quarter, &n) in counts.iter().enumerate() {
                for m in 0..n {
                    pairs.push((month_date(quarter, m), values[quarter * 3 + m]));
                }
            }
            let out = to_quarterly(&TimeSeries::from_pairs("x", &pairs)).unwrap();

            prop_assert_eq!(out.len(), q);
            for (quarter, &n) in counts.iter().enumerate() {
                let obs = out.observations[quarter];
                prop_assert!(Period::Quarter.is_period_end(obs.date));
                if n == 0 {
                    prop_assert_eq!(obs.value, None);
                } else {
                    let slice = &values[quarter * 3..quarter * 3 + n];
                    let mean = slice.iter().sum::<f64>() / n as f64;
                    prop_assert!((obs.value.unwrap() - mean).abs() < 1e-9);
                }
            }
        }
    }
}
