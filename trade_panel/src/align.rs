//! Panel aligner: join several normalized series on a common date index.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::panel::{Panel, PanelError};
use crate::models::period::Period;
use crate::models::series::{SeriesCoverage, TimeSeries};

/// Which dates survive the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    /// Union of all dates; absent values become missing cells.
    Outer,
    /// Only dates where every series has a value.
    #[serde(alias = "strict")]
    Inner,
}

impl fmt::Display for JoinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinMode::Outer => "outer",
            JoinMode::Inner => "inner",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignOptions {
    pub join: JoinMode,
    /// Drop every row with a missing cell after the join.
    pub drop_incomplete: bool,
    /// When set, every input date must be an end date of this period.
    pub period: Option<Period>,
}

impl AlignOptions {
    pub fn new(join: JoinMode) -> Self {
        Self {
            join,
            drop_incomplete: true,
            period: None,
        }
    }

    pub fn keep_incomplete(mut self) -> Self {
        self.drop_incomplete = false;
        self
    }

    pub fn at_period(mut self, period: Period) -> Self {
        self.period = Some(period);
        self
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AlignError {
    #[error("no series to align")]
    NoSeries,

    #[error("series name `{0}` appears more than once")]
    DuplicateColumn(String),

    #[error("series `{series}` has more than one observation for {date}")]
    DuplicateDate { series: String, date: NaiveDate },

    #[error("series `{series}` has date {date}, which is not a {period} period end")]
    OffPeriodDate {
        series: String,
        date: NaiveDate,
        period: Period,
    },

    #[error("{join} join left no rows; coverage: {}", format_coverage(.coverage))]
    EmptyAlignedPanel {
        join: JoinMode,
        coverage: Vec<SeriesCoverage>,
    },

    #[error(transparent)]
    Panel(#[from] PanelError),
}

fn format_coverage(coverage: &[SeriesCoverage]) -> String {
    coverage
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Per-series date ranges, in input order.
pub fn coverage(series: &[TimeSeries]) -> Vec<SeriesCoverage> {
    series.iter().map(TimeSeries::coverage).collect()
}

/// Joins `series` into one panel, one column per series in input order.
///
/// With `drop_incomplete` the join is followed by complete-case filtering
/// across all columns. A result with no rows is an error, never an empty
/// panel.
pub fn align(series: &[TimeSeries], opts: &AlignOptions) -> Result<Panel, AlignError> {
    if series.is_empty() {
        return Err(AlignError::NoSeries);
    }
    let lookups = series
        .iter()
        .map(|s| index_series(s, opts.period))
        .collect::<Result<Vec<_>, _>>()?;
    let mut seen = HashSet::new();
    for s in series {
        if !seen.insert(s.name.as_str()) {
            return Err(AlignError::DuplicateColumn(s.name.clone()));
        }
    }

    let dates: Vec<NaiveDate> = match opts.join {
        JoinMode::Outer => series
            .iter()
            .flat_map(|s| s.dates())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        JoinMode::Inner => {
            let mut common: BTreeSet<NaiveDate> = present_dates(&lookups[0]);
            for lookup in &lookups[1..] {
                let other = present_dates(lookup);
                common.retain(|d| other.contains(d));
            }
            common.into_iter().collect()
        }
    };

    let mut panel = Panel::new(dates)?;
    for (s, lookup) in series.iter().zip(&lookups) {
        let values = panel
            .dates()
            .iter()
            .map(|d| lookup.get(d).copied().flatten())
            .collect();
        panel = panel.with_column(s.name.clone(), values)?;
    }
    debug!(join = %opts.join, rows = panel.height(), "joined series");

    if opts.drop_incomplete {
        panel = complete_cases(&panel)?;
    }
    if panel.is_empty() {
        return Err(AlignError::EmptyAlignedPanel {
            join: opts.join,
            coverage: coverage(series),
        });
    }

    info!(
        join = %opts.join,
        rows = panel.height(),
        columns = series.len(),
        first = ?panel.first_date(),
        last = ?panel.last_date(),
        "aligned panel"
    );
    Ok(panel)
}

/// Drops every row with a missing cell, logging how many went.
pub fn complete_cases(panel: &Panel) -> Result<Panel, PanelError> {
    let filtered = panel.drop_incomplete(&[])?;
    let dropped = panel.height() - filtered.height();
    if dropped > 0 {
        warn!(
            dropped,
            remaining = filtered.height(),
            "dropped rows with missing values"
        );
    }
    Ok(filtered)
}

fn index_series(
    series: &TimeSeries,
    period: Option<Period>,
) -> Result<HashMap<NaiveDate, Option<f64>>, AlignError> {
    let mut lookup = HashMap::with_capacity(series.len());
    for obs in &series.observations {
        if let Some(period) = period {
            if !period.is_period_end(obs.date) {
                return Err(AlignError::OffPeriodDate {
                    series: series.name.clone(),
                    date: obs.date,
                    period,
                });
            }
        }
        if lookup.insert(obs.date, obs.value).is_some() {
            return Err(AlignError::DuplicateDate {
                series: series.name.clone(),
                date: obs.date,
            });
        }
    }
    Ok(lookup)
}

fn present_dates(lookup: &HashMap<NaiveDate, Option<f64>>) -> BTreeSet<NaiveDate> {
    lookup
        .iter()
        .filter(|(_, v)| v.is_some())
        .map(|(d, _)| *d)
        .collect()
}
