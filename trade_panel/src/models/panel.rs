//! Date-indexed table of named numeric columns.
//!
//! A [`Panel`] is what the aligner produces and what the later stages read:
//! unique, strictly increasing dates and any number of `Option<f64>` columns
//! of the same length, kept in insertion order. Stages never mutate a panel
//! they were handed; they build a new one.

use std::fmt;

use chrono::NaiveDate;
use indexmap::IndexMap;
use polars::prelude::{Column, DataFrame, PolarsResult};
use thiserror::Error;

/// Structural problems when building or slicing a panel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PanelError {
    #[error("column `{column}` has {actual} values but the panel has {expected} rows")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("panel dates must be strictly increasing (row {row}: {date})")]
    UnsortedDates { row: usize, date: NaiveDate },

    #[error("unknown column `{0}`")]
    UnknownColumn(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Panel {
    dates: Vec<NaiveDate>,
    columns: IndexMap<String, Vec<Option<f64>>>,
}

impl Panel {
    /// An empty-column panel over `dates`.
    pub fn new(dates: Vec<NaiveDate>) -> Result<Self, PanelError> {
        if let Some(i) = dates.windows(2).position(|w| w[1] <= w[0]) {
            return Err(PanelError::UnsortedDates {
                row: i + 1,
                date: dates[i + 1],
            });
        }
        Ok(Self {
            dates,
            columns: IndexMap::new(),
        })
    }

    /// Appends `name`, or replaces it in place if it already exists.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<Self, PanelError> {
        let name = name.into();
        if values.len() != self.dates.len() {
            return Err(PanelError::LengthMismatch {
                column: name,
                expected: self.dates.len(),
                actual: values.len(),
            });
        }
        let values = values
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        self.columns.insert(name, values);
        Ok(self)
    }

    pub fn height(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn value(&self, name: &str, row: usize) -> Option<f64> {
        self.columns.get(name).and_then(|c| c.get(row).copied().flatten())
    }

    /// Row index of `date`, if present.
    pub fn row_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// Number of rows with a missing cell in any of `columns` (all columns
    /// when the list is empty).
    pub fn incomplete_rows(&self, columns: &[&str]) -> Result<usize, PanelError> {
        let mask = self.complete_mask(columns)?;
        Ok(mask.iter().filter(|keep| !**keep).count())
    }

    /// Complete-case filter: drops every row that is missing a value in any of
    /// `columns` (all columns when the list is empty). Dropping is row-atomic.
    pub fn drop_incomplete(&self, columns: &[&str]) -> Result<Panel, PanelError> {
        let mask = self.complete_mask(columns)?;
        Ok(self.select_rows(&mask))
    }

    /// Keeps rows with `start <= date <= end`; open bounds are unbounded.
    pub fn restrict(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Panel {
        let mask: Vec<bool> = self
            .dates
            .iter()
            .map(|d| start.is_none_or(|s| *d >= s) && end.is_none_or(|e| *d <= e))
            .collect();
        self.select_rows(&mask)
    }

    /// The first `n` rows.
    pub fn head(&self, n: usize) -> Panel {
        let mask: Vec<bool> = (0..self.height()).map(|i| i < n).collect();
        self.select_rows(&mask)
    }

    fn complete_mask(&self, columns: &[&str]) -> Result<Vec<bool>, PanelError> {
        let selected: Vec<&Vec<Option<f64>>> = if columns.is_empty() {
            self.columns.values().collect()
        } else {
            columns
                .iter()
                .map(|c| {
                    self.columns
                        .get(*c)
                        .ok_or_else(|| PanelError::UnknownColumn((*c).to_string()))
                })
                .collect::<Result<_, _>>()?
        };
        Ok((0..self.height())
            .map(|row| selected.iter().all(|col| col[row].is_some()))
            .collect())
    }

    fn select_rows(&self, mask: &[bool]) -> Panel {
        let keep = |i: &usize| mask[*i];
        let dates = (0..self.height())
            .filter(keep)
            .map(|i| self.dates[i])
            .collect();
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let kept = (0..self.height()).filter(keep).map(|i| values[i]).collect();
                (name.clone(), kept)
            })
            .collect();
        Panel { dates, columns }
    }

    /// Polars view of the panel: a `date` column (ISO strings) followed by the
    /// numeric columns as nullable `Float64`.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut cols = Vec::with_capacity(self.columns.len() + 1);
        let dates: Vec<String> = self
            .dates
            .iter()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect();
        cols.push(Column::new("date".into(), dates));
        for (name, values) in &self.columns {
            cols.push(Column::new(name.as_str().into(), values.clone()));
        }
        DataFrame::new(cols)
    }
}

impl fmt::Display for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths: Vec<usize> = self.columns.keys().map(|k| k.len().max(12)).collect();
        write!(f, "{:<10}", "date")?;
        for (name, w) in self.columns.keys().zip(widths.iter().copied()) {
            write!(f, "  {name:>w$}")?;
        }
        writeln!(f)?;
        for (row, date) in self.dates.iter().enumerate() {
            write!(f, "{date}")?;
            for (values, w) in self.columns.values().zip(widths.iter().copied()) {
                match values[row] {
                    Some(v) => write!(f, "  {v:>w$.4}")?,
                    None => write!(f, "  {:>w$}", "NaN")?,
                }
            }
            writeln!(f)?;
        }
        write!(f, "[{} rows x {} columns]", self.height(), self.columns.len())
    }
}
