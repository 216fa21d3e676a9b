//! Series loader: spreadsheet or delimited text file -> [`TimeSeries`].
//!
//! A [`SourceSpec`] names the file, the worksheet (spreadsheets only), the
//! date column and the value column. Workbooks (`.xlsx`, `.xlsm`, `.xlsb`,
//! `.xls`, `.ods`) are read with calamine; everything else goes through the
//! polars CSV reader. Both end up as the same header-plus-rows frame.
//! Column lookup tries the exact name first and then, when configured, a
//! case-insensitive substring match against `fallback_patterns` (e.g. any
//! column containing `reer`). A fallback match is never silent: it is logged
//! at WARN and reported back in [`LoadedSeries`] so callers can assert on it.

use std::path::{Path, PathBuf};

use calamine::{Data, DataType as _, Reader, open_workbook_auto};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frequency::Aggregation;
use crate::models::series::{Observation, TimeSeries};

/// Errors raised while turning a file into a series.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error(
        "column `{column}` not found in {} (available: {})",
        path.display(),
        available.join(", ")
    )]
    ColumnNotFound {
        path: PathBuf,
        column: String,
        available: Vec<String>,
    },

    #[error(
        "unparseable date {value:?} in column `{column}`, row {row} of {}",
        path.display()
    )]
    UnparseableDate {
        path: PathBuf,
        column: String,
        /// 1-based data row (the header is not counted).
        row: usize,
        value: String,
    },

    #[error(
        "sheet `{sheet}` not found in {} (available: {})",
        path.display(),
        available.join(", ")
    )]
    SheetNotFound {
        path: PathBuf,
        sheet: String,
        available: Vec<String>,
    },

    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("failed to open workbook {}", path.display())]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },
}

static EMPTY_CELL: Data = Data::Empty;

const WORKBOOK_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Whether `path` is read as a workbook rather than delimited text.
pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| WORKBOOK_EXTENSIONS.iter().any(|w| ext.eq_ignore_ascii_case(w)))
}

fn default_date_column() -> String {
    "Date".to_string()
}

/// Where one series comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    /// Column name of the series in the aligned panel (e.g. "Exports").
    pub name: String,
    /// Workbook or CSV/TSV file; relative paths are resolved against the
    /// data directory.
    pub path: PathBuf,
    /// Worksheet to read from a workbook; the first sheet when absent.
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default = "default_date_column")]
    pub date_column: String,
    pub value_column: String,
    /// Case-insensitive substrings tried when `value_column` is absent.
    #[serde(default)]
    pub fallback_patterns: Vec<String>,
    /// Case-insensitive substrings tried when `date_column` is absent.
    #[serde(default)]
    pub date_fallback_patterns: Vec<String>,
    /// How observations inside one target period are combined.
    #[serde(default)]
    pub aggregation: Aggregation,
    /// Sort rows by date after loading instead of requiring file order.
    #[serde(default)]
    pub sort: bool,
}

impl SourceSpec {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        date_column: impl Into<String>,
        value_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            sheet: None,
            date_column: date_column.into(),
            value_column: value_column.into(),
            fallback_patterns: Vec::new(),
            date_fallback_patterns: Vec::new(),
            aggregation: Aggregation::default(),
            sort: false,
        }
    }

    pub fn with_fallback_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }
}

/// How a requested column name was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Exact,
    Fallback { pattern: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMatch {
    pub requested: String,
    pub resolved: String,
    pub resolution: Resolution,
}

impl ColumnMatch {
    pub fn used_fallback(&self) -> bool {
        matches!(self.resolution, Resolution::Fallback { .. })
    }
}

/// A loaded series plus the columns it was read from.
#[derive(Debug, Clone)]
pub struct LoadedSeries {
    pub series: TimeSeries,
    pub path: PathBuf,
    pub date_column: ColumnMatch,
    pub value_column: ColumnMatch,
}

/// Resolves `requested` against the file's columns.
///
/// Exact match wins. Otherwise the first column in file order (skipping
/// `exclude`) whose lowercase name contains a lowercase fallback pattern is
/// used; patterns are tried in the order given.
pub fn resolve_column(
    available: &[String],
    requested: &str,
    fallbacks: &[String],
    exclude: Option<&str>,
) -> Option<ColumnMatch> {
    if available.iter().any(|c| c == requested) {
        return Some(ColumnMatch {
            requested: requested.to_string(),
            resolved: requested.to_string(),
            resolution: Resolution::Exact,
        });
    }
    for pattern in fallbacks {
        let needle = pattern.trim().to_lowercase();
        if needle.is_empty() {
            continue;
        }
        let hit = available
            .iter()
            .filter(|c| Some(c.as_str()) != exclude)
            .find(|c| c.to_lowercase().contains(&needle));
        if let Some(col) = hit {
            return Some(ColumnMatch {
                requested: requested.to_string(),
                resolved: col.clone(),
                resolution: Resolution::Fallback {
                    pattern: pattern.clone(),
                },
            });
        }
    }
    None
}

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Parses the date spellings found in statistical-agency downloads.
///
/// Month (`2019-04`), quarter (`2019Q2`, `2019-Q2`) and year (`2019`) labels
/// map to the first day of that month, quarter or year.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    parse_quarter_label(s)
        .or_else(|| parse_month_label(s))
        .or_else(|| parse_year_label(s))
}

fn parse_year(s: &str) -> Option<i32> {
    (s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()))
        .then(|| s.parse().ok())
        .flatten()
}

fn parse_quarter_label(s: &str) -> Option<NaiveDate> {
    let upper = s.to_uppercase();
    let (year, quarter) = upper.split_once('Q')?;
    let year = parse_year(year.trim_end_matches(['-', ' ']))?;
    let quarter: u32 = quarter.parse().ok()?;
    if !(1..=4).contains(&quarter) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1)
}

fn parse_month_label(s: &str) -> Option<NaiveDate> {
    let (year, month) = s.split_once('-')?;
    let year = parse_year(year)?;
    if month.is_empty() || month.len() > 2 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month.parse().ok()?, 1)
}

fn parse_year_label(s: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(parse_year(s)?, 1, 1)
}

/// Reads a source file into a polars frame whose first row is the header.
///
/// Workbooks read `sheet` (the first sheet when `None`). Delimited files
/// ignore `sheet`; `.tsv` files are tab-separated, everything else
/// comma-separated.
pub fn read_table(path: &Path, sheet: Option<&str>) -> Result<DataFrame, LoadError> {
    if !path.is_file() {
        return Err(LoadError::SourceNotFound {
            path: path.to_path_buf(),
        });
    }
    if is_workbook(path) {
        return read_sheet(path, sheet);
    }
    let separator = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    };
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .map_parse_options(|opts| opts.with_separator(separator))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn read_sheet(path: &Path, sheet: Option<&str>) -> Result<DataFrame, LoadError> {
    let workbook_err = |source| LoadError::Workbook {
        path: path.to_path_buf(),
        source,
    };
    let mut workbook = open_workbook_auto(path).map_err(workbook_err)?;
    let available = workbook.sheet_names();
    let name = match sheet {
        Some(wanted) => available.iter().find(|n| n.as_str() == wanted),
        None => available.first(),
    }
    .cloned()
    .ok_or_else(|| LoadError::SheetNotFound {
        path: path.to_path_buf(),
        sheet: sheet.unwrap_or("<first>").to_string(),
        available: available.clone(),
    })?;
    let range = workbook.worksheet_range(&name).map_err(workbook_err)?;

    let mut rows = range.rows();
    let header: Vec<String> = rows
        .next()
        .map(|cells| {
            cells
                .iter()
                .enumerate()
                .map(|(j, cell)| match cell_text(cell) {
                    Some(text) if !text.trim().is_empty() => text.trim().to_string(),
                    _ => format!("column_{}", j + 1),
                })
                .collect()
        })
        .unwrap_or_default();
    let body: Vec<&[Data]> = rows.collect();
    let columns: Vec<Column> = header
        .iter()
        .enumerate()
        .map(|(j, name)| sheet_column(name, body.iter().map(|r| r.get(j).unwrap_or(&EMPTY_CELL))))
        .collect();
    debug!(path = %path.display(), sheet = %name, rows = body.len(), "read worksheet");

    DataFrame::new(columns).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Text of a cell as it would appear in a CSV export; date cells become
/// `YYYY-MM-DD`.
fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => Some(s.clone()),
        Data::DateTime(_) | Data::DateTimeIso(_) => Some(
            cell.as_date()
                .map_or_else(|| cell.to_string(), |d| d.format("%Y-%m-%d").to_string()),
        ),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{f:.0}")),
        other => Some(other.to_string()),
    }
}

/// Integers stay integers so year cells read back as `2019`, not `2019.0`.
/// A column with any text or date cell is kept as text.
fn sheet_column<'a>(name: &str, cells: impl Iterator<Item = &'a Data> + Clone) -> Column {
    let numeric = cells.clone().all(|c| {
        matches!(c, Data::Empty | Data::Error(_) | Data::Int(_) | Data::Float(_))
    });
    let integral = cells.clone().all(|c| match c {
        Data::Float(f) => f.fract() == 0.0 && f.abs() < 1e15,
        _ => true,
    });
    let name = PlSmallStr::from(name);
    if numeric && integral {
        let values: Vec<Option<i64>> = cells
            .map(|c| match c {
                Data::Int(i) => Some(*i),
                Data::Float(f) => Some(*f as i64),
                _ => None,
            })
            .collect();
        Column::new(name, values)
    } else if numeric {
        let values: Vec<Option<f64>> = cells
            .map(|c| match c {
                Data::Int(i) => Some(*i as f64),
                Data::Float(f) => Some(*f),
                _ => None,
            })
            .collect();
        Column::new(name, values)
    } else {
        let values: Vec<Option<String>> = cells.map(cell_text).collect();
        Column::new(name, values)
    }
}

/// Loads one series as described by `spec`.
///
/// Rows whose date cell and value cell are both empty (trailing blank lines
/// of spreadsheet exports) are skipped; any other unparseable date fails.
/// Values that are not numbers (FRED writes `.`) become missing.
pub fn load_series(spec: &SourceSpec) -> Result<LoadedSeries, LoadError> {
    let path = spec.path.as_path();
    let df = read_table(path, spec.sheet.as_deref())?;
    let available: Vec<String> = df
        .get_columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let not_found = |column: &str| LoadError::ColumnNotFound {
        path: path.to_path_buf(),
        column: column.to_string(),
        available: available.clone(),
    };
    let date_column = resolve_column(
        &available,
        &spec.date_column,
        &spec.date_fallback_patterns,
        None,
    )
    .ok_or_else(|| not_found(&spec.date_column))?;
    let value_column = resolve_column(
        &available,
        &spec.value_column,
        &spec.fallback_patterns,
        Some(&date_column.resolved),
    )
    .ok_or_else(|| not_found(&spec.value_column))?;

    for m in [&date_column, &value_column] {
        if let Resolution::Fallback { pattern } = &m.resolution {
            warn!(
                series = %spec.name,
                requested = %m.requested,
                using = %m.resolved,
                pattern = %pattern,
                "column not found by exact name; using fallback match"
            );
        }
    }

    let read_err = |source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    };
    let raw_dates = df
        .column(&date_column.resolved)
        .and_then(|c| c.as_materialized_series().cast(&DataType::String))
        .map_err(read_err)?;
    let raw_values = df
        .column(&value_column.resolved)
        .and_then(|c| c.as_materialized_series().cast(&DataType::Float64))
        .map_err(read_err)?;
    let dates = raw_dates.str().map_err(read_err)?;
    let values = raw_values.f64().map_err(read_err)?;

    let mut observations = Vec::with_capacity(df.height());
    let mut skipped = 0usize;
    for (idx, (raw_date, value)) in dates.into_iter().zip(values.into_iter()).enumerate() {
        let raw_date = raw_date.unwrap_or("");
        match parse_date(raw_date) {
            Some(date) => observations.push(Observation::new(date, value)),
            None if raw_date.trim().is_empty() && value.is_none() => skipped += 1,
            None => {
                return Err(LoadError::UnparseableDate {
                    path: path.to_path_buf(),
                    column: date_column.resolved.clone(),
                    row: idx + 1,
                    value: raw_date.to_string(),
                });
            }
        }
    }
    if skipped > 0 {
        debug!(series = %spec.name, skipped, "skipped blank rows");
    }

    let mut series = TimeSeries::new(spec.name.clone(), observations);
    if spec.sort {
        series = series.sorted();
    }
    info!(
        series = %spec.name,
        path = %path.display(),
        rows = series.len(),
        present = series.present_count(),
        first = ?series.first_date(),
        last = ?series.last_date(),
        "loaded series"
    );

    Ok(LoadedSeries {
        series,
        path: path.to_path_buf(),
        date_column,
        value_column,
    })
}
