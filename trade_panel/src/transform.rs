//! Log transformer.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::models::panel::{Panel, PanelError};

/// One column to take the natural log of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogColumn {
    pub column: String,
    /// Name of the new column; `None` replaces `column` in place.
    #[serde(default)]
    pub output: Option<String>,
}

impl LogColumn {
    pub fn in_place(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            output: None,
        }
    }

    pub fn to(column: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            output: Some(output.into()),
        }
    }

    /// Column that receives the logged values.
    pub fn target(&self) -> &str {
        self.output.as_deref().unwrap_or(&self.column)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("cannot log-transform unknown column `{0}`")]
    UnknownColumn(String),

    #[error("column `{column}` has {count} non-positive value(s), first at {first}")]
    NonPositiveValue {
        column: String,
        count: usize,
        first: NaiveDate,
        dates: Vec<NaiveDate>,
    },

    #[error(transparent)]
    Panel(#[from] PanelError),
}

/// Applies `ln` to every listed column and returns the new panel.
///
/// All columns are checked before any logarithm is taken, so a failure
/// leaves nothing half-transformed. Every log reads its source from `panel`
/// as handed in, never from an earlier in-place result, so listing a column
/// twice cannot produce `ln(ln x)`. Missing cells stay missing.
pub fn log_transform(panel: &Panel, columns: &[LogColumn]) -> Result<Panel, TransformError> {
    for col in columns {
        check_positive(panel, &col.column)?;
    }

    let mut out = panel.clone();
    for col in columns {
        let values = panel
            .column(&col.column)
            .ok_or_else(|| TransformError::UnknownColumn(col.column.clone()))?
            .iter()
            .map(|v| v.map(f64::ln))
            .collect();
        out = out.with_column(col.target(), values)?;
    }
    info!(columns = columns.len(), rows = out.height(), "log-transformed panel");
    Ok(out)
}

fn check_positive(panel: &Panel, column: &str) -> Result<(), TransformError> {
    let values = panel
        .column(column)
        .ok_or_else(|| TransformError::UnknownColumn(column.to_string()))?;
    let dates: Vec<NaiveDate> = panel
        .dates()
        .iter()
        .zip(values)
        .filter(|(_, v)| v.is_some_and(|x| x <= 0.0))
        .map(|(d, _)| *d)
        .collect();
    match dates.first() {
        Some(&first) => Err(TransformError::NonPositiveValue {
            column: column.to_string(),
            count: dates.len(),
            first,
            dates,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn panel(a: Vec<Option<f64>>, b: Vec<Option<f64>>) -> Panel {
        let dates = (0..a.len() as u32).map(|i| d(2019 + i as i32, 12, 31)).collect();
        Panel::new(dates)
            .unwrap()
            .with_column("exports", a)
            .unwrap()
            .with_column("reer", b)
            .unwrap()
    }

    #[test]
    fn round_trip_recovers_values() {
        let xs = [0.001, 1.0, 98.7, 1.5e6];
        let p = panel(xs.iter().copied().map(Some).collect(), vec![Some(1.0); 4]);
        let out = log_transform(&p, &[LogColumn::in_place("exports")]).unwrap();
        for (x, l) in xs.iter().zip(out.column("exports").unwrap()) {
            let back = l.unwrap().exp();
            assert!(((back - x) / x).abs() < 1e-9);
        }
        assert_eq!(p.value("exports", 1), Some(1.0));
    }

    #[test]
    fn appends_named_output_and_keeps_missing() {
        let p = panel(vec![Some(1.0), None], vec![Some(std::f64::consts::E), Some(1.0)]);
        let out = log_transform(
            &p,
            &[LogColumn::to("exports", "ln_exports"), LogColumn::to("reer", "ln_reer")],
        )
        .unwrap();
        assert_eq!(
            out.column_names().collect::<Vec<_>>(),
            ["exports", "reer", "ln_exports", "ln_reer"]
        );
        assert_eq!(out.column("ln_exports").unwrap(), &[Some(0.0), None]);
        assert!((out.value("ln_reer", 0).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn non_positive_fails_before_any_column_is_touched() {
        let p = panel(vec![Some(1.0), Some(2.0), Some(3.0)], vec![Some(4.0), Some(0.0), Some(-1.0)]);
        let err = log_transform(&p, &[LogColumn::in_place("exports"), LogColumn::in_place("reer")])
            .unwrap_err();
        assert_eq!(
            err,
            TransformError::NonPositiveValue {
                column: "reer".into(),
                count: 2,
                first: d(2020, 12, 31),
                dates: vec![d(2020, 12, 31), d(2021, 12, 31)],
            }
        );
        insta::assert_snapshot!(err, @"column `reer` has 2 non-positive value(s), first at 2020-12-31");
    }

    #[test]
    fn in_place_log_does_not_feed_a_later_log() {
        let p = panel(vec![Some(0.5), Some(1.0), Some(20.0)], vec![Some(1.0); 3]);
        let out = log_transform(
            &p,
            &[LogColumn::in_place("exports"), LogColumn::to("exports", "ln_exports")],
        )
        .unwrap();
        assert_eq!(out.column("exports"), out.column("ln_exports"));
        let ln = out.column("ln_exports").unwrap();
        assert!(ln.iter().all(Option::is_some));
        assert!((ln[0].unwrap() - 0.5f64.ln()).abs() < 1e-12);
        assert_eq!(ln[1], Some(0.0));
        assert!((ln[2].unwrap() - 20.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn unknown_column() {
        let p = panel(vec![Some(1.0)], vec![Some(1.0)]);
        assert_eq!(
            log_transform(&p, &[LogColumn::in_place("iip")]),
            Err(TransformError::UnknownColumn("iip".into()))
        );
    }

    #[test]
    fn log_column_from_toml() {
        let c: LogColumn = toml::from_str("column = \"exports\"\noutput = \"ln_exports\"").unwrap();
        assert_eq!(c.target(), "ln_exports");
        let c: LogColumn = toml::from_str("column = \"exports\"").unwrap();
        assert_eq!(c.target(), "exports");
    }
}
