//! Multi-series line chart of panel columns against time.

use std::path::Path;

use chrono::{Datelike, NaiveDate};
use plotters::prelude::*;
use thiserror::Error;
use tracing::info;

use crate::models::panel::Panel;

const SIZE: (u32, u32) = (1024, 640);

#[derive(Debug, Error, PartialEq)]
pub enum PlotError {
    #[error("cannot plot unknown column `{0}`")]
    UnknownColumn(String),

    #[error("nothing to plot: the selected columns have no values")]
    NothingToPlot,

    #[error("chart rendering failed: {0}")]
    Render(String),
}

/// Date as a fractional year, e.g. 2020-07-01 -> 2020.497.
fn year_fraction(date: NaiveDate) -> f64 {
    let days = if date.leap_year() { 366.0 } else { 365.0 };
    date.year() as f64 + date.ordinal0() as f64 / days
}

/// Splits a column into runs of consecutive present values.
fn segments(panel: &Panel, values: &[Option<f64>]) -> Vec<Vec<(f64, f64)>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for (date, value) in panel.dates().iter().zip(values) {
        match value {
            Some(v) => current.push((year_fraction(*date), *v)),
            None if !current.is_empty() => out.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn padded(min: f64, max: f64, pad: f64) -> std::ops::Range<f64> {
    if max > min {
        let margin = (max - min) * pad;
        (min - margin)..(max + margin)
    } else {
        (min - 1.0)..(max + 1.0)
    }
}

/// Renders `columns` of `panel` as an SVG line chart at `path`.
///
/// Missing cells break the line. An empty `columns` list plots every column.
pub fn plot_panel(
    panel: &Panel,
    columns: &[String],
    path: &Path,
    title: &str,
) -> Result<(), PlotError> {
    let names: Vec<&str> = if columns.is_empty() {
        panel.column_names().collect()
    } else {
        columns.iter().map(String::as_str).collect()
    };
    let mut lines = Vec::with_capacity(names.len());
    for name in names {
        let values = panel
            .column(name)
            .ok_or_else(|| PlotError::UnknownColumn(name.to_string()))?;
        lines.push((name, segments(panel, values)));
    }

    let points = lines.iter().flat_map(|(_, segs)| segs.iter().flatten());
    let (x_min, x_max, y_min, y_max) = points.fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(x0, x1, y0, y1), &(x, y)| (x0.min(x), x1.max(x), y0.min(y), y1.max(y)),
    );
    if !x_min.is_finite() {
        return Err(PlotError::NothingToPlot);
    }

    let render = |e: &dyn std::fmt::Display| PlotError::Render(e.to_string());
    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| render(&e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(16)
        .x_label_area_size(36)
        .y_label_area_size(56)
        .build_cartesian_2d(padded(x_min, x_max, 0.02), padded(y_min, y_max, 0.05))
        .map_err(|e| render(&e))?;
    chart
        .configure_mesh()
        .x_desc("Date")
        .x_label_formatter(&|x| format!("{x:.0}"))
        .draw()
        .map_err(|e| render(&e))?;

    for (i, (name, segs)) in lines.iter().enumerate() {
        let style = Palette99::pick(i).stroke_width(2);
        for (j, seg) in segs.iter().enumerate() {
            let series = chart
                .draw_series(LineSeries::new(seg.iter().copied(), style))
                .map_err(|e| render(&e))?;
            if j == 0 {
                series
                    .label(*name)
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], style));
            }
        }
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| render(&e))?;
    root.present().map_err(|e| render(&e))?;

    info!(path = %path.display(), series = lines.len(), "plotted panel");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Panel {
        let dates = vec![
            NaiveDate::from_ymd_opt(2019, 3, 31).unwrap(),
            NaiveDate::from_ymd_opt(2019, 6, 30).unwrap(),
            NaiveDate::from_ymd_opt(2019, 9, 30).unwrap(),
        ];
        Panel::new(dates)
            .unwrap()
            .with_column("ln_reer", vec![Some(4.6), None, Some(4.7)])
            .unwrap()
            .with_column("ln_exports", vec![Some(9.1), Some(9.3), Some(9.2)])
            .unwrap()
            .with_column("empty", vec![None, None, None])
            .unwrap()
    }

    #[test]
    fn fractional_years() {
        assert_eq!(year_fraction(NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()), 2021.0);
        let mid = year_fraction(NaiveDate::from_ymd_opt(2020, 7, 2).unwrap());
        assert!((mid - 2020.5).abs() < 1e-9);
    }

    #[test]
    fn missing_cells_split_lines() {
        let p = sample();
        let segs = segments(&p, p.column("ln_reer").unwrap());
        assert_eq!(segs.len(), 2);
        assert_eq!(segments(&p, p.column("ln_exports").unwrap()).len(), 1);
        assert!(segments(&p, p.column("empty").unwrap()).is_empty());
    }

    #[test]
    fn writes_svg_with_legend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.svg");
        plot_panel(
            &sample(),
            &["ln_reer".into(), "ln_exports".into()],
            &path,
            "India: log REER and exports",
        )
        .unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("ln_reer"));
        assert!(svg.contains("ln_exports"));
    }

    #[test]
    fn plot_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.svg");
        assert_eq!(
            plot_panel(&sample(), &["iip".into()], &path, "t"),
            Err(PlotError::UnknownColumn("iip".into()))
        );
        assert_eq!(
            plot_panel(&sample(), &["empty".into()], &path, "t"),
            Err(PlotError::NothingToPlot)
        );
    }
}
