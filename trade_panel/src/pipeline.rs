//! Top-level driver: configuration in, merged panel and regression out.
//!
//! Stages run strictly in order: load every series, resample each to the
//! target period, align, restrict to the sample window, log-transform, and
//! fit the regression. Every load finishes before alignment starts and the
//! first failure aborts the run; nothing is written unless the whole run
//! succeeded and the caller asks for [`write_outputs`].

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::align::{self, AlignError, AlignOptions};
use crate::config::{CompleteCase, PipelineConfig};
use crate::errors::Error;
use crate::export::write_panel;
use crate::frequency::to_period;
use crate::loader::{ColumnMatch, load_series};
use crate::models::panel::Panel;
use crate::models::series::{SeriesCoverage, TimeSeries};
use crate::plot::plot_panel;
use crate::regression::{RegressionResult, fit_ols};
use crate::transform::log_transform;

/// Which file columns a series was read from.
#[derive(Debug, Clone)]
pub struct ColumnReport {
    pub series: String,
    pub path: PathBuf,
    pub date_column: ColumnMatch,
    pub value_column: ColumnMatch,
}

impl ColumnReport {
    pub fn used_fallback(&self) -> bool {
        self.date_column.used_fallback() || self.value_column.used_fallback()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Final panel: aligned series, log columns, fitted values and residuals.
    pub panel: Panel,
    /// Date ranges of the series as loaded, before resampling.
    pub coverage: Vec<SeriesCoverage>,
    pub column_matches: Vec<ColumnReport>,
    pub regression: Option<RegressionResult>,
}

fn empty_panel(cfg: &PipelineConfig, coverage: &[SeriesCoverage]) -> Error {
    Error::Align(AlignError::EmptyAlignedPanel {
        join: cfg.join,
        coverage: coverage.to_vec(),
    })
}

/// Runs every stage described by `cfg`.
pub fn run(cfg: &PipelineConfig) -> Result<PipelineOutcome, Error> {
    let mut raw = Vec::with_capacity(cfg.series.len());
    let mut column_matches = Vec::with_capacity(cfg.series.len());
    for spec in &cfg.series {
        let mut spec = spec.clone();
        spec.path = cfg.resolve_path(&spec.path);
        let loaded = load_series(&spec).map_err(|source| Error::Load {
            series: spec.name.clone(),
            source,
        })?;
        column_matches.push(ColumnReport {
            series: spec.name.clone(),
            path: loaded.path,
            date_column: loaded.date_column,
            value_column: loaded.value_column,
        });
        raw.push(loaded.series);
    }
    let coverage = align::coverage(&raw);
    info!(series = raw.len(), "loaded all series");

    let normalized = cfg
        .series
        .iter()
        .zip(&raw)
        .map(|(spec, series)| {
            to_period(series, cfg.target, spec.aggregation).map_err(|source| Error::Normalize {
                series: series.name.clone(),
                source,
            })
        })
        .collect::<Result<Vec<TimeSeries>, _>>()?;

    let opts = AlignOptions {
        join: cfg.join,
        drop_incomplete: cfg.complete_case == CompleteCase::BeforeLog,
        period: Some(cfg.target),
    };
    let mut panel = match align::align(&normalized, &opts) {
        Err(AlignError::EmptyAlignedPanel { .. }) => return Err(empty_panel(cfg, &coverage)),
        other => other?,
    };

    if let Some(window) = &cfg.sample {
        let before = panel.height();
        panel = panel.restrict(window.start, window.end);
        info!(
            start = ?window.start,
            end = ?window.end,
            rows = panel.height(),
            dropped = before - panel.height(),
            "applied sample window"
        );
        if panel.is_empty() {
            return Err(empty_panel(cfg, &coverage));
        }
    }

    if !cfg.log.is_empty() {
        panel = log_transform(&panel, &cfg.log)?;
    }
    if cfg.complete_case == CompleteCase::AfterLog {
        panel = align::complete_cases(&panel).map_err(AlignError::from)?;
        if panel.is_empty() {
            return Err(empty_panel(cfg, &coverage));
        }
    }

    let regression = match &cfg.regression {
        Some(reg) => {
            let result = fit_ols(&panel, &reg.spec())?;
            panel = result.append_to(&panel, &reg.fitted_column, &reg.residual_column)?;
            Some(result)
        }
        None => None,
    };

    for report in column_matches.iter().filter(|r| r.used_fallback()) {
        warn!(
            series = %report.series,
            value_column = %report.value_column.resolved,
            "series was read through a fallback column match"
        );
    }
    info!(
        rows = panel.height(),
        columns = panel.column_names().count(),
        regression = regression.is_some(),
        "pipeline finished"
    );
    Ok(PipelineOutcome {
        panel,
        coverage,
        column_matches,
        regression,
    })
}

/// Writes the configured panel file and plot; returns the paths written.
pub fn write_outputs(outcome: &PipelineOutcome, cfg: &PipelineConfig) -> Result<Vec<PathBuf>, Error> {
    let Some(out) = &cfg.output else {
        return Ok(Vec::new());
    };
    let mut written = Vec::new();
    if let Some(path) = &out.panel {
        written.push(write_panel(&outcome.panel, &cfg.resolve_path(Path::new(path)))?);
    }
    if let Some(path) = &out.plot {
        let path = cfg.resolve_path(Path::new(path));
        let title = out.plot_title.as_deref().unwrap_or("Aligned series");
        plot_panel(&outcome.panel, &out.plot_columns, &path, title)?;
        written.push(path);
    }
    Ok(written)
}
