//! Pipeline configuration: parsing, normalization, and loading.
//!
//! One TOML file describes a whole run:
//! - the input series (`[[series]]`, see [`SourceSpec`]) and where relative
//!   paths are resolved from (`base_dir`, overridable through
//!   [`shared_utils::paths::DATA_DIR_ENV`])
//! - the target period, join mode and complete-case policy
//! - an optional sample window
//! - the log transforms (`[[log]]`) and the regression (`[regression]`)
//! - optional outputs (`[output]`): merged panel file and SVG plot
//!
//! ```toml
//! base_dir = "~/data/india"
//! target = "Q"
//! join = "outer"
//! complete_case = "before_log"
//!
//! [[series]]
//! name = "REER"
//! path = "reer_quarterly.csv"
//! value_column = "REER"
//! fallback_patterns = ["reer"]
//!
//! [[log]]
//! column = "REER"
//! output = "ln_reer"
//! ```
//!
//! Normalization trims names, de-duplicates fallback patterns, and checks
//! that every column referenced later in the run will exist. Entrypoints:
//! [`load_config_str`], [`load_config_path`], [`normalize_config`]; the
//! `_with_report` variants also hand back the [`NormalizationReport`].

use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use chrono::NaiveDate;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use shared_utils::paths::{resolve_against, resolve_data_dir};
use toml::from_str;

use crate::align::JoinMode;
use crate::loader::{SourceSpec, is_workbook};
use crate::models::period::Period;
use crate::regression::RegressionSpec;
use crate::transform::LogColumn;

/// When rows with missing cells are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompleteCase {
    /// Right after alignment, across all series columns.
    #[default]
    BeforeLog,
    /// After the log transform, across all columns.
    AfterLog,
    /// Never; the regression then refuses missing cells.
    #[serde(rename = "none")]
    Skip,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SampleWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

fn default_true() -> bool {
    true
}

fn default_fitted_column() -> String {
    "fitted".to_string()
}

fn default_residual_column() -> String {
    "residuals".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegressionCfg {
    pub dependent: String,
    pub independents: Vec<String>,
    #[serde(default = "default_true")]
    pub intercept: bool,
    /// Column the fitted values are written to.
    #[serde(default = "default_fitted_column")]
    pub fitted_column: String,
    #[serde(default = "default_residual_column")]
    pub residual_column: String,
}

impl RegressionCfg {
    pub fn spec(&self) -> RegressionSpec {
        let spec = RegressionSpec::new(self.dependent.clone(), self.independents.iter().cloned());
        if self.intercept {
            spec
        } else {
            spec.without_intercept()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputCfg {
    /// Merged panel destination (.csv, .tsv, .xlsx, .feather, .arrow, .ipc).
    pub panel: Option<String>,
    /// SVG chart destination.
    pub plot: Option<String>,
    /// Columns to plot; all panel columns when empty.
    #[serde(default)]
    pub plot_columns: Vec<String>,
    pub plot_title: Option<String>,
}

fn default_target() -> Period {
    Period::Quarter
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory relative paths are resolved against.
    pub base_dir: Option<String>,
    #[serde(default = "default_target")]
    pub target: Period,
    pub join: JoinMode,
    #[serde(default)]
    pub complete_case: CompleteCase,
    pub sample: Option<SampleWindow>,
    pub series: Vec<SourceSpec>,
    #[serde(default)]
    pub log: Vec<LogColumn>,
    pub regression: Option<RegressionCfg>,
    pub output: Option<OutputCfg>,
}

impl PipelineConfig {
    /// Data directory after `~` expansion and the environment override.
    pub fn data_dir(&self) -> PathBuf {
        resolve_data_dir(self.base_dir.as_deref())
    }

    /// Resolves `path` against [`PipelineConfig::data_dir`] unless absolute.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        resolve_against(&self.data_dir(), &path.to_string_lossy())
    }

    /// Column names available after the log transform, in panel order.
    pub fn panel_columns(&self) -> IndexSet<String> {
        let mut cols: IndexSet<String> = self.series.iter().map(|s| s.name.clone()).collect();
        cols.extend(self.log.iter().map(|l| l.target().to_string()));
        cols
    }
}

/// Summary of changes performed during normalization.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NormalizationReport {
    /// Names and column references that had surrounding whitespace.
    pub names_trimmed: usize,
    /// Duplicate or empty fallback patterns removed.
    pub fallback_patterns_dropped: usize,
    pub series: usize,
    pub log_columns: usize,
    pub regression: bool,
}

impl fmt::Display for NormalizationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} series, {} log column(s), regression: {}; trimmed {} name(s), dropped {} fallback pattern(s)",
            self.series,
            self.log_columns,
            if self.regression { "yes" } else { "no" },
            self.names_trimmed,
            self.fallback_patterns_dropped
        )
    }
}

fn trim_in_place(s: &mut String, report: &mut NormalizationReport) {
    let trimmed = s.trim();
    if trimmed.len() != s.len() {
        *s = trimmed.to_string();
        report.names_trimmed += 1;
    }
}

fn normalize_patterns(patterns: &mut Vec<String>, report: &mut NormalizationReport) {
    let before = patterns.len();
    let mut seen = HashSet::new();
    let kept: Vec<String> = mem::take(patterns)
        .into_iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty() && seen.insert(p.clone()))
        .collect();
    report.fallback_patterns_dropped += before - kept.len();
    *patterns = kept;
}

/// Normalize a pipeline configuration in place.
///
/// - Trim series names and column names; reject empty, reserved (`date`) or
///   duplicate series names
/// - Lowercase, trim and de-duplicate fallback patterns, preserving order
/// - Log transforms must target series columns; their outputs must not
///   clash with another column, and a column logged in place cannot be
///   listed again after that
/// - `sheet` is only allowed on workbook paths
/// - Regression and plot columns must exist once the log transform has run
/// - Sample window bounds must be ordered
pub fn normalize_config(cfg: &mut PipelineConfig) -> anyhow::Result<NormalizationReport> {
    let mut report = NormalizationReport::default();
    if cfg.series.is_empty() {
        bail!("at least one [[series]] entry is required");
    }

    let mut names = HashSet::new();
    for s in &mut cfg.series {
        trim_in_place(&mut s.name, &mut report);
        trim_in_place(&mut s.date_column, &mut report);
        trim_in_place(&mut s.value_column, &mut report);
        if s.name.is_empty() {
            bail!("series name cannot be empty after trimming");
        }
        if s.name.eq_ignore_ascii_case("date") {
            bail!("series name `{}` is reserved for the date index", s.name);
        }
        if s.value_column.is_empty() {
            bail!("series `{}` has an empty value_column", s.name);
        }
        if !names.insert(s.name.clone()) {
            bail!("duplicate series name: {}", s.name);
        }
        if let Some(sheet) = s.sheet.as_mut() {
            trim_in_place(sheet, &mut report);
            if !is_workbook(&s.path) {
                bail!(
                    "series `{}` names sheet `{sheet}` but {} is not a workbook",
                    s.name,
                    s.path.display()
                );
            }
        }
        normalize_patterns(&mut s.fallback_patterns, &mut report);
        normalize_patterns(&mut s.date_fallback_patterns, &mut report);
    }
    report.series = cfg.series.len();

    let mut outputs = HashSet::new();
    let mut logged_in_place = HashSet::new();
    for l in &mut cfg.log {
        trim_in_place(&mut l.column, &mut report);
        if let Some(out) = l.output.as_mut() {
            trim_in_place(out, &mut report);
            if out.is_empty() {
                bail!("log output name for `{}` cannot be empty", l.column);
            }
        }
        if !names.contains(&l.column) {
            bail!("log transform of unknown series `{}`", l.column);
        }
        if logged_in_place.contains(&l.column) {
            bail!(
                "log transform of `{}` after it was already logged in place",
                l.column
            );
        }
        if l.output.is_none() {
            logged_in_place.insert(l.column.clone());
        }
        let target = l.target().to_string();
        if l.output.is_some() && names.contains(&target) {
            bail!("log output `{target}` would overwrite a series column");
        }
        if !outputs.insert(target.clone()) {
            bail!("log output `{target}` is produced twice");
        }
    }
    report.log_columns = cfg.log.len();

    let mut known = cfg.panel_columns();
    if let Some(reg) = cfg.regression.as_mut() {
        trim_in_place(&mut reg.dependent, &mut report);
        for c in &mut reg.independents {
            trim_in_place(c, &mut report);
        }
        for c in std::iter::once(&reg.dependent).chain(&reg.independents) {
            if !known.contains(c) {
                bail!("regression column `{c}` is neither a series nor a log output");
            }
        }
        if reg.independents.is_empty() && !reg.intercept {
            bail!("regression needs at least one independent column or an intercept");
        }
        if reg.fitted_column == reg.residual_column {
            bail!("fitted and residual columns must differ");
        }
        for c in [&reg.fitted_column, &reg.residual_column] {
            if !known.insert(c.clone()) {
                bail!("regression output `{c}` clashes with an existing column");
            }
        }
        report.regression = true;
    }

    if let Some(out) = &cfg.output {
        for c in &out.plot_columns {
            if !known.contains(c) {
                bail!("plot column `{c}` is not produced by this pipeline");
            }
        }
    }

    if let Some(SampleWindow {
        start: Some(start),
        end: Some(end),
    }) = &cfg.sample
    {
        if start > end {
            bail!("sample start {start} is after sample end {end}");
        }
    }

    Ok(report)
}

/// Parse and normalize a configuration, keeping the normalization report.
pub fn load_config_str_with_report(
    toml_str: &str,
) -> anyhow::Result<(PipelineConfig, NormalizationReport)> {
    let mut cfg: PipelineConfig = from_str(toml_str).context("failed to parse pipeline TOML")?;
    let report = normalize_config(&mut cfg).context("invalid pipeline configuration")?;
    tracing::debug!(%report, "normalized pipeline configuration");
    Ok((cfg, report))
}

/// Parse and normalize a configuration from a TOML string.
pub fn load_config_str(toml_str: &str) -> anyhow::Result<PipelineConfig> {
    load_config_str_with_report(toml_str).map(|(cfg, _)| cfg)
}

/// [`load_config_path`] plus the normalization report.
pub fn load_config_path_with_report(
    path: impl AsRef<Path>,
) -> anyhow::Result<(PipelineConfig, NormalizationReport)> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("read config file {}", path.as_ref().display()))?;
    load_config_str_with_report(&text)
}

/// Read a configuration file from disk, parse, and normalize it.
pub fn load_config_path(path: impl AsRef<Path>) -> anyhow::Result<PipelineConfig> {
    load_config_path_with_report(path).map(|(cfg, _)| cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::Aggregation;

    const INDIA: &str = r#"
        base_dir = "/data/india"
        join = "outer"

        [[series]]
        name = " Exports "
        path = "exports_monthly.csv"
        value_column = "IMP5330"
        fallback_patterns = ["Export", "export", " "]
        aggregation = "sum"

        [[series]]
        name = "REER"
        path = "/abs/reer.csv"
        date_column = "Quarter"
        value_column = "REER"

        [[log]]
        column = "Exports"
        output = "ln_exports"

        [[log]]
        column = "REER"
        output = "ln_reer"

        [regression]
        dependent = "ln_exports"
        independents = ["ln_reer"]

        [output]
        panel = "out/merged.csv"
        plot_columns = ["ln_exports", "fitted"]

        [sample]
        start = "2012-01-01"
    "#;

    #[test]
    fn parses_and_normalizes() {
        let mut cfg: PipelineConfig = toml::from_str(INDIA).unwrap();
        let report = normalize_config(&mut cfg).unwrap();

        assert_eq!(cfg.target, Period::Quarter);
        assert_eq!(cfg.join, JoinMode::Outer);
        assert_eq!(cfg.complete_case, CompleteCase::BeforeLog);
        assert_eq!(cfg.series[0].name, "Exports");
        assert_eq!(cfg.series[0].fallback_patterns, ["export"]);
        assert_eq!(cfg.series[0].aggregation, Aggregation::Sum);
        assert_eq!(cfg.series[1].date_column, "Quarter");
        assert_eq!(cfg.series[0].date_column, "Date");
        let reg = cfg.regression.as_ref().unwrap();
        assert!(reg.intercept);
        assert_eq!(reg.fitted_column, "fitted");
        assert_eq!(reg.spec().parameter_names(), ["const", "ln_reer"]);
        assert_eq!(
            cfg.sample,
            Some(SampleWindow {
                start: NaiveDate::from_ymd_opt(2012, 1, 1),
                end: None
            })
        );

        assert_eq!(
            report,
            NormalizationReport {
                names_trimmed: 1,
                fallback_patterns_dropped: 2,
                series: 2,
                log_columns: 2,
                regression: true,
            }
        );
        insta::assert_snapshot!(report, @"2 series, 2 log column(s), regression: yes; trimmed 1 name(s), dropped 2 fallback pattern(s)");
    }

    #[test]
    fn resolves_paths_against_base_dir() {
        let cfg = load_config_str(INDIA).unwrap();
        if std::env::var_os(shared_utils::paths::DATA_DIR_ENV).is_none() {
            assert_eq!(
                cfg.resolve_path(&cfg.series[0].path),
                PathBuf::from("/data/india/exports_monthly.csv")
            );
        }
        assert_eq!(cfg.resolve_path(&cfg.series[1].path), PathBuf::from("/abs/reer.csv"));
    }

    #[test]
    fn panel_columns_in_order() {
        let cfg = load_config_str(INDIA).unwrap();
        let cols: Vec<_> = cfg.panel_columns().into_iter().collect();
        assert_eq!(cols, ["Exports", "REER", "ln_exports", "ln_reer"]);
    }

    fn rejects(toml_str: &str, needle: &str) {
        let err = load_config_str(toml_str).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains(needle), "`{msg}` does not mention `{needle}`");
    }

    #[test]
    fn join_is_required() {
        rejects(
            "[[series]]\nname = \"a\"\npath = \"a.csv\"\nvalue_column = \"a\"\n",
            "missing field `join`",
        );
    }

    #[test]
    fn rejects_inconsistent_configs() {
        let one = |extra: &str| {
            format!(
                "join = \"inner\"\n{extra}\n[[series]]\nname = \"REER\"\npath = \"r.csv\"\nvalue_column = \"REER\"\n"
            )
        };
        rejects(&one("complete_case = \"sometimes\""), "failed to parse");
        rejects(&one("target = \"W\""), "failed to parse");
        rejects(&one("colour = \"red\""), "unknown field");

        rejects(
            &format!("{}[[series]]\nname = \"REER \"\npath = \"x.csv\"\nvalue_column = \"v\"\n", one("")),
            "duplicate series name: REER",
        );
        rejects(
            &format!("{}[[log]]\ncolumn = \"IIP\"\n", one("")),
            "log transform of unknown series `IIP`",
        );
        rejects(
            &format!("{}[regression]\ndependent = \"ln_reer\"\nindependents = []\n", one("")),
            "regression column `ln_reer`",
        );
        rejects(
            &format!("{}[[log]]\ncolumn = \"REER\"\n[regression]\ndependent = \"REER\"\nindependents = []\nfitted_column = \"REER\"\n", one("")),
            "clashes with an existing column",
        );
        rejects(
            &format!("{}[[log]]\ncolumn = \"REER\"\n[[log]]\ncolumn = \"REER\"\noutput = \"ln_reer\"\n", one("")),
            "log transform of `REER` after it was already logged in place",
        );
        rejects(
            &format!("{}[[series]]\nname = \"IIP\"\npath = \"iip.csv\"\nsheet = \"Quarterly\"\nvalue_column = \"IIP\"\n", one("")),
            "names sheet `Quarterly` but iip.csv is not a workbook",
        );
        rejects(
            &format!("{}[output]\nplot_columns = [\"fitted\"]\n", one("")),
            "plot column `fitted`",
        );
        rejects(
            &one("[sample]\nstart = \"2020-01-01\"\nend = \"2019-01-01\""),
            "sample start 2020-01-01 is after sample end 2019-01-01",
        );
    }

    #[test]
    fn reserved_and_empty_names() {
        let cfg = |name: &str| {
            format!("join = \"outer\"\n[[series]]\nname = \"{name}\"\npath = \"r.csv\"\nvalue_column = \"v\"\n")
        };
        rejects(&cfg("  "), "cannot be empty");
        rejects(&cfg("Date"), "reserved");
        rejects("join = \"outer\"\nseries = []\n", "at least one [[series]]");
    }

    #[test]
    fn complete_case_spellings() {
        let parse = |v: &str| {
            toml::from_str::<PipelineConfig>(&format!(
                "join = \"outer\"\ncomplete_case = \"{v}\"\nseries = []\n"
            ))
            .unwrap()
            .complete_case
        };
        assert_eq!(parse("before_log"), CompleteCase::BeforeLog);
        assert_eq!(parse("after_log"), CompleteCase::AfterLog);
        assert_eq!(parse("none"), CompleteCase::Skip);
    }

    #[test]
    fn log_before_in_place_log_is_allowed() {
        let cfg = load_config_str(
            "join = \"outer\"\n[[series]]\nname = \"x\"\npath = \"x.csv\"\nvalue_column = \"x\"\n\
             [[log]]\ncolumn = \"x\"\noutput = \"ln_x\"\n[[log]]\ncolumn = \"x\"\n",
        )
        .unwrap();
        let cols: Vec<_> = cfg.panel_columns().into_iter().collect();
        assert_eq!(cols, ["x", "ln_x"]);
    }

    #[test]
    fn sheet_on_workbook_path() {
        let (cfg, report) = load_config_str_with_report(
            "join = \"outer\"\n[[series]]\nname = \"REER\"\npath = \"REER INDIA Q.xlsx\"\n\
             sheet = \" Quarterly \"\nvalue_column = \"REER\"\n",
        )
        .unwrap();
        assert_eq!(cfg.series[0].sheet.as_deref(), Some("Quarterly"));
        assert_eq!(report.names_trimmed, 1);
    }

    #[test]
    fn path_loader_returns_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("india.toml");
        std::fs::write(&path, INDIA).unwrap();
        let (cfg, report) = load_config_path_with_report(&path).unwrap();
        assert_eq!(cfg, load_config_str(INDIA).unwrap());
        assert_eq!(report.series, 2);
        assert_eq!(report.fallback_patterns_dropped, 2);
    }

    #[test]
    fn missing_file_has_context() {
        let err = load_config_path("/nonexistent/pipeline.toml").unwrap_err();
        assert!(err.to_string().contains("read config file /nonexistent/pipeline.toml"));
    }
}
