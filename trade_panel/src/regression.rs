//! Ordinary least squares over panel columns.
//!
//! The design matrix is `[const, x_1, .., x_k]` (the constant only when the
//! regression has an intercept) and is solved through its singular value
//! decomposition. A design whose numerical rank is below the number of
//! parameters is rejected rather than solved with a pseudo-inverse, so
//! collinear regressors surface as [`RegressionError::SingularDesignMatrix`].
//!
//! The reported statistics follow the usual textbook definitions: centered
//! R² with an intercept (uncentered without), Student-t p-values and 95 %
//! intervals on `n - p` degrees of freedom, the overall F-test, the Gaussian
//! log-likelihood with AIC/BIC, and the Durbin-Watson statistic.

use std::fmt;

use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::panel::{Panel, PanelError};

/// Name given to the intercept coefficient.
pub const INTERCEPT: &str = "const";

#[derive(Debug, Error, PartialEq)]
pub enum RegressionError {
    #[error("cannot fit a regression on an empty panel")]
    EmptyInput,

    #[error(
        "design matrix is singular: rank {rank} for {parameters} parameters and {observations} observations"
    )]
    SingularDesignMatrix {
        rank: usize,
        parameters: usize,
        observations: usize,
    },

    #[error("regression column `{0}` is not in the panel")]
    UnknownColumn(String),

    #[error("regression column `{column}` is missing a value at {date}")]
    MissingValue { column: String, date: NaiveDate },

    #[error("regression has no regressors and no intercept")]
    NoRegressors,

    #[error("least squares solver failed: {0}")]
    Solver(String),

    #[error(transparent)]
    Panel(#[from] PanelError),
}

/// One dependent column regressed on an ordered list of independents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegressionSpec {
    dependent: String,
    independents: Vec<String>,
    intercept: bool,
}

impl RegressionSpec {
    /// A regression with an intercept.
    pub fn new(
        dependent: impl Into<String>,
        independents: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            dependent: dependent.into(),
            independents: independents.into_iter().map(Into::into).collect(),
            intercept: true,
        }
    }

    pub fn without_intercept(mut self) -> Self {
        self.intercept = false;
        self
    }

    pub fn dependent(&self) -> &str {
        &self.dependent
    }

    pub fn independents(&self) -> &[String] {
        &self.independents
    }

    pub fn intercept(&self) -> bool {
        self.intercept
    }

    /// Parameter names in design-matrix order.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.independents.len() + 1);
        if self.intercept {
            names.push(INTERCEPT.to_string());
        }
        names.extend(self.independents.iter().cloned());
        names
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_value: f64,
    pub p_value: f64,
    /// Lower bound of the 95 % confidence interval.
    pub conf_low: f64,
    /// Upper bound of the 95 % confidence interval.
    pub conf_high: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionResult {
    pub dependent: String,
    /// Intercept first when present, then the independents in the order given.
    pub coefficients: Vec<Coefficient>,
    pub nobs: usize,
    pub df_model: f64,
    pub df_resid: f64,
    /// `NaN` when the dependent has no variation to explain (zero total sum
    /// of squares), as is `adj_r_squared` and the F test.
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub f_statistic: f64,
    pub f_p_value: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub durbin_watson: f64,
    /// Row dates of the fitted sample.
    pub dates: Vec<NaiveDate>,
    pub fitted: Vec<f64>,
    pub residuals: Vec<f64>,
}

impl RegressionResult {
    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }

    /// Sum of squared residuals.
    pub fn ssr(&self) -> f64 {
        self.residuals.iter().map(|e| e * e).sum()
    }

    /// Adds fitted values and residuals to `panel`, matched by date. Rows
    /// outside the fitted sample get missing cells.
    pub fn append_to(
        &self,
        panel: &Panel,
        fitted_column: &str,
        residual_column: &str,
    ) -> Result<Panel, RegressionError> {
        let by_date = |values: &[f64]| -> Vec<Option<f64>> {
            panel
                .dates()
                .iter()
                .map(|d| self.dates.binary_search(d).ok().map(|i| values[i]))
                .collect()
        };
        let out = panel
            .clone()
            .with_column(fitted_column, by_date(&self.fitted))?
            .with_column(residual_column, by_date(&self.residuals))?;
        Ok(out)
    }
}

/// Fits `spec` by least squares over every row of `panel`.
///
/// Every used cell must be present; run complete-case filtering first.
pub fn fit_ols(panel: &Panel, spec: &RegressionSpec) -> Result<RegressionResult, RegressionError> {
    if spec.independents.is_empty() && !spec.intercept {
        return Err(RegressionError::NoRegressors);
    }
    let y = dense_column(panel, &spec.dependent)?;
    let regressors = spec
        .independents
        .iter()
        .map(|c| dense_column(panel, c))
        .collect::<Result<Vec<_>, _>>()?;
    let n = panel.height();
    if n == 0 {
        return Err(RegressionError::EmptyInput);
    }

    let offset = usize::from(spec.intercept);
    let k = regressors.len() + offset;
    let x = DMatrix::from_fn(n, k, |i, j| {
        if j < offset { 1.0 } else { regressors[j - offset][i] }
    });
    let y = DVector::from_vec(y);

    let svd = x.clone().svd(true, true);
    let s_max = svd.singular_values.max();
    let tol = s_max * n.max(k) as f64 * f64::EPSILON;
    let rank = svd.singular_values.iter().filter(|s| **s > tol).count();
    debug!(n, k, rank, tolerance = tol, "design matrix decomposed");
    if n < k || rank < k {
        return Err(RegressionError::SingularDesignMatrix {
            rank,
            parameters: k,
            observations: n,
        });
    }

    let beta = svd
        .solve(&y, tol)
        .map_err(|e| RegressionError::Solver(e.to_string()))?;
    let v_t = svd
        .v_t
        .as_ref()
        .ok_or_else(|| RegressionError::Solver("missing right singular vectors".into()))?;
    let inv_sq = DMatrix::from_diagonal(&svd.singular_values.map(|s| 1.0 / (s * s)));
    let xtx_inv = v_t.transpose() * inv_sq * v_t;

    let fitted = &x * &beta;
    let residuals = &y - &fitted;

    let nf = n as f64;
    let df_resid = (n - k) as f64;
    let df_model = (k - offset) as f64;
    let ssr = residuals.norm_squared();
    let tss = if spec.intercept {
        let mean = y.mean();
        y.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
    } else {
        y.norm_squared()
    };
    let r_squared = if tss > 0.0 { 1.0 - ssr / tss } else { f64::NAN };
    let adj_r_squared = 1.0 - (nf - offset as f64) / df_resid * (1.0 - r_squared);
    let sigma2 = if n > k { ssr / df_resid } else { f64::NAN };

    let t_dist = if n > k {
        Some(StudentsT::new(0.0, 1.0, df_resid).map_err(|e| RegressionError::Solver(e.to_string()))?)
    } else {
        None
    };
    let t_crit = t_dist.as_ref().map_or(f64::NAN, |t| t.inverse_cdf(0.975));

    let coefficients = spec
        .parameter_names()
        .into_iter()
        .enumerate()
        .map(|(j, name)| {
            let estimate = beta[j];
            let std_error = (sigma2 * xtx_inv[(j, j)]).sqrt();
            let t_value = estimate / std_error;
            Coefficient {
                name,
                estimate,
                std_error,
                t_value,
                p_value: two_sided_p(t_dist.as_ref(), t_value),
                conf_low: estimate - t_crit * std_error,
                conf_high: estimate + t_crit * std_error,
            }
        })
        .collect();

    let (f_statistic, f_p_value) = if df_model > 0.0 && n > k && tss > 0.0 {
        let f = ((tss - ssr) / df_model) / (ssr / df_resid);
        let p = FisherSnedecor::new(df_model, df_resid)
            .map_err(|e| RegressionError::Solver(e.to_string()))
            .map(|dist| upper_tail(&dist, f))?;
        (f, p)
    } else {
        (f64::NAN, f64::NAN)
    };

    let log_likelihood = -nf / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (ssr / nf).ln() + 1.0);
    let aic = -2.0 * log_likelihood + 2.0 * k as f64;
    let bic = -2.0 * log_likelihood + nf.ln() * k as f64;
    let durbin_watson = residuals
        .as_slice()
        .windows(2)
        .map(|w| (w[1] - w[0]).powi(2))
        .sum::<f64>()
        / ssr;

    info!(
        dependent = %spec.dependent,
        nobs = n,
        parameters = k,
        r_squared,
        "fitted OLS regression"
    );
    Ok(RegressionResult {
        dependent: spec.dependent.clone(),
        coefficients,
        nobs: n,
        df_model,
        df_resid,
        r_squared,
        adj_r_squared,
        f_statistic,
        f_p_value,
        log_likelihood,
        aic,
        bic,
        durbin_watson,
        dates: panel.dates().to_vec(),
        fitted: fitted.iter().copied().collect(),
        residuals: residuals.iter().copied().collect(),
    })
}

fn dense_column(panel: &Panel, name: &str) -> Result<Vec<f64>, RegressionError> {
    let values = panel
        .column(name)
        .ok_or_else(|| RegressionError::UnknownColumn(name.to_string()))?;
    values
        .iter()
        .zip(panel.dates())
        .map(|(v, d)| {
            v.ok_or_else(|| RegressionError::MissingValue {
                column: name.to_string(),
                date: *d,
            })
        })
        .collect()
}

// statrs panics on NaN arguments in the incomplete beta function
fn two_sided_p(dist: Option<&StudentsT>, t: f64) -> f64 {
    match dist {
        Some(_) if t.is_infinite() => 0.0,
        Some(dist) if !t.is_nan() => 2.0 * dist.sf(t.abs()),
        _ => f64::NAN,
    }
}

fn upper_tail(dist: &FisherSnedecor, f: f64) -> f64 {
    if f.is_nan() {
        f64::NAN
    } else if f.is_infinite() {
        0.0
    } else {
        dist.sf(f)
    }
}

impl fmt::Display for RegressionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(78);
        let thin = "-".repeat(78);
        writeln!(f, "{:^78}", "OLS Regression Results")?;
        writeln!(f, "{rule}")?;
        writeln!(
            f,
            "{:<22}{:>16}   {:<22}{:>16.3}",
            "Dep. Variable:", self.dependent, "R-squared:", self.r_squared
        )?;
        writeln!(
            f,
            "{:<22}{:>16}   {:<22}{:>16.3}",
            "Model:", "OLS", "Adj. R-squared:", self.adj_r_squared
        )?;
        writeln!(
            f,
            "{:<22}{:>16}   {:<22}{:>16.4}",
            "No. Observations:", self.nobs, "F-statistic:", self.f_statistic
        )?;
        writeln!(
            f,
            "{:<22}{:>16}   {:<22}{:>16.4}",
            "Df Residuals:", self.df_resid, "Prob (F-statistic):", self.f_p_value
        )?;
        writeln!(
            f,
            "{:<22}{:>16}   {:<22}{:>16.3}",
            "Df Model:", self.df_model, "Log-Likelihood:", self.log_likelihood
        )?;
        writeln!(
            f,
            "{:<22}{:>16}   {:<22}{:>16.2}",
            "Sample:",
            sample_label(&self.dates),
            "AIC:",
            self.aic
        )?;
        writeln!(f, "{:<22}{:>16}   {:<22}{:>16.2}", "", "", "BIC:", self.bic)?;
        writeln!(f, "{rule}")?;
        writeln!(
            f,
            "{:<16}{:>10}{:>10}{:>10}{:>10}{:>11}{:>11}",
            "", "coef", "std err", "t", "P>|t|", "[0.025", "0.975]"
        )?;
        writeln!(f, "{thin}")?;
        for c in &self.coefficients {
            writeln!(
                f,
                "{:<16}{:>10.4}{:>10.3}{:>10.3}{:>10.3}{:>11.3}{:>11.3}",
                c.name, c.estimate, c.std_error, c.t_value, c.p_value, c.conf_low, c.conf_high
            )?;
        }
        writeln!(f, "{rule}")?;
        writeln!(f, "{:<22}{:>16.3}", "Durbin-Watson:", self.durbin_watson)?;
        write!(f, "{rule}")
    }
}

fn sample_label(dates: &[NaiveDate]) -> String {
    match (dates.first(), dates.last()) {
        (Some(first), Some(last)) => format!("{first}..{last}"),
        _ => "-".to_string(),
    }
}
