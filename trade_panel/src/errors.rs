use std::fmt;

use thiserror::Error;

use crate::align::AlignError;
use crate::export::ExportError;
use crate::frequency::FrequencyError;
use crate::loader::LoadError;
use crate::plot::PlotError;
use crate::regression::RegressionError;
use crate::transform::TransformError;

/// The unified error type for a pipeline run.
///
/// Each variant names the stage that failed; per-series stages also carry
/// the series name so the offending input can be found.
#[derive(Debug, Error)]
pub enum Error {
    /// A series could not be read from its source file.
    #[error("failed to load series `{series}`")]
    Load {
        series: String,
        #[source]
        source: LoadError,
    },

    /// A series could not be resampled to the target period.
    #[error("failed to normalize series `{series}`")]
    Normalize {
        series: String,
        #[source]
        source: FrequencyError,
    },

    /// The series could not be joined into one panel.
    #[error("alignment failed")]
    Align(#[from] AlignError),

    /// The log transform rejected the panel.
    #[error("log transform failed")]
    Transform(#[from] TransformError),

    /// The regression could not be fitted.
    #[error("regression failed")]
    Regression(#[from] RegressionError),

    /// The merged panel could not be written.
    #[error("export failed")]
    Export(#[from] ExportError),

    /// The chart could not be rendered.
    #[error("plot failed")]
    Plot(#[from] PlotError),
}

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Load,
    Normalize,
    Align,
    Transform,
    Regression,
    Export,
    Plot,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Load => "load",
            Stage::Normalize => "normalize",
            Stage::Align => "align",
            Stage::Transform => "transform",
            Stage::Regression => "regression",
            Stage::Export => "export",
            Stage::Plot => "plot",
        })
    }
}

impl Error {
    pub fn stage(&self) -> Stage {
        match self {
            Error::Load { .. } => Stage::Load,
            Error::Normalize { .. } => Stage::Normalize,
            Error::Align(_) => Stage::Align,
            Error::Transform(_) => Stage::Transform,
            Error::Regression(_) => Stage::Regression,
            Error::Export(_) => Stage::Export,
            Error::Plot(_) => Stage::Plot,
        }
    }

    /// Series the failure is tied to, if any.
    pub fn series(&self) -> Option<&str> {
        match self {
            Error::Load { series, .. } | Error::Normalize { series, .. } => Some(series),
            _ => None,
        }
    }
}
