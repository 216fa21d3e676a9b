//! Panel export to delimited text, Arrow IPC (Feather) or an Excel workbook.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::Datelike;
use polars::prelude::*;
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook, XlsxError};
use thiserror::Error;
use tracing::info;

use crate::models::panel::Panel;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(
        "cannot tell the output format of {path:?} (expected .csv, .tsv, .xlsx, .feather, .arrow or .ipc)"
    )]
    UnsupportedFormat { path: PathBuf },

    #[error("failed to create {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path:?}")]
    Polars {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("failed to write workbook {path:?}")]
    Xlsx {
        path: PathBuf,
        #[source]
        source: XlsxError,
    },
}

/// Worksheet that holds the panel in `.xlsx` output.
pub const XLSX_SHEET: &str = "panel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Delimited text with a header row
    Csv { separator: u8 },
    /// Arrow IPC file, readable as Feather v2
    Ipc,
    /// Excel workbook with one sheet and real date cells
    Xlsx,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(ExportFormat::Csv { separator: b',' }),
            "tsv" => Some(ExportFormat::Csv { separator: b'\t' }),
            "feather" | "arrow" | "ipc" => Some(ExportFormat::Ipc),
            "xlsx" => Some(ExportFormat::Xlsx),
            _ => None,
        }
    }
}

/// Writes `panel` to `path`, creating parent directories as needed.
pub fn write_panel(panel: &Panel, path: &Path) -> Result<PathBuf, ExportError> {
    let format = ExportFormat::from_path(path).ok_or_else(|| ExportError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let polars_err = |source| ExportError::Polars {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    if format == ExportFormat::Xlsx {
        write_workbook(panel, path).map_err(|source| ExportError::Xlsx {
            path: path.to_path_buf(),
            source,
        })?;
    } else {
        let mut df = panel.to_dataframe().map_err(polars_err)?;
        let mut file = File::create(path).map_err(io_err)?;
        let written = match format {
            ExportFormat::Csv { separator } => CsvWriter::new(&mut file)
                .include_header(true)
                .with_separator(separator)
                .finish(&mut df),
            _ => IpcWriter::new(&mut file).finish(&mut df),
        };
        written.map_err(polars_err)?;
    }

    info!(path = %path.display(), rows = panel.height(), ?format, "wrote panel");
    Ok(path.to_path_buf())
}

/// Header row `date, <columns...>`, one row per date; missing cells are
/// left blank.
fn write_workbook(panel: &Panel, path: &Path) -> Result<(), XlsxError> {
    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format("yyyy-mm-dd");
    let sheet = workbook.add_worksheet();
    sheet.set_name(XLSX_SHEET)?;

    let names: Vec<&str> = panel.column_names().collect();
    sheet.write_string(0, 0, "date")?;
    for (j, name) in names.iter().enumerate() {
        sheet.write_string(0, j as u16 + 1, *name)?;
    }
    for (i, date) in panel.dates().iter().enumerate() {
        let row = i as u32 + 1;
        let cell = ExcelDateTime::from_ymd(date.year() as u16, date.month() as u8, date.day() as u8)?;
        sheet.write_datetime_with_format(row, 0, &cell, &date_format)?;
        for (j, name) in names.iter().enumerate() {
            if let Some(v) = panel.value(name, i) {
                sheet.write_number(row, j as u16 + 1, v)?;
            }
        }
    }
    workbook.save(path)
}
