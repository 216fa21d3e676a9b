#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};
use tempfile::TempDir;

pub const REER: [f64; 8] = [100.0, 102.5, 98.0, 105.0, 110.0, 107.5, 103.0, 99.0];
pub const IIP: [Option<f64>; 8] = [
    Some(120.0),
    Some(125.0),
    Some(123.0),
    Some(130.0),
    None,
    Some(90.0),
    Some(110.0),
    Some(128.0),
];

/// Synthetic 2019Q1..2020Q4 inputs written the way agency downloads look:
/// monthly exports, quarterly REER dated at quarter starts under a long
/// column name, and quarterly IIP with 2020Q1 left blank.
pub struct TradeData {
    _dir: TempDir,
    pub root: PathBuf,
}

impl TradeData {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().to_path_buf();

        let mut exports = String::from("Date,IMP5330\n");
        for m in 0..24 {
            let (y, mo) = (2019 + m / 12, m % 12 + 1);
            let value = 1000.0 + 15.0 * m as f64 + if m % 3 == 1 { 40.0 } else { 0.0 } - (m % 5) as f64 * 7.0;
            exports.push_str(&format!("{y}-{mo:02}-01,{value}\n"));
        }
        fs::write(root.join("exports_monthly.csv"), exports).expect("write exports");

        let mut reer = String::from("Quarter,India REER (2015=100)\n");
        for (i, v) in REER.iter().enumerate() {
            reer.push_str(&format!("{}Q{},{v}\n", 2019 + i / 4, i % 4 + 1));
        }
        fs::write(root.join("reer_quarterly.csv"), reer).expect("write reer");

        let mut iip = String::from("Date,IIP\n");
        for (i, v) in IIP.iter().enumerate() {
            let cell = v.map(|x| x.to_string()).unwrap_or_default();
            iip.push_str(&format!("{}-{:02}-01,{cell}\n", 2019 + i / 4, (i % 4) * 3 + 1));
        }
        fs::write(root.join("iip_quarterly.csv"), iip).expect("write iip");

        Self { _dir: dir, root }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, contents).expect("write fixture");
        path
    }

    /// Quarterly `Date`/`REER` workbook. `rows` pairs a quarter offset from
    /// 2019Q1 with its value; dates are quarter-start date cells. A notes
    /// sheet comes first so the data sheet has to be picked by name.
    pub fn write_reer_workbook(&self, name: &str, sheet: &str, rows: &[(u32, Option<f64>)]) -> PathBuf {
        let path = self.path(name);
        let mut workbook = Workbook::new();
        let date_format = Format::new().set_num_format("yyyy-mm-dd");

        let notes = workbook.add_worksheet();
        notes.set_name("Notes").expect("sheet name");
        notes.write_string(0, 0, "Index 2015=100").expect("notes");

        let data = workbook.add_worksheet();
        data.set_name(sheet).expect("sheet name");
        data.write_string(0, 0, "Date").expect("header");
        data.write_string(0, 1, "REER").expect("header");
        for (i, (quarter, value)) in rows.iter().enumerate() {
            let row = i as u32 + 1;
            let year = 2019 + (quarter / 4) as u16;
            let month = (quarter % 4) as u8 * 3 + 1;
            let date = ExcelDateTime::from_ymd(year, month, 1).expect("date");
            data.write_datetime_with_format(row, 0, &date, &date_format)
                .expect("date cell");
            if let Some(v) = value {
                data.write_number(row, 1, *v).expect("value cell");
            }
        }
        workbook.save(&path).expect("save workbook");
        path
    }

    /// Pipeline TOML over the three fixture files; `extra` is appended.
    pub fn config(&self, join: &str, complete_case: &str, extra: &str) -> String {
        format!(
            r#"
join = "{join}"
complete_case = "{complete_case}"

[[series]]
name = "exports"
path = '{exports}'
value_column = "IMP5330"

[[series]]
name = "reer"
path = '{reer}'
date_column = "Quarter"
value_column = "REER"
fallback_patterns = ["reer"]

[[series]]
name = "iip"
path = '{iip}'
value_column = "IIP"

[[log]]
column = "exports"
output = "ln_exports"

[[log]]
column = "reer"
output = "ln_reer"

[[log]]
column = "iip"
output = "ln_iip"

[regression]
dependent = "ln_exports"
independents = ["ln_reer", "ln_iip"]
{extra}
"#,
            exports = display(&self.path("exports_monthly.csv")),
            reer = display(&self.path("reer_quarterly.csv")),
            iip = display(&self.path("iip_quarterly.csv")),
        )
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
