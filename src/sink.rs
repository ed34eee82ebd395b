use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use serde::Deserialize;

use crate::amount;
use crate::db;
use crate::extract::reconcile::Reconciled;
use crate::sheet;

/// Output column headers, in order.
pub const COLUMNS: [&str; 5] = ["项目标题", "中标单位", "中标金额", "发布日期", "源链接"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Xlsx,
    Sqlite,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Xlsx => "xlsx",
            OutputFormat::Sqlite => "sqlite",
        }
    }
}

/// One output row.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalRecord {
    pub title: String,
    pub winner: Option<String>,
    pub amount: f64,
    pub date: String,
    pub url: String,
}

impl From<Reconciled> for FinalRecord {
    fn from(r: Reconciled) -> Self {
        Self {
            amount: amount::normalize(r.amount.as_deref()),
            title: r.title,
            winner: r.winner,
            date: r.date,
            url: r.url,
        }
    }
}

/// `<dir>/award_results_<YYYYmmdd_HHMMSS>.<ext>`
pub fn output_path<Tz: TimeZone>(dir: &Path, format: OutputFormat, at: &DateTime<Tz>) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    dir.join(format!(
        "award_results_{}.{}",
        at.format("%Y%m%d_%H%M%S"),
        format.extension()
    ))
}

/// Write all rows in one go. Blocking.
pub fn write(path: &Path, format: OutputFormat, records: &[FinalRecord]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }
    let written = match format {
        OutputFormat::Xlsx => sheet::write_workbook(path, records),
        OutputFormat::Sqlite => {
            let conn = db::open(path)?;
            db::init_schema(&conn)?;
            db::save_records(&conn, records)?;
            Ok(())
        }
    };
    written.with_context(|| format!("Failed to write {}", path.display()))
}
