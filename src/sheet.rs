use std::path::Path;

use anyhow::Result;
use rust_xlsxwriter::{Format, Workbook};

use crate::sink::{FinalRecord, COLUMNS};

const COLUMN_WIDTHS: [f64; 5] = [60.0, 36.0, 14.0, 20.0, 60.0];

/// Write rows to a single-sheet workbook with a bold header row.
pub fn write_workbook(path: &Path, records: &[FinalRecord]) -> Result<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    let header = Format::new().set_bold();

    for (col, (name, width)) in COLUMNS.iter().zip(COLUMN_WIDTHS).enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(0, col, *name, &header)?;
        sheet.set_column_width(col, width)?;
    }

    for (i, r) in records.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, &r.title)?;
        sheet.write_string(row, 1, r.winner.as_deref().unwrap_or(""))?;
        sheet.write_number(row, 2, r.amount)?;
        sheet.write_string(row, 3, &r.date)?;
        sheet.write_string(row, 4, &r.url)?;
    }

    workbook.save(path)?;
    Ok(())
}
