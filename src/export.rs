use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result, bail};
use rust_xlsxwriter::{Workbook, Worksheet};
use tracing::info;

use crate::normalize::UNKNOWN_ENTITY;
use crate::table::{Cell, OutputTable};

const MAX_ROWS: usize = 1_048_576;
const MAX_COLS: usize = 16_384;
const MAX_SHEET_NAME: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Xlsx,
    Csv,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("xlsx") => Ok(Self::Xlsx),
            Some("csv") => Ok(Self::Csv),
            _ => bail!("unsupported output extension for {}", path.display()),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
        }
    }
}

pub fn write_table(path: &Path, table: &OutputTable) -> Result<()> {
    match OutputFormat::from_path(path)? {
        OutputFormat::Xlsx => write_xlsx(path, table),
        OutputFormat::Csv => write_csv(path, table),
    }
}

pub fn write_xlsx(path: &Path, table: &OutputTable) -> Result<()> {
    check_sheet_limits(table)?;
    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Results")?;
        write_header(sheet, &table.headers)?;
        write_rows(sheet, table.rows.iter())?;
    }
    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;
    info!("Wrote {} rows to {}", table.len(), path.display());
    Ok(())
}

pub fn write_csv(path: &Path, table: &OutputTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("create {}", path.display()))?;
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|cell| cell.to_string()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed writing csv to {}", path.display()))?;
    info!("Wrote {} rows to {}", table.len(), path.display());
    Ok(())
}

/// One sheet per distinct value of `entity_column`, sheets in name order.
pub fn write_entity_workbook(path: &Path, table: &OutputTable, entity_column: &str) -> Result<()> {
    let entity_idx = table
        .column_index(entity_column)
        .with_context(|| format!("column '{entity_column}' not in results"))?;
    check_sheet_limits(table)?;

    let mut groups: BTreeMap<String, Vec<&Vec<Cell>>> = BTreeMap::new();
    for row in &table.rows {
        let name = row
            .get(entity_idx)
            .map(Cell::to_string)
            .unwrap_or_default();
        groups.entry(name).or_default().push(row);
    }

    let mut workbook = Workbook::new();
    let mut used = HashSet::new();
    for (entity, rows) in &groups {
        let name = unique_sheet_name(entity, &mut used);
        let sheet = workbook.add_worksheet();
        sheet
            .set_name(&name)
            .with_context(|| format!("sheet name for '{entity}'"))?;
        write_header(sheet, &table.headers)?;
        write_rows(sheet, rows.iter().copied())?;
    }
    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;
    info!("Wrote {} entity sheets to {}", groups.len(), path.display());
    Ok(())
}

fn check_sheet_limits(table: &OutputTable) -> Result<()> {
    if table.len() + 1 > MAX_ROWS {
        bail!("{} rows exceed the worksheet limit; write csv instead", table.len());
    }
    if table.headers.len() > MAX_COLS {
        bail!("{} columns exceed the worksheet limit", table.headers.len());
    }
    Ok(())
}

pub fn sanitize_sheet_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'').trim();
    let base = if cleaned.is_empty() {
        UNKNOWN_ENTITY
    } else {
        cleaned
    };
    base.chars().take(MAX_SHEET_NAME).collect()
}

// Excel compares sheet names case-insensitively.
fn unique_sheet_name(raw: &str, used: &mut HashSet<String>) -> String {
    let base = sanitize_sheet_name(raw);
    let mut name = base.clone();
    let mut n = 2;
    while !used.insert(name.to_lowercase()) {
        let suffix = format!(" ({n})");
        let keep = MAX_SHEET_NAME - suffix.chars().count();
        name = base.chars().take(keep).collect::<String>() + &suffix;
        n += 1;
    }
    name
}

fn write_header(worksheet: &mut Worksheet, headers: &[String]) -> Result<()> {
    for (col_idx, value) in headers.iter().enumerate() {
        worksheet
            .write_string(0, col_idx as u16, value)
            .with_context(|| format!("write header ({col_idx})"))?;
    }
    Ok(())
}

fn write_rows<'a>(
    worksheet: &mut Worksheet,
    rows: impl Iterator<Item = &'a Vec<Cell>>,
) -> Result<()> {
    for (idx, row) in rows.enumerate() {
        let row_idx = idx + 1;
        for (col_idx, cell) in row.iter().enumerate() {
            let (r, c) = (row_idx as u32, col_idx as u16);
            let written = match cell {
                Cell::Empty => continue,
                Cell::Int(v) => worksheet.write_number(r, c, *v as f64),
                Cell::Float(v) => worksheet.write_number(r, c, *v),
                Cell::Text(s) => match numeric_text(s) {
                    Some(v) => worksheet.write_number(r, c, v),
                    None => worksheet.write_string(r, c, s),
                },
            };
            written.with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}

fn numeric_text(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    // Keep identifiers such as "007" as text.
    if trimmed.len() > 1 && trimmed.starts_with('0') && !trimmed.starts_with("0.") {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            OutputFormat::from_path(Path::new("out/Trainer_results.XLSX")).unwrap(),
            OutputFormat::Xlsx
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("a.csv")).unwrap(),
            OutputFormat::Csv
        );
        assert!(OutputFormat::from_path(Path::new("a.parquet")).is_err());
        assert!(OutputFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn sheet_names_are_sanitized() {
        assert_eq!(sanitize_sheet_name("J. O'Brien"), "J. O'Brien");
        assert_eq!(sanitize_sheet_name("A/B [x]"), "AB x");
        assert_eq!(sanitize_sheet_name("  "), UNKNOWN_ENTITY);
        assert_eq!(sanitize_sheet_name("'quoted'"), "quoted");
        let long = "x".repeat(40);
        assert_eq!(sanitize_sheet_name(&long).chars().count(), 31);
    }

    #[test]
    fn duplicate_sheet_names_get_suffixes() {
        let mut used = HashSet::new();
        let long = "y".repeat(40);
        let first = unique_sheet_name(&long, &mut used);
        let second = unique_sheet_name(&long, &mut used);
        assert_eq!(first.chars().count(), 31);
        assert_eq!(second.chars().count(), 31);
        assert!(second.ends_with(" (2)"));
        assert_eq!(unique_sheet_name("A:B", &mut used), "AB");
        assert_eq!(unique_sheet_name("ab", &mut used), "ab (2)");
    }

    #[test]
    fn numeric_text_detection() {
        assert_eq!(numeric_text("12"), Some(12.0));
        assert_eq!(numeric_text("0.5"), Some(0.5));
        assert_eq!(numeric_text("0"), Some(0.0));
        assert_eq!(numeric_text("007"), None);
        assert_eq!(numeric_text("York"), None);
        assert_eq!(numeric_text("inf"), None);
    }
}
