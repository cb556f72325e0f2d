use std::borrow::Cow;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use csv::ReaderBuilder;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use tracing::{info, warn};

use crate::table::RawTable;

pub fn load_csv(path: &Path) -> Result<RawTable> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    let (text, encoding) = decode_text(&bytes);
    if encoding != UTF_8 {
        warn!(
            "{} is not valid UTF-8, read as {}",
            path.display(),
            encoding.name()
        );
    }
    let table = parse_csv(&text).with_context(|| format!("parse {}", path.display()))?;
    info!(
        "Loaded {} rows and {} columns from {}",
        table.len(),
        table.headers.len(),
        path.display()
    );
    Ok(table)
}

/// UTF-8 with an optional byte-order mark, otherwise Windows-1252.
pub fn decode_text(bytes: &[u8]) -> (Cow<'_, str>, &'static Encoding) {
    let (text, had_errors) = UTF_8.decode_with_bom_removal(bytes);
    if !had_errors {
        return (text, UTF_8);
    }
    let (text, encoding, had_errors) = WINDOWS_1252.decode(bytes);
    if had_errors {
        warn!("some bytes could not be decoded as {}", encoding.name());
    }
    (text, encoding)
}

pub fn parse_csv(text: &str) -> Result<RawTable> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .context("read header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        bail!("missing header row");
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("read row {}", idx + 2))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(RawTable::new(headers, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bom_is_stripped() {
        let (text, encoding) = decode_text(b"\xef\xbb\xbfdate,trainer\n");
        assert_eq!(text, "date,trainer\n");
        assert_eq!(encoding, UTF_8);
        assert!(matches!(text, Cow::Borrowed(_)));
    }

    #[test]
    fn windows_1252_fallback() {
        let (text, encoding) = decode_text(b"trainer\nJos\xe9\n");
        assert_eq!(text, "trainer\nJos\u{e9}\n");
        assert_eq!(encoding, WINDOWS_1252);

        // 0x80 and 0x92 are C1 controls in Latin-1 but printable here.
        let (text, _) = decode_text(b"prize\n\x80500\nO\x92Brien\n");
        assert_eq!(text, "prize\n\u{20ac}500\nO\u{2019}Brien\n");
    }

    #[test]
    fn ragged_rows_are_kept() {
        let table = parse_csv("date,trainer,position\n01/01/2024,A\n02/01/2024,B,1,extra\n")
            .unwrap();
        assert_eq!(table.headers, vec!["date", "trainer", "position"]);
        assert_eq!(table.rows[0], vec!["01/01/2024", "A"]);
        assert_eq!(table.rows[1].len(), 4);
        assert_eq!(table.cell(0, 2), "");
    }

    #[test]
    fn quoted_fields_keep_commas() {
        let table = parse_csv("trainer,horse\n\"Smith, J\",Red\n").unwrap();
        assert_eq!(table.cell(0, 0), "Smith, J");
    }

    #[test]
    fn blank_input_has_no_header() {
        assert!(parse_csv("").is_err());
    }
}
