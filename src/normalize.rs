use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ColumnNames;
use crate::error::InputError;
use crate::table::RawTable;

pub const UNKNOWN_ENTITY: &str = "Unknown";

const MAX_DATE_EXAMPLES: usize = 10;
const MISSING_MARKERS: [&str; 7] = ["", "nan", "na", "n/a", "#n/a", "null", "none"];

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Position in the date-sorted, filtered sequence. The causal ordering.
    pub id: usize,
    /// Row index in the source table.
    pub source_row: usize,
    pub date: NaiveDate,
    pub entity: String,
    pub category: Option<String>,
    pub finish_position: Option<i64>,
}

impl EventRecord {
    pub fn is_win(&self) -> bool {
        self.finish_position == Some(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DateExclusions {
    pub count: usize,
    pub examples: Vec<String>,
}

impl DateExclusions {
    fn record(&mut self, raw: &str) {
        self.count += 1;
        if self.examples.len() < MAX_DATE_EXAMPLES {
            self.examples.push(raw.to_string());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedDataset {
    pub records: Vec<EventRecord>,
    pub excluded: DateExclusions,
}

impl NormalizedDataset {
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.records.first()?;
        let last = self.records.last()?;
        Some((first.date, last.date))
    }

    pub fn distinct_entities(&self) -> usize {
        let mut names: Vec<&str> = self.records.iter().map(|r| r.entity.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    }

    pub fn categories(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .records
            .iter()
            .filter_map(|r| r.category.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

/// Column positions of the fields the engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRoles {
    pub date: usize,
    pub entity: usize,
    pub category: Option<usize>,
    pub position: usize,
}

impl ColumnRoles {
    pub fn resolve(
        table: &RawTable,
        names: &ColumnNames,
        category_enabled: bool,
    ) -> Result<Self, InputError> {
        let find = |name: &str| {
            table
                .column_index(name)
                .ok_or_else(|| InputError::MissingColumn {
                    column: name.to_string(),
                })
        };
        let category = if category_enabled {
            Some(find(&names.category)?)
        } else {
            None
        };
        Ok(Self {
            date: find(&names.date)?,
            entity: find(&names.entity)?,
            category,
            position: find(&names.position)?,
        })
    }
}

/// Rows whose date cannot be read are dropped and counted. Survivors get a
/// dense `id` in date order, same-day rows keeping their source order.
pub fn normalize(table: &RawTable, roles: &ColumnRoles) -> NormalizedDataset {
    let mut excluded = DateExclusions::default();
    let mut records = Vec::with_capacity(table.len());

    for row in 0..table.len() {
        let raw_date = table.cell(row, roles.date);
        let Some(date) = parse_race_date(raw_date) else {
            excluded.record(raw_date);
            continue;
        };
        records.push(EventRecord {
            id: 0,
            source_row: row,
            date,
            entity: normalize_entity(table.cell(row, roles.entity)),
            category: roles
                .category
                .and_then(|col| normalize_category(table.cell(row, col))),
            finish_position: parse_finish_position(table.cell(row, roles.position)),
        });
    }

    // Stable: same-day records keep their source order.
    records.sort_by_key(|r| r.date);
    for (id, record) in records.iter_mut().enumerate() {
        record.id = id;
    }

    if excluded.count > 0 {
        warn!(
            "{} rows have invalid dates. These will be excluded from analysis.",
            excluded.count
        );
        warn!("Examples of unparseable dates: {:?}", excluded.examples);
    }

    let dataset = NormalizedDataset { records, excluded };
    if let Some((first, last)) = dataset.date_range() {
        info!("Date range: from {first} to {last}");
    }
    dataset
}

pub fn normalize_entity(raw: &str) -> String {
    let trimmed = raw.trim();
    if is_missing(trimmed) {
        UNKNOWN_ENTITY.to_string()
    } else {
        trimmed.to_string()
    }
}

fn normalize_category(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!is_missing(trimmed)).then(|| trimmed.to_string())
}

fn is_missing(value: &str) -> bool {
    MISSING_MARKERS
        .iter()
        .any(|marker| value.eq_ignore_ascii_case(marker))
}

/// Accepts `"1"` and float-formatted integers such as `"1.0"`; anything else
/// (non-runners, `"PU"`, blanks) has no position.
pub fn parse_finish_position(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if is_missing(trimmed) {
        return None;
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value);
    }
    let value = trimmed.parse::<f64>().ok()?;
    (value.is_finite() && value.fract() == 0.0).then_some(value as i64)
}

// Tried in order against the canonical form, where separators are single
// spaces. Day-first comes before month-first. `%b` also reads full month names.
const TWO_DIGIT_YEAR_FORMATS: [&str; 5] = [
    "%d %m %y",
    "%m %d %y",
    "%d %b %y",
    "%b %d %y",
    "%A %d %b %y",
];
const FULL_YEAR_FORMATS: [&str; 9] = [
    "%Y %m %d",
    "%d %m %Y",
    "%m %d %Y",
    "%Y%m%d",
    "%d %b %Y",
    "%b %d %Y",
    "%Y %b %d",
    "%A %d %b %Y",
    "%A %b %d %Y",
];
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parses a race date, reading ambiguous numeric dates day-first. Any time of
/// day is discarded.
pub fn parse_race_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.date());
        }
    }

    let canonical = canonical_date_text(strip_time_of_day(trimmed));
    for fmt in TWO_DIGIT_YEAR_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&canonical, fmt) {
            // chrono maps 69 to 2069; races from 1969 are more likely.
            return if date.year() > 2068 {
                date.with_year(date.year() - 100)
            } else {
                Some(date)
            };
        }
    }
    for fmt in FULL_YEAR_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&canonical, fmt)
            && date.year() >= 1000
        {
            return Some(date);
        }
    }
    None
}

fn strip_time_of_day(raw: &str) -> &str {
    let mut out = raw;
    while let Some((head, tail)) = out.rsplit_once(char::is_whitespace) {
        let is_time = tail.contains(':')
            || tail.eq_ignore_ascii_case("am")
            || tail.eq_ignore_ascii_case("pm");
        if !is_time {
            break;
        }
        out = head.trim_end();
    }
    out
}

/// `"3rd Sep, 2023"` style input becomes `"3 Sep 2023"`: separators turn
/// into single spaces and ordinal suffixes are dropped.
fn canonical_date_text(raw: &str) -> String {
    let spaced: String = raw
        .chars()
        .map(|c| if matches!(c, '/' | '-' | '.' | ',') { ' ' } else { c })
        .collect();
    spaced
        .split_whitespace()
        .map(strip_ordinal)
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_ordinal(token: &str) -> &str {
    let digits = token.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let suffix = &token[digits.len()..];
    let is_ordinal = !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && ["st", "nd", "rd", "th"]
            .iter()
            .any(|s| suffix.eq_ignore_ascii_case(s));
    if is_ordinal { digits } else { token }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn table(rows: &[[&str; 4]]) -> RawTable {
        RawTable::new(
            ["date", "trainer", "course", "position"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn numeric_dates_are_day_first() {
        assert_eq!(parse_race_date("01/02/2024"), Some(date(2024, 2, 1)));
        assert_eq!(parse_race_date("1-2-24"), Some(date(2024, 2, 1)));
        assert_eq!(parse_race_date("05.11.1999"), Some(date(1999, 11, 5)));
        assert_eq!(parse_race_date("31/12/70"), Some(date(1970, 12, 31)));
    }

    #[test]
    fn month_first_only_when_day_first_is_impossible() {
        assert_eq!(parse_race_date("12/25/2024"), Some(date(2024, 12, 25)));
        assert_eq!(parse_race_date("12/11/2024"), Some(date(2024, 11, 12)));
    }

    #[test]
    fn iso_and_named_months() {
        assert_eq!(parse_race_date("2024-02-01"), Some(date(2024, 2, 1)));
        assert_eq!(parse_race_date("2024/02/01"), Some(date(2024, 2, 1)));
        assert_eq!(parse_race_date("1 Feb 2024"), Some(date(2024, 2, 1)));
        assert_eq!(parse_race_date("01-Feb-24"), Some(date(2024, 2, 1)));
        assert_eq!(parse_race_date("3rd September 2023"), Some(date(2023, 9, 3)));
        assert_eq!(parse_race_date("Feb 1, 2024"), Some(date(2024, 2, 1)));
    }

    #[test]
    fn compact_weekday_and_year_first_month_names() {
        assert_eq!(parse_race_date("20240201"), Some(date(2024, 2, 1)));
        assert_eq!(
            parse_race_date("Thursday, 1 February 2024"),
            Some(date(2024, 2, 1))
        );
        assert_eq!(parse_race_date("2024-Feb-01"), Some(date(2024, 2, 1)));
        assert_eq!(parse_race_date("Thu 01-Feb-24"), Some(date(2024, 2, 1)));
    }

    #[test]
    fn two_digit_years_pivot_at_69() {
        assert_eq!(parse_race_date("01/02/68"), Some(date(2068, 2, 1)));
        assert_eq!(parse_race_date("01/02/69"), Some(date(1969, 2, 1)));
        assert_eq!(parse_race_date("01/02/00"), Some(date(2000, 2, 1)));
    }

    #[test]
    fn time_of_day_is_dropped() {
        assert_eq!(parse_race_date("2024-02-01T14:30:00"), Some(date(2024, 2, 1)));
        assert_eq!(parse_race_date("01/02/2024 14:30"), Some(date(2024, 2, 1)));
        assert_eq!(parse_race_date("1 Feb 2024 2:05 PM"), Some(date(2024, 2, 1)));
    }

    #[test]
    fn garbage_is_unparsable() {
        assert_eq!(parse_race_date(""), None);
        assert_eq!(parse_race_date("not a date"), None);
        assert_eq!(parse_race_date("32/13/2024"), None);
        assert_eq!(parse_race_date("2024-02-30"), None);
        assert_eq!(parse_race_date("1/2/123"), None);
    }

    #[test]
    fn finish_positions() {
        assert_eq!(parse_finish_position("1"), Some(1));
        assert_eq!(parse_finish_position(" 1.0 "), Some(1));
        assert_eq!(parse_finish_position("4"), Some(4));
        assert_eq!(parse_finish_position("1.5"), None);
        assert_eq!(parse_finish_position("PU"), None);
        assert_eq!(parse_finish_position("nan"), None);
    }

    #[test]
    fn ids_follow_date_order_and_skip_bad_rows() {
        let t = table(&[
            ["03/01/2024", "A", "York", "1"],
            ["01/01/2024", "B", "Ascot", "2"],
            ["garbage", "A", "York", "1"],
            ["01/01/2024", "", "", "3"],
        ]);
        let roles = ColumnRoles::resolve(&t, &ColumnNames::default(), true).unwrap();
        let dataset = normalize(&t, &roles);

        assert_eq!(dataset.excluded.count, 1);
        assert_eq!(dataset.excluded.examples, vec!["garbage".to_string()]);

        let ids: Vec<usize> = dataset.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        let rows: Vec<usize> = dataset.records.iter().map(|r| r.source_row).collect();
        assert_eq!(rows, vec![1, 3, 0]);

        assert_eq!(dataset.records[1].entity, UNKNOWN_ENTITY);
        assert_eq!(dataset.records[1].category, None);
        assert_eq!(dataset.distinct_entities(), 3);
        assert_eq!(dataset.categories(), vec!["Ascot".to_string(), "York".to_string()]);
    }

    #[test]
    fn missing_required_column_is_reported() {
        let t = RawTable::new(vec!["date".to_string(), "trainer".to_string()], Vec::new());
        let err = ColumnRoles::resolve(&t, &ColumnNames::default(), false).unwrap_err();
        assert_eq!(
            err,
            InputError::MissingColumn {
                column: "position".to_string()
            }
        );
    }

    #[test]
    fn category_column_only_required_when_enabled() {
        let t = RawTable::new(
            vec!["date".to_string(), "trainer".to_string(), "position".to_string()],
            Vec::new(),
        );
        assert!(ColumnRoles::resolve(&t, &ColumnNames::default(), false).is_ok());
        assert!(ColumnRoles::resolve(&t, &ColumnNames::default(), true).is_err());
    }
}
