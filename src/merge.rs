use crate::config::{CategoryLayout, EngineConfig};
use crate::error::{EngineError, InputError};
use crate::normalize::{ColumnRoles, EventRecord};
use crate::table::{Cell, OutputTable, RawTable};
use crate::window_stats::{AggregateSettings, WindowCounts, WindowedStats};

pub const TOTAL_WINS_DIFF: &str = "Total Wins Diff";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryColumns {
    Off,
    Single { label: String },
    PerCategory { categories: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct ColumnPlan {
    headers: Vec<String>,
    kept: usize,
    date_col: usize,
    entity_col: usize,
    include_win_rates: bool,
    category: CategoryColumns,
}

impl ColumnPlan {
    pub fn new(
        source_headers: &[String],
        roles: &ColumnRoles,
        settings: &AggregateSettings,
        config: &EngineConfig,
        categories: &[String],
    ) -> Result<Self, InputError> {
        let kept = match &config.truncate_after {
            Some(marker) => {
                let idx = source_headers
                    .iter()
                    .position(|h| h.trim() == marker.trim())
                    .ok_or_else(|| InputError::UnknownMarker(marker.clone()))?;
                if idx < roles.entity {
                    return Err(InputError::MarkerBeforeEntity {
                        marker: marker.clone(),
                        entity: config.columns.entity.clone(),
                    });
                }
                idx + 1
            }
            None => source_headers.len(),
        };

        let category = match (settings.category_enabled(), config.category_layout) {
            (false, _) => CategoryColumns::Off,
            (true, CategoryLayout::Single) => CategoryColumns::Single {
                label: config.category_label.clone(),
            },
            (true, CategoryLayout::PerCategory) => CategoryColumns::PerCategory {
                categories: categories.to_vec(),
            },
        };

        let windows_desc: Vec<u32> = settings.windows().iter().rev().copied().collect();
        let derived = derived_headers(&windows_desc, config.include_win_rates, &category);
        for name in &derived {
            if source_headers[..kept].iter().any(|h| h.trim() == name) {
                return Err(InputError::ColumnCollision(name.clone()));
            }
        }

        let mut headers = Vec::with_capacity(kept + derived.len());
        headers.extend(source_headers[..=roles.entity].iter().cloned());
        headers.extend(derived);
        headers.extend(source_headers[roles.entity + 1..kept].iter().cloned());

        Ok(Self {
            headers,
            kept,
            date_col: roles.date,
            entity_col: roles.entity,
            include_win_rates: config.include_win_rates,
            category,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn project_row(&self, table: &RawTable, record: &EventRecord, stats: &WindowedStats) -> Vec<Cell> {
        let mut row = Vec::with_capacity(self.headers.len());
        for col in 0..self.kept {
            if col == self.entity_col {
                row.push(Cell::Text(record.entity.clone()));
                self.push_derived(&mut row, record, stats);
            } else if col == self.date_col {
                row.push(Cell::Text(record.date.to_string()));
            } else {
                row.push(Cell::text(table.cell(record.source_row, col)));
            }
        }
        row
    }

    fn push_derived(&self, row: &mut Vec<Cell>, record: &EventRecord, stats: &WindowedStats) {
        let desc: Vec<&WindowCounts> = stats.windows.iter().rev().collect();
        row.extend(desc.iter().map(|w| Cell::Int(i64::from(w.appearances))));
        row.extend(desc.iter().map(|w| Cell::Int(i64::from(w.wins))));
        if self.include_win_rates {
            row.extend(desc.iter().map(|w| Cell::Float(w.win_rate)));
        }
        row.push(Cell::Float(stats.total_wins_diff));

        match &self.category {
            CategoryColumns::Off => {}
            CategoryColumns::Single { .. } => {
                row.extend(
                    desc.iter()
                        .map(|w| Cell::Int(i64::from(w.category_wins.unwrap_or(0)))),
                );
            }
            CategoryColumns::PerCategory { categories } => {
                for category in categories {
                    let own = record.category.as_deref() == Some(category.as_str());
                    for w in &desc {
                        row.push(if own {
                            Cell::Int(i64::from(w.category_wins.unwrap_or(0)))
                        } else {
                            Cell::Empty
                        });
                    }
                }
            }
        }
    }
}

fn derived_headers(windows_desc: &[u32], win_rates: bool, category: &CategoryColumns) -> Vec<String> {
    let mut out = Vec::new();
    out.extend(windows_desc.iter().map(|w| format!("{w} Day Appearances")));
    out.extend(windows_desc.iter().map(|w| format!("{w} Day Wins")));
    if win_rates {
        out.extend(windows_desc.iter().map(|w| format!("{w} Day Win Rate")));
    }
    out.push(TOTAL_WINS_DIFF.to_string());
    match category {
        CategoryColumns::Off => {}
        CategoryColumns::Single { label } => {
            out.extend(windows_desc.iter().map(|w| format!("{label} {w} Day Wins")));
        }
        CategoryColumns::PerCategory { categories } => {
            for category in categories {
                out.extend(windows_desc.iter().map(|w| format!("{category} {w} Day Wins")));
            }
        }
    }
    out
}

/// Projects one output row per record, in source row order. Every record must
/// have exactly one result; `id` only decides which results belong together.
pub fn merge(
    mut stats: Vec<WindowedStats>,
    records: &[EventRecord],
    table: &RawTable,
    plan: &ColumnPlan,
) -> Result<OutputTable, EngineError> {
    stats.sort_unstable_by_key(|s| s.id);
    let complete = stats.len() == records.len()
        && stats
            .iter()
            .zip(records)
            .all(|(s, r)| s.id == r.id);
    if !complete {
        return Err(EngineError::IncompleteResults {
            expected: records.len(),
            received: stats.len(),
        });
    }

    let mut pairs: Vec<(&EventRecord, &WindowedStats)> = records.iter().zip(&stats).collect();
    pairs.sort_unstable_by_key(|(record, _)| record.source_row);
    let rows = pairs
        .into_iter()
        .map(|(record, s)| plan.project_row(table, record, s))
        .collect();

    Ok(OutputTable {
        headers: plan.headers.clone(),
        rows,
    })
}
