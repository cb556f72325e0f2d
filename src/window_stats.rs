use chrono::{Days, NaiveDate};
use serde::Serialize;

use crate::error::{ComputeError, InputError};
use crate::normalize::EventRecord;
use crate::timeline::EntityTimeline;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSettings {
    windows: Vec<u32>,
    category_enabled: bool,
}

impl AggregateSettings {
    pub fn new(windows: &[u32], category_enabled: bool) -> Result<Self, InputError> {
        if windows.is_empty() {
            return Err(InputError::NoWindows);
        }
        if windows.contains(&0) {
            return Err(InputError::ZeroWindow(0));
        }
        let mut windows = windows.to_vec();
        windows.sort_unstable();
        windows.dedup();
        Ok(Self {
            windows,
            category_enabled,
        })
    }

    /// Window lengths, shortest first.
    pub fn windows(&self) -> &[u32] {
        &self.windows
    }

    pub fn category_enabled(&self) -> bool {
        self.category_enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowCounts {
    pub window_days: u32,
    pub appearances: u32,
    pub wins: u32,
    pub win_rate: f64,
    pub category_wins: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowedStats {
    pub id: usize,
    /// Same order as [`AggregateSettings::windows`].
    pub windows: Vec<WindowCounts>,
    pub total_wins_diff: f64,
}

impl WindowedStats {
    pub fn window(&self, days: u32) -> Option<&WindowCounts> {
        self.windows.iter().find(|w| w.window_days == days)
    }
}

pub fn win_rate(wins: u32, appearances: u32) -> f64 {
    if appearances == 0 {
        0.0
    } else {
        f64::from(wins) / f64::from(appearances)
    }
}

/// Counts the entity's earlier records (strictly lower `id`) dated on or after
/// `date - W days`, for every configured window.
pub fn compute(
    record: &EventRecord,
    timeline: &EntityTimeline,
    settings: &AggregateSettings,
) -> Result<WindowedStats, ComputeError> {
    let k = timeline
        .position_of(record.id)
        .ok_or_else(|| ComputeError::NotInTimeline {
            id: record.id,
            entity: record.entity.clone(),
        })?;
    let category = record
        .category
        .as_deref()
        .filter(|_| settings.category_enabled);

    let windows: Vec<WindowCounts> = settings
        .windows
        .iter()
        .map(|&days| {
            let lower = record
                .date
                .checked_sub_days(Days::new(u64::from(days)))
                .unwrap_or(NaiveDate::MIN);
            let (appearances, wins, category_wins) = if timeline.date_ordered() {
                count_sorted(timeline, k, lower, category)
            } else {
                count_scan(timeline, k, lower, category)
            };
            WindowCounts {
                window_days: days,
                appearances,
                wins,
                win_rate: win_rate(wins, appearances),
                category_wins: settings.category_enabled.then_some(category_wins),
            }
        })
        .collect();

    let total_wins_diff = match windows.as_slice() {
        [short, medium, ..] => short.win_rate - medium.win_rate,
        _ => 0.0,
    };

    Ok(WindowedStats {
        id: record.id,
        windows,
        total_wins_diff,
    })
}

fn count_sorted(
    timeline: &EntityTimeline,
    k: usize,
    lower: NaiveDate,
    category: Option<&str>,
) -> (u32, u32, u32) {
    let start = timeline.window_start(k, lower);
    let category_wins = category
        .map(|c| timeline.category_wins_between(c, start, k))
        .unwrap_or(0);
    ((k - start) as u32, timeline.wins_between(start, k), category_wins)
}

// Dates disagree with id order; the id cutoff still holds, so walk the prefix.
fn count_scan(
    timeline: &EntityTimeline,
    k: usize,
    lower: NaiveDate,
    category: Option<&str>,
) -> (u32, u32, u32) {
    let mut appearances = 0;
    let mut wins = 0;
    let mut category_wins = 0;
    for pos in (0..k).filter(|&pos| timeline.date_at(pos) >= lower) {
        appearances += 1;
        if timeline.is_win_at(pos) {
            wins += 1;
            if category.is_some_and(|c| timeline.is_category_win_at(c, pos)) {
                category_wins += 1;
            }
        }
    }
    (appearances, wins, category_wins)
}
