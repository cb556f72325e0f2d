use std::collections::HashMap;

use chrono::NaiveDate;

use crate::normalize::EventRecord;

/// All records of one entity, ordered by `id`, with the lookups the window
/// queries need precomputed.
#[derive(Debug, Clone, Default)]
pub struct EntityTimeline {
    ids: Vec<usize>,
    dates: Vec<NaiveDate>,
    // wins_before[i] = wins among positions < i (len = ids.len() + 1)
    wins_before: Vec<u32>,
    // category -> timeline positions of wins at that category, ascending
    category_wins: HashMap<String, Vec<usize>>,
    date_ordered: bool,
}

impl EntityTimeline {
    fn from_sorted(group: &[&EventRecord]) -> Self {
        let mut timeline = Self {
            ids: Vec::with_capacity(group.len()),
            dates: Vec::with_capacity(group.len()),
            wins_before: Vec::with_capacity(group.len() + 1),
            category_wins: HashMap::new(),
            date_ordered: true,
        };
        let mut wins = 0u32;
        timeline.wins_before.push(wins);

        for (pos, record) in group.iter().enumerate() {
            if let Some(prev) = timeline.dates.last()
                && *prev > record.date
            {
                timeline.date_ordered = false;
            }
            timeline.ids.push(record.id);
            timeline.dates.push(record.date);
            if record.is_win() {
                wins += 1;
                if let Some(category) = &record.category {
                    timeline
                        .category_wins
                        .entry(category.clone())
                        .or_default()
                        .push(pos);
                }
            }
            timeline.wins_before.push(wins);
        }
        timeline
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    /// True when dates never decrease in `id` order, which lets window starts
    /// be found by binary search.
    pub fn date_ordered(&self) -> bool {
        self.date_ordered
    }

    pub fn position_of(&self, id: usize) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    pub fn date_at(&self, pos: usize) -> NaiveDate {
        self.dates[pos]
    }

    pub fn is_win_at(&self, pos: usize) -> bool {
        self.wins_before[pos + 1] > self.wins_before[pos]
    }

    /// First position in `..end` whose date is on or after `lower`.
    /// Only meaningful for date-ordered timelines.
    pub fn window_start(&self, end: usize, lower: NaiveDate) -> usize {
        self.dates[..end].partition_point(|d| *d < lower)
    }

    pub fn wins_between(&self, start: usize, end: usize) -> u32 {
        self.wins_before[end] - self.wins_before[start]
    }

    pub fn category_wins_between(&self, category: &str, start: usize, end: usize) -> u32 {
        let Some(positions) = self.category_wins.get(category) else {
            return 0;
        };
        let lo = positions.partition_point(|p| *p < start);
        let hi = positions.partition_point(|p| *p < end);
        (hi - lo) as u32
    }

    pub fn is_category_win_at(&self, category: &str, pos: usize) -> bool {
        self.category_wins
            .get(category)
            .is_some_and(|positions| positions.binary_search(&pos).is_ok())
    }
}

/// Read-only index from entity key to its timeline. Built once per run and
/// shared by every worker.
#[derive(Debug, Clone, Default)]
pub struct TimelineIndex {
    timelines: HashMap<String, EntityTimeline>,
}

impl TimelineIndex {
    pub fn build(records: &[EventRecord]) -> Self {
        let mut order: Vec<&EventRecord> = records.iter().collect();
        order.sort_by(|a, b| a.entity.cmp(&b.entity).then(a.id.cmp(&b.id)));

        let timelines = order
            .chunk_by(|a, b| a.entity == b.entity)
            .map(|group| (group[0].entity.clone(), EntityTimeline::from_sorted(group)))
            .collect();
        Self { timelines }
    }

    pub fn get(&self, entity: &str) -> Option<&EntityTimeline> {
        self.timelines.get(entity)
    }

    pub fn len(&self) -> usize {
        self.timelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timelines.is_empty()
    }
}
