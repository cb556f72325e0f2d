use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WINDOWS: [u32; 3] = [30, 90, 365];

const THREADS_ENV: &str = "RACE_FORM_THREADS";
const CHUNK_FLOOR_ENV: &str = "RACE_FORM_CHUNK_FLOOR";
const CHUNK_CEILING_ENV: &str = "RACE_FORM_CHUNK_CEILING";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub date: String,
    pub entity: String,
    pub category: String,
    pub position: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            date: "date".to_string(),
            entity: "trainer".to_string(),
            category: "course".to_string(),
            position: "position".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryLayout {
    /// One `Course {W} Day Wins` column per window.
    #[default]
    Single,
    /// One `{category} {W} Day Wins` column per category and window.
    PerCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSizing {
    pub floor: usize,
    pub ceiling: usize,
    /// Overrides planning entirely when set.
    pub fixed: Option<usize>,
}

impl Default for ChunkSizing {
    fn default() -> Self {
        Self {
            floor: 32,
            ceiling: 2048,
            fixed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub columns: ColumnNames,
    pub windows: Vec<u32>,
    pub category_enabled: bool,
    pub category_layout: CategoryLayout,
    pub category_label: String,
    pub include_win_rates: bool,
    /// Source columns to the right of this one are dropped from the output.
    pub truncate_after: Option<String>,
    pub threads: Option<usize>,
    pub chunks: ChunkSizing,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            columns: ColumnNames::default(),
            windows: DEFAULT_WINDOWS.to_vec(),
            category_enabled: false,
            category_layout: CategoryLayout::Single,
            category_label: "Course".to_string(),
            include_win_rates: true,
            truncate_after: None,
            threads: None,
            chunks: ChunkSizing::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(entity_column: &str, windows: &[u32], category_enabled: bool) -> Self {
        let mut config = Self::default();
        config.columns.entity = entity_column.to_string();
        config.windows = windows.to_vec();
        config.category_enabled = category_enabled;
        config
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(threads) = env_usize(THREADS_ENV) {
            self.threads = Some(threads.clamp(1, 256));
        }
        if let Some(floor) = env_usize(CHUNK_FLOOR_ENV) {
            self.chunks.floor = floor.max(1);
        }
        if let Some(ceiling) = env_usize(CHUNK_CEILING_ENV) {
            self.chunks.ceiling = ceiling.max(1);
        }
        self
    }

    pub fn worker_threads(&self) -> usize {
        self.threads
            .unwrap_or_else(rayon::current_num_threads)
            .clamp(1, 256)
    }
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|val| val.trim().parse::<usize>().ok())
}
