use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use race_form::config::CategoryLayout;
use race_form::csv_input::load_csv;
use race_form::engine::{self, RunHooks, RunReport};
use race_form::export::{self, OutputFormat};
use race_form::scheduler::{CancelToken, ProgressFn};
use race_form::{EngineConfig, RawTable};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Xlsx,
    Csv,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Xlsx => OutputFormat::Xlsx,
            Format::Csv => OutputFormat::Csv,
        }
    }
}

/// Adds trailing 30/90/365-day appearance and win statistics to race results,
/// counting only races run before each row.
#[derive(Debug, Parser)]
#[command(name = "race_form", version)]
struct Cli {
    /// Race results CSV.
    #[arg(long, short)]
    file: PathBuf,

    /// Entity columns to analyse, one output file each.
    #[arg(long = "entity", default_values = ["trainer", "Jockey"])]
    entities: Vec<String>,

    /// Also count wins at the same course.
    #[arg(long)]
    course: bool,

    /// One `{course} {W} Day Wins` column per course instead of a single column.
    #[arg(long)]
    per_course_columns: bool,

    #[arg(long, value_delimiter = ',')]
    windows: Option<Vec<u32>>,

    #[arg(long)]
    no_win_rates: bool,

    /// Drop source columns to the right of this column.
    #[arg(long)]
    truncate_after: Option<String>,

    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = Format::Xlsx)]
    format: Format,

    /// Also write a workbook with one sheet per entity.
    #[arg(long)]
    per_entity_sheets: bool,

    /// Write the run reports as JSON.
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    threads: Option<usize>,

    #[arg(long)]
    chunk_size: Option<usize>,

    /// JSON engine configuration; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        }
        .with_env_overrides();

        if self.course {
            config.category_enabled = true;
        }
        if self.per_course_columns {
            config.category_layout = CategoryLayout::PerCategory;
        }
        if let Some(windows) = &self.windows {
            config.windows = windows.clone();
        }
        if self.no_win_rates {
            config.include_win_rates = false;
        }
        if self.truncate_after.is_some() {
            config.truncate_after = self.truncate_after.clone();
        }
        if let Some(threads) = self.threads {
            config.threads = Some(threads);
        }
        if let Some(size) = self.chunk_size {
            config.chunks.fixed = Some(size);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let base = cli.engine_config()?;
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("install Ctrl-C handler")?;

    let table = load_csv(&cli.file)?;
    fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("create {}", cli.output_dir.display()))?;

    let mut reports = BTreeMap::new();
    for entity in &cli.entities {
        let mut config = base.clone();
        config.columns.entity = entity.clone();
        let report = analyse_entity(&cli, &table, &config, &cancel)
            .with_context(|| format!("analysis by '{entity}' failed"))?;
        reports.insert(entity.clone(), report);
    }

    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&reports)?;
        fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
        info!("Run report written to {}", path.display());
    }
    Ok(())
}

fn analyse_entity(
    cli: &Cli,
    table: &RawTable,
    config: &EngineConfig,
    cancel: &CancelToken,
) -> Result<RunReport> {
    let entity = &config.columns.entity;
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}",
        )?
        .progress_chars("#>-"),
    );
    bar.set_message(entity.clone());

    // Workers finish out of order, so count calls rather than trusting `done`.
    let progress: &ProgressFn<'_> = &|_, total| {
        bar.set_length(total as u64);
        bar.inc(1);
    };
    let hooks = RunHooks {
        progress: Some(progress),
        cancel: cancel.clone(),
    };
    let outcome = engine::run_with(table, config, &hooks);
    bar.finish_and_clear();
    let output = outcome?;

    let format = OutputFormat::from(cli.format);
    let path = output_path(&cli.output_dir, entity, "results", format);
    export::write_table(&path, &output.table)?;
    println!("Results saved to {}", path.display());

    if cli.per_entity_sheets {
        let path = output_path(&cli.output_dir, entity, "sheets", OutputFormat::Xlsx);
        export::write_entity_workbook(&path, &output.table, entity)?;
        println!("Per-{entity} sheets saved to {}", path.display());
    }
    Ok(output.report)
}

fn output_path(dir: &Path, entity: &str, suffix: &str, format: OutputFormat) -> PathBuf {
    let stem: String = entity
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    dir.join(format!("{stem}_{suffix}.{}", format.extension()))
}
