use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{ComputeError, EngineError, InputError};
use crate::merge::{self, ColumnPlan};
use crate::normalize::{self, ColumnRoles};
use crate::scheduler::{self, CancelToken, ProgressFn};
use crate::table::{OutputTable, RawTable};
use crate::timeline::TimelineIndex;
use crate::window_stats::{self, AggregateSettings};

#[derive(Default)]
pub struct RunHooks<'a> {
    pub progress: Option<&'a ProgressFn<'a>>,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub entity_column: String,
    pub rows_read: usize,
    pub rows_excluded: usize,
    pub excluded_examples: Vec<String>,
    pub records: usize,
    pub entities: usize,
    pub categories: usize,
    pub windows: Vec<u32>,
    pub chunks: usize,
    pub workers: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub table: OutputTable,
    pub report: RunReport,
}

pub fn run(table: &RawTable, config: &EngineConfig) -> Result<EngineOutput, EngineError> {
    run_with(table, config, &RunHooks::default())
}

/// Every input problem is reported before any aggregation work is scheduled.
pub fn run_with(
    table: &RawTable,
    config: &EngineConfig,
    hooks: &RunHooks<'_>,
) -> Result<EngineOutput, EngineError> {
    let started = Instant::now();
    let settings = AggregateSettings::new(&config.windows, config.category_enabled)?;
    let roles = ColumnRoles::resolve(table, &config.columns, config.category_enabled)?;

    info!(
        "Analysing {} rows by '{}'",
        table.len(),
        config.columns.entity
    );
    let dataset = normalize::normalize(table, &roles);
    if dataset.records.is_empty() {
        return Err(InputError::EmptyDataset {
            excluded: dataset.excluded.count,
        }
        .into());
    }

    let categories = dataset.categories();
    let plan = ColumnPlan::new(&table.headers, &roles, &settings, config, &categories)?;
    let index = TimelineIndex::build(&dataset.records);
    info!(
        "Indexed {} records across {} entities",
        dataset.records.len(),
        index.len()
    );

    let workers = config.worker_threads();
    let chunks = scheduler::plan_chunks(dataset.records.len(), workers, &config.chunks);
    debug!("planned {} chunks for {workers} workers", chunks.len());
    let pool = scheduler::build_worker_pool(workers);

    let records = &dataset.records;
    let stats = scheduler::run_chunks(
        pool.as_ref(),
        &chunks,
        &hooks.cancel,
        hooks.progress,
        |id| {
            let record = &records[id];
            let timeline =
                index
                    .get(&record.entity)
                    .ok_or_else(|| ComputeError::UnknownEntity {
                        id,
                        entity: record.entity.clone(),
                    })?;
            window_stats::compute(record, timeline, &settings)
        },
    )?;

    let output = merge::merge(stats, records, table, &plan)?;
    let (first_date, last_date) = dataset.date_range().unzip();
    let report = RunReport {
        entity_column: config.columns.entity.clone(),
        rows_read: table.len(),
        rows_excluded: dataset.excluded.count,
        excluded_examples: dataset.excluded.examples.clone(),
        records: records.len(),
        entities: index.len(),
        categories: categories.len(),
        windows: settings.windows().to_vec(),
        chunks: chunks.len(),
        workers,
        first_date,
        last_date,
        elapsed_ms: started.elapsed().as_millis(),
    };
    info!(
        "Finished '{}': {} rows in {} ms",
        report.entity_column,
        output.len(),
        report.elapsed_ms
    );

    Ok(EngineOutput {
        table: output,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

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
    fn report_describes_the_run() {
        let t = table(&[
            ["01/01/2024", "A", "York", "1"],
            ["bad", "A", "York", "1"],
            ["02/01/2024", "B", "Ascot", "1"],
            ["03/01/2024", "A", "Ascot", "2"],
        ]);
        let config = EngineConfig::new("trainer", &[30, 90, 365], true);
        let out = run(&t, &config).unwrap();
        let report = out.report;
        assert_eq!(report.rows_read, 4);
        assert_eq!(report.rows_excluded, 1);
        assert_eq!(report.excluded_examples, vec!["bad".to_string()]);
        assert_eq!(report.records, 3);
        assert_eq!(report.entities, 2);
        assert_eq!(report.categories, 2);
        assert_eq!(report.first_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(report.last_date, NaiveDate::from_ymd_opt(2024, 1, 3));
        assert_eq!(out.table.len(), 3);
    }

    #[test]
    fn all_dates_bad_is_an_empty_dataset() {
        let t = table(&[["x", "A", "York", "1"], ["", "B", "York", "1"]]);
        let err = run(&t, &EngineConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Input(InputError::EmptyDataset { excluded: 2 })
        ));
    }

    #[test]
    fn input_errors_come_before_aggregation() {
        let t = table(&[["01/01/2024", "A", "York", "1"]]);
        let config = EngineConfig::new("Jockey", &[30], false);
        let err = run(&t, &config).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Input(InputError::MissingColumn { ref column }) if column == "Jockey"
        ));

        let config = EngineConfig::new("trainer", &[], false);
        assert!(matches!(
            run(&t, &config),
            Err(EngineError::Input(InputError::NoWindows))
        ));
    }

    #[test]
    fn hooks_report_progress_and_honour_cancellation() {
        let rows: Vec<[&str; 4]> = (0..40).map(|_| ["01/01/2024", "A", "York", "1"]).collect();
        let t = table(&rows);
        let mut config = EngineConfig::default();
        config.chunks.fixed = Some(10);

        let calls = AtomicUsize::new(0);
        let progress: &ProgressFn<'_> = &|_, total| {
            assert_eq!(total, 4);
            calls.fetch_add(1, Ordering::SeqCst);
        };
        let hooks = RunHooks {
            progress: Some(progress),
            cancel: CancelToken::new(),
        };
        run_with(&t, &config, &hooks).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let hooks = RunHooks::default();
        hooks.cancel.cancel();
        assert!(matches!(
            run_with(&t, &config, &hooks),
            Err(EngineError::Cancelled)
        ));
    }
}
