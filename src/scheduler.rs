use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;

use serde::Serialize;
use tracing::debug;

use crate::config::ChunkSizing;
use crate::error::{ComputeError, EngineError};

/// Called after each finished chunk with `(completed_chunks, total_chunks)`.
/// Calls come from worker threads and may arrive out of order.
pub type ProgressFn<'a> = dyn Fn(usize, usize) + Sync + 'a;

/// Shared stop flag, checked by workers between records.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Contiguous range of record ids `start..end` handled by one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkRange {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl ChunkRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

pub fn plan_chunks(total: usize, workers: usize, sizing: &ChunkSizing) -> Vec<ChunkRange> {
    if total == 0 {
        return Vec::new();
    }
    let size = match sizing.fixed {
        Some(fixed) => fixed.max(1),
        None => {
            let target = workers.max(1) * 2;
            let floor = sizing.floor.max(1);
            let ceiling = sizing.ceiling.max(floor);
            total.div_ceil(target).clamp(floor, ceiling)
        }
    }
    .min(total);

    (0..total)
        .step_by(size)
        .enumerate()
        .map(|(index, start)| ChunkRange {
            index,
            start,
            end: (start + size).min(total),
        })
        .collect()
}

pub fn build_worker_pool(threads: usize) -> Option<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|idx| format!("race-form-{idx}"))
        .build()
        .ok()
}

enum ChunkMessage<T> {
    Done(Vec<T>),
    Failed {
        range: ChunkRange,
        error: ComputeError,
    },
    Skipped,
}

/// Runs `work` for every id of every chunk on the pool (or the current rayon
/// context when no pool is given). Results come back in completion order.
///
/// The first failing chunk raises a stop flag local to this call, so chunks
/// that have not started yet are skipped; the lowest-indexed failure is
/// returned. `cancel` is only read here. A caller-tripped token yields
/// [`EngineError::Cancelled`].
pub fn run_chunks<T, F>(
    pool: Option<&rayon::ThreadPool>,
    chunks: &[ChunkRange],
    cancel: &CancelToken,
    progress: Option<&ProgressFn<'_>>,
    work: F,
) -> Result<Vec<T>, EngineError>
where
    T: Send,
    F: Fn(usize) -> Result<T, ComputeError> + Sync,
{
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let total = chunks.len();
    let completed = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel();

    let dispatch = || {
        rayon::scope(|scope| {
            for &range in chunks {
                let tx = tx.clone();
                let work = &work;
                let completed = &completed;
                let failed = &failed;
                scope.spawn(move |_| {
                    let stopped = || cancel.is_cancelled() || failed.load(Ordering::SeqCst);
                    let message = run_chunk(range, &stopped, work);
                    match &message {
                        ChunkMessage::Done(_) => {
                            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                            if let Some(progress) = progress {
                                progress(done, total);
                            }
                        }
                        ChunkMessage::Failed { range, error } => {
                            debug!("chunk {} failed: {error}", range.index);
                            failed.store(true, Ordering::SeqCst);
                        }
                        ChunkMessage::Skipped => {}
                    }
                    let _ = tx.send(message);
                });
            }
        });
    };
    match pool {
        Some(pool) => pool.install(dispatch),
        None => dispatch(),
    }
    drop(tx);

    let mut results = Vec::new();
    let mut failure: Option<(ChunkRange, ComputeError)> = None;
    let mut skipped = 0usize;
    for message in rx {
        match message {
            ChunkMessage::Done(rows) => results.extend(rows),
            ChunkMessage::Failed { range, error } => {
                if failure.as_ref().is_none_or(|(r, _)| range.index < r.index) {
                    failure = Some((range, error));
                }
            }
            ChunkMessage::Skipped => skipped += 1,
        }
    }

    if let Some((range, source)) = failure {
        return Err(EngineError::Chunk {
            index: range.index,
            start: range.start,
            end: range.end,
            source,
        });
    }
    if skipped > 0 {
        return Err(EngineError::Cancelled);
    }
    Ok(results)
}

fn run_chunk<T, F>(range: ChunkRange, stopped: &dyn Fn() -> bool, work: &F) -> ChunkMessage<T>
where
    F: Fn(usize) -> Result<T, ComputeError>,
{
    if stopped() {
        return ChunkMessage::Skipped;
    }
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Option<Vec<T>>, ComputeError> {
        let mut rows = Vec::with_capacity(range.len());
        for id in range.start..range.end {
            if stopped() {
                return Ok(None);
            }
            rows.push(work(id)?);
        }
        Ok(Some(rows))
    }));

    match outcome {
        Ok(Ok(Some(rows))) => ChunkMessage::Done(rows),
        Ok(Ok(None)) => ChunkMessage::Skipped,
        Ok(Err(error)) => ChunkMessage::Failed { range, error },
        Err(payload) => ChunkMessage::Failed {
            range,
            error: ComputeError::Panicked(panic_message(payload.as_ref())),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
