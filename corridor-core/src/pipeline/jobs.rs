//! Job partitioning, job state tracking and the worker-pool stage runner.

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use rayon::ThreadPool;
use serde::Serialize;
use thiserror::Error;

use crate::{ExtractError, ReportRef, ReportSourceError, geometry::panic_message};

/// An immutable unit of parallel work: one or more reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingJob {
    /// Position of the job in the run; fixes the global merge order.
    pub index: usize,
    /// Reports handled by the job, in input order.
    pub reports: Vec<ReportRef>,
}

/// Group `reports` into jobs of at most `batch_size` reports each.
///
/// A batch size of one yields one job per report. A zero batch size is
/// treated as one; configuration validation rejects it earlier.
///
/// # Examples
///
/// ```
/// use corridor_core::{ReportRef, partition};
///
/// let reports: Vec<_> = ["a.txt", "b.txt", "c.txt"]
///     .into_iter()
///     .filter_map(ReportRef::from_path)
///     .collect();
/// let jobs = partition(&reports, 2);
/// assert_eq!(jobs.len(), 2);
/// assert_eq!(jobs[1].reports.len(), 1);
/// ```
#[must_use]
pub fn partition(reports: &[ReportRef], batch_size: usize) -> Vec<ProcessingJob> {
    reports
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, chunk)| ProcessingJob {
            index,
            reports: chunk.to_vec(),
        })
        .collect()
}

/// Failures that take down a whole job.
#[derive(Debug, Error)]
pub enum JobError {
    /// A report could not be opened.
    #[error(transparent)]
    Source(#[from] ReportSourceError),
    /// A report could not be read to the end.
    #[error("failed to read report {path:?}")]
    Read {
        /// Offending report.
        path: PathBuf,
        /// IO error.
        #[source]
        source: io::Error,
    },
    /// A report could not be decoded at all.
    #[error(transparent)]
    Extract(#[from] ExtractError),
    /// The geometry engine failed unexpectedly.
    #[error("geometry engine failed: {message}")]
    GeometryEngine {
        /// Engine message.
        message: String,
    },
}

/// Lifecycle of a job.
///
/// Legal transitions are `Pending → Running`, `Pending → Cancelled`,
/// `Running → Succeeded`, `Running → Failed` and `Running → Cancelled`
/// (a fail-fast run discards the results of jobs still in flight).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker.
    Pending,
    /// Dispatched to a worker.
    Running,
    /// Finished with buffers.
    Succeeded {
        /// Features extracted by the job.
        features: usize,
        /// Buffers the job contributed to its local union.
        buffers: usize,
    },
    /// Finished with an error.
    Failed {
        /// Error description.
        error: String,
    },
    /// Never ran, or its results were discarded.
    Cancelled,
}

impl JobState {
    /// Whether the job has reached a final state.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is allowed.
    #[must_use]
    pub const fn can_become(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (
                    Self::Running,
                    Self::Succeeded { .. } | Self::Failed { .. } | Self::Cancelled
                )
        )
    }
}

/// A job and its current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    /// Job index.
    pub job: usize,
    /// Reports handled by the job.
    pub reports: Vec<PathBuf>,
    /// Current state.
    #[serde(flatten)]
    pub state: JobState,
}

/// Owns the job records of a run and enforces the state machine.
#[derive(Debug, Clone, Default)]
pub(crate) struct JobTracker {
    records: Vec<JobRecord>,
}

impl JobTracker {
    pub(crate) fn new(jobs: &[ProcessingJob]) -> Self {
        let records = jobs
            .iter()
            .map(|job| JobRecord {
                job: job.index,
                reports: job.reports.iter().map(|r| r.path.clone()).collect(),
                state: JobState::Pending,
            })
            .collect();
        Self { records }
    }

    /// Move a job to `next`, ignoring illegal transitions.
    pub(crate) fn advance(&mut self, job: usize, next: JobState) -> bool {
        let Some(record) = self.records.get_mut(job) else {
            log::error!("job {job} is not part of this run");
            return false;
        };
        if !record.state.can_become(&next) {
            log::error!(
                "job {job} cannot move from {:?} to {next:?}",
                record.state
            );
            return false;
        }
        record.state = next;
        true
    }

    pub(crate) fn state(&self, job: usize) -> Option<&JobState> {
        self.records.get(job).map(|record| &record.state)
    }

    /// Number of jobs that ended in [`JobState::Failed`].
    pub(crate) fn failed(&self) -> usize {
        self.records
            .iter()
            .filter(|record| matches!(record.state, JobState::Failed { .. }))
            .count()
    }

    /// Cancel every job that has not finished.
    pub(crate) fn cancel_unfinished(&mut self) -> usize {
        let mut cancelled = 0;
        for record in &mut self.records {
            if !record.state.is_final() {
                record.state = JobState::Cancelled;
                cancelled += 1;
            }
        }
        cancelled
    }

    pub(crate) fn into_records(self) -> Vec<JobRecord> {
        self.records
    }
}

/// Progress messages sent from workers back to the orchestrating thread.
#[derive(Debug)]
pub(crate) enum StageEvent<O> {
    /// The job was picked up by a worker.
    Started(usize),
    /// The job was not run because the stage was cancelled.
    Skipped(usize),
    /// The job finished.
    Finished(usize, Result<O, JobError>),
}

/// Run `work` for every input on `pool`, streaming events to `observe`.
///
/// `observe` runs on the calling thread, one event at a time, so it may
/// own mutable run state. Workers never share anything but the cancel
/// flag. A panic inside `work` fails the job with
/// [`JobError::GeometryEngine`]. When `fail_fast` is set the first failure
/// raises `cancel`, and jobs that have not started yet are skipped.
pub(crate) fn run_stage<I, O, W, F>(
    pool: &ThreadPool,
    inputs: Vec<(usize, I)>,
    fail_fast: bool,
    cancel: &AtomicBool,
    work: W,
    mut observe: F,
) where
    I: Send,
    O: Send,
    W: Fn(I) -> Result<O, JobError> + Sync,
    F: FnMut(StageEvent<O>),
{
    let (sender, receiver) = crossbeam_channel::unbounded();
    let work = &work;
    pool.in_place_scope_fifo(|scope| {
        for (index, input) in inputs {
            let sender = sender.clone();
            scope.spawn_fifo(move |_| {
                if cancel.load(Ordering::SeqCst) {
                    sender.send(StageEvent::Skipped(index)).ok();
                    return;
                }
                sender.send(StageEvent::Started(index)).ok();
                let result = panic::catch_unwind(AssertUnwindSafe(|| work(input)))
                    .unwrap_or_else(|payload| {
                        Err(JobError::GeometryEngine {
                            message: panic_message(&*payload),
                        })
                    });
                if fail_fast && result.is_err() {
                    cancel.store(true, Ordering::SeqCst);
                }
                sender.send(StageEvent::Finished(index, result)).ok();
            });
        }
        drop(sender);
        for event in receiver {
            observe(event);
        }
    });
}
