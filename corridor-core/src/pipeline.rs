//! The parallel orchestrator.
//!
//! A run moves through four stages:
//!
//! 1. **Extraction**: jobs run on a bounded worker pool, each reading its
//!    reports, extracting records and reconciling them into the working
//!    system.
//! 2. **Admission**: back on the orchestrating thread, features are
//!    admitted to the [`DedupLedger`] in job and report order. The ledger
//!    has a single writer, so the at-most-once-per-identity rule holds
//!    without locks.
//! 3. **Buffering**: surviving features are buffered on the pool, and each
//!    job unions its own buffers.
//! 4. **Consolidation**: job unions are merged in job order with the
//!    planned-development polygons, the exclusion layer is subtracted once
//!    and the result is validated.

mod jobs;
mod report;

use std::{collections::BTreeMap, io::Read, sync::atomic::AtomicBool};

use geo::MultiPolygon;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use thiserror::Error;

pub use jobs::{JobError, JobRecord, JobState, ProcessingJob, partition};
pub use report::{DataQualityEvent, OutputStatus, RunOutcome, RunReport, RunSummary};

use self::jobs::{JobTracker, StageEvent, run_stage};
use crate::{
    Admission, AuditError, AuditEvent, AuditSink, BufferEngine, ConfigError, ConfigWarning,
    ConsolidatedResult, CrsReconciler, DedupLedger, DedupRecord, ExclusionLayer, FeatureId,
    GeometryLayer, LayerError, LayerWriter, NoopAuditSink, OutputTarget, PipelineConfig,
    ReportRef, ReportSource, ResultValidator, WorkingFeature,
    config::EXCLUSION_LINE_BUFFER_DISTANCE,
    exclusion,
    extract::extract_report,
    geometry::guard,
    layer::SkippedMember,
    merge::{reduce_global, reduce_local, union_all},
};

/// Errors that stop a run before any job is dispatched.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// An auxiliary layer could not be prepared.
    #[error(transparent)]
    Layer(#[from] LayerError),
    /// The worker pool could not be started.
    #[error("failed to start the worker pool")]
    Pool(#[source] ThreadPoolBuildError),
    /// Identities from earlier runs could not be loaded.
    #[error("failed to load identities from earlier runs")]
    SeedLedger(#[source] AuditError),
}

/// What extraction produced for one job.
#[derive(Debug, Default)]
struct Extraction {
    features: Vec<WorkingFeature>,
    events: Vec<DataQualityEvent>,
    rejected: usize,
}

/// What buffering produced for one job.
#[derive(Debug)]
struct LocalUnion {
    polygon: MultiPolygon<f64>,
    buffers: usize,
    events: Vec<DataQualityEvent>,
}

/// Consolidates report features into a single polygon set.
///
/// Optional capabilities default to doing nothing: without an audit sink
/// the ledger starts empty, without layers nothing is merged or
/// subtracted, and without an output nothing is written.
///
/// # Examples
///
/// ```
/// use std::io::{Cursor, Read};
/// use corridor_core::{
///     Pipeline, PipelineConfig, ReportRef, ReportSource, ReportSourceError, RunOutcome,
/// };
///
/// struct OneValve;
///
/// impl ReportSource for OneValve {
///     fn open_report(&self, _: &ReportRef) -> Result<Box<dyn Read + '_>, ReportSourceError> {
///         Ok(Box::new(Cursor::new("Name,Latitude,Longitude\nValve,52.0,15.0\n")))
///     }
/// }
///
/// # fn main() -> Result<(), corridor_core::PipelineError> {
/// let source = OneValve;
/// let config = PipelineConfig { workers: 1, ..PipelineConfig::default() };
/// let mut pipeline = Pipeline::new(config, &source);
/// let report = pipeline.run(&[ReportRef::from_path("a.txt").unwrap()])?;
/// assert_eq!(report.outcome, RunOutcome::Success);
/// assert_eq!(report.summary.contributing_features, 1);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<'a> {
    config: PipelineConfig,
    source: &'a dyn ReportSource,
    audit: Box<dyn AuditSink + 'a>,
    exclusion: Option<GeometryLayer>,
    planning: Option<GeometryLayer>,
    output: Option<(&'a dyn LayerWriter, OutputTarget)>,
}

impl std::fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("exclusion", &self.exclusion.as_ref().map(|l| &l.name))
            .field("planning", &self.planning.as_ref().map(|l| &l.name))
            .field("output", &self.output.as_ref().map(|(_, target)| target))
            .finish_non_exhaustive()
    }
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline reading reports from `source`.
    #[must_use]
    pub fn new(config: PipelineConfig, source: &'a dyn ReportSource) -> Self {
        Self {
            config,
            source,
            audit: Box::new(NoopAuditSink),
            exclusion: None,
            planning: None,
            output: None,
        }
    }

    /// Record run metadata and seed the ledger through `sink`.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: impl AuditSink + 'a) -> Self {
        self.audit = Box::new(sink);
        self
    }

    /// Subtract `layer` from the merged result.
    #[must_use]
    pub fn with_exclusion_layer(mut self, layer: GeometryLayer) -> Self {
        self.exclusion = Some(layer);
        self
    }

    /// Merge `layer` into the result.
    #[must_use]
    pub fn with_planning_layer(mut self, layer: GeometryLayer) -> Self {
        self.planning = Some(layer);
        self
    }

    /// Write the result with `writer` to `target`.
    #[must_use]
    pub fn with_output(mut self, writer: &'a dyn LayerWriter, target: OutputTarget) -> Self {
        self.output = Some((writer, target));
        self
    }

    /// The configuration the pipeline runs with.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline over `reports`.
    ///
    /// Configuration problems are returned as errors before any report is
    /// opened. Everything after that is reported through the
    /// [`RunReport`]: job failures degrade or fail the run, and per-record
    /// problems become [`DataQualityEvent`]s.
    pub fn run(&mut self, reports: &[ReportRef]) -> Result<RunReport, PipelineError> {
        let mut warnings = self.config.validate()?;
        let (workers, capped) = self.config.effective_workers();
        warnings.extend(capped);
        for warning in &warnings {
            log::warn!("{warning}");
        }

        let engine = BufferEngine::new(self.config.buffer_distance, self.config.buffer_shape)?;
        let reconciler = CrsReconciler::new(self.config.working_crs, self.config.fallback_crs);
        let mut events = Vec::new();
        let exclusion = self.prepare_exclusion(&reconciler, &mut events)?;
        let planning = self.prepare_planning(&reconciler, &mut events)?;

        let prior = self
            .audit
            .load_prior_identities()
            .map_err(PipelineError::SeedLedger)?;
        if !prior.is_empty() {
            log::info!("seeding ledger with {} identities from earlier runs", prior.len());
        }
        let mut ledger = DedupLedger::seeded(prior);

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("corridor-worker-{i}"))
            .build()
            .map_err(PipelineError::Pool)?;

        let jobs = partition(reports, self.config.batch_size);
        let mut run = Run {
            run_id: chrono::Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string(),
            dry_run: self.config.dry_run,
            fail_fast: self.config.fail_fast,
            audit: self.audit.as_mut(),
            tracker: JobTracker::new(&jobs),
            summary: RunSummary {
                reports: reports.len(),
                jobs: jobs.len(),
                ..RunSummary::default()
            },
            events,
            failure: None,
        };
        log::info!(
            "run {}: {} reports in {} jobs on {workers} workers",
            run.run_id,
            reports.len(),
            jobs.len()
        );
        let started = AuditEvent::RunStarted {
            run_id: run.run_id.clone(),
            reports: reports.len(),
        };
        run.record_audit(&started);

        let cancel = AtomicBool::new(false);
        let extractions = run.extract(&pool, &jobs, self.source, reconciler, &cancel);
        if run.failure.is_some() {
            return Ok(run.abort(warnings));
        }
        let live = run.admit(&mut ledger, extractions);
        let local = run.buffer(&pool, &jobs, live, engine, &cancel);
        if run.failure.is_some() {
            return Ok(run.abort(warnings));
        }

        let merged = guard(|| reduce_global(local))
            .and_then(|merged| match planning {
                Some(planning) => guard(|| union_all(vec![merged, planning])),
                None => Ok(merged),
            })
            .and_then(|merged| {
                exclusion::subtract(merged, exclusion.as_ref(), self.config.area_tolerance)
            });
        let merged = match merged {
            Ok(merged) => merged,
            Err(message) => {
                log::error!("consolidation failed: {message}");
                run.failure = Some(format!("consolidation failed: {message}"));
                return Ok(run.abort(warnings));
            }
        };

        let validator = ResultValidator::new(self.config.working_crs, self.config.area_tolerance);
        let result = validator.validate(merged, run.summary.contributing_features);
        let mut outcome = if run.tracker.failed() > 0 {
            RunOutcome::Degraded
        } else {
            RunOutcome::Success
        };

        let output = match (&self.output, self.config.dry_run) {
            (None, _) => OutputStatus::NotConfigured,
            (Some(_), true) => OutputStatus::SkippedDryRun,
            (Some((writer, target)), false) => match writer.write_result(&result, target) {
                Ok(path) => {
                    log::info!("wrote consolidated result to {}", path.display());
                    OutputStatus::Written { path }
                }
                Err(err) => {
                    log::error!("failed to write consolidated result: {err}");
                    outcome = RunOutcome::Failed;
                    run.failure = Some(err.to_string());
                    OutputStatus::Failed {
                        message: err.to_string(),
                    }
                }
            },
        };

        log::info!(
            "run {} finished {outcome}: {} features merged, area {:.3}",
            run.run_id,
            result.contributing_features(),
            result.area()
        );
        Ok(run.finish(outcome, warnings, Some(result), output))
    }

    fn prepare_exclusion(
        &self,
        reconciler: &CrsReconciler,
        events: &mut Vec<DataQualityEvent>,
    ) -> Result<Option<ExclusionLayer>, PipelineError> {
        let Some(layer) = self.exclusion.clone() else {
            return Ok(None);
        };
        let name = layer.name.clone();
        let (prepared, skipped) = layer
            .reconcile(reconciler)?
            .into_exclusion(self.config.buffer_shape, EXCLUSION_LINE_BUFFER_DISTANCE)?;
        record_skipped(&name, skipped, events);
        log::info!("exclusion layer {name}: {} polygons", prepared.len());
        Ok(Some(prepared))
    }

    fn prepare_planning(
        &self,
        reconciler: &CrsReconciler,
        events: &mut Vec<DataQualityEvent>,
    ) -> Result<Option<MultiPolygon<f64>>, PipelineError> {
        let Some(layer) = self.planning.clone() else {
            return Ok(None);
        };
        let name = layer.name.clone();
        let (polygons, skipped) = layer.reconcile(reconciler)?.into_planning(
            self.config.buffer_shape,
            self.config.planning_buffer_distance,
        )?;
        record_skipped(&name, skipped, events);
        log::info!("planning layer {name}: {} polygons", polygons.0.len());
        Ok(Some(polygons))
    }
}

fn record_skipped(layer: &str, skipped: Vec<SkippedMember>, events: &mut Vec<DataQualityEvent>) {
    for member in skipped {
        let event = DataQualityEvent::LayerMemberSkipped {
            layer: layer.to_owned(),
            index: member.index,
            reason: member.reason,
        };
        log::warn!("{event}");
        events.push(event);
    }
}

/// Mutable state of one run, owned by the orchestrating thread.
struct Run<'r> {
    run_id: String,
    dry_run: bool,
    fail_fast: bool,
    audit: &'r mut dyn AuditSink,
    tracker: JobTracker,
    summary: RunSummary,
    events: Vec<DataQualityEvent>,
    failure: Option<String>,
}

impl Run<'_> {
    fn record_audit(&mut self, event: &AuditEvent) {
        if self.dry_run {
            return;
        }
        if let Err(err) = self.audit.record(event) {
            let event = DataQualityEvent::AuditWriteFailed {
                message: err.to_string(),
            };
            log::warn!("{event}");
            self.events.push(event);
        }
    }

    fn job_failed(&mut self, job: usize, error: &JobError) {
        log::error!("job {job} failed: {error}");
        self.tracker.advance(
            job,
            JobState::Failed {
                error: error.to_string(),
            },
        );
        if self.fail_fast {
            self.failure
                .get_or_insert_with(|| format!("job {job} failed: {error}"));
        }
    }

    fn skipped(&mut self, job: usize) {
        log::info!("job {job} cancelled before it started");
        self.tracker.advance(job, JobState::Cancelled);
    }

    /// Stage 1. Returns extraction outputs indexed by job.
    fn extract(
        &mut self,
        pool: &ThreadPool,
        jobs: &[ProcessingJob],
        source: &dyn ReportSource,
        reconciler: CrsReconciler,
        cancel: &AtomicBool,
    ) -> Vec<Option<Extraction>> {
        let mut outputs: Vec<Option<Extraction>> = jobs.iter().map(|_| None).collect();
        let inputs: Vec<(usize, &ProcessingJob)> = jobs.iter().map(|job| (job.index, job)).collect();
        run_stage(
            pool,
            inputs,
            self.fail_fast,
            cancel,
            |job| extract_job(source, reconciler, job),
            |event| match event {
                StageEvent::Started(job) => {
                    log::debug!("job {job} started");
                    self.tracker.advance(job, JobState::Running);
                }
                StageEvent::Skipped(job) => self.skipped(job),
                StageEvent::Finished(job, Ok(extraction)) => outputs[job] = Some(extraction),
                StageEvent::Finished(job, Err(error)) => self.job_failed(job, &error),
            },
        );
        outputs
    }

    /// Stage 2. Admits features in job order; returns the live set grouped by job.
    fn admit(
        &mut self,
        ledger: &mut DedupLedger,
        extractions: Vec<Option<Extraction>>,
    ) -> BTreeMap<usize, Vec<WorkingFeature>> {
        let mut live: BTreeMap<FeatureId, (usize, WorkingFeature)> = BTreeMap::new();
        for (job, extraction) in extractions.into_iter().enumerate() {
            let Some(extraction) = extraction else {
                continue;
            };
            for event in extraction.events {
                log::warn!("{event}");
                self.events.push(event);
            }
            self.summary.records_rejected += extraction.rejected;
            self.summary.features_extracted += extraction.features.len();
            for feature in extraction.features {
                let admission = ledger.admit(&feature);
                match &admission {
                    Admission::AcceptedNew => self.summary.accepted_new += 1,
                    Admission::Superseded { previous } => {
                        log::debug!("feature {} supersedes content {previous}", feature.id());
                        self.summary.superseded += 1;
                    }
                    Admission::Duplicate => {
                        self.summary.duplicates += 1;
                        // Content recorded by an earlier run still belongs in the result.
                        if live.contains_key(feature.id()) || !ledger.was_seeded(feature.id()) {
                            continue;
                        }
                    }
                }
                if admission.is_accepted() {
                    let event = AuditEvent::FeatureAdmitted {
                        run_id: self.run_id.clone(),
                        record: DedupRecord {
                            id: feature.id().clone(),
                            content_hash: feature.content_hash().clone(),
                        },
                        admission,
                    };
                    self.record_audit(&event);
                }
                live.insert(feature.id().clone(), (job, feature));
            }
        }

        let mut by_job: BTreeMap<usize, Vec<WorkingFeature>> = BTreeMap::new();
        for (job, feature) in live.into_values() {
            by_job.entry(job).or_default().push(feature);
        }
        by_job
    }

    /// Stage 3. Buffers and locally unions each job that survived extraction.
    fn buffer(
        &mut self,
        pool: &ThreadPool,
        jobs: &[ProcessingJob],
        mut live: BTreeMap<usize, Vec<WorkingFeature>>,
        engine: BufferEngine,
        cancel: &AtomicBool,
    ) -> Vec<(usize, MultiPolygon<f64>)> {
        let mut features_per_job = vec![0; jobs.len()];
        let inputs: Vec<(usize, Vec<WorkingFeature>)> = jobs
            .iter()
            .filter(|job| self.tracker.state(job.index) == Some(&JobState::Running))
            .map(|job| {
                let features = live.remove(&job.index).unwrap_or_default();
                features_per_job[job.index] = features.len();
                (job.index, features)
            })
            .collect();

        let mut outputs: Vec<Option<LocalUnion>> = jobs.iter().map(|_| None).collect();
        run_stage(
            pool,
            inputs,
            self.fail_fast,
            cancel,
            |features| Ok(buffer_job(engine, features)),
            |event| match event {
                StageEvent::Started(_) => {}
                StageEvent::Skipped(job) => {
                    log::info!("job {job} cancelled before buffering");
                    self.tracker.advance(job, JobState::Cancelled);
                }
                StageEvent::Finished(job, Ok(local)) => outputs[job] = Some(local),
                StageEvent::Finished(job, Err(error)) => self.job_failed(job, &error),
            },
        );

        let mut unions = Vec::new();
        for (job, local) in outputs.into_iter().enumerate() {
            let Some(local) = local else {
                continue;
            };
            for event in local.events {
                log::warn!("{event}");
                self.summary.buffer_failures += 1;
                self.events.push(event);
            }
            self.summary.contributing_features += local.buffers;
            self.tracker.advance(
                job,
                JobState::Succeeded {
                    features: features_per_job[job],
                    buffers: local.buffers,
                },
            );
            unions.push((job, local.polygon));
        }
        unions
    }

    /// End a run that produced no result.
    fn abort(mut self, warnings: Vec<ConfigWarning>) -> RunReport {
        let cancelled = self.tracker.cancel_unfinished();
        if cancelled > 0 {
            log::warn!("cancelled {cancelled} unfinished jobs");
        }
        log::error!(
            "run {} failed: {}",
            self.run_id,
            self.failure.as_deref().unwrap_or("unknown failure")
        );
        self.finish(
            RunOutcome::Failed,
            warnings,
            None,
            OutputStatus::SkippedFailedRun,
        )
    }

    fn finish(
        mut self,
        outcome: RunOutcome,
        warnings: Vec<ConfigWarning>,
        result: Option<ConsolidatedResult>,
        output: OutputStatus,
    ) -> RunReport {
        let records = std::mem::take(&mut self.tracker).into_records();
        self.summary.jobs_succeeded = records
            .iter()
            .filter(|r| matches!(r.state, JobState::Succeeded { .. }))
            .count();
        self.summary.jobs_failed = records
            .iter()
            .filter(|r| matches!(r.state, JobState::Failed { .. }))
            .count();
        self.summary.jobs_cancelled = records
            .iter()
            .filter(|r| r.state == JobState::Cancelled)
            .count();
        for record in &records {
            let event = AuditEvent::JobFinished {
                run_id: self.run_id.clone(),
                job: record.clone(),
            };
            self.record_audit(&event);
        }
        let event = AuditEvent::RunFinished {
            run_id: self.run_id.clone(),
            summary: self.summary.clone(),
        };
        self.record_audit(&event);
        RunReport {
            run_id: self.run_id,
            outcome,
            summary: self.summary,
            jobs: records,
            events: self.events,
            warnings,
            result_summary: result.as_ref().map(ConsolidatedResult::summary),
            result,
            output,
            failure: self.failure,
        }
    }
}

fn extract_job(
    source: &dyn ReportSource,
    reconciler: CrsReconciler,
    job: &ProcessingJob,
) -> Result<Extraction, JobError> {
    let mut extraction = Extraction::default();
    for report in &job.reports {
        let mut content = Vec::new();
        source
            .open_report(report)?
            .read_to_end(&mut content)
            .map_err(|source| JobError::Read {
                path: report.path.clone(),
                source,
            })?;
        for outcome in extract_report(&content, report.format, &report.path)? {
            let record = match outcome {
                Ok(record) => record,
                Err(rejection) => {
                    extraction.rejected += 1;
                    extraction.events.push(DataQualityEvent::RecordRejected {
                        report: report.path.clone(),
                        record: rejection.record(),
                        reason: rejection.to_string(),
                    });
                    continue;
                }
            };
            extraction
                .events
                .extend(record.warnings.iter().map(|warning| DataQualityEvent::RecordWarning {
                    report: report.path.clone(),
                    message: warning.to_string(),
                }));
            let provenance = record.feature.provenance().record;
            match reconciler.reconcile(record.feature) {
                Ok(reconciled) => {
                    if let Some(crs) = reconciled.fallback_applied {
                        extraction.events.push(DataQualityEvent::FallbackCrsApplied {
                            feature: reconciled.feature.id().clone(),
                            crs,
                        });
                    }
                    extraction.features.push(reconciled.feature);
                }
                Err(err) => {
                    extraction.rejected += 1;
                    extraction.events.push(DataQualityEvent::ReconcileFailed {
                        report: report.path.clone(),
                        record: provenance,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
    Ok(extraction)
}

fn buffer_job(engine: BufferEngine, features: Vec<WorkingFeature>) -> LocalUnion {
    let mut buffers = Vec::with_capacity(features.len());
    let mut events = Vec::new();
    for feature in &features {
        match engine.buffer(feature) {
            Ok(buffer) => buffers.push(buffer),
            Err(err) => events.push(DataQualityEvent::BufferFailed {
                feature: feature.id().clone(),
                reason: err.to_string(),
            }),
        }
    }
    // A zero-distance buffer is empty and adds nothing to the result.
    let count = buffers.iter().filter(|buffer| !buffer.polygon.0.is_empty()).count();
    LocalUnion {
        polygon: reduce_local(buffers),
        buffers: count,
        events,
    }
}
