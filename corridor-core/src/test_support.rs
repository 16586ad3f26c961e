//! In-memory capability implementations used by unit and behaviour tests.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    io::{self, Cursor},
    path::PathBuf,
    rc::Rc,
};

use crate::{
    AuditError, AuditEvent, AuditSink, ConsolidatedResult, DedupRecord, FeatureId, LayerWriter,
    OutputError, OutputTarget, OverwritePolicy, ReportRef, ReportSource, ReportSourceError,
};

/// Report source serving byte buffers keyed by path.
///
/// Paths registered with [`MemoryReportSource::with_unreadable`] fail with
/// an IO error when opened; unknown paths are not found.
#[derive(Debug, Default, Clone)]
pub struct MemoryReportSource {
    reports: BTreeMap<PathBuf, Vec<u8>>,
    unreadable: Vec<PathBuf>,
}

impl MemoryReportSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a report.
    #[must_use]
    pub fn with_report(mut self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        self.reports.insert(path.into(), content.into());
        self
    }

    /// Add a report that exists but cannot be opened.
    #[must_use]
    pub fn with_unreadable(mut self, path: impl Into<PathBuf>) -> Self {
        self.unreadable.push(path.into());
        self
    }
}

impl ReportSource for MemoryReportSource {
    fn open_report(&self, report: &ReportRef) -> Result<Box<dyn io::Read + '_>, ReportSourceError> {
        if self.unreadable.contains(&report.path) {
            return Err(ReportSourceError::Io {
                path: report.path.clone(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "report is locked"),
            });
        }
        self.reports
            .get(&report.path)
            .map(|content| Box::new(Cursor::new(content.as_slice())) as Box<dyn io::Read + '_>)
            .ok_or_else(|| ReportSourceError::NotFound {
                path: report.path.clone(),
            })
    }
}

#[derive(Debug, Default)]
struct AuditLog {
    events: Vec<AuditEvent>,
    identities: BTreeMap<FeatureId, DedupRecord>,
    fail_writes: bool,
}

/// Audit sink that keeps events in memory.
///
/// Clones share the same log, so a test can hand one clone to a pipeline
/// and inspect another. Admitted features are remembered as prior
/// identities for the next run.
#[derive(Debug, Default, Clone)]
pub struct RecordingAuditSink {
    log: Rc<RefCell<AuditLog>>,
}

impl RecordingAuditSink {
    /// A sink whose writes always fail.
    #[must_use]
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.log.borrow_mut().fail_writes = true;
        sink
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.log.borrow().events.clone()
    }

    /// Identities that a following run would be seeded with.
    #[must_use]
    pub fn prior_identities(&self) -> Vec<DedupRecord> {
        self.log.borrow().identities.values().cloned().collect()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&mut self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut log = self.log.borrow_mut();
        if log.fail_writes {
            return Err(AuditError::message("audit store is read-only"));
        }
        if let AuditEvent::FeatureAdmitted { record, .. } = event {
            log.identities.insert(record.id.clone(), record.clone());
        }
        log.events.push(event.clone());
        Ok(())
    }

    fn load_prior_identities(&self) -> Result<Vec<DedupRecord>, AuditError> {
        Ok(self.prior_identities())
    }
}

/// Layer writer that keeps results in memory and honours overwrite policies.
///
/// `Prompt` is answered with the configured confirmation; with none it is
/// refused.
#[derive(Debug, Default, Clone)]
pub struct MemoryLayerWriter {
    written: Rc<RefCell<BTreeMap<PathBuf, ConsolidatedResult>>>,
    confirm: Option<bool>,
}

impl MemoryLayerWriter {
    /// A writer that answers overwrite prompts with `answer`.
    #[must_use]
    pub fn confirming(answer: bool) -> Self {
        Self {
            confirm: Some(answer),
            ..Self::default()
        }
    }

    /// Results written so far, keyed by path.
    #[must_use]
    pub fn written(&self) -> BTreeMap<PathBuf, ConsolidatedResult> {
        self.written.borrow().clone()
    }
}

impl LayerWriter for MemoryLayerWriter {
    fn write_result(
        &self,
        result: &ConsolidatedResult,
        target: &OutputTarget,
    ) -> Result<PathBuf, OutputError> {
        let mut written = self.written.borrow_mut();
        if written.contains_key(&target.path) {
            match (target.overwrite, self.confirm) {
                (OverwritePolicy::Overwrite, _) | (OverwritePolicy::Prompt, Some(true)) => {}
                (OverwritePolicy::RejectIfExists, _) => {
                    return Err(OutputError::AlreadyExists {
                        path: target.path.clone(),
                    });
                }
                (OverwritePolicy::Prompt, Some(false)) => {
                    return Err(OutputError::Declined {
                        path: target.path.clone(),
                    });
                }
                (OverwritePolicy::Prompt, None) => {
                    return Err(OutputError::ConfirmationUnavailable {
                        path: target.path.clone(),
                    });
                }
            }
        }
        written.insert(target.path.clone(), result.clone());
        Ok(target.path.clone())
    }
}
