//! Structured outcome of a pipeline run.

use std::{fmt, path::PathBuf};

use serde::Serialize;

use crate::{ConfigWarning, ConsolidatedResult, Crs, FeatureId, JobRecord, ResultSummary};

/// Final classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every job succeeded.
    Success,
    /// At least one job failed; the result holds the surviving jobs.
    Degraded,
    /// The run was aborted and nothing was written.
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        })
    }
}

/// Per-item problems that never abort a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityEvent {
    /// A record was skipped.
    RecordRejected {
        /// Source report.
        report: PathBuf,
        /// Record or line number.
        record: usize,
        /// Why it was skipped.
        reason: String,
    },
    /// A record was accepted with a recoverable oddity.
    RecordWarning {
        /// Source report.
        report: PathBuf,
        /// Description, including the record number.
        message: String,
    },
    /// A feature without a declared system was assumed to be in the fallback.
    FallbackCrsApplied {
        /// Feature identity.
        feature: FeatureId,
        /// System that was assumed.
        crs: Crs,
    },
    /// A feature could not be brought into the working system.
    ReconcileFailed {
        /// Source report.
        report: PathBuf,
        /// Record or line number.
        record: usize,
        /// Why reconciliation failed.
        reason: String,
    },
    /// A feature's buffer could not be produced.
    BufferFailed {
        /// Feature identity.
        feature: FeatureId,
        /// Why buffering failed.
        reason: String,
    },
    /// A member of an auxiliary layer was not used.
    LayerMemberSkipped {
        /// Layer name.
        layer: String,
        /// Member position in the layer.
        index: usize,
        /// Why it was skipped.
        reason: String,
    },
    /// The audit sink refused an event.
    AuditWriteFailed {
        /// Sink error.
        message: String,
    },
}

impl fmt::Display for DataQualityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordRejected { report, reason, .. } => {
                write!(f, "{}: skipped {reason}", report.display())
            }
            Self::RecordWarning { report, message } => {
                write!(f, "{}: {message}", report.display())
            }
            Self::FallbackCrsApplied { feature, crs } => {
                write!(f, "feature {feature} declared no reference system; assumed {crs}")
            }
            Self::ReconcileFailed { report, reason, .. } => {
                write!(f, "{}: {reason}", report.display())
            }
            Self::BufferFailed { reason, .. } => f.write_str(reason),
            Self::LayerMemberSkipped {
                layer,
                index,
                reason,
            } => write!(f, "layer {layer} member {index} skipped: {reason}"),
            Self::AuditWriteFailed { message } => write!(f, "audit write failed: {message}"),
        }
    }
}

/// Counters describing a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Reports scheduled.
    pub reports: usize,
    /// Jobs scheduled.
    pub jobs: usize,
    /// Jobs that succeeded.
    pub jobs_succeeded: usize,
    /// Jobs that failed.
    pub jobs_failed: usize,
    /// Jobs that were cancelled.
    pub jobs_cancelled: usize,
    /// Features extracted and reconciled.
    pub features_extracted: usize,
    /// Records rejected during extraction or reconciliation.
    pub records_rejected: usize,
    /// Features admitted under an identity not seen before.
    pub accepted_new: usize,
    /// Features that replaced an earlier version.
    pub superseded: usize,
    /// Features ignored as duplicates.
    pub duplicates: usize,
    /// Features whose buffer failed.
    pub buffer_failures: usize,
    /// Features whose non-empty buffers were merged into the result.
    pub contributing_features: usize,
}

/// What happened at the output boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutputStatus {
    /// The result was written.
    Written {
        /// Path written.
        path: PathBuf,
    },
    /// Dry run; nothing was written.
    SkippedDryRun,
    /// The run failed; nothing was written.
    SkippedFailedRun,
    /// No output was configured.
    NotConfigured,
    /// Writing failed.
    Failed {
        /// Writer error.
        message: String,
    },
}

/// Everything a caller needs to know about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: String,
    /// Final classification.
    pub outcome: RunOutcome,
    /// Counters.
    pub summary: RunSummary,
    /// Final job records, in job order.
    pub jobs: Vec<JobRecord>,
    /// Data-quality events, in report order.
    pub events: Vec<DataQualityEvent>,
    /// Configuration warnings.
    pub warnings: Vec<ConfigWarning>,
    /// Consolidated result, absent when the run failed.
    #[serde(skip)]
    pub result: Option<ConsolidatedResult>,
    /// Summary of the consolidated result.
    pub result_summary: Option<ResultSummary>,
    /// Output boundary status.
    pub output: OutputStatus,
    /// Why the run failed, when it did.
    pub failure: Option<String>,
}

impl RunReport {
    /// Whether the run produced a result.
    #[must_use]
    pub const fn has_result(&self) -> bool {
        self.result.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn events_serialise_with_kind_tags() {
        let event = DataQualityEvent::RecordRejected {
            report: PathBuf::from("a.txt"),
            record: 3,
            reason: "record 3 has no Name or ID".into(),
        };
        let json = serde_json::to_value(&event).expect("serialise");
        assert_eq!(json["kind"], "record_rejected");
        assert_eq!(json["record"], 3);
        assert_eq!(event.to_string(), "a.txt: skipped record 3 has no Name or ID");
    }

    #[rstest]
    #[case(RunOutcome::Success, "success")]
    #[case(RunOutcome::Degraded, "degraded")]
    #[case(RunOutcome::Failed, "failed")]
    fn outcome_names(#[case] outcome: RunOutcome, #[case] expected: &str) {
        assert_eq!(outcome.to_string(), expected);
        assert_eq!(
            serde_json::to_value(outcome).expect("serialise"),
            serde_json::Value::from(expected)
        );
    }
}
