//! Capabilities the pipeline consumes from its surroundings.
//!
//! Report transport, layer decoding, result encoding and audit storage
//! all live outside the core. The pipeline only sees these traits; the
//! `corridor-data` crate supplies filesystem and SQLite implementations.

use std::{
    fmt, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    Admission, ConsolidatedResult, DedupRecord, GeometryLayer, JobRecord, LayerError, ReportRef,
    RunSummary,
};

/// Errors raised while opening a report.
#[derive(Debug, Error)]
pub enum ReportSourceError {
    /// No report exists at the path.
    #[error("report {path:?} was not found")]
    NotFound {
        /// Missing report.
        path: PathBuf,
    },
    /// The report exists but could not be opened.
    #[error("failed to open report {path:?}")]
    Io {
        /// Offending report.
        path: PathBuf,
        /// IO error.
        #[source]
        source: io::Error,
    },
}

/// Opens report byte streams.
///
/// Implementations must be shareable across worker threads.
///
/// # Examples
///
/// ```
/// use std::io::{Cursor, Read};
/// use corridor_core::{ReportRef, ReportSource, ReportSourceError};
///
/// struct Fixed;
///
/// impl ReportSource for Fixed {
///     fn open_report(&self, _report: &ReportRef) -> Result<Box<dyn Read + '_>, ReportSourceError> {
///         Ok(Box::new(Cursor::new(b"Name,Latitude,Longitude\nA,1,2\n".to_vec())))
///     }
/// }
///
/// let report = ReportRef::from_path("a.txt").unwrap();
/// let mut text = String::new();
/// Fixed.open_report(&report).unwrap().read_to_string(&mut text).unwrap();
/// assert!(text.starts_with("Name"));
/// ```
pub trait ReportSource: Sync {
    /// Open the report for reading.
    fn open_report(&self, report: &ReportRef) -> Result<Box<dyn io::Read + '_>, ReportSourceError>;
}

/// Loads typed geometry layers.
pub trait LayerLoader {
    /// Load the layer stored at `path`.
    fn load_layer(&self, path: &Path) -> Result<GeometryLayer, LayerError>;
}

/// Encodings the output boundary can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// A GeoJSON feature collection carrying a named `crs` member.
    #[default]
    GeoJson,
    /// Extended WKT with an SRID prefix.
    Ewkt,
}

/// What to do when the output path already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverwritePolicy {
    /// Refuse to replace an existing file.
    #[default]
    RejectIfExists,
    /// Replace an existing file.
    Overwrite,
    /// Ask an interactive collaborator before replacing.
    Prompt,
}

/// Error returned when parsing a format or policy name fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} {value:?}")]
pub struct ParseOptionError {
    kind: &'static str,
    value: String,
}

impl FromStr for OutputFormat {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "geojson" | "geo-json" => Ok(Self::GeoJson),
            "ewkt" | "wkt" => Ok(Self::Ewkt),
            other => Err(ParseOptionError {
                kind: "output format",
                value: other.to_owned(),
            }),
        }
    }
}

impl FromStr for OverwritePolicy {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject-if-exists" | "reject" => Ok(Self::RejectIfExists),
            "overwrite" => Ok(Self::Overwrite),
            "prompt" => Ok(Self::Prompt),
            other => Err(ParseOptionError {
                kind: "overwrite policy",
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GeoJson => "geojson",
            Self::Ewkt => "ewkt",
        })
    }
}

impl fmt::Display for OverwritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RejectIfExists => "reject-if-exists",
            Self::Overwrite => "overwrite",
            Self::Prompt => "prompt",
        })
    }
}

/// Where and how the result is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    /// Destination file.
    pub path: PathBuf,
    /// Encoding.
    pub format: OutputFormat,
    /// Behaviour when the destination exists.
    pub overwrite: OverwritePolicy,
}

/// Errors raised by the output boundary.
#[derive(Debug, Error)]
pub enum OutputError {
    /// The destination exists and the policy forbids replacing it.
    #[error("output {path:?} already exists")]
    AlreadyExists {
        /// Destination.
        path: PathBuf,
    },
    /// The interactive collaborator declined to overwrite.
    #[error("overwrite of {path:?} was declined")]
    Declined {
        /// Destination.
        path: PathBuf,
    },
    /// A prompt was required but no interactive collaborator is available.
    #[error("output {path:?} exists and no confirmation prompt is available")]
    ConfirmationUnavailable {
        /// Destination.
        path: PathBuf,
    },
    /// Writing failed.
    #[error("failed to write output {path:?}")]
    Io {
        /// Destination.
        path: PathBuf,
        /// IO error.
        #[source]
        source: io::Error,
    },
    /// Encoding the result failed.
    #[error("failed to encode output {path:?}: {message}")]
    Encode {
        /// Destination.
        path: PathBuf,
        /// Encoder message.
        message: String,
    },
}

/// Writes the consolidated result.
pub trait LayerWriter {
    /// Write `result` to `target`, returning the path written.
    fn write_result(
        &self,
        result: &ConsolidatedResult,
        target: &OutputTarget,
    ) -> Result<PathBuf, OutputError>;
}

/// Events recorded by the audit sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A run began.
    RunStarted {
        /// Run identifier.
        run_id: String,
        /// Number of reports scheduled.
        reports: usize,
    },
    /// A feature's content was recorded by the ledger.
    FeatureAdmitted {
        /// Run identifier.
        run_id: String,
        /// Identity and hash recorded.
        record: DedupRecord,
        /// Ledger decision.
        admission: Admission,
    },
    /// A job reached a final state.
    JobFinished {
        /// Run identifier.
        run_id: String,
        /// Final job record.
        job: JobRecord,
    },
    /// The run finished.
    RunFinished {
        /// Run identifier.
        run_id: String,
        /// Run summary.
        summary: RunSummary,
    },
}

/// Errors raised by an audit sink.
#[derive(Debug, Error)]
#[error("audit sink failed: {message}")]
pub struct AuditError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AuditError {
    /// Wrap a storage error.
    pub fn new(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// An error with no underlying cause.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

/// Durable record of runs, identities and job outcomes.
pub trait AuditSink {
    /// Record one event.
    fn record(&mut self, event: &AuditEvent) -> Result<(), AuditError>;

    /// Identities and hashes persisted by earlier runs.
    fn load_prior_identities(&self) -> Result<Vec<DedupRecord>, AuditError>;
}

/// Audit sink that stores nothing and remembers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&mut self, _event: &AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    fn load_prior_identities(&self) -> Result<Vec<DedupRecord>, AuditError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("geojson", OutputFormat::GeoJson)]
    #[case("EWKT", OutputFormat::Ewkt)]
    fn parses_output_formats(#[case] raw: &str, #[case] expected: OutputFormat) {
        assert_eq!(raw.parse::<OutputFormat>(), Ok(expected));
    }

    #[rstest]
    #[case("reject-if-exists", OverwritePolicy::RejectIfExists)]
    #[case("overwrite", OverwritePolicy::Overwrite)]
    #[case("Prompt", OverwritePolicy::Prompt)]
    fn parses_overwrite_policies(#[case] raw: &str, #[case] expected: OverwritePolicy) {
        assert_eq!(raw.parse::<OverwritePolicy>(), Ok(expected));
        assert_eq!(expected.to_string().parse::<OverwritePolicy>(), Ok(expected));
    }

    #[rstest]
    fn noop_sink_remembers_nothing() {
        let mut sink = NoopAuditSink;
        let event = AuditEvent::RunStarted {
            run_id: "r".to_owned(),
            reports: 0,
        };
        assert!(sink.record(&event).is_ok());
        assert!(sink.load_prior_identities().expect("loads").is_empty());
    }

    #[rstest]
    fn audit_events_serialise_with_tags() {
        let event = AuditEvent::RunStarted {
            run_id: "r1".to_owned(),
            reports: 2,
        };
        let json = serde_json::to_value(&event).expect("serialise");
        assert_eq!(json["event"], "run_started");
        assert_eq!(json["reports"], 2);
    }
}
