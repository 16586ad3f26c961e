//! Error types emitted by the corridor CLI.
//!
//! Keep this error type reasonably small, as many CLI helpers return
//! `Result<_, CliError>`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use corridor_core::{CrsError, LayerError, ParseOptionError, PipelineError, StyleParseError};
#[cfg(feature = "audit-sqlite")]
use corridor_data::AuditLogError;
use corridor_data::{DiscoveryError, SummaryError};
use thiserror::Error;

/// Errors emitted by the corridor CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// The requested operation requires a missing compile-time feature.
    #[error("{action} requires the `{feature}` feature to be enabled")]
    MissingFeature {
        feature: &'static str,
        action: &'static str,
    },
    /// A format or policy name was not recognised.
    #[error("invalid --{field}: {source}")]
    InvalidOption {
        field: &'static str,
        #[source]
        source: ParseOptionError,
    },
    /// A reference system identifier was not recognised.
    #[error("invalid --{field}: {source}")]
    InvalidCrs {
        field: &'static str,
        #[source]
        source: CrsError,
    },
    /// A cap or join style was not recognised.
    #[error("invalid --{field}: {source}")]
    InvalidStyle {
        field: &'static str,
        #[source]
        source: StyleParseError,
    },
    /// The distance unit was neither feet nor metres.
    #[error("unknown distance unit {value:?} (expected feet or metres)")]
    UnknownDistanceUnit { value: String },
    /// The input folder does not exist or is not a directory.
    #[error("{field} path {path:?} does not exist or is not a directory")]
    MissingInputFolder {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path does not exist on disk.
    #[error("{field} path {path:?} does not exist")]
    MissingSourceFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path exists but is not a file.
    #[error("{field} path {path:?} exists but is not a file")]
    SourcePathNotFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path could not be inspected due to an IO error.
    #[error("failed to inspect {field} path {path:?}: {source}")]
    InspectSourcePath {
        field: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The base layer cannot be read as a report.
    #[error("base layer {path:?} must be a GeoJSON file")]
    UnsupportedBaseLayer { path: Utf8PathBuf },
    /// Scanning the input folder failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    /// Loading an auxiliary layer failed.
    #[error("failed to load {field} from {path:?}: {source}")]
    LoadLayer {
        field: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: LayerError,
    },
    /// Opening the audit database failed.
    #[cfg(feature = "audit-sqlite")]
    #[error("failed to open audit log: {0}")]
    OpenAudit(#[source] AuditLogError),
    /// The pipeline refused to start.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// Writing the run summary failed.
    #[error(transparent)]
    WriteSummary(#[from] SummaryError),
}
