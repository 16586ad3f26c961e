//! Core domain types and pipeline stages for the corridor engine.
//!
//! Reports describing linear infrastructure are extracted into typed
//! features, reconciled into one working reference system, deduplicated
//! against earlier runs, buffered in parallel and merged into a single
//! polygon set. Protected areas may be subtracted from the merged result,
//! and planned development merged into it.
//!
//! The crate performs no filesystem access. Reports, layers, output and
//! audit storage are reached through the capability traits in [`ports`];
//! `corridor-data` supplies the concrete adapters.

#![forbid(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod crs;
pub mod exclusion;
pub mod extract;
pub mod feature;
pub mod geometry;
pub mod layer;
pub mod ledger;
pub mod merge;
pub mod pipeline;
pub mod ports;
pub mod reconcile;
pub mod validate;
pub mod wkt;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use buffer::{
    BufferEngine, BufferError, BufferFailure, BufferShape, CapStyle, FeatureBuffer, JoinStyle,
    StyleParseError,
};
pub use config::{ConfigError, ConfigWarning, PipelineConfig};
pub use crs::{Crs, CrsError, LinearUnit};
pub use exclusion::ExclusionLayer;
pub use extract::{
    ExtractError, ExtractedRecord, RecordRejection, RecordWarning, ReportFormat, ReportRef,
};
pub use feature::{
    AttributeValue, Attributes, ContentHash, FeatureId, FeatureIdError, PipelineFeature,
    Provenance, WorkingFeature,
};
pub use layer::{GeometryLayer, LayerError, Polygonized, SkippedMember};
pub use ledger::{Admission, DedupLedger, DedupRecord};
pub use pipeline::{
    DataQualityEvent, JobError, JobRecord, JobState, OutputStatus, Pipeline, PipelineError,
    ProcessingJob, RunOutcome, RunReport, RunSummary, partition,
};
pub use ports::{
    AuditError, AuditEvent, AuditSink, LayerLoader, LayerWriter, NoopAuditSink, OutputError,
    OutputFormat, OutputTarget, OverwritePolicy, ParseOptionError, ReportSource,
    ReportSourceError,
};
pub use reconcile::{CrsReconciler, ReconcileError, Reconciled};
pub use validate::{ConsolidatedResult, ResultSummary, ResultValidator};
