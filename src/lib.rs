//! Facade crate for the corridor consolidation engine.
//!
//! This crate re-exports the core domain types and pipeline and exposes the
//! filesystem and SQLite adapters behind feature flags.

#![forbid(unsafe_code)]

pub use corridor_core::{
    Admission, BufferEngine, BufferShape, CapStyle, ConfigError, ConsolidatedResult, Crs,
    CrsError, DataQualityEvent, DedupLedger, DedupRecord, ExclusionLayer, FeatureId,
    GeometryLayer, JobRecord, JobState, JoinStyle, OutputFormat, OutputStatus, OutputTarget,
    OverwritePolicy, Pipeline, PipelineConfig, PipelineError, PipelineFeature, ReportRef,
    ResultValidator, RunOutcome, RunReport, RunSummary, WorkingFeature,
};
pub use corridor_core::{AuditSink, LayerLoader, LayerWriter, ReportSource};

#[cfg(feature = "adapters")]
pub use corridor_data::{
    FileLayerWriter, FsReportSource, GeoJsonLayerLoader, discover_reports, write_run_summary,
};

#[cfg(feature = "audit-sqlite")]
pub use corridor_data::SqliteAuditLog;

#[cfg(feature = "test-support")]
pub use corridor_core::test_support;
