//! Filesystem and database adapters for the corridor engine.
//!
//! Responsibilities:
//! - Discover report files and serve their bytes to the pipeline.
//! - Load GeoJSON geometry layers.
//! - Encode the consolidated result as GeoJSON or EWKT.
//! - Persist run metadata and feature identities for ledger seeding.
//!
//! Boundaries:
//! - Do not encode domain rules (live in `corridor-core`).
//! - Interactive prompting belongs to the caller; see [`Confirm`].
//!
//! Invariants:
//! - Discovery order is deterministic.
//! - No global mutable state.
#![forbid(unsafe_code)]

#[cfg(feature = "audit-sqlite")]
pub mod audit;
pub mod layers;
pub mod output;
pub mod reports;
pub mod summary;

#[cfg(feature = "audit-sqlite")]
pub use audit::{AuditLogError, SqliteAuditLog};
pub use layers::GeoJsonLayerLoader;
pub use output::{Confirm, FileLayerWriter, encode_geojson};
pub use reports::{DiscoveryError, FsReportSource, discover_reports};
pub use summary::{SummaryError, write_run_summary};
