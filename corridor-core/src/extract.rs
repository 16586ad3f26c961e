//! Report extraction.
//!
//! A report is decoded into a lazy sequence of per-record outcomes. A
//! malformed record never aborts the report: it surfaces as a
//! [`RecordRejection`] and extraction moves on to the next record. Only a
//! report that cannot be decoded at all produces an [`ExtractError`].

use std::{
    fmt,
    path::{Path, PathBuf},
    str::Utf8Error,
};

use thiserror::Error;

use crate::{CrsError, PipelineFeature};

mod fields;
pub(crate) mod geojson;
mod text;

pub use fields::{GeometryCoercion, GeometryProblem, coerce_geometry};
pub(crate) use fields::geometry_kind;

/// Encoding of a report file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportFormat {
    /// Delimited text: a CSV table or `Key: value` blocks.
    Text,
    /// A GeoJSON `FeatureCollection` or single `Feature`.
    GeoJson,
}

impl ReportFormat {
    /// Infer the format from a `.txt` or `.geojson` extension,
    /// case-insensitively.
    ///
    /// Returns `None` for files that are not reports.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "txt" => Some(Self::Text),
            "geojson" => Some(Self::GeoJson),
            _ => None,
        }
    }
}

/// A report scheduled for processing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportRef {
    /// Location of the report.
    pub path: PathBuf,
    /// How the report is encoded.
    pub format: ReportFormat,
}

impl ReportRef {
    /// Build a reference, inferring the format from the extension.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let format = ReportFormat::from_path(&path)?;
        Some(Self { path, format })
    }
}

impl fmt::Display for ReportRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Report-level extraction failures.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Text report was not valid UTF-8.
    #[error("report {path:?} is not valid UTF-8")]
    Encoding {
        /// Offending report.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: Utf8Error,
    },
    /// GeoJSON report could not be decoded.
    #[error("report {path:?} is not valid GeoJSON")]
    Json {
        /// Offending report.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: simd_json::Error,
    },
    /// GeoJSON report decoded, but is not a feature or collection.
    #[error("report {path:?} contains a {kind} document, expected features")]
    UnsupportedDocument {
        /// Offending report.
        path: PathBuf,
        /// The document type that was found.
        kind: String,
    },
    /// The report declared a reference system that is not supported.
    #[error("report {path:?} declares an unsupported reference system")]
    Crs {
        /// Offending report.
        path: PathBuf,
        /// Registry error.
        #[source]
        source: CrsError,
    },
}

/// Why a single record was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordRejection {
    /// The record's syntax could not be understood.
    #[error("record {record} is malformed: {reason}")]
    Malformed {
        /// Record or line number.
        record: usize,
        /// Description of the problem.
        reason: String,
    },
    /// Neither a name nor an ID field was present.
    #[error("record {record} has no Name or ID")]
    MissingIdentity {
        /// Record or line number.
        record: usize,
    },
    /// No geometry could be found.
    #[error("record {record} has no geometry")]
    MissingGeometry {
        /// Record or line number.
        record: usize,
    },
    /// A geometry was found but is unusable.
    #[error("record {record} has an invalid geometry: {reason}")]
    InvalidGeometry {
        /// Record or line number.
        record: usize,
        /// Description of the problem.
        reason: String,
    },
    /// The geometry type cannot be buffered as a linear feature.
    #[error("record {record} has an unsupported {kind} geometry")]
    UnsupportedGeometry {
        /// Record or line number.
        record: usize,
        /// Geometry type name.
        kind: &'static str,
    },
    /// The record declared a reference system that is not supported.
    #[error("record {record} declares an unsupported reference system: {source}")]
    InvalidCrs {
        /// Record or line number.
        record: usize,
        /// Registry error.
        #[source]
        source: CrsError,
    },
}

impl RecordRejection {
    /// Record or line number the rejection refers to.
    #[must_use]
    pub const fn record(&self) -> usize {
        match self {
            Self::Malformed { record, .. }
            | Self::MissingIdentity { record }
            | Self::MissingGeometry { record }
            | Self::InvalidGeometry { record, .. }
            | Self::UnsupportedGeometry { record, .. }
            | Self::InvalidCrs { record, .. } => *record,
        }
    }
}

/// A recoverable oddity noticed while extracting an accepted record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordWarning {
    /// A geometry was converted into a supported shape.
    GeometryCoerced {
        /// Record or line number.
        record: usize,
        /// What was changed.
        coercion: GeometryCoercion,
    },
    /// A numeric field could not be parsed and was stored as null.
    UnparsableNumber {
        /// Record or line number.
        record: usize,
        /// Field name.
        field: String,
        /// Raw value.
        value: String,
    },
    /// A date field could not be parsed and was stored as null.
    UnparsableDate {
        /// Record or line number.
        record: usize,
        /// Raw value.
        value: String,
    },
}

impl fmt::Display for RecordWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GeometryCoerced { record, coercion } => {
                write!(f, "record {record}: {coercion}")
            }
            Self::UnparsableNumber {
                record,
                field,
                value,
            } => write!(f, "record {record}: {field} value {value:?} is not a number"),
            Self::UnparsableDate { record, value } => {
                write!(f, "record {record}: date {value:?} is not recognised")
            }
        }
    }
}

/// An accepted record and any warnings raised while extracting it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRecord {
    /// The extracted feature.
    pub feature: PipelineFeature,
    /// Recoverable issues noticed along the way.
    pub warnings: Vec<RecordWarning>,
}

/// Result of extracting a single record.
pub type RecordOutcome = Result<ExtractedRecord, RecordRejection>;

/// Lazy sequence of record outcomes for one report.
pub struct ReportFeatures<'a> {
    inner: Box<dyn Iterator<Item = RecordOutcome> + 'a>,
}

impl Iterator for ReportFeatures<'_> {
    type Item = RecordOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl fmt::Debug for ReportFeatures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportFeatures").finish_non_exhaustive()
    }
}

/// Decode a report into a lazy sequence of record outcomes.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use corridor_core::extract::{ReportFormat, extract_report};
///
/// let report = b"Name,Date,PSI,Material,Latitude,Longitude\n\
///                Main,2024-03-01,60,Steel,52.5,13.4\n";
/// let outcomes: Vec<_> =
///     extract_report(report, ReportFormat::Text, Path::new("a.txt")).unwrap().collect();
/// let record = outcomes[0].as_ref().unwrap();
/// assert_eq!(record.feature.id().as_str(), "Main@2024-03-01");
/// ```
pub fn extract_report<'a>(
    content: &'a [u8],
    format: ReportFormat,
    report: &'a Path,
) -> Result<ReportFeatures<'a>, ExtractError> {
    let inner: Box<dyn Iterator<Item = RecordOutcome> + 'a> = match format {
        ReportFormat::Text => {
            let text = std::str::from_utf8(content).map_err(|source| ExtractError::Encoding {
                path: report.to_path_buf(),
                source,
            })?;
            text::records(text.trim_start_matches('\u{feff}'), report)
        }
        ReportFormat::GeoJson => Box::new(geojson::report_records(content, report)?),
    };
    Ok(ReportFeatures { inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a.txt", Some(ReportFormat::Text))]
    #[case("B.TXT", Some(ReportFormat::Text))]
    #[case("c.geojson", Some(ReportFormat::GeoJson))]
    #[case("D.GeoJSON", Some(ReportFormat::GeoJson))]
    #[case("e.csv", None)]
    #[case("f.json", None)]
    #[case("notes", None)]
    fn infers_format_from_report_extensions(#[case] name: &str, #[case] expected: Option<ReportFormat>) {
        assert_eq!(ReportFormat::from_path(Path::new(name)), expected);
    }
}
