//! Features flowing through the consolidation pipeline.
//!
//! A [`PipelineFeature`] is what extraction produces: a geometry in
//! whatever reference system the report used. Once reconciled into the
//! run's working system it becomes a [`WorkingFeature`], which also
//! carries the content hash the dedup ledger compares.

use std::{collections::BTreeMap, fmt, path::PathBuf};

use chrono::NaiveDate;
use geo::Geometry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Crs;

/// Stable identity of a feature across reports and runs.
///
/// Identities are derived from the report's name field, optionally
/// qualified by the report date, e.g. `Main Street@2024-03-01`.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use corridor_core::FeatureId;
///
/// # fn main() -> Result<(), corridor_core::FeatureIdError> {
/// let date = NaiveDate::from_ymd_opt(2024, 3, 1);
/// let id = FeatureId::from_parts("  Main Street ", date)?;
/// assert_eq!(id.as_str(), "Main Street@2024-03-01");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(String);

/// Errors returned when constructing a [`FeatureId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureIdError {
    /// The supplied name was empty after trimming.
    #[error("feature identity must not be empty")]
    Empty,
}

impl FeatureId {
    /// Build an identity from a raw name, trimming surrounding whitespace.
    pub fn new(name: &str) -> Result<Self, FeatureIdError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(FeatureIdError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Build an identity from a name and an optional report date.
    pub fn from_parts(name: &str, date: Option<NaiveDate>) -> Result<Self, FeatureIdError> {
        let base = Self::new(name)?;
        Ok(match date {
            Some(day) => Self(format!("{}@{}", base.0, day.format("%Y-%m-%d"))),
            None => base,
        })
    }

    /// Borrow the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex-encoded BLAKE3 digest of a feature's identity-relevant content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Wrap an existing hex digest, for example one loaded from an audit log.
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Borrow the digest as a hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single attribute value carried alongside a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Explicitly empty value.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Numeric value.
    Number(f64),
    /// Free text.
    Text(String),
    /// Calendar date, normalised from the report's date format.
    Date(NaiveDate),
}

impl AttributeValue {
    /// Return the text payload, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
        }
    }
}

/// Ordered attribute table. Ordering keeps serialisation canonical.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Where a feature came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    /// Report the feature was read from.
    pub report: PathBuf,
    /// One-based record number within the report.
    pub record: usize,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.report.display(), self.record)
    }
}

/// A feature as extracted from a report, before reconciliation.
///
/// The geometry is guaranteed to be a point, line string, multi-point or
/// multi-line string with finite coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineFeature {
    id: FeatureId,
    geometry: Geometry<f64>,
    source_crs: Option<Crs>,
    attributes: Attributes,
    provenance: Provenance,
}

impl PipelineFeature {
    /// Assemble an extracted feature.
    #[must_use]
    pub const fn new(
        id: FeatureId,
        geometry: Geometry<f64>,
        source_crs: Option<Crs>,
        attributes: Attributes,
        provenance: Provenance,
    ) -> Self {
        Self {
            id,
            geometry,
            source_crs,
            attributes,
            provenance,
        }
    }

    /// Feature identity.
    #[must_use]
    pub const fn id(&self) -> &FeatureId {
        &self.id
    }

    /// Geometry in the source reference system.
    #[must_use]
    pub const fn geometry(&self) -> &Geometry<f64> {
        &self.geometry
    }

    /// Reference system declared by the report, if any.
    #[must_use]
    pub const fn source_crs(&self) -> Option<Crs> {
        self.source_crs
    }

    /// Attribute table.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Report and record the feature came from.
    #[must_use]
    pub const fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Hash of the geometry, source system and attributes.
    ///
    /// Provenance is excluded so the same content reported twice hashes
    /// identically.
    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        content_hash(&self.geometry, self.source_crs, &self.attributes)
    }

    pub(crate) fn into_working(self, geometry: Geometry<f64>, crs: Crs) -> WorkingFeature {
        let content_hash = self.content_hash();
        WorkingFeature {
            id: self.id,
            geometry,
            crs,
            attributes: self.attributes,
            provenance: self.provenance,
            content_hash,
        }
    }
}

/// A feature whose geometry is expressed in the run's working system.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingFeature {
    id: FeatureId,
    geometry: Geometry<f64>,
    crs: Crs,
    attributes: Attributes,
    provenance: Provenance,
    content_hash: ContentHash,
}

impl WorkingFeature {
    /// Feature identity.
    #[must_use]
    pub const fn id(&self) -> &FeatureId {
        &self.id
    }

    /// Geometry in the working system.
    #[must_use]
    pub const fn geometry(&self) -> &Geometry<f64> {
        &self.geometry
    }

    /// The working system.
    #[must_use]
    pub const fn crs(&self) -> Crs {
        self.crs
    }

    /// Attribute table.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Report and record the feature came from.
    #[must_use]
    pub const fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Hash of the content as extracted, before reprojection.
    #[must_use]
    pub const fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }
}

#[derive(Serialize)]
struct CanonicalContent<'a> {
    crs: Option<u32>,
    geometry: &'a Geometry<f64>,
    attributes: &'a Attributes,
}

fn content_hash(geometry: &Geometry<f64>, crs: Option<Crs>, attributes: &Attributes) -> ContentHash {
    let canonical = CanonicalContent {
        crs: crs.map(Crs::epsg),
        geometry,
        attributes,
    };
    // Serialising plain data into a Vec cannot fail; fall back to the
    // debug form so hashing stays total.
    let bytes = serde_json::to_vec(&canonical)
        .unwrap_or_else(|_| format!("{crs:?}|{geometry:?}|{attributes:?}").into_bytes());
    ContentHash(blake3::hash(&bytes).to_hex().to_string())
}
