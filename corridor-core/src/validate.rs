//! Final validity checks and the consolidated result.

use geo::{Area, MultiPolygon, Validation};
use serde::Serialize;

use crate::{
    Crs,
    geometry::{drop_slivers, repair},
};

/// The single polygon set a run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedResult {
    crs: Crs,
    geometry: MultiPolygon<f64>,
    contributing_features: usize,
    valid: bool,
}

impl ConsolidatedResult {
    /// Working system of the geometry.
    #[must_use]
    pub const fn crs(&self) -> Crs {
        self.crs
    }

    /// The consolidated polygons.
    #[must_use]
    pub const fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    /// Number of features whose buffers were merged.
    #[must_use]
    pub const fn contributing_features(&self) -> usize {
        self.contributing_features
    }

    /// Whether the geometry passed validation.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether the result covers no area.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.geometry.0.is_empty()
    }

    /// Planar area in the working system's units.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    /// Serializable summary without the geometry.
    #[must_use]
    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            crs: self.crs,
            contributing_features: self.contributing_features,
            valid: self.valid,
            polygons: self.geometry.0.len(),
            area: self.area(),
        }
    }
}

/// Attributes of a [`ConsolidatedResult`], as written alongside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    /// Working system.
    pub crs: Crs,
    /// Number of contributing features.
    pub contributing_features: usize,
    /// Validity flag.
    pub valid: bool,
    /// Number of member polygons.
    pub polygons: usize,
    /// Planar area.
    pub area: f64,
}

/// Checks the final geometry and wraps it in a [`ConsolidatedResult`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultValidator {
    crs: Crs,
    area_tolerance: f64,
}

impl ResultValidator {
    /// Create a validator for results in `crs`.
    #[must_use]
    pub const fn new(crs: Crs, area_tolerance: f64) -> Self {
        Self {
            crs,
            area_tolerance,
        }
    }

    /// Drop slivers, repair if needed and record validity.
    ///
    /// An empty geometry is a valid, empty result.
    #[must_use]
    pub fn validate(&self, geometry: MultiPolygon<f64>, contributing_features: usize) -> ConsolidatedResult {
        let cleaned = drop_slivers(geometry, self.area_tolerance);
        let (geometry, valid) = if cleaned.is_valid() {
            (cleaned, true)
        } else {
            match repair(cleaned.clone()) {
                Some(repaired) => {
                    log::warn!("consolidated geometry was invalid and has been repaired");
                    (repaired, true)
                }
                None => {
                    log::error!("consolidated geometry is invalid and could not be repaired");
                    (cleaned, false)
                }
            }
        };
        ConsolidatedResult {
            crs: self.crs,
            geometry,
            contributing_features,
            valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use rstest::rstest;

    const CRS: Crs = Crs::WebMercator;

    #[rstest]
    fn empty_geometry_is_valid_and_empty() {
        let result = ResultValidator::new(CRS, 1e-9).validate(MultiPolygon::new(Vec::new()), 0);
        assert!(result.is_valid());
        assert!(result.is_empty());
        assert!(result.area().abs() < f64::EPSILON);
    }

    #[rstest]
    fn overlapping_members_are_repaired() {
        let a = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)];
        let b = polygon![(x: 1.0, y: 0.0), (x: 3.0, y: 0.0), (x: 3.0, y: 2.0), (x: 1.0, y: 2.0)];
        let result = ResultValidator::new(CRS, 1e-9).validate(MultiPolygon::new(vec![a, b]), 2);
        assert!(result.is_valid());
        assert_eq!(result.geometry().0.len(), 1);
        assert!((result.area() - 6.0).abs() < 1e-9);
        assert_eq!(result.contributing_features(), 2);
    }

    #[rstest]
    fn summary_reports_attributes() {
        let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        let result = ResultValidator::new(CRS, 1e-9).validate(square.into(), 1);
        let summary = result.summary();
        assert_eq!(summary.polygons, 1);
        assert_eq!(summary.crs, CRS);
        assert!(summary.valid);
    }
}
