//! Reconciliation of extracted features into the working system.

use thiserror::Error;

use crate::{Crs, CrsError, FeatureId, PipelineFeature, WorkingFeature, crs::reproject};

/// Reasons a feature cannot be brought into the working system.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    /// The feature declared no system and no fallback is configured.
    #[error("feature {id} has no reference system and no fallback is configured")]
    MissingCrs {
        /// Feature identity.
        id: FeatureId,
    },
    /// Reprojection failed.
    #[error("feature {id} could not be reprojected: {source}")]
    Reprojection {
        /// Feature identity.
        id: FeatureId,
        /// Underlying conversion error.
        #[source]
        source: CrsError,
    },
}

/// A reconciled feature plus the fallback system, if one was substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// Feature in the working system.
    pub feature: WorkingFeature,
    /// The fallback that was assumed for a feature without a declared system.
    pub fallback_applied: Option<Crs>,
}

/// Brings every feature into a single working system.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use corridor_core::{
///     Attributes, Crs, CrsReconciler, FeatureId, PipelineFeature, Provenance,
/// };
/// use geo::Point;
///
/// let utm = Crs::Utm { zone: 33, north: true };
/// let reconciler = CrsReconciler::new(utm, Some(Crs::Wgs84));
/// let feature = PipelineFeature::new(
///     FeatureId::new("valve").unwrap(),
///     Point::new(15.0, 0.0).into(),
///     None,
///     Attributes::new(),
///     Provenance { report: PathBuf::from("a.txt"), record: 1 },
/// );
/// let reconciled = reconciler.reconcile(feature).unwrap();
/// assert_eq!(reconciled.fallback_applied, Some(Crs::Wgs84));
/// assert_eq!(reconciled.feature.crs(), utm);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrsReconciler {
    target: Crs,
    fallback: Option<Crs>,
}

impl CrsReconciler {
    /// Create a reconciler targeting `target`.
    #[must_use]
    pub const fn new(target: Crs, fallback: Option<Crs>) -> Self {
        Self { target, fallback }
    }

    /// The working system.
    #[must_use]
    pub const fn target(&self) -> Crs {
        self.target
    }

    /// Resolve the system a source declared, applying the fallback if needed.
    ///
    /// Returns the resolved system and whether the fallback was used.
    #[must_use]
    pub fn resolve_source(&self, declared: Option<Crs>) -> Option<(Crs, bool)> {
        match declared {
            Some(crs) => Some((crs, false)),
            None => self.fallback.map(|crs| (crs, true)),
        }
    }

    /// Reproject `feature` into the working system.
    ///
    /// Features already in the working system pass through unchanged.
    pub fn reconcile(&self, feature: PipelineFeature) -> Result<Reconciled, ReconcileError> {
        let Some((source, used_fallback)) = self.resolve_source(feature.source_crs()) else {
            return Err(ReconcileError::MissingCrs {
                id: feature.id().clone(),
            });
        };
        let geometry = reproject(feature.geometry(), source, self.target).map_err(|source| {
            ReconcileError::Reprojection {
                id: feature.id().clone(),
                source,
            }
        })?;
        Ok(Reconciled {
            feature: feature.into_working(geometry, self.target),
            fallback_applied: used_fallback.then_some(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Attributes, Provenance};
    use geo::{Geometry, Point};
    use rstest::rstest;
    use std::path::PathBuf;

    const UTM33: Crs = Crs::Utm {
        zone: 33,
        north: true,
    };

    fn feature(geometry: Geometry<f64>, crs: Option<Crs>) -> PipelineFeature {
        PipelineFeature::new(
            FeatureId::new("main").expect("valid id"),
            geometry,
            crs,
            Attributes::new(),
            Provenance {
                report: PathBuf::from("r.txt"),
                record: 1,
            },
        )
    }

    #[rstest]
    fn passes_through_features_already_in_target() {
        let geometry: Geometry<f64> = Point::new(500_100.0, 10.0).into();
        let reconciled = CrsReconciler::new(UTM33, None)
            .reconcile(feature(geometry.clone(), Some(UTM33)))
            .expect("reconciled");
        assert_eq!(reconciled.feature.geometry(), &geometry);
        assert_eq!(reconciled.fallback_applied, None);
    }

    #[rstest]
    fn reprojects_foreign_features() {
        let reconciled = CrsReconciler::new(UTM33, None)
            .reconcile(feature(Point::new(15.0, 0.0).into(), Some(Crs::Wgs84)))
            .expect("reconciled");
        let Geometry::Point(point) = reconciled.feature.geometry() else {
            panic!("expected a point");
        };
        assert!((point.x() - 500_000.0).abs() < 1e-6);
        assert!(point.y().abs() < 1e-6);
    }

    #[rstest]
    fn missing_crs_without_fallback_is_an_error() {
        let err = CrsReconciler::new(UTM33, None)
            .reconcile(feature(Point::new(1.0, 1.0).into(), None))
            .expect_err("no crs");
        assert!(matches!(err, ReconcileError::MissingCrs { .. }));
    }

    #[rstest]
    fn out_of_domain_coordinates_fail_reprojection() {
        let err = CrsReconciler::new(Crs::WebMercator, None)
            .reconcile(feature(Point::new(0.0, 89.9).into(), Some(Crs::Wgs84)))
            .expect_err("polar point");
        assert!(matches!(err, ReconcileError::Reprojection { .. }));
    }
}
