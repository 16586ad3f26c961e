//! Typed geometry layers: the base network, planned development and
//! protected areas are all loaded the same way and differ only in how
//! their members are turned into polygons.

use std::path::{Path, PathBuf};

use geo::{Geometry, MultiPolygon, Polygon};
use thiserror::Error;

use crate::{
    BufferEngine, BufferShape, ConfigError, Crs, CrsError, CrsReconciler, ExclusionLayer,
    crs::reproject,
    extract::{ExtractError, geojson, geometry_kind},
};

/// A named collection of geometries in one reference system.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryLayer {
    /// Display name, usually the file the layer came from.
    pub name: String,
    /// Declared reference system, if any.
    pub crs: Option<Crs>,
    /// Member geometries.
    pub geometries: Vec<Geometry<f64>>,
}

/// Errors raised while loading or preparing a layer.
#[derive(Debug, Error)]
pub enum LayerError {
    /// The layer file could not be read.
    #[error("failed to read layer {path:?}")]
    Read {
        /// Layer path.
        path: PathBuf,
        /// IO error.
        #[source]
        source: std::io::Error,
    },
    /// The layer could not be decoded.
    #[error("failed to decode layer {path:?}")]
    Decode {
        /// Layer path.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: ExtractError,
    },
    /// The layer has no reference system and no fallback is configured.
    #[error("layer {name} has no reference system and no fallback is configured")]
    MissingCrs {
        /// Layer name.
        name: String,
    },
    /// A member could not be reprojected.
    #[error("layer {name} could not be reprojected")]
    Reprojection {
        /// Layer name.
        name: String,
        /// Conversion error.
        #[source]
        source: CrsError,
    },
    /// A layer-specific buffer setting was invalid.
    #[error("layer {name} has an invalid buffer setting")]
    Config {
        /// Layer name.
        name: String,
        /// Configuration error.
        #[source]
        source: ConfigError,
    },
}

/// A member that could not be used, recorded as a data-quality event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedMember {
    /// Position of the member within the layer.
    pub index: usize,
    /// Why it was skipped.
    pub reason: String,
}

/// Polygons derived from a layer, plus the members that were skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygonized {
    /// Polygon members, in layer order.
    pub polygons: Vec<Polygon<f64>>,
    /// Members that contributed nothing.
    pub skipped: Vec<SkippedMember>,
}

impl GeometryLayer {
    /// Decode a GeoJSON document into a layer.
    ///
    /// Features without geometry are dropped; the layer's `crs` member,
    /// when present, becomes the layer's system.
    pub fn from_geojson(content: &[u8], path: &Path) -> Result<Self, LayerError> {
        let document = geojson::decode(content, path).map_err(|source| LayerError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        let mut geometries = Vec::with_capacity(document.features.len());
        for (index, feature) in document.features.into_iter().enumerate() {
            match feature.into_layer_geometry() {
                Ok(Some(geometry)) => geometries.push(geometry),
                Ok(None) => log::warn!(
                    "layer {} feature {} has no geometry; skipping",
                    path.display(),
                    index + 1
                ),
                Err(reason) => log::warn!(
                    "layer {} feature {} has an invalid geometry ({reason}); skipping",
                    path.display(),
                    index + 1
                ),
            }
        }
        Ok(Self {
            name: path.display().to_string(),
            crs: document.crs,
            geometries,
        })
    }

    /// Reproject the layer into the reconciler's working system.
    ///
    /// A layer without a declared system takes the fallback, if one is
    /// configured; the substitution is logged.
    pub fn reconcile(self, reconciler: &CrsReconciler) -> Result<Self, LayerError> {
        let Some((source, used_fallback)) = reconciler.resolve_source(self.crs) else {
            return Err(LayerError::MissingCrs { name: self.name });
        };
        if used_fallback {
            log::warn!(
                "layer {} declares no reference system; assuming {source}",
                self.name
            );
        }
        let target = reconciler.target();
        let geometries = self
            .geometries
            .iter()
            .map(|geometry| reproject(geometry, source, target))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| LayerError::Reprojection {
                name: self.name.clone(),
                source,
            })?;
        Ok(Self {
            name: self.name,
            crs: Some(target),
            geometries,
        })
    }

    /// Turn members into polygons.
    ///
    /// Polygons are kept as they are. Lines are buffered by
    /// `line_distance` and points by `point_distance`; when a distance is
    /// `None` the members of that kind are skipped.
    pub fn polygonize(
        &self,
        shape: BufferShape,
        line_distance: Option<f64>,
        point_distance: Option<f64>,
    ) -> Result<Polygonized, LayerError> {
        let engine_for = |distance: Option<f64>| {
            distance
                .map(|d| BufferEngine::new(d, shape))
                .transpose()
                .map_err(|source| LayerError::Config {
                    name: self.name.clone(),
                    source,
                })
        };
        let line_engine = engine_for(line_distance)?;
        let point_engine = engine_for(point_distance)?;

        let mut polygons = Vec::new();
        let mut skipped = Vec::new();
        for (index, geometry) in self.geometries.iter().enumerate() {
            let engine = match member_kind(geometry) {
                MemberKind::Areal => {
                    polygons.extend(areal_members(geometry));
                    continue;
                }
                MemberKind::Linear => line_engine.as_ref(),
                MemberKind::Puntal => point_engine.as_ref(),
                MemberKind::Mixed => None,
            };
            let Some(engine) = engine else {
                skipped.push(SkippedMember {
                    index,
                    reason: format!("{} members are not used", geometry_kind(geometry)),
                });
                continue;
            };
            match engine.buffer_geometry(geometry) {
                Ok(buffered) => polygons.extend(buffered.0),
                Err(failure) => skipped.push(SkippedMember {
                    index,
                    reason: failure.to_string(),
                }),
            }
        }
        Ok(Polygonized { polygons, skipped })
    }

    /// Prepare the layer as a protected-area exclusion layer.
    ///
    /// Lines are buffered by `line_distance`; points are skipped.
    pub fn into_exclusion(
        self,
        shape: BufferShape,
        line_distance: f64,
    ) -> Result<(ExclusionLayer, Vec<SkippedMember>), LayerError> {
        let prepared = self.polygonize(shape, Some(line_distance), None)?;
        Ok((ExclusionLayer::new(prepared.polygons), prepared.skipped))
    }

    /// Prepare the layer as planned development to merge into the result.
    pub fn into_planning(
        self,
        shape: BufferShape,
        distance: f64,
    ) -> Result<(MultiPolygon<f64>, Vec<SkippedMember>), LayerError> {
        let prepared = self.polygonize(shape, Some(distance), Some(distance))?;
        Ok((MultiPolygon::new(prepared.polygons), prepared.skipped))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberKind {
    Areal,
    Linear,
    Puntal,
    Mixed,
}

fn member_kind(geometry: &Geometry<f64>) -> MemberKind {
    match geometry {
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
            MemberKind::Areal
        }
        Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
            MemberKind::Linear
        }
        Geometry::Point(_) | Geometry::MultiPoint(_) => MemberKind::Puntal,
        Geometry::GeometryCollection(_) => MemberKind::Mixed,
    }
}

fn areal_members(geometry: &Geometry<f64>) -> Vec<Polygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => vec![polygon.clone()],
        Geometry::MultiPolygon(multi) => multi.0.clone(),
        Geometry::Rect(rect) => vec![rect.to_polygon()],
        Geometry::Triangle(triangle) => vec![triangle.to_polygon()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, GeometryCollection, Point, line_string, polygon};
    use rstest::{fixture, rstest};

    #[fixture]
    fn mixed_layer() -> GeometryLayer {
        GeometryLayer {
            name: "parks".to_owned(),
            crs: Some(Crs::WebMercator),
            geometries: vec![
                polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)]
                    .into(),
                line_string![(x: 20.0, y: 0.0), (x: 40.0, y: 0.0)].into(),
                Point::new(100.0, 100.0).into(),
                Geometry::GeometryCollection(GeometryCollection(vec![Point::new(1.0, 1.0).into()])),
            ],
        }
    }

    #[rstest]
    fn exclusion_buffers_lines_and_skips_points(mixed_layer: GeometryLayer) {
        let (exclusion, skipped) = mixed_layer
            .into_exclusion(BufferShape::default(), 5.0)
            .expect("prepared");
        assert_eq!(exclusion.len(), 2);
        let skipped_indices: Vec<_> = skipped.iter().map(|member| member.index).collect();
        assert_eq!(skipped_indices, vec![2, 3]);
    }

    #[rstest]
    fn planning_buffers_points_too(mixed_layer: GeometryLayer) {
        let (planning, skipped) = mixed_layer
            .into_planning(BufferShape::default(), 10.0)
            .expect("prepared");
        assert_eq!(planning.0.len(), 3);
        assert_eq!(skipped.len(), 1);
        assert!(planning.unsigned_area() > 100.0);
    }

    #[rstest]
    fn reconcile_without_crs_or_fallback_fails(mut mixed_layer: GeometryLayer) {
        mixed_layer.crs = None;
        let reconciler = CrsReconciler::new(Crs::WebMercator, None);
        assert!(matches!(
            mixed_layer.reconcile(&reconciler),
            Err(LayerError::MissingCrs { .. })
        ));
    }

    #[rstest]
    fn reconcile_applies_fallback(mut mixed_layer: GeometryLayer) {
        mixed_layer.crs = None;
        let reconciler = CrsReconciler::new(Crs::WebMercator, Some(Crs::WebMercator));
        let reconciled = mixed_layer.reconcile(&reconciler).expect("reconciled");
        assert_eq!(reconciled.crs, Some(Crs::WebMercator));
    }

    #[rstest]
    fn decodes_geojson_layers() {
        let json = br#"{"type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "EPSG:3857"}},
            "features": [
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}},
                {"type": "Feature", "properties": {}, "geometry": null}
            ]}"#;
        let layer = GeometryLayer::from_geojson(json, Path::new("parks.geojson")).expect("decoded");
        assert_eq!(layer.crs, Some(Crs::WebMercator));
        assert_eq!(layer.geometries.len(), 1);
    }
}
