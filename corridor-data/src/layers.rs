//! GeoJSON geometry layers.

use std::path::Path;

use corridor_core::{GeometryLayer, LayerError, LayerLoader};

use crate::reports::utf8;

/// Loads base, planning and exclusion layers from GeoJSON files.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoJsonLayerLoader;

impl LayerLoader for GeoJsonLayerLoader {
    fn load_layer(&self, path: &Path) -> Result<GeometryLayer, LayerError> {
        let read_error = |source| LayerError::Read {
            path: path.to_path_buf(),
            source,
        };
        let content = corridor_fs::read_file(utf8(path).map_err(read_error)?).map_err(read_error)?;
        let layer = GeometryLayer::from_geojson(&content, path)?;
        log::info!(
            "loaded layer {} with {} geometries",
            layer.name,
            layer.geometries.len()
        );
        Ok(layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corridor_core::Crs;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    fn loads_layer_with_declared_crs() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("parks.geojson");
        std::fs::write(
            &path,
            r#"{"type": "FeatureCollection",
                "crs": {"type": "name", "properties": {"name": "EPSG:3857"}},
                "features": [
                  {"type": "Feature", "properties": {},
                   "geometry": {"type": "Polygon",
                                "coordinates": [[[0, 0], [10, 0], [10, 10], [0, 0]]]}}
                ]}"#,
        )
        .expect("write layer");
        let layer = GeoJsonLayerLoader.load_layer(&path).expect("load");
        assert_eq!(layer.crs, Some(Crs::WebMercator));
        assert_eq!(layer.geometries.len(), 1);
    }

    #[rstest]
    fn missing_layer_is_a_read_error() {
        let dir = TempDir::new().expect("create temp dir");
        let err = GeoJsonLayerLoader
            .load_layer(&dir.path().join("absent.geojson"))
            .expect_err("missing layer");
        assert!(matches!(err, LayerError::Read { .. }));
    }

    #[rstest]
    fn malformed_layer_is_a_decode_error() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("broken.geojson");
        std::fs::write(&path, "{ not json").expect("write layer");
        let err = GeoJsonLayerLoader.load_layer(&path).expect_err("broken layer");
        assert!(matches!(err, LayerError::Decode { .. }));
    }
}
