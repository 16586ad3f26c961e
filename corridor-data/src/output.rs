//! Encoding and writing the consolidated result.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use corridor_core::{
    ConsolidatedResult, LayerWriter, OutputError, OutputFormat, OutputTarget, OverwritePolicy,
    wkt::multipolygon_to_ewkt,
};
use geo::{LineString, MultiPolygon, Polygon};
use serde_json::{Value, json};

use crate::reports::utf8;

/// Interactive confirmation used by the `prompt` overwrite policy.
pub trait Confirm {
    /// Ask whether `path` may be replaced.
    fn confirm_overwrite(&self, path: &Path) -> io::Result<bool>;
}

/// Writes results to files in the requested format.
///
/// Parent directories are created as needed. An empty result is written
/// as an empty feature collection or `MULTIPOLYGON EMPTY`.
#[derive(Default, Clone, Copy)]
pub struct FileLayerWriter<'c> {
    confirm: Option<&'c dyn Confirm>,
}

impl std::fmt::Debug for FileLayerWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLayerWriter")
            .field("interactive", &self.confirm.is_some())
            .finish()
    }
}

impl<'c> FileLayerWriter<'c> {
    /// A writer with no interactive confirmation.
    #[must_use]
    pub const fn new() -> Self {
        Self { confirm: None }
    }

    /// A writer that asks `confirm` before replacing files under `prompt`.
    #[must_use]
    pub const fn with_confirmation(confirm: &'c dyn Confirm) -> Self {
        Self {
            confirm: Some(confirm),
        }
    }

    fn may_replace(&self, target: &OutputTarget) -> Result<bool, OutputError> {
        let path = utf8(&target.path).map_err(|source| io_error(&target.path, source))?;
        let exists = corridor_fs::file_is_file(path).map_err(|source| io_error(&target.path, source))?;
        if !exists {
            return Ok(false);
        }
        match target.overwrite {
            OverwritePolicy::Overwrite => Ok(true),
            OverwritePolicy::RejectIfExists => Err(OutputError::AlreadyExists {
                path: target.path.clone(),
            }),
            OverwritePolicy::Prompt => {
                let Some(confirm) = self.confirm else {
                    return Err(OutputError::ConfirmationUnavailable {
                        path: target.path.clone(),
                    });
                };
                if confirm
                    .confirm_overwrite(&target.path)
                    .map_err(|source| io_error(&target.path, source))?
                {
                    Ok(true)
                } else {
                    Err(OutputError::Declined {
                        path: target.path.clone(),
                    })
                }
            }
        }
    }
}

impl LayerWriter for FileLayerWriter<'_> {
    fn write_result(
        &self,
        result: &ConsolidatedResult,
        target: &OutputTarget,
    ) -> Result<PathBuf, OutputError> {
        let replace = self.may_replace(target)?;
        let encoded = match target.format {
            OutputFormat::GeoJson => serde_json::to_string_pretty(&encode_geojson(result))
                .map_err(|err| OutputError::Encode {
                    path: target.path.clone(),
                    message: err.to_string(),
                })?,
            OutputFormat::Ewkt => multipolygon_to_ewkt(result.geometry(), result.crs().epsg()),
        };
        let path = utf8(&target.path).map_err(|source| io_error(&target.path, source))?;
        let mut file = corridor_fs::create_file(path, replace).map_err(|source| {
            if source.kind() == io::ErrorKind::AlreadyExists {
                OutputError::AlreadyExists {
                    path: target.path.clone(),
                }
            } else {
                io_error(&target.path, source)
            }
        })?;
        file.write_all(encoded.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .map_err(|source| io_error(&target.path, source))?;
        log::debug!(
            "wrote {} bytes of {} to {path}",
            encoded.len(),
            target.format
        );
        Ok(target.path.clone())
    }
}

fn io_error(path: &Path, source: io::Error) -> OutputError {
    OutputError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Encode a result as a GeoJSON feature collection.
///
/// The collection carries a named `crs` member; the single feature holds
/// the polygons and the result attributes. An empty result has no features.
///
/// # Examples
///
/// ```
/// use corridor_core::{Crs, ResultValidator, geometry::empty};
/// use corridor_data::encode_geojson;
///
/// let result = ResultValidator::new(Crs::WebMercator, 1e-9).validate(empty(), 0);
/// let json = encode_geojson(&result);
/// assert_eq!(json["crs"]["properties"]["name"], "urn:ogc:def:crs:EPSG::3857");
/// assert_eq!(json["features"].as_array().map(Vec::len), Some(0));
/// ```
#[must_use]
pub fn encode_geojson(result: &ConsolidatedResult) -> Value {
    let features = if result.is_empty() {
        Vec::new()
    } else {
        vec![json!({
            "type": "Feature",
            "properties": {
                "crs": result.crs().to_string(),
                "contributing_features": result.contributing_features(),
                "valid": result.is_valid(),
                "area": result.area(),
            },
            "geometry": {
                "type": "MultiPolygon",
                "coordinates": multipolygon_coordinates(result.geometry()),
            },
        })]
    };
    json!({
        "type": "FeatureCollection",
        "name": "corridor",
        "crs": {
            "type": "name",
            "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", result.crs().epsg()) },
        },
        "features": features,
    })
}

fn multipolygon_coordinates(geometry: &MultiPolygon<f64>) -> Value {
    Value::Array(geometry.0.iter().map(polygon_coordinates).collect())
}

fn polygon_coordinates(polygon: &Polygon<f64>) -> Value {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(ring_coordinates)
        .collect()
}

fn ring_coordinates(ring: &LineString<f64>) -> Value {
    ring.coords().map(|c| json!([c.x, c.y])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use corridor_core::{Crs, ResultValidator, geometry::empty};
    use geo::polygon;
    use rstest::{fixture, rstest};
    use std::cell::Cell;
    use tempfile::TempDir;

    struct Answer {
        reply: bool,
        asked: Cell<usize>,
    }

    impl Confirm for Answer {
        fn confirm_overwrite(&self, _path: &Path) -> io::Result<bool> {
            self.asked.set(self.asked.get() + 1);
            Ok(self.reply)
        }
    }

    #[fixture]
    fn square() -> ConsolidatedResult {
        let square = polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0)];
        ResultValidator::new(Crs::WebMercator, 1e-9).validate(MultiPolygon::new(vec![square]), 2)
    }

    fn target(dir: &TempDir, name: &str, format: OutputFormat, overwrite: OverwritePolicy) -> OutputTarget {
        OutputTarget {
            path: dir.path().join(name),
            format,
            overwrite,
        }
    }

    #[rstest]
    fn writes_geojson_with_crs_and_attributes(square: ConsolidatedResult) {
        let dir = TempDir::new().expect("temp dir");
        let target = target(&dir, "out/result.geojson", OutputFormat::GeoJson, OverwritePolicy::RejectIfExists);
        let written = FileLayerWriter::new().write_result(&square, &target).expect("write");
        let text = std::fs::read_to_string(written).expect("read back");
        let json: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(json["crs"]["properties"]["name"], "urn:ogc:def:crs:EPSG::3857");
        let properties = &json["features"][0]["properties"];
        assert_eq!(properties["contributing_features"], 2);
        assert_eq!(properties["valid"], true);
        assert_eq!(properties["area"], 16.0);
        assert_eq!(json["features"][0]["geometry"]["type"], "MultiPolygon");
    }

    #[rstest]
    fn writes_empty_result_as_ewkt() {
        let dir = TempDir::new().expect("temp dir");
        let result = ResultValidator::new(Crs::Wgs84, 1e-9).validate(empty(), 0);
        let target = target(&dir, "empty.wkt", OutputFormat::Ewkt, OverwritePolicy::RejectIfExists);
        FileLayerWriter::new().write_result(&result, &target).expect("write");
        let text = std::fs::read_to_string(&target.path).expect("read back");
        assert_eq!(text.trim(), "SRID=4326;MULTIPOLYGON EMPTY");
    }

    #[rstest]
    #[case(OverwritePolicy::RejectIfExists, None, false)]
    #[case(OverwritePolicy::Overwrite, None, true)]
    #[case(OverwritePolicy::Prompt, None, false)]
    #[case(OverwritePolicy::Prompt, Some(true), true)]
    #[case(OverwritePolicy::Prompt, Some(false), false)]
    fn honours_overwrite_policy(
        square: ConsolidatedResult,
        #[case] policy: OverwritePolicy,
        #[case] reply: Option<bool>,
        #[case] replaced: bool,
    ) {
        let dir = TempDir::new().expect("temp dir");
        let target = target(&dir, "result.wkt", OutputFormat::Ewkt, policy);
        std::fs::write(&target.path, "old").expect("seed file");
        let answer = reply.map(|reply| Answer {
            reply,
            asked: Cell::new(0),
        });
        let writer = answer
            .as_ref()
            .map_or_else(FileLayerWriter::new, |a| FileLayerWriter::with_confirmation(a));
        let outcome = writer.write_result(&square, &target);
        assert_eq!(outcome.is_ok(), replaced);
        let text = std::fs::read_to_string(&target.path).expect("read back");
        assert_eq!(text.starts_with("SRID=3857;"), replaced);
        if let Some(answer) = answer {
            assert_eq!(answer.asked.get(), 1);
        }
    }
}
