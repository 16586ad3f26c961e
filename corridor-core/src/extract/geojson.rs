//! GeoJSON reports and layers.
//!
//! Documents are decoded with `simd-json` into a small typed model. The
//! legacy `crs` member is honoured because the inspection tooling that
//! produces these files still writes it; documents without one are
//! treated as having no declared system.

use std::{collections::BTreeMap, path::Path};

use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use serde::Deserialize;
use serde_json::Value;

use super::{ExtractError, RecordOutcome, RecordRejection, fields::build_record};
use crate::{AttributeValue, Crs};

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    features: Option<Vec<RawFeature>>,
    #[serde(default)]
    crs: Option<RawCrs>,
    #[serde(default)]
    geometry: Option<Value>,
    #[serde(default)]
    properties: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    id: Option<Value>,
}

/// A feature whose geometry is decoded on its own, so one bad geometry
/// rejects only its record.
#[derive(Debug, Deserialize)]
pub(crate) struct RawFeature {
    #[serde(default)]
    geometry: Option<Value>,
    #[serde(default)]
    properties: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawCrs {
    #[serde(default)]
    properties: Option<RawCrsProperties>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawCrsProperties {
    #[serde(default)]
    name: Option<String>,
}

type Position = Vec<f64>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum RawGeometry {
    Point { coordinates: Position },
    LineString { coordinates: Vec<Position> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPoint { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<RawGeometry> },
}

/// A decoded document: its declared system and its features.
pub(crate) struct Document {
    pub(crate) crs: Option<Crs>,
    pub(crate) features: Vec<RawFeature>,
}

pub(crate) fn decode(content: &[u8], path: &Path) -> Result<Document, ExtractError> {
    let mut buffer = content.to_vec();
    let raw: RawDocument =
        simd_json::serde::from_slice(&mut buffer).map_err(|source| ExtractError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    let features = match raw.kind.as_str() {
        "FeatureCollection" => raw.features.unwrap_or_default(),
        "Feature" => vec![RawFeature {
            geometry: raw.geometry,
            properties: raw.properties,
            id: raw.id,
        }],
        other => {
            return Err(ExtractError::UnsupportedDocument {
                path: path.to_path_buf(),
                kind: other.to_owned(),
            });
        }
    };
    let crs = raw
        .crs
        .and_then(|member| member.properties)
        .and_then(|properties| properties.name)
        .map(|name| name.parse::<Crs>())
        .transpose()
        .map_err(|source| ExtractError::Crs {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Document { crs, features })
}

pub(super) fn report_records<'a>(
    content: &[u8],
    report: &'a Path,
) -> Result<impl Iterator<Item = RecordOutcome> + use<'a>, ExtractError> {
    let document = decode(content, report)?;
    let crs = document.crs;
    Ok(document
        .features
        .into_iter()
        .enumerate()
        .map(move |(index, feature)| feature_record(report, index + 1, feature, crs)))
}

fn feature_record(report: &Path, record: usize, feature: RawFeature, crs: Option<Crs>) -> RecordOutcome {
    let mut fields: Vec<(String, AttributeValue)> = feature
        .properties
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, attribute_from_json(value)))
        .collect();
    let has_identity = fields
        .iter()
        .any(|(key, _)| key.eq_ignore_ascii_case("name") || key.eq_ignore_ascii_case("id"));
    if !has_identity && let Some(id) = feature.id {
        fields.push(("ID".to_owned(), attribute_from_json(id)));
    }
    let geometry = feature
        .geometry
        .map(|raw| {
            parse_geometry(raw).map_err(|reason| RecordRejection::InvalidGeometry { record, reason })
        })
        .transpose()?;
    build_record(report, record, fields, geometry.map(|g| (g, crs)))
}

fn attribute_from_json(value: Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null,
        Value::Bool(flag) => AttributeValue::Bool(flag),
        Value::Number(number) => number
            .as_f64()
            .map_or(AttributeValue::Null, AttributeValue::Number),
        Value::String(text) => AttributeValue::Text(text),
        other @ (Value::Array(_) | Value::Object(_)) => AttributeValue::Text(other.to_string()),
    }
}

impl RawFeature {
    /// Take the geometry out of a layer feature, if it has one.
    pub(crate) fn into_layer_geometry(self) -> Result<Option<Geometry<f64>>, String> {
        self.geometry.map(parse_geometry).transpose()
    }
}

fn parse_geometry(value: Value) -> Result<Geometry<f64>, String> {
    let raw: RawGeometry =
        serde_json::from_value(value).map_err(|err| format!("unreadable geometry: {err}"))?;
    into_geometry(raw)
}

fn position(raw: &[f64]) -> Result<Coord<f64>, String> {
    match raw {
        [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Coord { x: *x, y: *y }),
        [_, _, ..] => Err("position is not finite".to_owned()),
        _ => Err(format!("position needs two ordinates, found {}", raw.len())),
    }
}

fn line(raw: &[Position]) -> Result<LineString<f64>, String> {
    raw.iter()
        .map(|p| position(p))
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::new)
}

fn polygon(rings: &[Vec<Position>]) -> Result<Polygon<f64>, String> {
    let mut iter = rings.iter();
    let exterior = iter
        .next()
        .ok_or_else(|| "polygon has no rings".to_owned())
        .and_then(|ring| line(ring))?;
    let interiors = iter.map(|ring| line(ring)).collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn into_geometry(raw: RawGeometry) -> Result<Geometry<f64>, String> {
    Ok(match raw {
        RawGeometry::Point { coordinates } => Point::from(position(&coordinates)?).into(),
        RawGeometry::LineString { coordinates } => line(&coordinates)?.into(),
        RawGeometry::Polygon { coordinates } => polygon(&coordinates)?.into(),
        RawGeometry::MultiPoint { coordinates } => MultiPoint::new(
            coordinates
                .iter()
                .map(|p| position(p).map(Point::from))
                .collect::<Result<_, _>>()?,
        )
        .into(),
        RawGeometry::MultiLineString { coordinates } => MultiLineString::new(
            coordinates
                .iter()
                .map(|l| line(l))
                .collect::<Result<_, _>>()?,
        )
        .into(),
        RawGeometry::MultiPolygon { coordinates } => MultiPolygon::new(
            coordinates
                .iter()
                .map(|p| polygon(p))
                .collect::<Result<_, _>>()?,
        )
        .into(),
        RawGeometry::GeometryCollection { geometries } => {
            Geometry::GeometryCollection(GeometryCollection(
                geometries
                    .into_iter()
                    .map(into_geometry)
                    .collect::<Result<_, _>>()?,
            ))
        }
    })
}
