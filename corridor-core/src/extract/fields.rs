//! Field normalisation shared by every report dialect.

use std::{fmt, path::Path};

use chrono::NaiveDate;
use geo::{CoordsIter, Geometry, LineString, Point};

use super::{ExtractedRecord, RecordOutcome, RecordRejection, RecordWarning};
use crate::{AttributeValue, Attributes, Crs, FeatureId, PipelineFeature, Provenance};

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];

/// A change made to a geometry so the pipeline can buffer it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryCoercion {
    /// A single-member multi-geometry was unwrapped.
    UnwrappedSingleMember {
        /// Original geometry type.
        from: &'static str,
    },
    /// A line whose vertices all coincide became a point.
    CollapsedLine,
    /// A `Line` segment was promoted to a line string.
    PromotedSegment,
}

impl fmt::Display for GeometryCoercion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnwrappedSingleMember { from } => {
                write!(f, "single-member {from} unwrapped")
            }
            Self::CollapsedLine => f.write_str("zero-length line collapsed to a point"),
            Self::PromotedSegment => f.write_str("line segment promoted to a line string"),
        }
    }
}

/// Geometry found in a record together with the system it is expressed in.
pub(super) type LocatedGeometry = (Geometry<f64>, Option<Crs>);

/// Parse the date formats reports are known to use.
pub(super) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .or_else(|| {
            // Timestamps such as `2024-03-01T10:00:00Z` keep only the day.
            trimmed
                .get(..10)
                .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
        })
}

/// Short name of a geometry variant.
pub(crate) const fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Reasons a geometry cannot enter the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryProblem {
    /// Coordinates are missing, empty or non-finite.
    Invalid(String),
    /// The geometry type is areal or otherwise unsupported.
    Unsupported(&'static str),
}

/// Bring a geometry into one of the supported linear or point shapes.
///
/// Single-member multi-geometries are unwrapped and zero-length lines
/// collapse to points; each change is reported so it can be flagged.
/// Areal geometries are refused.
///
/// # Examples
///
/// ```
/// use corridor_core::extract::coerce_geometry;
/// use geo::{Geometry, MultiPoint, Point};
///
/// let single: Geometry<f64> = MultiPoint::new(vec![Point::new(1.0, 2.0)]).into();
/// let (geometry, notes) = coerce_geometry(single).unwrap();
/// assert_eq!(geometry, Geometry::Point(Point::new(1.0, 2.0)));
/// assert_eq!(notes.len(), 1);
/// ```
pub fn coerce_geometry(
    geometry: Geometry<f64>,
) -> Result<(Geometry<f64>, Vec<GeometryCoercion>), GeometryProblem> {
    if geometry
        .coords_iter()
        .any(|coord| !(coord.x.is_finite() && coord.y.is_finite()))
    {
        return Err(GeometryProblem::Invalid("non-finite coordinate".to_owned()));
    }
    let mut notes = Vec::new();
    let coerced = coerce_inner(geometry, &mut notes)?;
    Ok((coerced, notes))
}

fn coerce_inner(
    geometry: Geometry<f64>,
    notes: &mut Vec<GeometryCoercion>,
) -> Result<Geometry<f64>, GeometryProblem> {
    match geometry {
        Geometry::Point(point) => Ok(point.into()),
        Geometry::Line(line) => {
            notes.push(GeometryCoercion::PromotedSegment);
            coerce_line(LineString::from(vec![line.start, line.end]), notes)
        }
        Geometry::LineString(line) => coerce_line(line, notes),
        Geometry::MultiPoint(mut points) => match points.0.len() {
            0 => Err(GeometryProblem::Invalid("empty MultiPoint".to_owned())),
            1 => {
                notes.push(GeometryCoercion::UnwrappedSingleMember { from: "MultiPoint" });
                points
                    .0
                    .pop()
                    .map(Geometry::Point)
                    .ok_or_else(|| GeometryProblem::Invalid("empty MultiPoint".to_owned()))
            }
            _ => Ok(points.into()),
        },
        Geometry::MultiLineString(mut lines) => match lines.0.len() {
            0 => Err(GeometryProblem::Invalid("empty MultiLineString".to_owned())),
            1 => {
                notes.push(GeometryCoercion::UnwrappedSingleMember {
                    from: "MultiLineString",
                });
                let line = lines
                    .0
                    .pop()
                    .ok_or_else(|| GeometryProblem::Invalid("empty MultiLineString".to_owned()))?;
                coerce_line(line, notes)
            }
            _ => {
                if lines.0.iter().any(|line| line.0.is_empty()) {
                    return Err(GeometryProblem::Invalid(
                        "MultiLineString contains an empty member".to_owned(),
                    ));
                }
                Ok(lines.into())
            }
        },
        Geometry::GeometryCollection(mut collection) if collection.0.len() == 1 => {
            notes.push(GeometryCoercion::UnwrappedSingleMember {
                from: "GeometryCollection",
            });
            let member = collection.0.pop().ok_or_else(|| {
                GeometryProblem::Invalid("empty GeometryCollection".to_owned())
            })?;
            coerce_inner(member, notes)
        }
        other => Err(GeometryProblem::Unsupported(geometry_kind(&other))),
    }
}

fn coerce_line(
    line: LineString<f64>,
    notes: &mut Vec<GeometryCoercion>,
) -> Result<Geometry<f64>, GeometryProblem> {
    let Some(first) = line.0.first().copied() else {
        return Err(GeometryProblem::Invalid("empty LineString".to_owned()));
    };
    if line.0.iter().all(|coord| *coord == first) {
        notes.push(GeometryCoercion::CollapsedLine);
        return Ok(Point::from(first).into());
    }
    Ok(line.into())
}

/// Normalise raw fields and a located geometry into an extracted record.
///
/// Recognised fields are renamed to lower-case canonical keys: `name`,
/// `id`, `date`, `psi` and `material`. Everything else passes through.
pub(super) fn build_record(
    report: &Path,
    record: usize,
    fields: Vec<(String, AttributeValue)>,
    geometry: Option<LocatedGeometry>,
) -> RecordOutcome {
    let mut warnings = Vec::new();
    let mut attributes = Attributes::new();
    let mut name: Option<String> = None;
    let mut fallback_id: Option<String> = None;
    let mut date: Option<NaiveDate> = None;

    for (key, value) in fields {
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => {
                name = non_empty_text(&value);
                attributes.insert("name".to_owned(), value);
            }
            "id" => {
                fallback_id = non_empty_text(&value);
                attributes.insert("id".to_owned(), value);
            }
            "date" => {
                let normalised = normalise_date(record, value, &mut warnings);
                if let AttributeValue::Date(day) = normalised {
                    date = Some(day);
                }
                attributes.insert("date".to_owned(), normalised);
            }
            "psi" => {
                let normalised = normalise_number(record, "psi", value, &mut warnings);
                attributes.insert("psi".to_owned(), normalised);
            }
            "material" => {
                let normalised = match value {
                    AttributeValue::Text(text) => AttributeValue::Text(text.trim().to_lowercase()),
                    other => other,
                };
                attributes.insert("material".to_owned(), normalised);
            }
            _ => {
                attributes.insert(key, value);
            }
        }
    }

    let Some(identity) = name.or(fallback_id) else {
        return Err(RecordRejection::MissingIdentity { record });
    };
    let id = FeatureId::from_parts(&identity, date)
        .map_err(|_| RecordRejection::MissingIdentity { record })?;

    let Some((raw_geometry, crs)) = geometry else {
        return Err(RecordRejection::MissingGeometry { record });
    };
    let (geometry, coercions) = coerce_geometry(raw_geometry).map_err(|problem| match problem {
        GeometryProblem::Invalid(reason) => RecordRejection::InvalidGeometry { record, reason },
        GeometryProblem::Unsupported(kind) => RecordRejection::UnsupportedGeometry { record, kind },
    })?;
    warnings.extend(
        coercions
            .into_iter()
            .map(|coercion| RecordWarning::GeometryCoerced { record, coercion }),
    );

    let provenance = Provenance {
        report: report.to_path_buf(),
        record,
    };
    Ok(ExtractedRecord {
        feature: PipelineFeature::new(id, geometry, crs, attributes, provenance),
        warnings,
    })
}

fn non_empty_text(value: &AttributeValue) -> Option<String> {
    let text = match value {
        AttributeValue::Text(text) => text.trim().to_owned(),
        AttributeValue::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn normalise_date(
    record: usize,
    value: AttributeValue,
    warnings: &mut Vec<RecordWarning>,
) -> AttributeValue {
    match value {
        AttributeValue::Text(text) if text.trim().is_empty() => AttributeValue::Null,
        AttributeValue::Text(text) => parse_date(&text).map_or_else(
            || {
                warnings.push(RecordWarning::UnparsableDate {
                    record,
                    value: text,
                });
                AttributeValue::Null
            },
            AttributeValue::Date,
        ),
        other => other,
    }
}

fn normalise_number(
    record: usize,
    field: &str,
    value: AttributeValue,
    warnings: &mut Vec<RecordWarning>,
) -> AttributeValue {
    match value {
        AttributeValue::Text(text) if text.trim().is_empty() => AttributeValue::Null,
        AttributeValue::Text(text) => match text.trim().parse::<f64>() {
            Ok(number) if number.is_finite() => AttributeValue::Number(number),
            _ => {
                warnings.push(RecordWarning::UnparsableNumber {
                    record,
                    field: field.to_owned(),
                    value: text,
                });
                AttributeValue::Null
            }
        },
        other => other,
    }
}
