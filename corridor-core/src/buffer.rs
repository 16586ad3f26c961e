//! Planar buffering of working features.
//!
//! Every buffer in a run shares one [`BufferShape`], so neighbouring
//! buffers meet without seams when they are unioned.

use std::{fmt, str::FromStr};

use geo::{
    Buffer, Geometry, MultiPolygon,
    algorithm::buffer::{BufferStyle, LineCap, LineJoin},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    ConfigError, FeatureId, WorkingFeature,
    geometry::{self, guard, repair},
};

const DEFAULT_MITRE_LIMIT: f64 = 5.0;

/// How line ends are finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapStyle {
    /// Semicircular ends.
    #[default]
    Round,
    /// Ends cut square at the line's end point.
    Flat,
    /// Ends extended by the buffer distance and cut square.
    Square,
}

/// How buffer outlines meet at line vertices.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum JoinStyle {
    /// Circular arcs around each vertex.
    #[default]
    Round,
    /// Sharp corners, bevelled beyond `limit` times the distance.
    Mitre {
        /// Ratio of mitre length to buffer distance.
        limit: f64,
    },
    /// Corners cut straight across.
    Bevel,
}

/// Cap and join style shared by every buffer in a run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferShape {
    /// End cap style.
    pub cap: CapStyle,
    /// Vertex join style.
    pub join: JoinStyle,
}

impl BufferShape {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match self.join {
            JoinStyle::Mitre { limit } if !(limit.is_finite() && limit > 0.0) => {
                Err(ConfigError::InvalidMitreLimit(limit))
            }
            _ => Ok(()),
        }
    }

    fn style(self, distance: f64) -> BufferStyle<f64> {
        let mut style = BufferStyle::new(distance);
        style = match self.cap {
            CapStyle::Round => style,
            CapStyle::Flat => style.line_cap(LineCap::Butt),
            CapStyle::Square => style.line_cap(LineCap::Square),
        };
        match self.join {
            JoinStyle::Round => style,
            JoinStyle::Mitre { limit } => style.line_join(LineJoin::Miter(limit)),
            JoinStyle::Bevel => style.line_join(LineJoin::Bevel),
        }
    }
}

/// Error returned when a style name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} style {value:?}")]
pub struct StyleParseError {
    kind: &'static str,
    value: String,
}

impl FromStr for CapStyle {
    type Err = StyleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round" => Ok(Self::Round),
            "flat" | "butt" => Ok(Self::Flat),
            "square" => Ok(Self::Square),
            other => Err(StyleParseError {
                kind: "cap",
                value: other.to_owned(),
            }),
        }
    }
}

impl FromStr for JoinStyle {
    type Err = StyleParseError;

    /// Accepts `round`, `bevel`, `mitre` and `mitre:<limit>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let (name, limit) = lowered
            .split_once(':')
            .map_or((lowered.as_str(), None), |(name, limit)| (name, Some(limit)));
        let error = || StyleParseError {
            kind: "join",
            value: lowered.clone(),
        };
        match (name, limit) {
            ("round", None) => Ok(Self::Round),
            ("bevel", None) => Ok(Self::Bevel),
            ("mitre" | "miter", None) => Ok(Self::Mitre {
                limit: DEFAULT_MITRE_LIMIT,
            }),
            ("mitre" | "miter", Some(raw)) => raw
                .trim()
                .parse()
                .map(|limit| Self::Mitre { limit })
                .map_err(|_| error()),
            _ => Err(error()),
        }
    }
}

impl fmt::Display for CapStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Round => "round",
            Self::Flat => "flat",
            Self::Square => "square",
        })
    }
}

impl fmt::Display for JoinStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Round => f.write_str("round"),
            Self::Mitre { limit } => write!(f, "mitre:{limit}"),
            Self::Bevel => f.write_str("bevel"),
        }
    }
}

/// The buffer derived from one working feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBuffer {
    /// Identity of the source feature.
    pub id: FeatureId,
    /// Buffer polygons. Empty for a zero-distance buffer.
    pub polygon: MultiPolygon<f64>,
}

/// Buffering failures for a single feature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The buffer was invalid and could not be repaired.
    #[error("buffer for {id} is invalid and could not be repaired")]
    Unrepairable {
        /// Feature identity.
        id: FeatureId,
    },
    /// The geometry engine failed while buffering.
    #[error("geometry engine failed while buffering {id}: {message}")]
    Engine {
        /// Feature identity.
        id: FeatureId,
        /// Engine message.
        message: String,
    },
}

/// Expands features into polygons at a fixed distance and shape.
///
/// # Examples
///
/// ```
/// use corridor_core::{BufferEngine, BufferShape};
/// use geo::{Area, Geometry, Point};
///
/// let engine = BufferEngine::new(2.0, BufferShape::default()).unwrap();
/// let disc = engine.buffer_geometry(&Geometry::Point(Point::new(0.0, 0.0))).unwrap();
/// let area = disc.unsigned_area();
/// assert!(area > 12.0 && area < 12.6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferEngine {
    distance: f64,
    shape: BufferShape,
}

impl BufferEngine {
    /// Create an engine; the distance must be finite and non-negative.
    pub fn new(distance: f64, shape: BufferShape) -> Result<Self, ConfigError> {
        if !(distance.is_finite() && distance >= 0.0) {
            return Err(ConfigError::InvalidDistance {
                field: "buffer_distance",
                value: distance,
            });
        }
        shape.validate()?;
        Ok(Self { distance, shape })
    }

    /// Configured distance.
    #[must_use]
    pub const fn distance(&self) -> f64 {
        self.distance
    }

    /// Configured shape.
    #[must_use]
    pub const fn shape(&self) -> BufferShape {
        self.shape
    }

    /// Buffer one working feature.
    pub fn buffer(&self, feature: &WorkingFeature) -> Result<FeatureBuffer, BufferError> {
        let polygon = self
            .buffer_geometry(feature.geometry())
            .map_err(|failure| failure.into_error(feature.id()))?;
        Ok(FeatureBuffer {
            id: feature.id().clone(),
            polygon,
        })
    }

    /// Buffer a bare geometry with the engine's distance and shape.
    ///
    /// A zero distance yields an empty polygon set: the degenerate buffer
    /// of a line has no area.
    pub fn buffer_geometry(&self, geometry: &Geometry<f64>) -> Result<MultiPolygon<f64>, BufferFailure> {
        if self.distance <= 0.0 {
            return Ok(geometry::empty());
        }
        let style = self.shape.style(self.distance);
        let raw = guard(|| geometry.buffer_with_style(style)).map_err(BufferFailure::Engine)?;
        repair(raw).ok_or(BufferFailure::Unrepairable)
    }
}

/// Buffering failure before it is attributed to a feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferFailure {
    /// Repair could not restore validity.
    Unrepairable,
    /// The engine panicked with this message.
    Engine(String),
}

impl BufferFailure {
    fn into_error(self, id: &FeatureId) -> BufferError {
        match self {
            Self::Unrepairable => BufferError::Unrepairable { id: id.clone() },
            Self::Engine(message) => BufferError::Engine {
                id: id.clone(),
                message,
            },
        }
    }
}

impl fmt::Display for BufferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrepairable => f.write_str("buffer is invalid and could not be repaired"),
            Self::Engine(message) => write!(f, "geometry engine failed: {message}"),
        }
    }
}
