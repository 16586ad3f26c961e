//! Coordinate reference systems understood by the pipeline.
//!
//! Only the systems the consolidation pipeline actually meets are
//! supported: geographic WGS84, spherical Web Mercator and the UTM zones
//! on the WGS84 ellipsoid. Every conversion pivots through WGS84 so any
//! supported pair can be converted in both directions.

use std::{fmt, str::FromStr};

use geo::{Coord, Geometry, MapCoords};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

mod transverse_mercator;

const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;
const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;
const UTM_NORTH_BASE: u32 = 32_600;
const UTM_SOUTH_BASE: u32 = 32_700;

/// A supported coordinate reference system.
///
/// # Examples
///
/// ```
/// use corridor_core::Crs;
///
/// # fn main() -> Result<(), corridor_core::CrsError> {
/// let crs: Crs = "EPSG:32633".parse()?;
/// assert_eq!(crs, Crs::Utm { zone: 33, north: true });
/// assert!(crs.is_projected());
/// assert_eq!(crs.to_string(), "EPSG:32633");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Crs {
    /// Geographic longitude/latitude on WGS84 (EPSG:4326).
    Wgs84,
    /// Spherical Web Mercator (EPSG:3857).
    WebMercator,
    /// Universal Transverse Mercator on WGS84 (EPSG:326zz / EPSG:327zz).
    Utm {
        /// Zone number in `1..=60`.
        zone: u8,
        /// Whether the zone uses the northern hemisphere false northing.
        north: bool,
    },
}

/// Unit of measure along the axes of a [`Crs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearUnit {
    /// Axes measured in metres.
    Metre,
    /// Axes measured in decimal degrees.
    Degree,
}

/// Errors raised while identifying or converting between reference systems.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CrsError {
    /// The identifier could not be understood.
    #[error("unrecognised coordinate reference system {0:?}")]
    Unrecognised(String),
    /// The EPSG code is well formed but not supported.
    #[error("EPSG:{0} is not a supported coordinate reference system")]
    UnsupportedEpsg(u32),
    /// A coordinate lies outside the valid domain of the system.
    #[error("coordinate ({x}, {y}) lies outside the domain of {crs}")]
    OutOfDomain {
        /// System whose domain was violated.
        crs: Crs,
        /// Offending x (or longitude) value.
        x: f64,
        /// Offending y (or latitude) value.
        y: f64,
    },
    /// A coordinate contained NaN or an infinity.
    #[error("coordinate ({x}, {y}) is not finite")]
    NonFinite {
        /// Offending x value.
        x: f64,
        /// Offending y value.
        y: f64,
    },
}

impl Crs {
    /// Resolve a numeric EPSG code.
    pub fn from_epsg(code: u32) -> Result<Self, CrsError> {
        match code {
            4326 => Ok(Self::Wgs84),
            3857 | 900_913 => Ok(Self::WebMercator),
            c if (UTM_NORTH_BASE + 1..=UTM_NORTH_BASE + 60).contains(&c) => Ok(Self::Utm {
                zone: utm_zone_from_offset(c - UTM_NORTH_BASE)?,
                north: true,
            }),
            c if (UTM_SOUTH_BASE + 1..=UTM_SOUTH_BASE + 60).contains(&c) => Ok(Self::Utm {
                zone: utm_zone_from_offset(c - UTM_SOUTH_BASE)?,
                north: false,
            }),
            other => Err(CrsError::UnsupportedEpsg(other)),
        }
    }

    /// The EPSG code identifying this system.
    #[must_use]
    pub fn epsg(self) -> u32 {
        match self {
            Self::Wgs84 => 4326,
            Self::WebMercator => 3857,
            Self::Utm { zone, north: true } => UTM_NORTH_BASE + u32::from(zone),
            Self::Utm { zone, north: false } => UTM_SOUTH_BASE + u32::from(zone),
        }
    }

    /// Whether the system uses a planar, metric coordinate space.
    #[must_use]
    pub const fn is_projected(self) -> bool {
        !matches!(self, Self::Wgs84)
    }

    /// Unit of measure along both axes.
    #[must_use]
    pub const fn linear_unit(self) -> LinearUnit {
        if self.is_projected() {
            LinearUnit::Metre
        } else {
            LinearUnit::Degree
        }
    }

    /// Choose the UTM zone containing a WGS84 longitude/latitude.
    ///
    /// Longitudes on a zone boundary fall into the eastern zone; the
    /// antimeridian belongs to zone 60.
    pub fn utm_for(lon: f64, lat: f64) -> Result<Self, CrsError> {
        check_geographic(lon, lat)?;
        let zone = transverse_mercator::zone_for_longitude(lon);
        Ok(Self::Utm {
            zone,
            north: lat >= 0.0,
        })
    }

    /// Convert a coordinate in this system to WGS84 longitude/latitude.
    pub fn to_wgs84(self, coord: Coord<f64>) -> Result<Coord<f64>, CrsError> {
        check_finite(coord)?;
        match self {
            Self::Wgs84 => {
                check_geographic(coord.x, coord.y)?;
                Ok(coord)
            }
            Self::WebMercator => {
                let lon = (coord.x / WEB_MERCATOR_RADIUS).to_degrees();
                let lat = (coord.y / WEB_MERCATOR_RADIUS)
                    .sinh()
                    .atan()
                    .to_degrees();
                if lon.abs() > 180.0 + 1e-9 {
                    return Err(self.out_of_domain(coord));
                }
                Ok(Coord { x: lon, y: lat })
            }
            Self::Utm { zone, north } => {
                let result = transverse_mercator::inverse(coord.x, coord.y, zone, north);
                if result.x.is_finite() && result.y.is_finite() && result.y.abs() <= 90.0 {
                    Ok(Coord {
                        x: wrap_longitude(result.x),
                        y: result.y,
                    })
                } else {
                    Err(self.out_of_domain(coord))
                }
            }
        }
    }

    /// Convert a WGS84 longitude/latitude into this system.
    pub fn from_wgs84(self, coord: Coord<f64>) -> Result<Coord<f64>, CrsError> {
        check_finite(coord)?;
        check_geographic(coord.x, coord.y)?;
        match self {
            Self::Wgs84 => Ok(coord),
            Self::WebMercator => {
                if coord.y.abs() > MAX_MERCATOR_LATITUDE {
                    return Err(self.out_of_domain(coord));
                }
                let x = WEB_MERCATOR_RADIUS * coord.x.to_radians();
                let y = WEB_MERCATOR_RADIUS * coord.y.to_radians().tan().asinh();
                Ok(Coord { x, y })
            }
            Self::Utm { zone, north } => {
                let offset = wrap_longitude(coord.x - transverse_mercator::central_meridian(zone));
                // The series diverges at and beyond the equator of the projection.
                if offset.abs() >= 90.0 {
                    return Err(self.out_of_domain(coord));
                }
                Ok(transverse_mercator::forward(coord.x, coord.y, zone, north))
            }
        }
    }

    const fn out_of_domain(self, coord: Coord<f64>) -> CrsError {
        CrsError::OutOfDomain {
            crs: self,
            x: coord.x,
            y: coord.y,
        }
    }
}

fn utm_zone_from_offset(offset: u32) -> Result<u8, CrsError> {
    u8::try_from(offset).map_err(|_| CrsError::UnsupportedEpsg(offset))
}

fn check_finite(coord: Coord<f64>) -> Result<(), CrsError> {
    if coord.x.is_finite() && coord.y.is_finite() {
        Ok(())
    } else {
        Err(CrsError::NonFinite {
            x: coord.x,
            y: coord.y,
        })
    }
}

fn check_geographic(lon: f64, lat: f64) -> Result<(), CrsError> {
    if (-180.0..=180.0).contains(&lon) && (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        Err(CrsError::OutOfDomain {
            crs: Crs::Wgs84,
            x: lon,
            y: lat,
        })
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = CrsError;

    /// Accepts `EPSG:<code>`, OGC URNs such as
    /// `urn:ogc:def:crs:EPSG::<code>`, the `CRS84` aliases and a bare code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        if matches!(
            upper.as_str(),
            "CRS84" | "OGC:CRS84" | "URN:OGC:DEF:CRS:OGC:1.3:CRS84" | "WGS84" | "WGS 84"
        ) {
            return Ok(Self::Wgs84);
        }
        let code = upper
            .strip_prefix("EPSG:")
            .or_else(|| {
                upper
                    .strip_prefix("URN:OGC:DEF:CRS:EPSG:")
                    .and_then(|rest| rest.rsplit(':').next())
            })
            .unwrap_or(upper.as_str());
        let code: u32 = code
            .trim()
            .parse()
            .map_err(|_| CrsError::Unrecognised(trimmed.to_owned()))?;
        Self::from_epsg(code)
    }
}

impl Serialize for Crs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Crs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Convert a single coordinate between two systems.
pub fn transform_coord(coord: Coord<f64>, from: Crs, to: Crs) -> Result<Coord<f64>, CrsError> {
    if from == to {
        check_finite(coord)?;
        return Ok(coord);
    }
    let geographic = from.to_wgs84(coord)?;
    to.from_wgs84(geographic)
}

/// Reproject every coordinate of `geometry` from `from` into `to`.
///
/// Returns a clone when both systems are equal, after checking that all
/// coordinates are finite.
pub fn reproject(geometry: &Geometry<f64>, from: Crs, to: Crs) -> Result<Geometry<f64>, CrsError> {
    geometry.try_map_coords(move |coord| transform_coord(coord, from, to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Point, coord};
    use rstest::rstest;

    fn assert_close(actual: Coord<f64>, expected: Coord<f64>, tolerance: f64) {
        assert!(
            (actual.x - expected.x).abs() <= tolerance && (actual.y - expected.y).abs() <= tolerance,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[rstest]
    #[case("EPSG:4326", Crs::Wgs84)]
    #[case("epsg:3857", Crs::WebMercator)]
    #[case("urn:ogc:def:crs:EPSG::32633", Crs::Utm { zone: 33, north: true })]
    #[case("urn:ogc:def:crs:OGC:1.3:CRS84", Crs::Wgs84)]
    #[case("32755", Crs::Utm { zone: 55, north: false })]
    fn parses_identifiers(#[case] raw: &str, #[case] expected: Crs) {
        assert_eq!(raw.parse::<Crs>(), Ok(expected));
    }

    #[rstest]
    #[case("EPSG:2154")]
    #[case("EPSG:32661")]
    #[case("not a crs")]
    fn rejects_unknown_identifiers(#[case] raw: &str) {
        assert!(raw.parse::<Crs>().is_err());
    }

    #[rstest]
    fn display_round_trips_through_parse() {
        let crs = Crs::Utm {
            zone: 7,
            north: false,
        };
        assert_eq!(crs.to_string().parse::<Crs>(), Ok(crs));
    }

    #[rstest]
    fn utm_origin_sits_on_false_easting() {
        let utm = Crs::Utm {
            zone: 33,
            north: true,
        };
        let projected = utm
            .from_wgs84(coord! { x: 15.0, y: 0.0 })
            .expect("project origin");
        assert_close(projected, coord! { x: 500_000.0, y: 0.0 }, 1e-6);
    }

    #[rstest]
    fn utm_central_meridian_matches_meridian_arc() {
        let utm = Crs::Utm {
            zone: 33,
            north: true,
        };
        let projected = utm
            .from_wgs84(coord! { x: 15.0, y: 45.0 })
            .expect("project point");
        // WGS84 meridian arc to 45°N is 4 984 944.378 m, scaled by 0.9996.
        assert_close(projected, coord! { x: 500_000.0, y: 4_982_950.4 }, 0.5);
    }

    #[rstest]
    #[case(Crs::Utm { zone: 33, north: true }, coord! { x: 13.405, y: 52.52 })]
    #[case(Crs::Utm { zone: 56, north: false }, coord! { x: 151.21, y: -33.87 })]
    #[case(Crs::WebMercator, coord! { x: -73.98, y: 40.75 })]
    fn round_trips_through_wgs84(#[case] crs: Crs, #[case] lon_lat: Coord<f64>) {
        let projected = crs.from_wgs84(lon_lat).expect("forward");
        let back = crs.to_wgs84(projected).expect("inverse");
        assert_close(back, lon_lat, 1e-8);
    }

    #[rstest]
    fn web_mercator_maps_antimeridian_to_half_circumference() {
        let projected = Crs::WebMercator
            .from_wgs84(coord! { x: 180.0, y: 0.0 })
            .expect("project");
        assert_close(projected, coord! { x: 20_037_508.342_789_244, y: 0.0 }, 1e-6);
    }

    #[rstest]
    fn web_mercator_rejects_polar_latitudes() {
        let err = Crs::WebMercator
            .from_wgs84(coord! { x: 0.0, y: 89.0 })
            .expect_err("pole is outside the domain");
        assert!(matches!(err, CrsError::OutOfDomain { .. }));
    }

    #[rstest]
    fn geographic_input_outside_range_is_rejected() {
        let err = transform_coord(coord! { x: 200.0, y: 10.0 }, Crs::Wgs84, Crs::WebMercator)
            .expect_err("longitude out of range");
        assert!(matches!(err, CrsError::OutOfDomain { .. }));
    }

    #[rstest]
    fn utm_zone_lookup_handles_boundaries() {
        assert_eq!(
            Crs::utm_for(12.0, 10.0),
            Ok(Crs::Utm {
                zone: 33,
                north: true
            })
        );
        assert_eq!(
            Crs::utm_for(180.0, -1.0),
            Ok(Crs::Utm {
                zone: 60,
                north: false
            })
        );
        assert_eq!(
            Crs::utm_for(-180.0, 0.0),
            Ok(Crs::Utm {
                zone: 1,
                north: true
            })
        );
    }

    #[rstest]
    fn reproject_preserves_geometry_shape() {
        let line: Geometry<f64> =
            LineString::from(vec![(13.40, 52.52), (13.41, 52.52), (13.41, 52.53)]).into();
        let utm = Crs::Utm {
            zone: 33,
            north: true,
        };
        let projected = reproject(&line, Crs::Wgs84, utm).expect("reproject");
        let Geometry::LineString(projected_line) = projected else {
            panic!("expected a line string");
        };
        assert_eq!(projected_line.0.len(), 3);
        let first = projected_line.0.first().copied().expect("first vertex");
        let second = projected_line.0.get(1).copied().expect("second vertex");
        // 0.01 degrees of longitude at 52.52°N is roughly 677 m.
        let dx = second.x - first.x;
        assert!((dx - 677.0).abs() < 5.0, "unexpected spacing {dx}");
    }

    #[rstest]
    fn reproject_rejects_non_finite_coordinates() {
        let point: Geometry<f64> = Point::new(f64::NAN, 1.0).into();
        let err = reproject(&point, Crs::Wgs84, Crs::Wgs84).expect_err("NaN coordinate");
        assert!(matches!(err, CrsError::NonFinite { .. }));
    }

    #[rstest]
    fn serde_uses_epsg_strings() {
        let json = serde_json::to_string(&Crs::WebMercator).expect("serialise");
        assert_eq!(json, "\"EPSG:3857\"");
        let back: Crs = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back, Crs::WebMercator);
    }
}
