//! Krüger series for the Transverse Mercator projection on WGS84.
//!
//! Terms are carried to third order in the third flattening `n`, which
//! keeps the error well below a millimetre within a UTM zone.

use geo::Coord;

const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
const INVERSE_FLATTENING: f64 = 298.257_223_563;
const SCALE_FACTOR: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const SOUTHERN_FALSE_NORTHING: f64 = 10_000_000.0;

struct Series {
    /// Rectifying radius scaled by the central scale factor.
    k0_a: f64,
    /// Eccentricity expressed through `n`.
    eccentricity: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
}

fn series() -> Series {
    let f = 1.0 / INVERSE_FLATTENING;
    let n = f / (2.0 - f);
    let n2 = n * n;
    let n3 = n2 * n;
    let n4 = n3 * n;
    let rectifying = SEMI_MAJOR_AXIS / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0);
    Series {
        k0_a: SCALE_FACTOR * rectifying,
        eccentricity: 2.0 * n.sqrt() / (1.0 + n),
        alpha: [
            n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
            13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
            61.0 * n3 / 240.0,
        ],
        beta: [
            n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
            n2 / 48.0 + n3 / 15.0,
            17.0 * n3 / 480.0,
        ],
        delta: [
            2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
            7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
            56.0 * n3 / 15.0,
        ],
    }
}

/// Longitude of the central meridian of `zone`, in degrees.
pub(super) fn central_meridian(zone: u8) -> f64 {
    f64::from(zone) * 6.0 - 183.0
}

/// UTM zone containing `lon`, clamped into `1..=60`.
pub(super) fn zone_for_longitude(lon: f64) -> u8 {
    let raw = ((lon + 180.0) / 6.0).floor() + 1.0;
    // Clamped into 1..=60, so the cast cannot truncate.
    raw.clamp(1.0, 60.0) as u8
}

fn false_northing(north: bool) -> f64 {
    if north { 0.0 } else { SOUTHERN_FALSE_NORTHING }
}

/// Project geographic degrees into UTM easting/northing.
pub(super) fn forward(lon: f64, lat: f64, zone: u8, north: bool) -> Coord<f64> {
    let s = series();
    let phi = lat.to_radians();
    let lambda = (lon - central_meridian(zone)).to_radians();

    let sin_phi = phi.sin();
    let t = (sin_phi.atanh() - s.eccentricity * (s.eccentricity * sin_phi).atanh()).sinh();
    let xi_prime = t.atan2(lambda.cos());
    let eta_prime = (lambda.sin() / (1.0 + t * t).sqrt()).atanh();

    let mut xi = xi_prime;
    let mut eta = eta_prime;
    for (j, alpha) in (1_u8..).zip(s.alpha) {
        let k = 2.0 * f64::from(j);
        xi += alpha * (k * xi_prime).sin() * (k * eta_prime).cosh();
        eta += alpha * (k * xi_prime).cos() * (k * eta_prime).sinh();
    }

    Coord {
        x: FALSE_EASTING + s.k0_a * eta,
        y: false_northing(north) + s.k0_a * xi,
    }
}

/// Unproject UTM easting/northing into geographic degrees.
pub(super) fn inverse(easting: f64, northing: f64, zone: u8, north: bool) -> Coord<f64> {
    let s = series();
    let xi = (northing - false_northing(north)) / s.k0_a;
    let eta = (easting - FALSE_EASTING) / s.k0_a;

    let mut xi_prime = xi;
    let mut eta_prime = eta;
    for (j, beta) in (1_u8..).zip(s.beta) {
        let k = 2.0 * f64::from(j);
        xi_prime -= beta * (k * xi).sin() * (k * eta).cosh();
        eta_prime -= beta * (k * xi).cos() * (k * eta).sinh();
    }

    let chi = (xi_prime.sin() / eta_prime.cosh()).asin();
    let mut phi = chi;
    for (j, delta) in (1_u8..).zip(s.delta) {
        phi += delta * (2.0 * f64::from(j) * chi).sin();
    }
    let lambda = eta_prime.sinh().atan2(xi_prime.cos());

    Coord {
        x: central_meridian(zone) + lambda.to_degrees(),
        y: phi.to_degrees(),
    }
}
