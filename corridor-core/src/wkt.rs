//! Minimal Well-Known Text support.
//!
//! Reports may carry geometries as WKT, and results can be written as
//! EWKT. Only the two-dimensional geometry types the pipeline handles are
//! understood; Z and M ordinates are rejected.

use std::fmt::Write as _;

use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use thiserror::Error;

/// Errors raised while parsing WKT.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WktError {
    /// Input ended before the geometry was complete.
    #[error("unexpected end of WKT input")]
    UnexpectedEnd,
    /// An unexpected token was found.
    #[error("unexpected token {found:?} at offset {offset}, expected {expected}")]
    UnexpectedToken {
        /// The token text.
        found: String,
        /// Byte offset of the token.
        offset: usize,
        /// What the parser was looking for.
        expected: &'static str,
    },
    /// The geometry tag is not supported.
    #[error("unsupported WKT geometry type {0:?}")]
    UnsupportedType(String),
    /// A coordinate could not be parsed as a number.
    #[error("invalid coordinate value {0:?}")]
    InvalidNumber(String),
    /// Content followed a complete geometry.
    #[error("trailing content after WKT geometry at offset {0}")]
    TrailingContent(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Open,
    Close,
    Comma,
}

struct Lexer<'a> {
    input: &'a str,
    offset: usize,
    peeked: Option<(usize, Token<'a>)>,
}

impl<'a> Lexer<'a> {
    const fn new(input: &'a str) -> Self {
        Self {
            input,
            offset: 0,
            peeked: None,
        }
    }

    fn peek(&mut self) -> Option<Token<'a>> {
        if self.peeked.is_none() {
            self.peeked = self.scan();
        }
        self.peeked.map(|(_, token)| token)
    }

    fn next_token(&mut self) -> Option<(usize, Token<'a>)> {
        self.peeked.take().or_else(|| self.scan())
    }

    fn scan(&mut self) -> Option<(usize, Token<'a>)> {
        let rest = self.input.get(self.offset..)?;
        let skipped = rest.len() - rest.trim_start().len();
        self.offset += skipped;
        let start = self.offset;
        let rest = self.input.get(start..)?;
        let first = rest.chars().next()?;
        let token = match first {
            '(' => Token::Open,
            ')' => Token::Close,
            ',' => Token::Comma,
            _ => {
                let len = rest
                    .find(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | ','))
                    .unwrap_or(rest.len());
                let word = rest.get(..len)?;
                self.offset += len;
                return Some((start, Token::Word(word)));
            }
        };
        self.offset += 1;
        Some((start, token))
    }

    fn expect(&mut self, wanted: Token<'static>, expected: &'static str) -> Result<(), WktError> {
        match self.next_token() {
            Some((_, token)) if token == wanted => Ok(()),
            Some((offset, token)) => Err(unexpected(offset, token, expected)),
            None => Err(WktError::UnexpectedEnd),
        }
    }
}

fn unexpected(offset: usize, token: Token<'_>, expected: &'static str) -> WktError {
    let found = match token {
        Token::Word(word) => word.to_owned(),
        Token::Open => "(".to_owned(),
        Token::Close => ")".to_owned(),
        Token::Comma => ",".to_owned(),
    };
    WktError::UnexpectedToken {
        found,
        offset,
        expected,
    }
}

/// Parse a WKT (or EWKT, with a leading `SRID=n;`) geometry.
///
/// The SRID, when present, is returned alongside the geometry.
///
/// # Examples
///
/// ```
/// use corridor_core::wkt::parse_wkt;
/// use geo::Geometry;
///
/// let (geometry, srid) = parse_wkt("SRID=4326;LINESTRING (0 0, 1 1)").unwrap();
/// assert_eq!(srid, Some(4326));
/// assert!(matches!(geometry, Geometry::LineString(_)));
/// ```
pub fn parse_wkt(input: &str) -> Result<(Geometry<f64>, Option<u32>), WktError> {
    let (srid, body) = split_srid(input)?;
    let mut lexer = Lexer::new(body);
    let geometry = parse_geometry(&mut lexer)?;
    if let Some((offset, _)) = lexer.next_token() {
        return Err(WktError::TrailingContent(offset));
    }
    Ok((geometry, srid))
}

fn split_srid(input: &str) -> Result<(Option<u32>, &str), WktError> {
    let trimmed = input.trim();
    let Some((head, body)) = trimmed.split_once(';') else {
        return Ok((None, trimmed));
    };
    let Some(code) = head
        .trim()
        .strip_prefix("SRID=")
        .or_else(|| head.trim().strip_prefix("srid="))
    else {
        return Ok((None, trimmed));
    };
    let srid = code
        .trim()
        .parse()
        .map_err(|_| WktError::InvalidNumber(code.to_owned()))?;
    Ok((Some(srid), body))
}

fn parse_geometry(lexer: &mut Lexer<'_>) -> Result<Geometry<f64>, WktError> {
    let (offset, token) = lexer.next_token().ok_or(WktError::UnexpectedEnd)?;
    let Token::Word(tag) = token else {
        return Err(unexpected(offset, token, "geometry type"));
    };
    let tag = tag.to_ascii_uppercase();
    if let Some(Token::Word(modifier)) = lexer.peek() {
        if modifier.eq_ignore_ascii_case("EMPTY") {
            lexer.next_token();
            return empty_geometry(&tag);
        }
        return Err(WktError::UnsupportedType(format!("{tag} {modifier}")));
    }
    match tag.as_str() {
        "POINT" => {
            lexer.expect(Token::Open, "'('")?;
            let coord = parse_coord(lexer)?;
            lexer.expect(Token::Close, "')'")?;
            Ok(Point::from(coord).into())
        }
        "LINESTRING" => Ok(LineString::new(parse_coord_list(lexer)?).into()),
        "POLYGON" => Ok(parse_polygon(lexer)?.into()),
        "MULTIPOINT" => {
            let points = parse_list(lexer, |lx| {
                // Both `MULTIPOINT (1 2, 3 4)` and `MULTIPOINT ((1 2), (3 4))` occur.
                if lx.peek() == Some(Token::Open) {
                    lx.expect(Token::Open, "'('")?;
                    let coord = parse_coord(lx)?;
                    lx.expect(Token::Close, "')'")?;
                    Ok(Point::from(coord))
                } else {
                    parse_coord(lx).map(Point::from)
                }
            })?;
            Ok(MultiPoint::new(points).into())
        }
        "MULTILINESTRING" => {
            let lines = parse_list(lexer, |lx| parse_coord_list(lx).map(LineString::new))?;
            Ok(MultiLineString::new(lines).into())
        }
        "MULTIPOLYGON" => Ok(MultiPolygon::new(parse_list(lexer, parse_polygon)?).into()),
        "GEOMETRYCOLLECTION" => {
            let members = parse_list(lexer, parse_geometry)?;
            Ok(Geometry::GeometryCollection(GeometryCollection(members)))
        }
        _ => Err(WktError::UnsupportedType(tag)),
    }
}

fn empty_geometry(tag: &str) -> Result<Geometry<f64>, WktError> {
    match tag {
        "LINESTRING" => Ok(LineString::new(Vec::new()).into()),
        "MULTIPOINT" => Ok(MultiPoint::new(Vec::new()).into()),
        "MULTILINESTRING" => Ok(MultiLineString::new(Vec::new()).into()),
        "MULTIPOLYGON" => Ok(MultiPolygon::new(Vec::new()).into()),
        "GEOMETRYCOLLECTION" => Ok(Geometry::GeometryCollection(GeometryCollection(Vec::new()))),
        other => Err(WktError::UnsupportedType(format!("{other} EMPTY"))),
    }
}

fn parse_polygon(lexer: &mut Lexer<'_>) -> Result<Polygon<f64>, WktError> {
    let mut rings = parse_list(lexer, |lx| parse_coord_list(lx).map(LineString::new))?.into_iter();
    let exterior = rings.next().unwrap_or_else(|| LineString::new(Vec::new()));
    Ok(Polygon::new(exterior, rings.collect()))
}

fn parse_coord_list(lexer: &mut Lexer<'_>) -> Result<Vec<Coord<f64>>, WktError> {
    parse_list(lexer, parse_coord)
}

fn parse_list<'a, T>(
    lexer: &mut Lexer<'a>,
    mut item: impl FnMut(&mut Lexer<'a>) -> Result<T, WktError>,
) -> Result<Vec<T>, WktError> {
    lexer.expect(Token::Open, "'('")?;
    let mut items = vec![item(lexer)?];
    loop {
        match lexer.next_token() {
            Some((_, Token::Comma)) => items.push(item(lexer)?),
            Some((_, Token::Close)) => return Ok(items),
            Some((offset, token)) => return Err(unexpected(offset, token, "',' or ')'")),
            None => return Err(WktError::UnexpectedEnd),
        }
    }
}

fn parse_coord(lexer: &mut Lexer<'_>) -> Result<Coord<f64>, WktError> {
    let x = parse_number(lexer)?;
    let y = parse_number(lexer)?;
    if let Some(Token::Word(extra)) = lexer.peek() {
        return Err(WktError::UnsupportedType(format!(
            "coordinate with extra ordinate {extra}"
        )));
    }
    Ok(Coord { x, y })
}

fn parse_number(lexer: &mut Lexer<'_>) -> Result<f64, WktError> {
    match lexer.next_token() {
        Some((_, Token::Word(word))) => word
            .parse()
            .map_err(|_| WktError::InvalidNumber(word.to_owned())),
        Some((offset, token)) => Err(unexpected(offset, token, "number")),
        None => Err(WktError::UnexpectedEnd),
    }
}

/// Render a multipolygon as WKT.
#[must_use]
pub fn multipolygon_to_wkt(geometry: &MultiPolygon<f64>) -> String {
    if geometry.0.is_empty() {
        return "MULTIPOLYGON EMPTY".to_owned();
    }
    let mut out = String::from("MULTIPOLYGON (");
    for (i, polygon) in geometry.0.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('(');
        let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors());
        for (j, ring) in rings.enumerate() {
            if j > 0 {
                out.push_str(", ");
            }
            write_ring(&mut out, ring);
        }
        out.push(')');
    }
    out.push(')');
    out
}

/// Render a multipolygon as EWKT tagged with `srid`.
#[must_use]
pub fn multipolygon_to_ewkt(geometry: &MultiPolygon<f64>, srid: u32) -> String {
    format!("SRID={srid};{}", multipolygon_to_wkt(geometry))
}

fn write_ring(out: &mut String, ring: &LineString<f64>) {
    out.push('(');
    for (k, coord) in ring.0.iter().enumerate() {
        if k > 0 {
            out.push_str(", ");
        }
        // Writing into a String is infallible.
        let _ = write!(out, "{} {}", coord.x, coord.y);
    }
    out.push(')');
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use rstest::rstest;

    #[rstest]
    #[case("POINT (1 2)", "Point")]
    #[case("LINESTRING(0 0,1 1, 2 2)", "LineString")]
    #[case("MULTIPOINT ((0 0), (1 1))", "MultiPoint")]
    #[case("MULTIPOINT (0 0, 1 1)", "MultiPoint")]
    #[case("multilinestring ((0 0, 1 1), (2 2, 3 3))", "MultiLineString")]
    #[case("POLYGON ((0 0, 1 0, 1 1, 0 0))", "Polygon")]
    #[case("GEOMETRYCOLLECTION (POINT (1 1), LINESTRING (0 0, 1 1))", "GeometryCollection")]
    #[case("LINESTRING EMPTY", "LineString")]
    #[case("GEOMETRYCOLLECTION EMPTY", "GeometryCollection")]
    fn parses_supported_types(#[case] wkt: &str, #[case] kind: &str) {
        let (geometry, srid) = parse_wkt(wkt).expect("valid WKT");
        assert_eq!(srid, None);
        let actual = match geometry {
            Geometry::Point(_) => "Point",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::GeometryCollection(_) => "GeometryCollection",
            _ => "other",
        };
        assert_eq!(actual, kind);
    }

    #[rstest]
    fn reads_srid_prefix() {
        let (geometry, srid) = parse_wkt("SRID=32633;POINT (500000 10)").expect("valid EWKT");
        assert_eq!(srid, Some(32_633));
        assert_eq!(geometry, Geometry::Point(Point::new(500_000.0, 10.0)));
    }

    #[rstest]
    #[case("POINT (1)")]
    #[case("POINT (1 2 3)")]
    #[case("LINESTRING (0 0, 1 1")]
    #[case("CIRCLE (0 0, 1)")]
    #[case("POINT (1 2) junk")]
    #[case("POINT (a b)")]
    fn rejects_malformed_input(#[case] wkt: &str) {
        assert!(parse_wkt(wkt).is_err(), "{wkt} should fail");
    }

    #[rstest]
    fn writes_multipolygon_with_holes() {
        let square = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0)],
            interiors: [[(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0)]],
        );
        let wkt = multipolygon_to_ewkt(&MultiPolygon::new(vec![square]), 3857);
        assert_eq!(
            wkt,
            "SRID=3857;MULTIPOLYGON (((0 0, 4 0, 4 4, 0 4, 0 0), (1 1, 2 1, 2 2, 1 1)))"
        );
        let (parsed, srid) = parse_wkt(&wkt).expect("written EWKT parses");
        assert_eq!(srid, Some(3857));
        assert!(matches!(parsed, Geometry::MultiPolygon(ref mp) if mp.0.len() == 1));
    }

    #[rstest]
    fn writes_empty_multipolygon() {
        assert_eq!(
            multipolygon_to_wkt(&MultiPolygon::new(Vec::new())),
            "MULTIPOLYGON EMPTY"
        );
    }
}
