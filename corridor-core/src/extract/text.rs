//! Delimited text reports.
//!
//! Two dialects exist in the wild. A CSV table starts with a header row;
//! key-value reports hold `Key: value` lines, one record per block with
//! blank lines between blocks. The dialect is decided by the first
//! non-blank line: a colon before any comma means key-value.

use std::{collections::VecDeque, iter::Enumerate, path::Path, str::Lines};

use geo::{Geometry, Point};

use super::{
    RecordOutcome, RecordRejection,
    fields::{LocatedGeometry, build_record},
};
use crate::{AttributeValue, Crs, wkt::parse_wkt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Csv,
    KeyValue,
}

fn detect_dialect(text: &str) -> Option<Dialect> {
    let first = text.lines().find(|line| !line.trim().is_empty())?;
    let dialect = match (first.find(':'), first.find(',')) {
        (Some(colon), Some(comma)) if colon < comma => Dialect::KeyValue,
        (Some(_), None) => Dialect::KeyValue,
        _ => Dialect::Csv,
    };
    Some(dialect)
}

pub(super) fn records<'a>(
    text: &'a str,
    report: &'a Path,
) -> Box<dyn Iterator<Item = RecordOutcome> + 'a> {
    match detect_dialect(text) {
        None => {
            log::debug!("text report {} is empty", report.display());
            Box::new(std::iter::empty())
        }
        Some(Dialect::Csv) => Box::new(CsvRecords::new(text, report)),
        Some(Dialect::KeyValue) => Box::new(KeyValueRecords::new(text, report)),
    }
}

struct CsvRecords<'a> {
    lines: Enumerate<Lines<'a>>,
    header: Option<Vec<String>>,
    report: &'a Path,
}

impl<'a> CsvRecords<'a> {
    fn new(text: &'a str, report: &'a Path) -> Self {
        Self {
            lines: text.lines().enumerate(),
            header: None,
            report,
        }
    }
}

impl Iterator for CsvRecords<'_> {
    type Item = RecordOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (index, line) = self.lines.next()?;
            let line_number = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            let cells = match split_csv_line(line) {
                Ok(cells) => cells,
                Err(reason) => {
                    return Some(Err(RecordRejection::Malformed {
                        record: line_number,
                        reason,
                    }));
                }
            };
            let Some(header) = self.header.as_ref() else {
                self.header = Some(cells.into_iter().map(|cell| cell.trim().to_owned()).collect());
                continue;
            };
            if cells.len() > header.len() {
                return Some(Err(RecordRejection::Malformed {
                    record: line_number,
                    reason: format!(
                        "row has {} fields but the header names {}",
                        cells.len(),
                        header.len()
                    ),
                }));
            }
            let fields = header.iter().cloned().zip(cells).collect();
            return Some(text_record(self.report, line_number, fields));
        }
    }
}

/// Split one CSV line, honouring double-quoted cells and `""` escapes.
fn split_csv_line(line: &str) -> Result<Vec<String>, String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            ('"', true) => in_quotes = false,
            ('"', false) if current.trim().is_empty() => {
                current.clear();
                in_quotes = true;
            }
            (',', false) => cells.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".to_owned());
    }
    cells.push(current);
    Ok(cells)
}

struct KeyValueRecords<'a> {
    lines: Enumerate<Lines<'a>>,
    report: &'a Path,
    pending: VecDeque<RecordOutcome>,
    finished: bool,
}

impl<'a> KeyValueRecords<'a> {
    fn new(text: &'a str, report: &'a Path) -> Self {
        Self {
            lines: text.lines().enumerate(),
            report,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Read the next block, queueing its malformed lines before the record.
    fn fill(&mut self) {
        let mut block: Vec<(String, String)> = Vec::new();
        let mut start = None;
        for (index, line) in self.lines.by_ref() {
            let line_number = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                if block.is_empty() {
                    continue;
                }
                break;
            }
            match trimmed.split_once(':') {
                Some((key, value)) if !key.trim().is_empty() => {
                    start.get_or_insert(line_number);
                    block.push((key.trim().to_owned(), value.trim().to_owned()));
                }
                _ => self.pending.push_back(Err(RecordRejection::Malformed {
                    record: line_number,
                    reason: format!("expected `Key: value`, found {trimmed:?}"),
                })),
            }
        }
        match start {
            Some(record) => self
                .pending
                .push_back(text_record(self.report, record, block)),
            None => self.finished = true,
        }
    }
}

impl Iterator for KeyValueRecords<'_> {
    type Item = RecordOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pending.is_empty() && !self.finished {
            self.fill();
        }
        self.pending.pop_front()
    }
}

fn text_record(report: &Path, record: usize, raw: Vec<(String, String)>) -> RecordOutcome {
    let mut fields = Vec::with_capacity(raw.len());
    let mut location = LocationFields::default();
    for (key, value) in raw {
        match key.to_ascii_lowercase().as_str() {
            "latitude" | "lat" => location.latitude = Some(value),
            "longitude" | "lon" | "lng" => location.longitude = Some(value),
            "location" => location.location = Some(value),
            "geometry" | "wkt" => location.wkt = Some(value),
            "crs" | "srs" => location.crs = Some(value),
            _ => fields.push((key, AttributeValue::Text(value))),
        }
    }
    let geometry = location.resolve(record)?;
    build_record(report, record, fields, geometry)
}

#[derive(Debug, Default)]
struct LocationFields {
    latitude: Option<String>,
    longitude: Option<String>,
    location: Option<String>,
    wkt: Option<String>,
    crs: Option<String>,
}

impl LocationFields {
    /// Locate the record: explicit latitude/longitude, then a `"lat, lon"`
    /// location, then a WKT geometry.
    fn resolve(self, record: usize) -> Result<Option<LocatedGeometry>, RecordRejection> {
        let coordinate_pair = self
            .latitude
            .as_deref()
            .zip(self.longitude.as_deref())
            .and_then(|(lat, lon)| parse_lat_lon(lat, lon));
        if let Some(point) = coordinate_pair {
            return Ok(Some((point.into(), Some(Crs::Wgs84))));
        }
        if let Some(location) = self.location.as_deref().filter(|l| !l.trim().is_empty()) {
            let point = location
                .split_once(',')
                .and_then(|(lat, lon)| parse_lat_lon(lat, lon))
                .ok_or_else(|| RecordRejection::InvalidGeometry {
                    record,
                    reason: format!("location {location:?} is not \"lat, lon\""),
                })?;
            return Ok(Some((point.into(), Some(Crs::Wgs84))));
        }
        if let Some(wkt) = self.wkt.as_deref().filter(|w| !w.trim().is_empty()) {
            return self.resolve_wkt(record, wkt).map(Some);
        }
        if self.latitude.is_some() || self.longitude.is_some() {
            return Err(RecordRejection::InvalidGeometry {
                record,
                reason: "latitude/longitude are incomplete or not numeric".to_owned(),
            });
        }
        Ok(None)
    }

    fn resolve_wkt(&self, record: usize, wkt: &str) -> Result<LocatedGeometry, RecordRejection> {
        let (geometry, srid): (Geometry<f64>, Option<u32>) =
            parse_wkt(wkt).map_err(|err| RecordRejection::InvalidGeometry {
                record,
                reason: err.to_string(),
            })?;
        let declared = self
            .crs
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(str::parse::<Crs>)
            .transpose()
            .map_err(|source| RecordRejection::InvalidCrs { record, source })?;
        let from_srid = srid
            .map(Crs::from_epsg)
            .transpose()
            .map_err(|source| RecordRejection::InvalidCrs { record, source })?;
        Ok((geometry, declared.or(from_srid)))
    }
}

fn parse_lat_lon(lat: &str, lon: &str) -> Option<Point<f64>> {
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    Some(Point::new(lon, lat))
}
