//! Behavioural tests for report extraction.

use std::{
    cell::RefCell,
    fs,
    path::{Path, PathBuf},
};

use corridor_core::{Crs, ExtractedRecord, RecordRejection, ReportFormat, extract::extract_report};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

#[derive(Default)]
struct ExtractionWorld {
    content: String,
    format: Option<ReportFormat>,
    accepted: Vec<ExtractedRecord>,
    rejected: Vec<RecordRejection>,
}

#[fixture]
fn world() -> RefCell<ExtractionWorld> {
    RefCell::new(ExtractionWorld::default())
}

#[given("a CSV report with two valid rows and one row with too many cells")]
fn csv_report(#[from(world)] world: &RefCell<ExtractionWorld>) {
    let mut world = world.borrow_mut();
    world.content = "Name,Date,PSI,Latitude,Longitude\n\
                     Main,2024-03-01,60,52.5,13.4\n\
                     Spur,2024-03-02,40,52.5,13.4,extra\n\
                     Elm,,,52.6,13.5\n"
        .to_owned();
    world.format = Some(ReportFormat::Text);
}

#[given("a key-value report with one named block and one anonymous block")]
fn key_value_report(#[from(world)] world: &RefCell<ExtractionWorld>) {
    let mut world = world.borrow_mut();
    world.content = "Name: Main\nLocation: 52.5, 13.4\n\nMaterial: Steel\nLocation: 52.6, 13.5\n"
        .to_owned();
    world.format = Some(ReportFormat::Text);
}

#[given("a GeoJSON feature collection declared in EPSG:32633")]
fn geojson_report(#[from(world)] world: &RefCell<ExtractionWorld>) {
    let mut world = world.borrow_mut();
    world.content = r#"{
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::32633"}},
        "features": [{
            "type": "Feature",
            "properties": {"Name": "Main", "Material": "PVC"},
            "geometry": {"type": "LineString", "coordinates": [[500000, 0], [500100, 0]]}
        }]
    }"#
    .to_owned();
    world.format = Some(ReportFormat::GeoJson);
}

#[when("I extract the report")]
fn extract(#[from(world)] world: &RefCell<ExtractionWorld>) {
    let mut world = world.borrow_mut();
    let format = world.format.expect("report prepared");
    let content = world.content.clone();
    let outcomes = extract_report(content.as_bytes(), format, Path::new("report"))
        .expect("report decodes");
    for outcome in outcomes {
        match outcome {
            Ok(record) => world.accepted.push(record),
            Err(rejection) => world.rejected.push(rejection),
        }
    }
}

#[then("{count} features are extracted")]
fn features_extracted(count: usize, #[from(world)] world: &RefCell<ExtractionWorld>) {
    assert_eq!(world.borrow().accepted.len(), count);
}

#[then("1 feature is extracted")]
fn one_feature(#[from(world)] world: &RefCell<ExtractionWorld>) {
    assert_eq!(world.borrow().accepted.len(), 1);
}

#[then("1 record is rejected")]
fn one_rejection(#[from(world)] world: &RefCell<ExtractionWorld>) {
    let world = world.borrow();
    assert!(matches!(
        world.rejected.as_slice(),
        [RecordRejection::Malformed { record: 3, .. }]
    ));
}

#[then("the rejection reports a missing identity")]
fn missing_identity(#[from(world)] world: &RefCell<ExtractionWorld>) {
    let world = world.borrow();
    assert!(matches!(
        world.rejected.as_slice(),
        [RecordRejection::MissingIdentity { .. }]
    ));
}

#[then("every feature declares EPSG:32633")]
fn declared_crs(#[from(world)] world: &RefCell<ExtractionWorld>) {
    let expected = Crs::Utm {
        zone: 33,
        north: true,
    };
    let world = world.borrow();
    assert!(
        world
            .accepted
            .iter()
            .all(|record| record.feature.source_crs() == Some(expected))
    );
}

#[test]
fn scenario_indices_follow_feature_order() {
    let feature = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/features/extract.feature");
    let contents = fs::read_to_string(&feature).unwrap_or_else(|err| {
        panic!("failed to read feature file {feature:?}: {err}");
    });
    let titles: Vec<&str> = contents
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Scenario: "))
        .collect();
    assert_eq!(
        titles,
        [
            "a CSV report with a malformed row",
            "a key-value report with a record lacking identity",
            "a GeoJSON report with a declared reference system",
        ]
    );
}

#[scenario(path = "tests/features/extract.feature", index = 0)]
fn csv_with_malformed_row(world: RefCell<ExtractionWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/extract.feature", index = 1)]
fn key_value_without_identity(world: RefCell<ExtractionWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/extract.feature", index = 2)]
fn geojson_with_crs(world: RefCell<ExtractionWorld>) {
    let _ = world;
}
