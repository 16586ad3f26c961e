//! Pipeline integration tests covering the consolidate command flow.

use super::helpers::{Workspace, write_utf8};
use super::*;
use corridor_core::{OutputStatus, RunOutcome};
use rstest::rstest;
use std::fs;

fn config_for(workspace: &Workspace) -> ConsolidateConfig {
    ConsolidateConfig::try_from(ConsolidateArgs {
        input: Some(workspace.reports()),
        output: Some(workspace.output()),
        workers: Some(2),
        ..ConsolidateArgs::default()
    })
    .expect("config")
}

#[rstest]
fn consolidate_writes_corridor_and_summary() {
    let workspace = Workspace::new();
    workspace.add_valve_report("valve-a", 52.0, 15.0);
    workspace.add_valve_report("valve-b", 52.0001, 15.0001);
    let base = workspace.write_base_layer();
    let summary = workspace.root().join("out/summary.json");
    let mut config = config_for(&workspace);
    config.base_layer = Some(base);
    config.summary = Some(summary.clone());

    let report = execute(&config).expect("run succeeds");
    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(report.summary.reports, 3);
    assert_eq!(report.summary.contributing_features, 3);
    assert!(matches!(report.output, OutputStatus::Written { .. }));

    let corridor: serde_json::Value =
        serde_json::from_slice(&fs::read(workspace.output()).expect("read corridor"))
            .expect("corridor json");
    assert_eq!(
        corridor["crs"]["properties"]["name"],
        "urn:ogc:def:crs:EPSG::32633"
    );
    let summary: serde_json::Value =
        serde_json::from_slice(&fs::read(&summary).expect("read summary")).expect("summary json");
    assert_eq!(summary["outcome"], "success");
    assert_eq!(summary["jobs"].as_array().map(Vec::len), Some(3));
}

#[rstest]
fn exclusion_layer_covering_everything_leaves_empty_corridor() {
    let workspace = Workspace::new();
    workspace.add_valve_report("valve-a", 52.0, 15.0);
    let exclusion = workspace.root().join("layers/parks.geojson");
    write_utf8(
        &exclusion,
        br#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"Name": "Park"},
                "geometry": {"type": "Polygon", "coordinates": [[[14.9, 51.9], [15.1, 51.9], [15.1, 52.1], [14.9, 52.1], [14.9, 51.9]]]}
            }]
        }"#,
    );
    let mut config = config_for(&workspace);
    config.pipeline.fallback_crs = Some(corridor_core::Crs::Wgs84);
    config.exclusion_layer = Some(exclusion);

    let report = execute(&config).expect("run succeeds");
    assert_eq!(report.outcome, RunOutcome::Success);
    assert!(report.result.as_ref().is_some_and(|r| r.is_empty()));
}

#[cfg(feature = "audit-sqlite")]
#[rstest]
fn audit_database_makes_reruns_idempotent() {
    let workspace = Workspace::new();
    workspace.add_valve_report("valve-a", 52.0, 15.0);
    let mut config = config_for(&workspace);
    config.audit_db = Some(workspace.root().join("state/audit.db"));
    config.output = config.output.map(|mut target| {
        target.overwrite = corridor_core::OverwritePolicy::Overwrite;
        target
    });

    let first = execute(&config).expect("first run");
    let second = execute(&config).expect("second run");
    assert_eq!(first.summary.accepted_new, 1);
    assert_eq!(second.summary.accepted_new, 0);
    assert_eq!(second.summary.duplicates, 1);
    assert_eq!(second.summary.contributing_features, 1);
}

#[rstest]
fn existing_output_fails_the_run_under_default_policy() {
    let workspace = Workspace::new();
    workspace.add_valve_report("valve-a", 52.0, 15.0);
    write_utf8(&workspace.output(), b"keep me");
    let report = execute(&config_for(&workspace)).expect("run completes");
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(matches!(report.output, OutputStatus::Failed { .. }));
    assert_eq!(
        fs::read_to_string(workspace.output()).expect("read output"),
        "keep me"
    );
}
