//! Focused unit tests covering consolidate CLI configuration validation.

use super::helpers::{Workspace, write_utf8};
use super::*;
use corridor_core::{Crs, OutputFormat, OverwritePolicy};
use rstest::rstest;

fn args(input: Option<&str>, output: Option<&str>) -> ConsolidateArgs {
    ConsolidateArgs {
        input: input.map(Into::into),
        output: output.map(Into::into),
        ..ConsolidateArgs::default()
    }
}

#[rstest]
#[case(None, Some("out.geojson"), ARG_INPUT, ENV_INPUT)]
#[case(Some("reports"), None, ARG_OUTPUT, ENV_OUTPUT)]
fn converting_without_required_fields_errors(
    #[case] input: Option<&str>,
    #[case] output: Option<&str>,
    #[case] field: &'static str,
    #[case] env_var: &'static str,
) {
    let err = ConsolidateConfig::try_from(args(input, output)).expect_err("missing field");
    match err {
        CliError::MissingArgument {
            field: missing,
            env,
        } => {
            assert_eq!(missing, field);
            assert_eq!(env, env_var);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn dry_runs_need_no_output() {
    let config = ConsolidateConfig::try_from(ConsolidateArgs {
        dry_run: true,
        ..args(Some("reports"), None)
    })
    .expect("dry run without output");
    assert!(config.output.is_none());
    assert!(config.pipeline.dry_run);
}

#[rstest]
#[case(None, 100.0, 30.48)]
#[case(Some("feet"), 25.0, 7.62)]
#[case(Some("metres"), 12.5, 12.5)]
#[case(Some("m"), 3.0, 3.0)]
fn distances_are_converted_to_metres(
    #[case] unit: Option<&str>,
    #[case] distance: f64,
    #[case] expected: f64,
) {
    let config = ConsolidateConfig::try_from(ConsolidateArgs {
        distance: Some(distance),
        planning_distance: Some(distance),
        distance_unit: unit.map(str::to_owned),
        ..args(Some("reports"), Some("out.geojson"))
    })
    .expect("config");
    assert!((config.pipeline.buffer_distance - expected).abs() < 1e-9);
    assert!((config.pipeline.planning_buffer_distance - expected).abs() < 1e-9);
}

#[rstest]
fn unknown_distance_units_are_rejected() {
    let err = ConsolidateConfig::try_from(ConsolidateArgs {
        distance_unit: Some("furlongs".into()),
        ..args(Some("reports"), Some("out.geojson"))
    })
    .expect_err("unknown unit");
    assert!(matches!(err, CliError::UnknownDistanceUnit { value } if value == "furlongs"));
    assert_eq!("Metres".parse::<DistanceUnit>().ok(), Some(DistanceUnit::Metres));
}

#[rstest]
#[case("corridor.geojson", None, OutputFormat::GeoJson)]
#[case("corridor.WKT", None, OutputFormat::Ewkt)]
#[case("corridor.ewkt", None, OutputFormat::Ewkt)]
#[case("corridor.txt", Some("ewkt"), OutputFormat::Ewkt)]
#[case("corridor.wkt", Some("geojson"), OutputFormat::GeoJson)]
fn output_format_follows_flag_or_extension(
    #[case] output: &str,
    #[case] format: Option<&str>,
    #[case] expected: OutputFormat,
) {
    let config = ConsolidateConfig::try_from(ConsolidateArgs {
        format: format.map(str::to_owned),
        ..args(Some("reports"), Some(output))
    })
    .expect("config");
    let target = config.output.expect("output target");
    assert_eq!(target.format, expected);
    assert_eq!(target.overwrite, OverwritePolicy::RejectIfExists);
}

#[rstest]
#[case(ConsolidateArgs { format: Some("shapefile".into()), ..args(Some("r"), Some("o")) }, ARG_FORMAT)]
#[case(ConsolidateArgs { overwrite: Some("sometimes".into()), ..args(Some("r"), Some("o")) }, ARG_OVERWRITE)]
#[case(ConsolidateArgs { working_crs: Some("EPSG:27700".into()), ..args(Some("r"), Some("o")) }, ARG_WORKING_CRS)]
#[case(ConsolidateArgs { fallback_crs: Some("nowhere".into()), ..args(Some("r"), Some("o")) }, ARG_FALLBACK_CRS)]
#[case(ConsolidateArgs { cap: Some("pointy".into()), ..args(Some("r"), Some("o")) }, ARG_CAP)]
#[case(ConsolidateArgs { join: Some("weld".into()), ..args(Some("r"), Some("o")) }, ARG_JOIN)]
fn invalid_option_values_name_the_flag(#[case] args: ConsolidateArgs, #[case] flag: &str) {
    let err = ConsolidateConfig::try_from(args).expect_err("invalid value");
    let field = match err {
        CliError::InvalidOption { field, .. }
        | CliError::InvalidCrs { field, .. }
        | CliError::InvalidStyle { field, .. } => field,
        other => panic!("unexpected error {other:?}"),
    };
    assert_eq!(field, flag);
}

#[rstest]
fn pipeline_settings_are_carried_over() {
    let config = ConsolidateConfig::try_from(ConsolidateArgs {
        working_crs: Some("EPSG:32632".into()),
        fallback_crs: Some("EPSG:4326".into()),
        workers: Some(2),
        batch_size: Some(3),
        fail_fast: true,
        overwrite: Some("prompt".into()),
        ..args(Some("reports"), Some("out.geojson"))
    })
    .expect("config");
    assert_eq!(
        config.pipeline.working_crs,
        Crs::Utm {
            zone: 32,
            north: true
        }
    );
    assert_eq!(config.pipeline.fallback_crs, Some(Crs::Wgs84));
    assert_eq!(config.pipeline.workers, 2);
    assert_eq!(config.pipeline.batch_size, 3);
    assert!(config.pipeline.fail_fast);
    assert_eq!(
        config.output.expect("output").overwrite,
        OverwritePolicy::Prompt
    );
}

#[rstest]
fn validate_sources_reports_missing_input_folder() {
    let workspace = Workspace::new();
    let config = ConsolidateConfig::try_from(args(
        Some(workspace.root().join("absent").as_str()),
        Some("out.geojson"),
    ))
    .expect("config");
    let err = config.validate_sources().expect_err("missing folder");
    assert!(matches!(err, CliError::MissingInputFolder { field, .. } if field == ARG_INPUT));
}

#[rstest]
fn validate_sources_checks_layers() {
    let workspace = Workspace::new();
    let mut config = ConsolidateConfig::try_from(args(
        Some(workspace.reports().as_str()),
        Some("out.geojson"),
    ))
    .expect("config");
    config.exclusion_layer = Some(workspace.reports());
    let err = config.validate_sources().expect_err("directory layer");
    assert!(matches!(err, CliError::SourcePathNotFile { field, .. } if field == ARG_EXCLUSION_LAYER));

    config.exclusion_layer = None;
    config.planning_layer = Some(workspace.root().join("missing.geojson"));
    let err = config.validate_sources().expect_err("missing layer");
    assert!(matches!(err, CliError::MissingSourceFile { field, .. } if field == ARG_PLANNING_LAYER));
}

#[rstest]
fn text_base_layers_are_rejected() {
    let workspace = Workspace::new();
    let base = workspace.root().join("base.txt");
    write_utf8(&base, b"Name,Latitude,Longitude\n");
    let mut config = ConsolidateConfig::try_from(ConsolidateArgs {
        dry_run: true,
        ..args(Some(workspace.reports().as_str()), None)
    })
    .expect("config");
    config.base_layer = Some(base);
    let err = execute(&config).expect_err("text base layer");
    assert!(matches!(err, CliError::UnsupportedBaseLayer { .. }));
}
