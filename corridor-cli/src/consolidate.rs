//! Consolidate command implementation for the corridor CLI.

use std::{
    io::{self, BufRead, IsTerminal, Write},
    path::Path,
    str::FromStr,
};

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use corridor_core::{
    BufferShape, CapStyle, Crs, GeometryLayer, JoinStyle, LayerLoader, OutputFormat,
    OutputStatus, OutputTarget, OverwritePolicy, Pipeline, PipelineConfig, ReportFormat,
    ReportRef, RunReport,
};
#[cfg(feature = "audit-sqlite")]
use corridor_data::SqliteAuditLog;
use corridor_data::{
    Confirm, FileLayerWriter, FsReportSource, GeoJsonLayerLoader, discover_reports,
    write_run_summary,
};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_AUDIT_DB, ARG_BASE_LAYER, ARG_BATCH_SIZE, ARG_CAP, ARG_DISTANCE, ARG_DISTANCE_UNIT,
    ARG_DRY_RUN, ARG_EXCLUSION_LAYER, ARG_FAIL_FAST, ARG_FALLBACK_CRS, ARG_FORMAT, ARG_INPUT,
    ARG_JOIN, ARG_OUTPUT, ARG_OVERWRITE, ARG_PLANNING_DISTANCE, ARG_PLANNING_LAYER, ARG_SUMMARY,
    ARG_WORKERS, ARG_WORKING_CRS, CliError, ENV_INPUT, ENV_OUTPUT,
};

/// CLI arguments for the `consolidate` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "consolidate",
    long_about = "Scan a folder of text and GeoJSON reports, buffer every \
                 feature, merge the buffers into one corridor and write it \
                 out. Settings can come from CLI flags, configuration files, \
                 or environment variables.",
    about = "Consolidate a folder of reports into one corridor"
)]
#[ortho_config(prefix = "CORRIDOR")]
pub(crate) struct ConsolidateArgs {
    /// Folder containing `.txt` and `.geojson` reports.
    #[arg(long = ARG_INPUT, value_name = "dir")]
    #[serde(default)]
    pub(crate) input: Option<Utf8PathBuf>,
    /// Destination file for the consolidated corridor.
    #[arg(long = ARG_OUTPUT, value_name = "path")]
    #[serde(default)]
    pub(crate) output: Option<Utf8PathBuf>,
    /// Output format: `geojson` or `ewkt` (inferred from the extension).
    #[arg(long = ARG_FORMAT, value_name = "format")]
    #[serde(default)]
    pub(crate) format: Option<String>,
    /// What to do when the output exists: `reject-if-exists`, `overwrite` or `prompt`.
    #[arg(long = ARG_OVERWRITE, value_name = "policy")]
    #[serde(default)]
    pub(crate) overwrite: Option<String>,
    /// Buffer distance (default 25 ft).
    #[arg(long = ARG_DISTANCE, value_name = "distance")]
    #[serde(default)]
    pub(crate) distance: Option<f64>,
    /// Unit of the distance options: `feet` (default) or `metres`.
    #[arg(long = ARG_DISTANCE_UNIT, value_name = "unit")]
    #[serde(default)]
    pub(crate) distance_unit: Option<String>,
    /// Buffer distance for point and line members of the planning layer.
    #[arg(long = ARG_PLANNING_DISTANCE, value_name = "distance")]
    #[serde(default)]
    pub(crate) planning_distance: Option<f64>,
    /// Working reference system, for example `EPSG:32633`.
    #[arg(long = ARG_WORKING_CRS, value_name = "crs")]
    #[serde(default)]
    pub(crate) working_crs: Option<String>,
    /// Reference system assumed for features that declare none.
    #[arg(long = ARG_FALLBACK_CRS, value_name = "crs")]
    #[serde(default)]
    pub(crate) fallback_crs: Option<String>,
    /// Number of worker threads.
    #[arg(long = ARG_WORKERS, value_name = "count")]
    #[serde(default)]
    pub(crate) workers: Option<usize>,
    /// Number of reports processed by one job.
    #[arg(long = ARG_BATCH_SIZE, value_name = "count")]
    #[serde(default)]
    pub(crate) batch_size: Option<usize>,
    /// Fail the run on the first failed job.
    #[arg(long = ARG_FAIL_FAST)]
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) fail_fast: bool,
    /// Run everything but skip writing output and audit records.
    #[arg(long = ARG_DRY_RUN)]
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) dry_run: bool,
    /// Buffer end cap: `round`, `flat` or `square`.
    #[arg(long = ARG_CAP, value_name = "style")]
    #[serde(default)]
    pub(crate) cap: Option<String>,
    /// Buffer corner join: `round`, `bevel`, `mitre` or `mitre:<limit>`.
    #[arg(long = ARG_JOIN, value_name = "style")]
    #[serde(default)]
    pub(crate) join: Option<String>,
    /// GeoJSON layer of existing lines, processed as the first report.
    #[arg(long = ARG_BASE_LAYER, value_name = "path")]
    #[serde(default)]
    pub(crate) base_layer: Option<Utf8PathBuf>,
    /// GeoJSON layer of planned development merged into the corridor.
    #[arg(long = ARG_PLANNING_LAYER, value_name = "path")]
    #[serde(default)]
    pub(crate) planning_layer: Option<Utf8PathBuf>,
    /// GeoJSON layer of protected areas removed from the corridor.
    #[arg(long = ARG_EXCLUSION_LAYER, value_name = "path")]
    #[serde(default)]
    pub(crate) exclusion_layer: Option<Utf8PathBuf>,
    /// SQLite database recording runs and feature identities.
    #[arg(long = ARG_AUDIT_DB, value_name = "path")]
    #[serde(default)]
    pub(crate) audit_db: Option<Utf8PathBuf>,
    /// Write a JSON run summary to this path.
    #[arg(long = ARG_SUMMARY, value_name = "path")]
    #[serde(default)]
    pub(crate) summary: Option<Utf8PathBuf>,
}

impl ConsolidateArgs {
    fn into_config(self) -> Result<ConsolidateConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ConsolidateConfig::try_from(merged)
    }
}

/// Unit of the distance options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum DistanceUnit {
    #[default]
    Feet,
    Metres,
}

impl DistanceUnit {
    const fn metres(self, value: f64) -> f64 {
        match self {
            Self::Feet => value * 0.3048,
            Self::Metres => value,
        }
    }
}

impl FromStr for DistanceUnit {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ft" | "foot" | "feet" => Ok(Self::Feet),
            "m" | "metre" | "metres" | "meter" | "meters" => Ok(Self::Metres),
            _ => Err(CliError::UnknownDistanceUnit {
                value: s.to_owned(),
            }),
        }
    }
}

/// Resolved `consolidate` command configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ConsolidateConfig {
    /// Folder scanned for reports.
    pub(crate) input: Utf8PathBuf,
    /// Output destination; absent only for dry runs.
    pub(crate) output: Option<OutputTarget>,
    /// Values handed to the pipeline.
    pub(crate) pipeline: PipelineConfig,
    pub(crate) base_layer: Option<Utf8PathBuf>,
    pub(crate) planning_layer: Option<Utf8PathBuf>,
    pub(crate) exclusion_layer: Option<Utf8PathBuf>,
    pub(crate) audit_db: Option<Utf8PathBuf>,
    pub(crate) summary: Option<Utf8PathBuf>,
}

impl ConsolidateConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        match corridor_fs::dir_is_dir(&self.input) {
            Ok(true) => {}
            Ok(false) => {
                return Err(CliError::MissingInputFolder {
                    field: ARG_INPUT,
                    path: self.input.clone(),
                });
            }
            Err(source) => {
                return Err(CliError::InspectSourcePath {
                    field: ARG_INPUT,
                    path: self.input.clone(),
                    source,
                });
            }
        }
        for (field, layer) in [
            (ARG_BASE_LAYER, &self.base_layer),
            (ARG_PLANNING_LAYER, &self.planning_layer),
            (ARG_EXCLUSION_LAYER, &self.exclusion_layer),
        ] {
            if let Some(path) = layer {
                Self::require_existing(path, field)?;
            }
        }
        Ok(())
    }

    fn require_existing(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
        let inspect = |source| CliError::InspectSourcePath {
            field,
            path: path.to_path_buf(),
            source,
        };
        if corridor_fs::file_is_file(path).map_err(inspect)? {
            return Ok(());
        }
        if corridor_fs::dir_is_dir(path).map_err(inspect)? {
            Err(CliError::SourcePathNotFile {
                field,
                path: path.to_path_buf(),
            })
        } else {
            Err(CliError::MissingSourceFile {
                field,
                path: path.to_path_buf(),
            })
        }
    }
}

impl TryFrom<ConsolidateArgs> for ConsolidateConfig {
    type Error = CliError;

    fn try_from(args: ConsolidateArgs) -> Result<Self, Self::Error> {
        let input = args.input.ok_or(CliError::MissingArgument {
            field: ARG_INPUT,
            env: ENV_INPUT,
        })?;
        let output = match args.output {
            Some(path) => Some(output_target(
                path,
                args.format.as_deref(),
                args.overwrite.as_deref(),
            )?),
            None if args.dry_run => None,
            None => {
                return Err(CliError::MissingArgument {
                    field: ARG_OUTPUT,
                    env: ENV_OUTPUT,
                });
            }
        };

        let unit = args
            .distance_unit
            .as_deref()
            .map(DistanceUnit::from_str)
            .transpose()?
            .unwrap_or_default();
        let mut pipeline = PipelineConfig {
            fail_fast: args.fail_fast,
            dry_run: args.dry_run,
            buffer_shape: buffer_shape(args.cap.as_deref(), args.join.as_deref())?,
            ..PipelineConfig::default()
        };
        if let Some(distance) = args.distance {
            pipeline.buffer_distance = unit.metres(distance);
        }
        if let Some(distance) = args.planning_distance {
            pipeline.planning_buffer_distance = unit.metres(distance);
        }
        if let Some(crs) = args.working_crs.as_deref() {
            pipeline.working_crs = parse_crs(ARG_WORKING_CRS, crs)?;
        }
        pipeline.fallback_crs = args
            .fallback_crs
            .as_deref()
            .map(|crs| parse_crs(ARG_FALLBACK_CRS, crs))
            .transpose()?;
        if let Some(workers) = args.workers {
            pipeline.workers = workers;
        }
        if let Some(batch_size) = args.batch_size {
            pipeline.batch_size = batch_size;
        }

        Ok(Self {
            input,
            output,
            pipeline,
            base_layer: args.base_layer,
            planning_layer: args.planning_layer,
            exclusion_layer: args.exclusion_layer,
            audit_db: args.audit_db,
            summary: args.summary,
        })
    }
}

fn output_target(
    path: Utf8PathBuf,
    format: Option<&str>,
    overwrite: Option<&str>,
) -> Result<OutputTarget, CliError> {
    let format = match format {
        Some(name) => name.parse().map_err(|source| CliError::InvalidOption {
            field: ARG_FORMAT,
            source,
        })?,
        None => infer_format(&path),
    };
    let overwrite = overwrite
        .map(OverwritePolicy::from_str)
        .transpose()
        .map_err(|source| CliError::InvalidOption {
            field: ARG_OVERWRITE,
            source,
        })?
        .unwrap_or_default();
    Ok(OutputTarget {
        path: path.into_std_path_buf(),
        format,
        overwrite,
    })
}

fn infer_format(path: &Utf8Path) -> OutputFormat {
    match path.extension().map(str::to_ascii_lowercase).as_deref() {
        Some("wkt" | "ewkt") => OutputFormat::Ewkt,
        _ => OutputFormat::GeoJson,
    }
}

fn buffer_shape(cap: Option<&str>, join: Option<&str>) -> Result<BufferShape, CliError> {
    let mut shape = BufferShape::default();
    if let Some(cap) = cap {
        shape.cap = cap
            .parse::<CapStyle>()
            .map_err(|source| CliError::InvalidStyle {
                field: ARG_CAP,
                source,
            })?;
    }
    if let Some(join) = join {
        shape.join = join
            .parse::<JoinStyle>()
            .map_err(|source| CliError::InvalidStyle {
                field: ARG_JOIN,
                source,
            })?;
    }
    Ok(shape)
}

fn parse_crs(field: &'static str, value: &str) -> Result<Crs, CliError> {
    value
        .parse()
        .map_err(|source| CliError::InvalidCrs { field, source })
}

/// Merge configuration layers and resolve the command settings.
pub(crate) fn resolve_consolidate_config(
    args: ConsolidateArgs,
) -> Result<ConsolidateConfig, CliError> {
    args.into_config()
}

pub(crate) fn run_consolidate(args: ConsolidateArgs) -> Result<RunReport, CliError> {
    let config = resolve_consolidate_config(args)?;
    execute(&config)
}

/// Run the pipeline described by `config`.
pub(crate) fn execute(config: &ConsolidateConfig) -> Result<RunReport, CliError> {
    config.validate_sources()?;

    let mut reports = Vec::new();
    if let Some(base) = &config.base_layer {
        let report = ReportRef::from_path(base.as_std_path())
            .filter(|report| report.format == ReportFormat::GeoJson)
            .ok_or_else(|| CliError::UnsupportedBaseLayer { path: base.clone() })?;
        reports.push(report);
    }
    reports.extend(discover_reports(&config.input)?);

    let source = FsReportSource;
    let prompt = StdinConfirm;
    let interactive = config
        .output
        .as_ref()
        .is_some_and(|target| target.overwrite == OverwritePolicy::Prompt)
        && io::stdin().is_terminal();
    let writer = if interactive {
        FileLayerWriter::with_confirmation(&prompt)
    } else {
        FileLayerWriter::new()
    };

    let mut pipeline = Pipeline::new(config.pipeline.clone(), &source);
    if let Some(target) = &config.output {
        pipeline = pipeline.with_output(&writer, target.clone());
    }
    if let Some(path) = &config.exclusion_layer {
        pipeline = pipeline.with_exclusion_layer(load_layer(ARG_EXCLUSION_LAYER, path)?);
    }
    if let Some(path) = &config.planning_layer {
        pipeline = pipeline.with_planning_layer(load_layer(ARG_PLANNING_LAYER, path)?);
    }
    pipeline = attach_audit(pipeline, config.audit_db.as_deref())?;

    let report = pipeline.run(&reports)?;
    if let Some(path) = &config.summary {
        write_run_summary(&report, path)?;
    }
    log_outcome(&report);
    Ok(report)
}

fn load_layer(field: &'static str, path: &Utf8Path) -> Result<GeometryLayer, CliError> {
    GeoJsonLayerLoader
        .load_layer(path.as_std_path())
        .map_err(|source| CliError::LoadLayer {
            field,
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(feature = "audit-sqlite")]
fn attach_audit<'a>(
    pipeline: Pipeline<'a>,
    path: Option<&Utf8Path>,
) -> Result<Pipeline<'a>, CliError> {
    match path {
        Some(path) => {
            let log = SqliteAuditLog::open(path).map_err(CliError::OpenAudit)?;
            Ok(pipeline.with_audit_sink(log))
        }
        None => Ok(pipeline),
    }
}

#[cfg(not(feature = "audit-sqlite"))]
fn attach_audit<'a>(
    pipeline: Pipeline<'a>,
    path: Option<&Utf8Path>,
) -> Result<Pipeline<'a>, CliError> {
    if path.is_some() {
        return Err(CliError::MissingFeature {
            feature: "audit-sqlite",
            action: "--audit-db",
        });
    }
    Ok(pipeline)
}

fn log_outcome(report: &RunReport) {
    let summary = &report.summary;
    log::info!(
        "run {} finished {}: {} reports in {} jobs ({} failed, {} cancelled)",
        report.run_id,
        report.outcome,
        summary.reports,
        summary.jobs,
        summary.jobs_failed,
        summary.jobs_cancelled
    );
    log::info!(
        "features: {} extracted, {} new, {} superseded, {} duplicates, {} rejected records, {} merged",
        summary.features_extracted,
        summary.accepted_new,
        summary.superseded,
        summary.duplicates,
        summary.records_rejected,
        summary.contributing_features
    );
    match &report.output {
        OutputStatus::Written { path } => log::info!("wrote corridor to {}", path.display()),
        OutputStatus::Failed { message } => log::error!("output not written: {message}"),
        OutputStatus::SkippedDryRun => log::info!("dry run; output not written"),
        OutputStatus::SkippedFailedRun | OutputStatus::NotConfigured => {}
    }
    if let Some(failure) = &report.failure {
        log::error!("run failed: {failure}");
    }
}

/// Asks on the terminal before an existing output is replaced.
struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm_overwrite(&self, path: &Path) -> io::Result<bool> {
        let mut stderr = io::stderr().lock();
        write!(stderr, "{} already exists. Overwrite? [y/N] ", path.display())?;
        stderr.flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(matches!(
            answer.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        ))
    }
}
