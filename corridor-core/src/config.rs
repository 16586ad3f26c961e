//! Values the pipeline consumes from its configuration surface.
//!
//! Loading these values from files, the environment or the command line
//! happens outside the core; [`PipelineConfig::validate`] is the single
//! gate every run passes before any processing starts.

use std::{fmt, num::NonZeroUsize};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{BufferShape, Crs};

/// Default buffer distance: 25 ft expressed in metres.
pub const DEFAULT_BUFFER_DISTANCE: f64 = 7.62;
/// Default working system: UTM zone 33N.
pub const DEFAULT_WORKING_CRS: Crs = Crs::Utm {
    zone: 33,
    north: true,
};
/// Default number of worker threads.
pub const DEFAULT_WORKERS: usize = 5;
/// Default buffer distance applied to point and line planning members.
pub const DEFAULT_PLANNING_BUFFER_DISTANCE: f64 = 10.0;
/// Buffer distance applied to line members of the exclusion layer.
pub const EXCLUSION_LINE_BUFFER_DISTANCE: f64 = 5.0;

/// Run-wide pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Buffer distance in the working system's linear unit.
    pub buffer_distance: f64,
    /// System every geometry is reconciled into.
    pub working_crs: Crs,
    /// System assumed for features that declare none.
    pub fallback_crs: Option<Crs>,
    /// Upper bound on concurrently running jobs.
    pub workers: usize,
    /// Number of reports grouped into one job.
    pub batch_size: usize,
    /// Cancel pending jobs and fail the run on the first job failure.
    pub fail_fast: bool,
    /// Run the pipeline but skip the output and audit writes.
    pub dry_run: bool,
    /// Cap and join style applied to every buffer in the run.
    pub buffer_shape: BufferShape,
    /// Buffer distance for point and line members of the planning layer.
    pub planning_buffer_distance: f64,
    /// Polygons smaller than this area are dropped from the result.
    pub area_tolerance: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_distance: DEFAULT_BUFFER_DISTANCE,
            working_crs: DEFAULT_WORKING_CRS,
            fallback_crs: None,
            workers: DEFAULT_WORKERS,
            batch_size: 1,
            fail_fast: false,
            dry_run: false,
            buffer_shape: BufferShape::default(),
            planning_buffer_distance: DEFAULT_PLANNING_BUFFER_DISTANCE,
            area_tolerance: 1e-9,
        }
    }
}

/// Fatal configuration problems, reported before any processing begins.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A buffer distance was negative or not finite.
    #[error("{field} must be a finite, non-negative distance (got {value})")]
    InvalidDistance {
        /// Offending setting.
        field: &'static str,
        /// Offending value.
        value: f64,
    },
    /// The worker pool size was zero.
    #[error("worker count must be at least 1")]
    NoWorkers,
    /// The batch size was zero.
    #[error("batch size must be at least 1")]
    EmptyBatch,
    /// The mitre limit was not a positive finite number.
    #[error("mitre limit must be positive and finite (got {0})")]
    InvalidMitreLimit(f64),
    /// The area tolerance was negative or not finite.
    #[error("area tolerance must be finite and non-negative (got {0})")]
    InvalidAreaTolerance(f64),
}

/// Non-fatal configuration findings surfaced in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigWarning {
    /// The working system is geographic, so distances are not linear.
    GeographicWorkingCrs {
        /// The configured system.
        crs: Crs,
    },
    /// More workers were requested than the host can run in parallel.
    WorkersCapped {
        /// Requested pool size.
        requested: usize,
        /// Effective pool size.
        effective: usize,
    },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GeographicWorkingCrs { crs } => write!(
                f,
                "working system {crs} is geographic; buffer distances are in degrees and not linear-accurate"
            ),
            Self::WorkersCapped {
                requested,
                effective,
            } => write!(
                f,
                "{requested} workers requested but only {effective} can run in parallel"
            ),
        }
    }
}

fn check_distance(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidDistance { field, value })
    }
}

impl PipelineConfig {
    /// Check every setting, returning warnings for suspicious but usable values.
    ///
    /// # Examples
    ///
    /// ```
    /// use corridor_core::{ConfigError, ConfigWarning, Crs, PipelineConfig};
    ///
    /// let mut config = PipelineConfig::default();
    /// assert!(config.validate().unwrap().is_empty());
    ///
    /// config.working_crs = Crs::Wgs84;
    /// let warnings = config.validate().unwrap();
    /// assert!(matches!(warnings[0], ConfigWarning::GeographicWorkingCrs { .. }));
    ///
    /// config.buffer_distance = -1.0;
    /// assert!(matches!(config.validate(), Err(ConfigError::InvalidDistance { .. })));
    /// ```
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        check_distance("buffer_distance", self.buffer_distance)?;
        check_distance("planning_buffer_distance", self.planning_buffer_distance)?;
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::EmptyBatch);
        }
        if !(self.area_tolerance.is_finite() && self.area_tolerance >= 0.0) {
            return Err(ConfigError::InvalidAreaTolerance(self.area_tolerance));
        }
        self.buffer_shape.validate()?;

        let mut warnings = Vec::new();
        if !self.working_crs.is_projected() {
            warnings.push(ConfigWarning::GeographicWorkingCrs {
                crs: self.working_crs,
            });
        }
        Ok(warnings)
    }

    /// Effective worker count: the configured value capped by host parallelism.
    #[must_use]
    pub fn effective_workers(&self) -> (usize, Option<ConfigWarning>) {
        let available = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        let requested = self.workers.max(1);
        if requested > available {
            (
                available,
                Some(ConfigWarning::WorkersCapped {
                    requested,
                    effective: available,
                }),
            )
        } else {
            (requested, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CapStyle, JoinStyle};
    use rstest::rstest;

    #[rstest]
    #[case(f64::NAN)]
    #[case(-0.5)]
    #[case(f64::INFINITY)]
    fn rejects_bad_buffer_distances(#[case] distance: f64) {
        let config = PipelineConfig {
            buffer_distance: distance,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDistance {
                field: "buffer_distance",
                ..
            })
        ));
    }

    #[rstest]
    fn accepts_zero_distance() {
        let config = PipelineConfig {
            buffer_distance: 0.0,
            ..PipelineConfig::default()
        };
        assert_eq!(config.validate(), Ok(Vec::new()));
    }

    #[rstest]
    fn rejects_empty_pool_and_batch() {
        let no_workers = PipelineConfig {
            workers: 0,
            ..PipelineConfig::default()
        };
        assert_eq!(no_workers.validate(), Err(ConfigError::NoWorkers));
        let no_batch = PipelineConfig {
            batch_size: 0,
            ..PipelineConfig::default()
        };
        assert_eq!(no_batch.validate(), Err(ConfigError::EmptyBatch));
    }

    #[rstest]
    fn rejects_non_positive_mitre_limit() {
        let config = PipelineConfig {
            buffer_shape: BufferShape {
                cap: CapStyle::Flat,
                join: JoinStyle::Mitre { limit: 0.0 },
            },
            ..PipelineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidMitreLimit(0.0)));
    }

    #[rstest]
    fn caps_workers_at_host_parallelism() {
        let config = PipelineConfig {
            workers: usize::MAX,
            ..PipelineConfig::default()
        };
        let (effective, warning) = config.effective_workers();
        assert!(effective >= 1);
        assert!(matches!(warning, Some(ConfigWarning::WorkersCapped { .. })));
    }

    #[rstest]
    fn deserialises_partial_settings_over_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"buffer_distance": 3.0, "working_crs": "EPSG:3857"}"#)
                .expect("valid settings");
        assert_eq!(config.working_crs, Crs::WebMercator);
        assert_eq!(config.workers, DEFAULT_WORKERS);
    }
}
