//! Machine-readable run summaries.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use corridor_core::RunReport;
use thiserror::Error;

/// Errors raised while writing a run summary.
#[derive(Debug, Error)]
pub enum SummaryError {
    /// Serialising the report failed.
    #[error("failed to encode run summary for {path:?}")]
    Encode {
        /// Destination path.
        path: Utf8PathBuf,
        /// Source error produced by `serde_json`.
        #[source]
        source: serde_json::Error,
    },
    /// Writing the file failed.
    #[error("failed to write run summary to {path:?}")]
    Io {
        /// Destination path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Write `report` as pretty-printed JSON, replacing any existing file.
pub fn write_run_summary(report: &RunReport, path: &Utf8Path) -> Result<(), SummaryError> {
    let encoded = serde_json::to_vec_pretty(report).map_err(|source| SummaryError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    let io_error = |source| SummaryError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = corridor_fs::create_file(path, true).map_err(io_error)?;
    file.write_all(&encoded).map_err(io_error)?;
    file.write_all(b"\n").map_err(io_error)?;
    log::info!("wrote run summary to {path}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use corridor_core::{
        Pipeline, PipelineConfig, ReportRef, test_support::MemoryReportSource,
    };
    use rstest::rstest;

    #[rstest]
    fn summary_records_outcome_and_counters() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("out/summary.json"))
            .expect("utf-8 temp dir");
        let source = MemoryReportSource::new()
            .with_report("a.txt", "Name,Latitude,Longitude\n,52.0,15.0\nValve,52.0,15.0\n");
        let reports = vec![ReportRef::from_path("a.txt").expect("supported extension")];
        let report = Pipeline::new(PipelineConfig::default(), &source)
            .run(&reports)
            .expect("valid configuration");

        write_run_summary(&report, &path).expect("write summary");
        write_run_summary(&report, &path).expect("replace summary");

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).expect("read back")).expect("json");
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["summary"]["reports"], 1);
        assert_eq!(json["summary"]["records_rejected"], 1);
        assert_eq!(json["output"]["status"], "not_configured");
        assert_eq!(json["events"][0]["kind"], "record_rejected");
    }
}
