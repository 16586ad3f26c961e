//! Report discovery and the filesystem report source.

use std::{io, path::Path};

use camino::{Utf8Path, Utf8PathBuf};
use corridor_core::{ReportRef, ReportSource, ReportSourceError};
use thiserror::Error;

/// Errors raised while scanning an input folder.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The input folder does not exist.
    #[error("input folder {path:?} does not exist")]
    Missing {
        /// Folder that was scanned.
        path: Utf8PathBuf,
    },
    /// The folder could not be listed.
    #[error("failed to list input folder {path:?}")]
    Io {
        /// Folder that was scanned.
        path: Utf8PathBuf,
        /// IO error.
        #[source]
        source: io::Error,
    },
}

/// List the reports in `folder`, sorted by file name.
///
/// Only `.txt` and `.geojson` files directly inside the folder are
/// returned; sub-directories are not searched. An empty folder yields an
/// empty list.
pub fn discover_reports(folder: &Utf8Path) -> Result<Vec<ReportRef>, DiscoveryError> {
    let io_error = |source| DiscoveryError::Io {
        path: folder.to_path_buf(),
        source,
    };
    if !corridor_fs::dir_is_dir(folder).map_err(io_error)? {
        return Err(DiscoveryError::Missing {
            path: folder.to_path_buf(),
        });
    }
    let reports: Vec<ReportRef> = corridor_fs::list_files(folder)
        .map_err(io_error)?
        .into_iter()
        .filter_map(|path| ReportRef::from_path(path.into_std_path_buf()))
        .collect();
    log::info!("found {} reports in {folder}", reports.len());
    Ok(reports)
}

/// Serves report bytes straight from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsReportSource;

impl ReportSource for FsReportSource {
    fn open_report(&self, report: &ReportRef) -> Result<Box<dyn io::Read + '_>, ReportSourceError> {
        let path = utf8(&report.path).map_err(|source| ReportSourceError::Io {
            path: report.path.clone(),
            source,
        })?;
        match corridor_fs::open_utf8_file(path) {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(ReportSourceError::NotFound {
                path: report.path.clone(),
            }),
            Err(source) => Err(ReportSourceError::Io {
                path: report.path.clone(),
                source,
            }),
        }
    }
}

/// View a standard path as UTF-8, failing with an IO error otherwise.
pub(crate) fn utf8(path: &Path) -> io::Result<&Utf8Path> {
    Utf8Path::from_path(path)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path is not valid UTF-8"))
}
