//! Test helpers for laying out report folders and auxiliary layers.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tempfile::TempDir;

/// A scratch workspace holding a report folder.
pub(super) struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 workspace");
        fs::create_dir_all(root.join("reports")).expect("create report folder");
        Self { _dir: dir, root }
    }

    pub(super) fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub(super) fn reports(&self) -> Utf8PathBuf {
        self.root.join("reports")
    }

    pub(super) fn output(&self) -> Utf8PathBuf {
        self.root.join("out/corridor.geojson")
    }

    pub(super) fn add_valve_report(&self, name: &str, lat: f64, lon: f64) {
        write_utf8(
            &self.reports().join(format!("{name}.txt")),
            format!("Name,Latitude,Longitude\n{name},{lat},{lon}\n").as_bytes(),
        );
    }

    /// A base layer holding one 100 m main near the valve reports.
    pub(super) fn write_base_layer(&self) -> Utf8PathBuf {
        let path = self.root.join("layers/base.geojson");
        write_utf8(
            &path,
            br#"{
                "type": "FeatureCollection",
                "crs": {"type": "name", "properties": {"name": "EPSG:32633"}},
                "features": [{
                    "type": "Feature",
                    "properties": {"Name": "Main 1"},
                    "geometry": {"type": "LineString", "coordinates": [[500000, 5761000], [500100, 5761000]]}
                }]
            }"#,
        );
        path
    }
}

pub(super) fn write_utf8(path: &Utf8Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent directory");
    }
    fs::write(path, contents).expect("write test file");
}
