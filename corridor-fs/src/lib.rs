//! Capability-based filesystem helpers shared by the corridor adapters.
//!
//! Every helper resolves an ambient directory first and then works
//! relative to it through `cap-std`, so absolute and relative paths are
//! handled the same way.
#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io::{self, Read};
use std::path::Component;

/// Open a UTF-8 file path for reading.
pub fn open_utf8_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    fs_utf8::File::open_ambient(path, ambient_authority())
}

/// Read a whole file into memory.
pub fn read_file(path: &Utf8Path) -> io::Result<Vec<u8>> {
    let mut content = Vec::new();
    open_utf8_file(path)?.read_to_end(&mut content)?;
    Ok(content)
}

/// Open the directory containing `path` and return it with the file name.
pub fn open_dir_and_file(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other("path should include a file name"))?
        .to_string();
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, file_name))
}

/// Create every missing directory above `path`.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent == Utf8Path::new("/") {
        return Ok(());
    }

    let (base_dir, relative) = base_dir_and_relative(parent)?;
    if relative.as_os_str().is_empty() {
        return Ok(());
    }
    base_dir.create_dir_all(&relative)?;
    Ok(())
}

/// Whether `path` exists and is a regular file.
///
/// A missing parent directory counts as "not a file" rather than an error.
pub fn file_is_file(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = match open_dir_and_file(path) {
        Ok(opened) => opened,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    match dir.metadata(name.as_str()) {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Whether `path` exists and is a directory.
pub fn dir_is_dir(path: &Utf8Path) -> io::Result<bool> {
    match fs_utf8::Dir::open_ambient_dir(path, ambient_authority()) {
        Ok(dir) => dir.dir_metadata().map(|meta| meta.is_dir()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) if err.kind() == io::ErrorKind::NotADirectory => Ok(false),
        Err(err) => Err(err),
    }
}

/// Paths of the regular files directly inside `dir`, sorted by file name.
pub fn list_files(dir: &Utf8Path) -> io::Result<Vec<Utf8PathBuf>> {
    let opened = fs_utf8::Dir::open_ambient_dir(dir, ambient_authority())?;
    let mut files = Vec::new();
    for entry in opened.entries()? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(dir.join(entry.file_name()?));
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Create `path` for writing, creating parent directories first.
///
/// With `replace` unset an existing file is an
/// [`io::ErrorKind::AlreadyExists`] error; otherwise it is truncated.
pub fn create_file(path: &Utf8Path, replace: bool) -> io::Result<fs_utf8::File> {
    ensure_parent_dir(path)?;
    let (dir, name) = open_dir_and_file(path)?;
    if replace {
        dir.create(name.as_str())
    } else {
        let mut options = fs_utf8::OpenOptions::new();
        options.write(true).create_new(true);
        dir.open_with(name.as_str(), &options)
    }
}

/// Split a path into an ambient base directory and a relative suffix.
pub fn base_dir_and_relative(parent: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let std_parent = parent.as_std_path();

    let (base, relative) = match std_parent.components().next() {
        // Windows absolute path with a drive or UNC prefix.
        Some(Component::Prefix(prefix)) => {
            let prefix_str = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;

            let base = Utf8PathBuf::from(prefix_str).join(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_parent
                .strip_prefix(base.as_std_path())
                .or_else(|_| std_parent.strip_prefix(prefix.as_os_str()))
                .map_err(|_| io::Error::other("failed to strip prefix from parent path"))?
                .to_path_buf();
            (base, relative)
        }
        Some(Component::RootDir) => {
            let base = Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_parent
                .strip_prefix(base.as_std_path())
                .map_err(|_| io::Error::other("failed to strip root from absolute path"))?
                .to_path_buf();
            (base, relative)
        }
        _ => (Utf8PathBuf::from("."), std_parent.to_path_buf()),
    };

    let dir = fs_utf8::Dir::open_ambient_dir(&base, ambient_authority())?;
    let relative = Utf8PathBuf::from_path_buf(relative)
        .map_err(|_| io::Error::other("non-UTF-8 parent path"))?;

    Ok((dir, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::io::Write;
    use tempfile::TempDir;

    #[fixture]
    fn scratch() -> (TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        (dir, root)
    }

    #[rstest]
    fn creates_nested_parents(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        let target = root.join("a/b/out.geojson");
        ensure_parent_dir(&target).expect("create parents");
        assert!(dir_is_dir(&root.join("a/b")).expect("stat"));
        assert!(!file_is_file(&target).expect("stat"));
    }

    #[rstest]
    fn create_file_respects_replace(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        let target = root.join("nested/result.wkt");
        create_file(&target, false)
            .expect("create")
            .write_all(b"first")
            .expect("write");
        let err = create_file(&target, false).expect_err("exists");
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        create_file(&target, true)
            .expect("replace")
            .write_all(b"second")
            .expect("write");
        assert_eq!(read_file(&target).expect("read"), b"second");
    }

    #[rstest]
    fn lists_files_sorted_by_name(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        for name in ["b.txt", "a.geojson", "C.TXT"] {
            create_file(&root.join(name), false).expect("create");
        }
        ensure_parent_dir(&root.join("sub/x")).expect("subdir");
        let names: Vec<String> = list_files(&root)
            .expect("list")
            .iter()
            .filter_map(|p| p.file_name().map(str::to_owned))
            .collect();
        assert_eq!(names, ["C.TXT", "a.geojson", "b.txt"]);
    }

    #[rstest]
    fn missing_paths_are_neither_files_nor_dirs(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        let missing = root.join("missing/inner.txt");
        assert!(!file_is_file(&missing).expect("stat"));
        assert!(!dir_is_dir(&root.join("missing")).expect("stat"));
    }
}
