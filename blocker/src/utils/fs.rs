use std::fs::{self, create_dir_all, File};
use std::io::{self, ErrorKind, Write};
use std::path::Path;

use tempfile::NamedTempFile;

pub fn ensure_dir_exists(p: &Path) -> io::Result<()> {
    if p.exists() {
        return Ok(());
    }

    create_dir_all(p)
}

/// Check to see if the given pathlike type has the given extension
pub fn path_has_ext<P: AsRef<Path> + ?Sized>(p: &P, ext: &str) -> bool {
    let path = p.as_ref();
    path.extension().map_or(false, |it| it == ext)
}

/// Returns the file stem as a `&str`, or `None` for paths without a UTF-8
/// stem
pub fn path_stem_str(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|it| it.to_str())
}

fn missing_or_io(path: &Path, e: io::Error) -> crate::Error {
    match e.kind() {
        ErrorKind::NotFound => crate::Error::MissingFile(path.to_string_lossy().into_owned()),
        _ => e.into(),
    }
}

pub fn open_file(path: &Path) -> crate::Result<File> {
    File::open(path).map_err(|e| missing_or_io(path, e))
}

pub fn read_file(path: &Path) -> crate::Result<String> {
    fs::read_to_string(path).map_err(|e| missing_or_io(path, e))
}

pub fn read_file_bytes(path: &Path) -> crate::Result<Vec<u8>> {
    fs::read(path).map_err(|e| missing_or_io(path, e))
}

/// Writes `content` to a temporary file next to `path` and renames it into
/// place, so readers only ever see the old or the new content.
pub fn write_file_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Removes the file, treating a missing file as already removed
pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
