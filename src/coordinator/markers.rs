//! Existence-based marker files.
//!
//! A marker's presence is the whole signal. [`try_acquire`] is the
//! compare-and-create used to arbitrate the merge: `create_new` fails
//! atomically when the file already exists, so exactly one caller wins.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use dayreel_common::layout::parse_marker_index;

/// Create `path` if absent. Returns `true` when this call created it.
pub fn try_acquire(path: &Path) -> io::Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create or refresh `path`, resetting its modification time.
pub fn touch(path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    file.set_modified(SystemTime::now())
}

/// Remove `path`; a missing marker is already released.
pub fn release(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Time since `path` was last modified, or `None` if it does not exist.
pub fn age(path: &Path) -> io::Result<Option<Duration>> {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let modified = meta.modified()?;
            Ok(Some(
                SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO),
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Indices of every pending marker in `dir`, ascending. A missing directory
/// holds no markers.
pub fn pending_indices(dir: &Path) -> io::Result<Vec<u32>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut indices = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(index) = parse_marker_index(&entry.file_name().to_string_lossy()) {
            indices.push(index);
        }
    }
    indices.sort_unstable();
    Ok(indices)
}
