//! On-disk layout of the working set.
//!
//! Every piece of recoverable state lives under one work directory:
//!
//! ```text
//! <work_dir>/
//!   uploads/
//!     <index>.mp4             raw clip as uploaded
//!     <index>.lock            pending marker (exists while the clip is in flight)
//!     <index>_processed.mp4   canonical clip
//!   incoming/
//!     <n>.part                upload being received, index not yet known
//!   process.lock              merge marker
//!   videos_to_merge.txt       concat manifest
//!   combined_video.mp4        merged artifact
//! ```
//!
//! Marker files are signals by existence only; their content is never read.

use std::path::{Path, PathBuf};

const UPLOADS_DIR: &str = "uploads";
const CANONICAL_SUFFIX: &str = "_processed";
const CANONICAL_EXTENSIONS: &[&str] = &["mp4", "MP4", "mpd", "MPD"];
const MARKER_EXTENSION: &str = "lock";
const PARTIAL_TAG: &str = "partial";

/// Names every file the coordinator, normalizer and merge engine touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Create a layout rooted at `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: work_dir.into(),
        }
    }

    /// The work directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding raw clips, canonical clips and pending markers.
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    /// Raw upload for `index`.
    pub fn raw_clip(&self, index: u32) -> PathBuf {
        self.uploads_dir().join(format!("{index}.mp4"))
    }

    /// Pending marker for `index`.
    pub fn pending_marker(&self, index: u32) -> PathBuf {
        self.uploads_dir()
            .join(format!("{index}.{MARKER_EXTENSION}"))
    }

    /// Canonical (normalized) clip for `index`.
    pub fn canonical_clip(&self, index: u32) -> PathBuf {
        self.uploads_dir()
            .join(format!("{index}{CANONICAL_SUFFIX}.mp4"))
    }

    /// Staging directory for uploads still being received.
    pub fn incoming_dir(&self) -> PathBuf {
        self.root.join("incoming")
    }

    /// Staging file for the `n`th upload received by this process.
    pub fn incoming_upload(&self, n: u64) -> PathBuf {
        self.incoming_dir().join(format!("{n}.part"))
    }

    /// Global merge marker.
    pub fn merge_marker(&self) -> PathBuf {
        self.root.join("process.lock")
    }

    /// Concat manifest consumed by the merge engine.
    pub fn manifest(&self) -> PathBuf {
        self.root.join("videos_to_merge.txt")
    }

    /// Final merged artifact.
    pub fn merged_output(&self) -> PathBuf {
        self.root.join("combined_video.mp4")
    }
}

/// Extract the index from a canonical clip file name (`<digits>_processed.<ext>`).
///
/// # Examples
///
/// ```
/// use dayreel_common::layout::parse_canonical_index;
///
/// assert_eq!(parse_canonical_index("10_processed.mp4"), Some(10));
/// assert_eq!(parse_canonical_index("3_processed.MPD"), Some(3));
/// assert_eq!(parse_canonical_index("3.mp4"), None);
/// assert_eq!(parse_canonical_index("3_processed.partial.mp4"), None);
/// ```
pub fn parse_canonical_index(file_name: &str) -> Option<u32> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if !CANONICAL_EXTENSIONS.contains(&ext) {
        return None;
    }
    parse_digits(stem.strip_suffix(CANONICAL_SUFFIX)?)
}

/// Extract the index from a pending marker file name (`<digits>.lock`).
pub fn parse_marker_index(file_name: &str) -> Option<u32> {
    let stem = file_name.strip_suffix(MARKER_EXTENSION)?.strip_suffix('.')?;
    parse_digits(stem)
}

/// Extract the index from a raw clip file name (`<digits>.mp4`).
pub fn parse_raw_index(file_name: &str) -> Option<u32> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if !ext.eq_ignore_ascii_case("mp4") {
        return None;
    }
    parse_digits(stem)
}

/// Sibling path with a processing-stage suffix: `dir/7.mp4` + `sdr` -> `dir/7_sdr.mp4`.
pub fn stage_path(path: &Path, stage: &str) -> PathBuf {
    let (stem, ext) = stem_and_ext(path);
    path.with_file_name(format!("{stem}_{stage}.{ext}"))
}

/// Temporary sibling an artifact is written to before being renamed into place.
///
/// The extension is kept so the media engine still infers the container.
pub fn partial_path(path: &Path) -> PathBuf {
    let (stem, ext) = stem_and_ext(path);
    path.with_file_name(format!("{stem}.{PARTIAL_TAG}.{ext}"))
}

fn stem_and_ext(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_string());
    (stem, ext)
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
