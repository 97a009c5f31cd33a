//! Clip metadata as reported by ffprobe.
//!
//! [`parse_probe_json`] maps `ffprobe -print_format json -show_format
//! -show_streams` output into a [`ClipProbe`]. Fields the pipeline may not
//! need are kept optional; the accessors that the normalizer relies on
//! return [`Error::MetadataParse`] when a field is absent.

use std::path::{Path, PathBuf};

use dayreel_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Color tags of the primary video stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTags {
    /// `color_primaries`, e.g. `bt709`, `bt2020`.
    pub primaries: Option<String>,
    /// `color_transfer`, e.g. `bt709`, `smpte2084`, `arib-std-b67`.
    pub transfer: Option<String>,
    /// `color_space`, e.g. `bt709`, `bt2020nc`.
    pub space: Option<String>,
}

impl ColorTags {
    /// Standard dynamic range BT.709 tags.
    pub fn bt709() -> Self {
        Self {
            primaries: Some("bt709".into()),
            transfer: Some("bt709".into()),
            space: Some("bt709".into()),
        }
    }

    /// Whether the tags indicate high-dynamic-range content.
    ///
    /// Any one of BT.2020 primaries, a PQ or HLG transfer, or a BT.2020
    /// non-constant-luminance matrix is enough.
    pub fn is_hdr(&self) -> bool {
        let primaries = self.primaries.as_deref().unwrap_or("");
        let transfer = self.transfer.as_deref().unwrap_or("");
        let space = self.space.as_deref().unwrap_or("");

        primaries == "bt2020"
            || transfer == "smpte2084"
            || transfer == "arib-std-b67"
            || space == "bt2020nc"
            || space == "bt2020_ncl"
    }
}

/// Metadata of one clip, read from its first video stream and container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipProbe {
    /// File that was probed.
    pub path: PathBuf,
    /// Coded width of the first video stream.
    pub width: Option<u32>,
    /// Coded height of the first video stream.
    pub height: Option<u32>,
    /// Display rotation in degrees, when tagged.
    pub rotation: Option<i32>,
    /// Color tags of the first video stream.
    pub color: ColorTags,
    /// Number of audio streams in the container.
    pub audio_streams: u32,
    /// Container duration in seconds.
    pub duration: Option<f64>,
}

impl ClipProbe {
    /// Whether the clip carries at least one audio stream.
    pub fn has_audio(&self) -> bool {
        self.audio_streams > 0
    }

    /// Whether the first video stream is HDR.
    pub fn is_hdr(&self) -> bool {
        self.color.is_hdr()
    }

    /// Coded `(width, height)`.
    pub fn dimensions(&self) -> Result<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Ok((w, h)),
            _ => Err(Error::metadata(format!(
                "{}: video stream has no usable dimensions",
                self.path.display()
            ))),
        }
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> Result<f64> {
        match self.duration {
            Some(d) if d.is_finite() && d > 0.0 => Ok(d),
            _ => Err(Error::metadata(format!(
                "{}: container reports no duration",
                self.path.display()
            ))),
        }
    }

    /// Rotation in degrees; untagged clips are upright.
    pub fn rotation_degrees(&self) -> i32 {
        self.rotation.unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    color_primaries: Option<String>,
    color_transfer: Option<String>,
    color_space: Option<String>,
    #[serde(default)]
    tags: FfprobeTags,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

/// Parse ffprobe JSON for `path`.
///
/// Fails with [`Error::MetadataParse`] when the text is not ffprobe JSON or
/// the file has no video stream.
pub fn parse_probe_json(path: &Path, json: &str) -> Result<ClipProbe> {
    let ff: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::metadata(format!("{}: ffprobe JSON parse error: {e}", path.display())))?;

    let video = ff
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| Error::metadata(format!("{}: no video stream", path.display())))?;

    let audio_streams = ff
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .count() as u32;

    let duration = ff
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok());

    Ok(ClipProbe {
        path: path.to_path_buf(),
        width: video.width,
        height: video.height,
        rotation: rotation_of(video),
        color: ColorTags {
            primaries: non_empty(&video.color_primaries),
            transfer: non_empty(&video.color_transfer),
            space: non_empty(&video.color_space),
        },
        audio_streams,
        duration,
    })
}

/// Display-matrix side data wins over the legacy `rotate` tag.
fn rotation_of(stream: &FfprobeStream) -> Option<i32> {
    stream
        .side_data_list
        .iter()
        .find_map(|sd| sd.rotation)
        .map(|r| r.round() as i32)
        .or_else(|| {
            stream
                .tags
                .rotate
                .as_deref()
                .and_then(|r| r.trim().parse::<i32>().ok())
        })
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|v| !v.is_empty() && *v != "unknown")
        .map(str::to_string)
}
