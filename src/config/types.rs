use chrono::NaiveDate;
use dayreel_av::{MergeSettings, NormalizeSettings};
use dayreel_common::Quality;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub clips: ClipsConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

impl Config {
    /// Settings handed to the clip normalizer.
    pub fn normalize_settings(&self) -> NormalizeSettings {
        NormalizeSettings {
            width: self.render.width,
            height: self.render.height,
            framerate: self.render.framerate,
            font: self.render.font.clone(),
            font_size: self.render.font_size,
            bevel: self.render.bevel,
            quality: self.render.clip_quality,
            hw_accel: self.render.hw_accel(),
            forced_duration_secs: self.render.force_duration_secs,
            delete_intermediate_files: self.storage.delete_intermediate_files,
        }
    }

    /// Settings handed to the merge engine.
    pub fn merge_settings(&self) -> MergeSettings {
        MergeSettings {
            framerate: self.render.framerate,
            quality: self.render.merge_quality,
            hw_accel: self.render.hw_accel(),
            delete_intermediate_files: self.storage.delete_intermediate_files,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted upload body in MiB
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_upload_mb() -> u64 {
    2048
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClipsConfig {
    /// Date of clip 1; clip N is labelled `start_date + (N - 1)` days
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,

    /// Expected number of clips, used for progress until a plan arrives
    #[serde(default)]
    pub expected_total: Option<u32>,

    /// Keep a copy of every raw upload here as `<index>.mp4`
    #[serde(default)]
    pub copy_originals_to: Option<PathBuf>,
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default()
}

impl Default for ClipsConfig {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            expected_total: None,
            copy_originals_to: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenderConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_framerate")]
    pub framerate: u32,

    /// Font family, or a path to a .ttf/.otf/.ttc file
    #[serde(default = "default_font")]
    pub font: String,

    #[serde(default = "default_font_size")]
    pub font_size: u32,

    /// Watermark shadow offset (default: font_size / 30)
    #[serde(default)]
    pub bevel: Option<u32>,

    /// Codec policy for each clip: true, false, or a level >= 1
    #[serde(default)]
    pub clip_quality: Quality,

    /// Codec policy for the merged video
    #[serde(default)]
    pub merge_quality: Quality,

    /// nvenc, qsv, videotoolbox or none (default: software libx264)
    #[serde(default)]
    pub hw_accel: Option<String>,

    /// Cut every clip to this many seconds
    #[serde(default)]
    pub force_duration_secs: Option<f64>,
}

fn default_width() -> u32 {
    1080
}
fn default_height() -> u32 {
    1920
}
fn default_framerate() -> u32 {
    30
}
fn default_font() -> String {
    "Arial".to_string()
}
fn default_font_size() -> u32 {
    100
}

impl RenderConfig {
    /// Hardware acceleration choice with `none` folded into `None`.
    pub fn hw_accel(&self) -> Option<String> {
        self.hw_accel
            .as_deref()
            .filter(|hw| !hw.eq_ignore_ascii_case("none"))
            .map(str::to_string)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            framerate: default_framerate(),
            font: default_font(),
            font_size: default_font_size(),
            bevel: None,
            clip_quality: Quality::default(),
            merge_quality: Quality::default(),
            hw_accel: None,
            force_duration_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root of the recoverable working set
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Directory that receives result.mp4 when the run completes
    #[serde(default)]
    pub save_result_to: Option<PathBuf>,

    #[serde(default = "default_delete_intermediate_files")]
    pub delete_intermediate_files: bool,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("tmp")
}
fn default_delete_intermediate_files() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            save_result_to: None,
            delete_intermediate_files: default_delete_intermediate_files(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// Limit for a single probe or transcode
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    3600
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoordinatorConfig {
    /// Run one clip normalization at a time (single hardware encoder)
    #[serde(default = "default_serialize_transcodes")]
    pub serialize_transcodes: bool,

    /// How long an unattended marker may sit before it is reported stalled
    #[serde(default = "default_stall_grace_secs")]
    pub stall_grace_secs: u64,
}

fn default_serialize_transcodes() -> bool {
    true
}
fn default_stall_grace_secs() -> u64 {
    900
}

impl CoordinatorConfig {
    pub fn stall_grace(&self) -> Duration {
        Duration::from_secs(self.stall_grace_secs)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            serialize_transcodes: default_serialize_transcodes(),
            stall_grace_secs: default_stall_grace_secs(),
        }
    }
}
