//! The Media Engine seam.
//!
//! Everything that decodes, filters or encodes goes through
//! [`MediaEngine`]. A [`TranscodeJob`] describes one ffmpeg invocation
//! declaratively: the argument vector is derived from it by
//! [`TranscodeJob::to_args`], so the stage builders in [`crate::actions`]
//! can be tested without running anything.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use dayreel_common::Result;

use crate::command::ToolCommand;
use crate::probe::{parse_probe_json, ClipProbe};
use crate::tools::ToolRegistry;

/// Probe and transcode media files.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Read the metadata of a clip.
    async fn probe(&self, path: &Path) -> Result<ClipProbe>;

    /// Run one transcode to completion. On success `job.output` exists.
    async fn transcode(&self, job: &TranscodeJob) -> Result<()>;
}

/// One input of a [`TranscodeJob`] with its input-side options.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeInput {
    /// Options placed before `-i` (format, duration, demuxer flags).
    pub options: Vec<String>,
    /// File path or lavfi graph.
    pub source: String,
}

impl TranscodeInput {
    /// A plain media file.
    pub fn file(path: &Path) -> Self {
        Self {
            options: Vec::new(),
            source: path.to_string_lossy().to_string(),
        }
    }

    /// A synthetic lavfi source, optionally bounded to `duration` seconds.
    pub fn lavfi(graph: impl Into<String>, duration: Option<f64>) -> Self {
        let mut options = vec!["-f".to_string(), "lavfi".to_string()];
        if let Some(d) = duration {
            options.push("-t".to_string());
            options.push(format_seconds(d));
        }
        Self {
            options,
            source: graph.into(),
        }
    }

    /// A concat demuxer manifest. Paths inside may be relative or absolute.
    pub fn concat(manifest: &Path) -> Self {
        Self {
            options: ["-f", "concat", "-safe", "0", "-fflags", "+genpts"]
                .into_iter()
                .map(String::from)
                .collect(),
            source: manifest.to_string_lossy().to_string(),
        }
    }

    /// Whether this input is a media file on disk (as opposed to lavfi).
    pub fn is_file(&self) -> bool {
        !self.options.iter().any(|o| o == "lavfi")
    }
}

/// A declarative ffmpeg invocation: inputs, filters, stream maps, codec
/// options and one output file.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    /// Stage name for logs, e.g. `audio-repair`.
    pub stage: String,
    /// Options placed before every input, e.g. hardware decode.
    pub global_args: Vec<String>,
    pub inputs: Vec<TranscodeInput>,
    pub video_filter: Option<String>,
    pub audio_filter: Option<String>,
    /// `-map` specifiers in order.
    pub maps: Vec<String>,
    /// Encoder selection and quality options.
    pub codec_args: Vec<String>,
    /// Remaining output options (`-t`, `-r`, `-movflags`, ...).
    pub output_args: Vec<String>,
    pub output: PathBuf,
}

impl TranscodeJob {
    /// Start a job for `stage` writing to `output`.
    pub fn new(stage: impl Into<String>, output: &Path) -> Self {
        Self {
            stage: stage.into(),
            global_args: Vec::new(),
            inputs: Vec::new(),
            video_filter: None,
            audio_filter: None,
            maps: Vec::new(),
            codec_args: Vec::new(),
            output_args: Vec::new(),
            output: output.to_path_buf(),
        }
    }

    pub fn global_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.global_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn input(mut self, input: TranscodeInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn video_filter(mut self, filter: impl Into<String>) -> Self {
        self.video_filter = Some(filter.into());
        self
    }

    pub fn audio_filter(mut self, filter: impl Into<String>) -> Self {
        self.audio_filter = Some(filter.into());
        self
    }

    pub fn map(mut self, spec: impl Into<String>) -> Self {
        self.maps.push(spec.into());
        self
    }

    pub fn codec_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.codec_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn output_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Redirect the output to another path, keeping everything else.
    pub fn with_output(mut self, output: &Path) -> Self {
        self.output = output.to_path_buf();
        self
    }

    /// First file input, if any.
    pub fn primary_input(&self) -> Option<&str> {
        self.inputs
            .iter()
            .find(|i| i.is_file())
            .map(|i| i.source.as_str())
    }

    /// Value following `flag` in the output-side arguments.
    pub fn output_option(&self, flag: &str) -> Option<&str> {
        let args: Vec<&str> = self
            .codec_args
            .iter()
            .chain(&self.output_args)
            .map(String::as_str)
            .collect();
        args.windows(2).find(|w| w[0] == flag).map(|w| w[1])
    }

    /// Full ffmpeg argument vector (without the program name).
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y"]
            .into_iter()
            .map(String::from)
            .collect();
        args.extend(self.global_args.iter().cloned());

        for input in &self.inputs {
            args.extend(input.options.iter().cloned());
            args.push("-i".into());
            args.push(input.source.clone());
        }

        if let Some(ref vf) = self.video_filter {
            args.push("-vf".into());
            args.push(vf.clone());
        }
        if let Some(ref af) = self.audio_filter {
            args.push("-af".into());
            args.push(af.clone());
        }
        for spec in &self.maps {
            args.push("-map".into());
            args.push(spec.clone());
        }

        args.extend(self.codec_args.iter().cloned());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

impl fmt::Display for TranscodeJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ffmpeg {}", self.to_args().join(" "))
    }
}

/// Seconds with millisecond precision, trailing zeros trimmed.
pub fn format_seconds(secs: f64) -> String {
    let s = format!("{secs:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// [`MediaEngine`] backed by the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Duration,
}

impl FfmpegEngine {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, timeout: Duration) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            timeout,
        }
    }

    /// Build an engine from discovered tools. Fails if either is missing.
    pub fn from_registry(tools: &ToolRegistry, timeout: Duration) -> Result<Self> {
        Ok(Self::new(
            tools.require("ffmpeg")?.to_path_buf(),
            tools.require("ffprobe")?.to_path_buf(),
            timeout,
        ))
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn probe(&self, path: &Path) -> Result<ClipProbe> {
        let mut cmd = ToolCommand::new(self.ffprobe.clone());
        cmd.args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]);
        cmd.arg(path.to_string_lossy().as_ref());
        cmd.timeout(self.timeout);

        let output = cmd.execute().await?;
        parse_probe_json(path, &output.stdout)
    }

    async fn transcode(&self, job: &TranscodeJob) -> Result<()> {
        let started = std::time::Instant::now();
        tracing::debug!(stage = %job.stage, command = %job, "Running transcode");

        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.args(job.to_args());
        cmd.timeout(self.timeout);
        cmd.execute().await?;

        tracing::info!(
            stage = %job.stage,
            output = %job.output.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transcode complete"
        );
        Ok(())
    }
}
