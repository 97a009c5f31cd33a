//! Clip Normalizer: one raw clip in, one canonical clip out.
//!
//! Stages run in a fixed order and each is skipped when its precondition
//! already holds:
//!
//! 1. audio repair (silent stereo track when the clip has no audio);
//! 2. HDR to SDR tone-mapping;
//! 3. aspect-preserving fit into the output frame;
//! 4. date watermark;
//! 5. constant frame rate encode with the configured quality policy.
//!
//! Stages 3 to 5 share one final transcode. Intermediate files from stages
//! 1 and 2 sit next to the raw clip under stage-suffixed names and are
//! removed once superseded when `delete_intermediate_files` is set.

use std::path::{Path, PathBuf};

use dayreel_common::layout::{stage_path, StorageLayout};
use dayreel_common::{Quality, Result};

use crate::actions::{
    canonical_audio_args, constant_frame_rate_args, effective_dimensions, fit_within,
    resolve_hw_accel, silent_track_job, tonemap_job, video_codec_args, watermark_filter,
};
use crate::artifact::{remove_if_exists, PartialArtifact};
use crate::engine::{format_seconds, MediaEngine, TranscodeInput, TranscodeJob};
use crate::probe::ClipProbe;

/// Output format and retention settings for [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeSettings {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Font family name or font file path.
    pub font: String,
    pub font_size: u32,
    /// Shadow offset; `font_size / 30` when unset.
    pub bevel: Option<u32>,
    pub quality: Quality,
    /// `nvenc`, `qsv`, `videotoolbox`, or `None` for libx264.
    pub hw_accel: Option<String>,
    /// Hard cap on the canonical clip length.
    pub forced_duration_secs: Option<f64>,
    /// Remove superseded intermediates and, after success, the raw clip.
    pub delete_intermediate_files: bool,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            framerate: 30,
            font: "Arial".to_string(),
            font_size: 100,
            bevel: None,
            quality: Quality::Lossless,
            hw_accel: None,
            forced_duration_secs: None,
            delete_intermediate_files: true,
        }
    }
}

/// Normalize `raw` into `output`, burning in `label`.
///
/// Returns the canonical clip path. `output` only exists once the final
/// encode succeeded.
///
/// # Errors
///
/// - [`Error::MediaEngine`](dayreel_common::Error::MediaEngine) when any
///   probe or transcode fails.
/// - [`Error::MetadataParse`](dayreel_common::Error::MetadataParse) when the
///   probe lacks dimensions or (for audio repair) a duration.
pub async fn normalize(
    engine: &dyn MediaEngine,
    raw: &Path,
    output: &Path,
    label: &str,
    settings: &NormalizeSettings,
) -> Result<PathBuf> {
    let mut stages = StageChain::new(raw, settings.delete_intermediate_files);

    let mut probe = engine.probe(raw).await?;

    if !probe.has_audio() {
        let duration = probe.duration_secs()?;
        let next = stage_path(stages.current(), "with_audio_stream");
        tracing::info!(clip = %raw.display(), duration, "Adding silent audio track");
        run_stage(engine, silent_track_job(stages.current(), duration, &next)).await?;
        stages.advance(next).await;
        probe = engine.probe(stages.current()).await?;
    }

    if probe.is_hdr() {
        let next = stage_path(stages.current(), "sdr");
        tracing::info!(clip = %raw.display(), color = ?probe.color, "Tone-mapping HDR clip");
        run_stage(engine, tonemap_job(stages.current(), &next)).await?;
        stages.advance(next).await;
        probe = engine.probe(stages.current()).await?;
    }

    let artifact = PartialArtifact::begin(output).await?;
    let job = final_encode_job(&probe, stages.current(), artifact.path(), label, settings)?;

    if let Err(e) = engine.transcode(&job).await {
        artifact.discard().await;
        return Err(e);
    }
    let canonical = artifact.commit().await?;

    stages.finish().await;
    tracing::info!(clip = %raw.display(), output = %canonical.display(), "Clip normalized");
    Ok(canonical)
}

/// Build the stage 3 to 5 transcode for an already audio-repaired SDR clip.
pub fn final_encode_job(
    probe: &ClipProbe,
    input: &Path,
    output: &Path,
    label: &str,
    settings: &NormalizeSettings,
) -> Result<TranscodeJob> {
    let (width, height) = probe.dimensions()?;
    let source = effective_dimensions(width, height, probe.rotation_degrees());
    let fit = fit_within(source, (settings.width, settings.height));

    let filter = format!(
        "fps={},{},{}",
        settings.framerate,
        fit.filter(),
        watermark_filter(label, &settings.font, settings.font_size, settings.bevel)
    );

    let profile = resolve_hw_accel(settings.hw_accel.as_deref());

    let mut job = TranscodeJob::new("final", output)
        .global_args(profile.hwaccel_args.iter().copied())
        .input(TranscodeInput::file(input))
        .video_filter(filter)
        .map("0:v:0")
        .map("0:a:0")
        .codec_args(video_codec_args(&profile, settings.quality))
        .codec_args(canonical_audio_args())
        .output_args(["-pix_fmt", "yuv420p"])
        .output_args(constant_frame_rate_args(settings.framerate));

    if let Some(secs) = settings.forced_duration_secs {
        job = job.output_args(["-t".to_string(), format_seconds(secs)]);
    }

    Ok(job)
}

/// Paths needed to normalize one clip inside a [`StorageLayout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipJob {
    pub index: u32,
    pub raw: PathBuf,
    pub canonical: PathBuf,
    pub pending_marker: PathBuf,
    /// Watermark text.
    pub label: String,
}

impl ClipJob {
    pub fn new(layout: &StorageLayout, index: u32, label: impl Into<String>) -> Self {
        Self {
            index,
            raw: layout.raw_clip(index),
            canonical: layout.canonical_clip(index),
            pending_marker: layout.pending_marker(index),
            label: label.into(),
        }
    }
}

/// Normalize one clip and clear its pending marker on success.
///
/// On failure the marker is left in place so the clip shows as stuck.
pub async fn normalize_clip(
    engine: &dyn MediaEngine,
    job: &ClipJob,
    settings: &NormalizeSettings,
) -> Result<PathBuf> {
    let canonical = normalize(engine, &job.raw, &job.canonical, &job.label, settings).await?;
    remove_if_exists(&job.pending_marker).await?;
    tracing::debug!(index = job.index, "Pending marker cleared");
    Ok(canonical)
}

/// Run an intermediate stage; its output is removed if the engine fails.
async fn run_stage(engine: &dyn MediaEngine, job: TranscodeJob) -> Result<()> {
    if let Err(e) = engine.transcode(&job).await {
        let _ = remove_if_exists(&job.output).await;
        return Err(e);
    }
    Ok(())
}

/// Tracks the file the next stage reads and what may be deleted.
struct StageChain {
    raw: PathBuf,
    current: PathBuf,
    delete: bool,
}

impl StageChain {
    fn new(raw: &Path, delete: bool) -> Self {
        Self {
            raw: raw.to_path_buf(),
            current: raw.to_path_buf(),
            delete,
        }
    }

    fn current(&self) -> &Path {
        &self.current
    }

    /// Make `next` the current file, dropping the superseded intermediate.
    /// The raw clip is kept until the whole chain succeeded.
    async fn advance(&mut self, next: PathBuf) {
        let previous = std::mem::replace(&mut self.current, next);
        if self.delete && previous != self.raw {
            discard_file(&previous).await;
        }
    }

    async fn finish(self) {
        if !self.delete {
            return;
        }
        if self.current != self.raw {
            discard_file(&self.current).await;
        }
        discard_file(&self.raw).await;
    }
}

async fn discard_file(path: &Path) {
    if let Err(e) = remove_if_exists(path).await {
        tracing::warn!(path = %path.display(), "Failed to delete intermediate file: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ColorTags;
    use crate::testing::RecordingEngine;
    use dayreel_common::Error;

    fn sdr_probe(width: u32, height: u32, audio: u32) -> ClipProbe {
        ClipProbe {
            width: Some(width),
            height: Some(height),
            color: ColorTags::bt709(),
            audio_streams: audio,
            duration: Some(2.0),
            ..Default::default()
        }
    }

    fn settings(delete: bool) -> NormalizeSettings {
        NormalizeSettings {
            delete_intermediate_files: delete,
            ..Default::default()
        }
    }

    fn raw_clip(dir: &Path, index: u32) -> PathBuf {
        let raw = dir.join(format!("{index}.mp4"));
        std::fs::write(&raw, b"raw").unwrap();
        raw
    }

    #[tokio::test]
    async fn plain_clip_takes_a_single_transcode() {
        let dir = tempfile::tempdir().unwrap();
        let raw = raw_clip(dir.path(), 1);
        let out = dir.path().join("1_processed.mp4");
        let engine = RecordingEngine::new();
        engine.set_probe(&raw, sdr_probe(1080, 1920, 1));

        normalize(&engine, &raw, &out, "1 Jan 2024", &settings(false))
            .await
            .unwrap();

        assert_eq!(engine.stages(), vec!["final"]);
        assert!(out.exists());
        assert!(raw.exists());
    }

    #[tokio::test]
    async fn silent_clip_gets_audio_of_clip_duration() {
        let dir = tempfile::tempdir().unwrap();
        let raw = raw_clip(dir.path(), 2);
        let out = dir.path().join("2_processed.mp4");
        let engine = RecordingEngine::new();
        engine.set_probe(&raw, sdr_probe(1080, 1920, 0));

        normalize(&engine, &raw, &out, "2 Jan 2024", &settings(true))
            .await
            .unwrap();

        let jobs = engine.jobs();
        assert_eq!(engine.stages(), vec!["audio-repair", "final"]);
        let repair = jobs[0].to_args();
        let t = repair.iter().position(|a| a == "-t").unwrap();
        assert_eq!(repair[t + 1], "2");

        let canonical = engine.probe_of(&out).unwrap();
        assert_eq!(canonical.audio_streams, 1);
        assert_eq!(canonical.duration, Some(2.0));
    }

    #[tokio::test]
    async fn hdr_clip_is_tone_mapped_sdr_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let hdr = raw_clip(dir.path(), 3);
        let sdr = raw_clip(dir.path(), 4);
        let engine = RecordingEngine::new();
        let mut pq = sdr_probe(1920, 1080, 1);
        pq.color.transfer = Some("smpte2084".into());
        engine.set_probe(&hdr, pq);
        engine.set_probe(&sdr, sdr_probe(1920, 1080, 1));

        normalize(&engine, &hdr, &dir.path().join("3_processed.mp4"), "x", &settings(false))
            .await
            .unwrap();
        assert_eq!(engine.stages(), vec!["tonemap", "final"]);

        engine.clear_jobs();
        normalize(&engine, &sdr, &dir.path().join("4_processed.mp4"), "x", &settings(false))
            .await
            .unwrap();
        assert_eq!(engine.stages(), vec!["final"]);
    }

    #[tokio::test]
    async fn intermediates_are_deleted_when_superseded() {
        let dir = tempfile::tempdir().unwrap();
        let raw = raw_clip(dir.path(), 5);
        let out = dir.path().join("5_processed.mp4");
        let engine = RecordingEngine::new();
        let mut probe = sdr_probe(1920, 1080, 0);
        probe.color.primaries = Some("bt2020".into());
        engine.set_probe(&raw, probe);

        normalize(&engine, &raw, &out, "x", &settings(true)).await.unwrap();

        assert_eq!(engine.stages(), vec!["audio-repair", "tonemap", "final"]);
        assert!(out.exists());
        assert!(!raw.exists());
        assert!(!dir.path().join("5_with_audio_stream.mp4").exists());
        assert!(!dir.path().join("5_with_audio_stream_sdr.mp4").exists());
    }

    #[tokio::test]
    async fn nothing_is_deleted_without_the_flag() {
        let dir = tempfile::tempdir().unwrap();
        let raw = raw_clip(dir.path(), 6);
        let out = dir.path().join("6_processed.mp4");
        let engine = RecordingEngine::new();
        engine.set_probe(&raw, sdr_probe(1920, 1080, 0));

        normalize(&engine, &raw, &out, "x", &settings(false)).await.unwrap();
        // A second run over the same raw clip must not remove it either.
        normalize(&engine, &raw, &out, "x", &settings(false)).await.unwrap();

        assert!(raw.exists());
        assert!(dir.path().join("6_with_audio_stream.mp4").exists());
        assert!(out.exists());
    }

    #[tokio::test]
    async fn rotated_clip_fills_portrait_frame() {
        let dir = tempfile::tempdir().unwrap();
        let raw = raw_clip(dir.path(), 7);
        let engine = RecordingEngine::new();
        let mut probe = sdr_probe(1920, 1080, 1);
        probe.rotation = Some(90);
        engine.set_probe(&raw, probe);

        normalize(&engine, &raw, &dir.path().join("7_processed.mp4"), "x", &settings(false))
            .await
            .unwrap();

        let vf = engine.jobs()[0].video_filter.clone().unwrap();
        assert!(vf.starts_with("fps=30,scale=1080:1920,pad=1080:1920:0:0:black"));
    }

    #[test]
    fn final_job_carries_quality_duration_and_cfr() {
        let settings = NormalizeSettings {
            quality: Quality::Level(20),
            forced_duration_secs: Some(2.0),
            hw_accel: Some("nvenc".into()),
            ..Default::default()
        };
        let job = final_encode_job(
            &sdr_probe(1920, 1080, 1),
            Path::new("in.mp4"),
            Path::new("out.partial.mp4"),
            "5 Jan 2024",
            &settings,
        )
        .unwrap();

        assert_eq!(job.output_option("-c:v"), Some("h264_nvenc"));
        assert_eq!(job.output_option("-qp"), Some("19"));
        assert_eq!(job.output_option("-t"), Some("2"));
        assert_eq!(job.output_option("-fps_mode"), Some("cfr"));
        assert_eq!(job.output_option("-r"), Some("30"));
        assert_eq!(job.output_option("-b:a"), Some("128k"));
        assert_eq!(job.global_args, vec!["-hwaccel", "cuda"]);
        let vf = job.video_filter.unwrap();
        assert!(vf.starts_with("fps=30,scale=1080:607,pad=1080:1920:0:656:black"));
        assert!(vf.contains("text='5 Jan 2024'"));
    }

    #[tokio::test]
    async fn missing_dimensions_is_metadata_error() {
        let dir = tempfile::tempdir().unwrap();
        let raw = raw_clip(dir.path(), 8);
        let engine = RecordingEngine::new();
        engine.set_probe(
            &raw,
            ClipProbe {
                audio_streams: 1,
                duration: Some(1.0),
                ..Default::default()
            },
        );

        let err = normalize(&engine, &raw, &dir.path().join("8_processed.mp4"), "x", &settings(false))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MetadataParse(_)));
        assert!(engine.jobs().is_empty());
    }

    #[tokio::test]
    async fn engine_failure_keeps_marker_and_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        std::fs::create_dir_all(layout.uploads_dir()).unwrap();
        let job = ClipJob::new(&layout, 9, "9 Jan 2024");
        std::fs::write(&job.raw, b"raw").unwrap();
        std::fs::write(&job.pending_marker, b"").unwrap();

        let engine = RecordingEngine::new();
        engine.set_probe(&job.raw, sdr_probe(1080, 1920, 1));
        engine.fail_stage("final");

        let err = normalize_clip(&engine, &job, &settings(true)).await.unwrap_err();
        assert!(err.is_media_engine());
        assert!(job.pending_marker.exists());
        assert!(job.raw.exists());
        assert!(!job.canonical.exists());
        assert!(!dayreel_common::layout::partial_path(&job.canonical).exists());
    }

    #[tokio::test]
    async fn success_clears_marker() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        std::fs::create_dir_all(layout.uploads_dir()).unwrap();
        let job = ClipJob::new(&layout, 10, "10 Jan 2024");
        std::fs::write(&job.raw, b"raw").unwrap();
        std::fs::write(&job.pending_marker, b"").unwrap();

        let engine = RecordingEngine::new();
        engine.set_probe(&job.raw, sdr_probe(1080, 1920, 1));

        let canonical = normalize_clip(&engine, &job, &settings(false)).await.unwrap();
        assert_eq!(canonical, job.canonical);
        assert!(!job.pending_marker.exists());
        assert!(job.canonical.exists());
    }
}
