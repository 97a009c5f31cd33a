//! Merge Engine: ordered concatenation of canonical clips.
//!
//! Canonical clips are listed from the clip directory, sorted by numeric
//! index, written to a concat demuxer manifest and re-encoded into a single
//! output with regenerated timestamps and drift-tolerant audio resampling.

use std::path::{Path, PathBuf};

use dayreel_common::layout::parse_canonical_index;
use dayreel_common::{Error, Quality, Result};

use crate::actions::{
    canonical_audio_args, constant_frame_rate_args, resolve_hw_accel, video_codec_args,
};
use crate::artifact::{remove_if_exists, PartialArtifact};
use crate::engine::{MediaEngine, TranscodeInput, TranscodeJob};

/// Encode settings for the merged output.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSettings {
    pub framerate: u32,
    pub quality: Quality,
    pub hw_accel: Option<String>,
    /// Remove the canonical clips and the manifest after a successful merge.
    pub delete_intermediate_files: bool,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            framerate: 30,
            quality: Quality::Lossless,
            hw_accel: None,
            delete_intermediate_files: true,
        }
    }
}

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub output: PathBuf,
    /// Inputs in the order they were concatenated.
    pub clips: Vec<PathBuf>,
}

/// Canonical clips in `dir`, ascending by numeric index.
///
/// Only names following the `<index>_processed.<ext>` convention count;
/// raw clips, markers, intermediates and partial files are ignored. A
/// missing directory holds no clips.
pub fn list_canonical_clips(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut clips = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Some(index) = parse_canonical_index(&name.to_string_lossy()) {
            clips.push((index, entry.path()));
        }
    }

    clips.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    clips.dedup_by(|later, first| {
        if later.0 == first.0 {
            tracing::warn!(
                index = first.0,
                kept = %first.1.display(),
                ignored = %later.1.display(),
                "Duplicate canonical clip"
            );
            true
        } else {
            false
        }
    });
    Ok(clips)
}

/// Concat demuxer manifest listing `clips` in order.
///
/// Paths under `manifest_dir` are written relative to it, since the demuxer
/// resolves relative entries against the manifest's own location.
pub fn manifest_contents(clips: &[PathBuf], manifest_dir: &Path) -> String {
    clips
        .iter()
        .map(|clip| {
            let entry = match clip.strip_prefix(manifest_dir) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => std::path::absolute(clip).unwrap_or_else(|_| clip.clone()),
            };
            let entry = entry.to_string_lossy().replace('\'', "'\\''");
            format!("file '{entry}'\n")
        })
        .collect()
}

/// Concatenate the manifest into `output`.
pub fn merge_job(manifest: &Path, output: &Path, settings: &MergeSettings) -> TranscodeJob {
    let profile = resolve_hw_accel(settings.hw_accel.as_deref());

    TranscodeJob::new("merge", output)
        .global_args(profile.hwaccel_args.iter().copied())
        .input(TranscodeInput::concat(manifest))
        .video_filter(format!(
            "setpts=PTS-STARTPTS,fps={},format=yuv420p",
            settings.framerate
        ))
        .audio_filter("aresample=async=1000")
        .map("0:v:0")
        .map("0:a:0")
        .codec_args(video_codec_args(&profile, settings.quality))
        .codec_args(canonical_audio_args())
        .output_args(constant_frame_rate_args(settings.framerate))
        .output_args(["-movflags", "+faststart"])
}

/// Merge every canonical clip in `clip_dir` into `output`.
///
/// # Errors
///
/// - [`Error::NoInputs`] when `clip_dir` holds no canonical clip.
/// - [`Error::MediaEngine`] when the concat transcode fails; `output` is not
///   created and the inputs are left untouched.
pub async fn merge(
    engine: &dyn MediaEngine,
    clip_dir: &Path,
    manifest: &Path,
    output: &Path,
    settings: &MergeSettings,
) -> Result<MergeOutcome> {
    let clips: Vec<PathBuf> = list_canonical_clips(clip_dir)?
        .into_iter()
        .map(|(_, path)| path)
        .collect();

    if clips.is_empty() {
        return Err(Error::NoInputs {
            dir: clip_dir.to_path_buf(),
        });
    }

    let manifest_dir = manifest.parent().unwrap_or_else(|| Path::new(""));
    tokio::fs::write(manifest, manifest_contents(&clips, manifest_dir)).await?;
    tracing::info!(
        clips = clips.len(),
        manifest = %manifest.display(),
        "Merging canonical clips"
    );

    let artifact = PartialArtifact::begin(output).await?;
    let job = merge_job(manifest, artifact.path(), settings);

    if let Err(e) = engine.transcode(&job).await {
        artifact.discard().await;
        return Err(e);
    }
    let output = artifact.commit().await?;

    if settings.delete_intermediate_files {
        let manifest = manifest.to_path_buf();
        for clip in clips.iter().chain(std::iter::once(&manifest)) {
            if let Err(e) = remove_if_exists(clip).await {
                tracing::warn!(path = %clip.display(), "Failed to delete merge input: {e}");
            }
        }
    }

    tracing::info!(output = %output.display(), "Merge complete");
    Ok(MergeOutcome { output, clips })
}
