//! Silent audio track repair.

use std::path::Path;

use crate::engine::{TranscodeInput, TranscodeJob};

/// Synthetic stereo silence at the canonical sample rate.
pub const SILENT_TRACK_SOURCE: &str = "anullsrc=channel_layout=stereo:sample_rate=44100";

/// Add a silent stereo track to a clip that has no audio.
///
/// The video stream is copied untouched; the silence is bounded to the clip
/// duration and `-shortest` trims any rounding overshoot.
pub fn silent_track_job(input: &Path, duration_secs: f64, output: &Path) -> TranscodeJob {
    TranscodeJob::new("audio-repair", output)
        .input(TranscodeInput::file(input))
        .input(TranscodeInput::lavfi(SILENT_TRACK_SOURCE, Some(duration_secs)))
        .map("0:v:0")
        .map("1:a:0")
        .codec_args(["-c:v", "copy", "-c:a", "aac"])
        .output_args(["-shortest"])
}
