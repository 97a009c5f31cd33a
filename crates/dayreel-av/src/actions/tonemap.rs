//! HDR to SDR tone-mapping.

use std::path::Path;

use crate::actions::encode::canonical_audio_args;
use crate::engine::{TranscodeInput, TranscodeJob};

/// Linearize, convert primaries to BT.709, apply the Hable curve and return
/// to limited-range BT.709 4:2:0.
pub const TONEMAP_FILTER: &str = "zscale=t=linear:npl=100,format=gbrpf32le,zscale=p=bt709,\
tonemap=tonemap=hable:desat=0,zscale=t=bt709:m=bt709:r=tv,format=yuv420p";

/// Tone-map an HDR clip to SDR BT.709.
///
/// This intermediate is encoded at near-transparent quality with a software
/// encoder; the final encode applies the configured quality policy.
pub fn tonemap_job(input: &Path, output: &Path) -> TranscodeJob {
    TranscodeJob::new("tonemap", output)
        .input(TranscodeInput::file(input))
        .video_filter(TONEMAP_FILTER)
        .map("0:v:0")
        .map("0:a:0")
        .codec_args(["-c:v", "libx264", "-crf", "18", "-preset", "slow"])
        .codec_args([
            "-color_primaries",
            "bt709",
            "-color_trc",
            "bt709",
            "-colorspace",
            "bt709",
        ])
        .codec_args(canonical_audio_args())
}
