//! Encoder selection and the output options every canonical clip shares.

use dayreel_common::Quality;

/// Accepted values of the `hw_accel` setting besides `none`.
pub const SUPPORTED_HW_ACCEL: &[&str] = &["nvenc", "qsv", "videotoolbox"];

/// How an encoder expresses a requested quality level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    /// Constant quantizer via `-qp`, 0 is lossless.
    ConstantQp,
    /// Intel QSV `-global_quality`, 1 (best) to 51.
    GlobalQuality,
    /// VideoToolbox `-q:v`, 1 to 100 (best).
    QualityScale,
}

/// Decoder flags and encoder for a hardware acceleration choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderProfile {
    /// Arguments that must appear before `-i`.
    pub hwaccel_args: Vec<&'static str>,
    pub encoder: &'static str,
    pub rate_control: RateControl,
}

/// Map a `hw_accel` setting to decoder flags and an H.264 encoder.
///
/// Anything unrecognized, including `none`, selects software libx264.
pub fn resolve_hw_accel(hw_accel: Option<&str>) -> EncoderProfile {
    let (hwaccel_args, encoder, rate_control) = match hw_accel {
        Some("nvenc") => (vec!["-hwaccel", "cuda"], "h264_nvenc", RateControl::ConstantQp),
        Some("qsv") => (vec!["-hwaccel", "qsv"], "h264_qsv", RateControl::GlobalQuality),
        Some("videotoolbox") => (
            vec!["-hwaccel", "videotoolbox"],
            "h264_videotoolbox",
            RateControl::QualityScale,
        ),
        _ => (vec![], "libx264", RateControl::ConstantQp),
    };
    EncoderProfile {
        hwaccel_args,
        encoder,
        rate_control,
    }
}

/// Highest quantizer H.264 accepts.
const MAX_QP: u32 = 51;

/// `-c:v` plus quality options for `quality` on `profile`.
///
/// The quantizer is translated onto each encoder's own scale so a lower
/// quantizer never yields a worse setting.
pub fn video_codec_args(profile: &EncoderProfile, quality: Quality) -> Vec<String> {
    let mut args = vec!["-c:v".to_string(), profile.encoder.to_string()];
    let Some(qp) = quality.quantizer() else {
        return args;
    };
    let qp = qp.min(MAX_QP);
    let (flag, value) = match profile.rate_control {
        RateControl::ConstantQp => ("-qp", qp),
        RateControl::GlobalQuality => ("-global_quality", qp.max(1)),
        RateControl::QualityScale => ("-q:v", (100 - qp * 100 / MAX_QP).max(1)),
    };
    args.push(flag.into());
    args.push(value.to_string());
    args
}

/// AAC, 128 kb/s, 44.1 kHz, stereo.
pub fn canonical_audio_args() -> Vec<String> {
    ["-c:a", "aac", "-b:a", "128k", "-ar", "44100", "-ac", "2"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Constant frame rate output at `framerate`.
pub fn constant_frame_rate_args(framerate: u32) -> Vec<String> {
    vec![
        "-fps_mode".into(),
        "cfr".into(),
        "-r".into(),
        framerate.to_string(),
    ]
}
