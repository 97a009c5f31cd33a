//! Transcode builders for the individual normalization stages.
//!
//! Each builder is a pure function from paths and settings to a
//! [`TranscodeJob`](crate::TranscodeJob); [`crate::normalize`] sequences them
//! and runs them through a [`MediaEngine`](crate::MediaEngine).

mod audio;
mod encode;
mod geometry;
mod overlay;
mod tonemap;

pub use audio::{silent_track_job, SILENT_TRACK_SOURCE};
pub use encode::{
    canonical_audio_args, constant_frame_rate_args, resolve_hw_accel, video_codec_args,
    EncoderProfile, RateControl, SUPPORTED_HW_ACCEL,
};
pub use geometry::{effective_dimensions, fit_within, is_quarter_turn, Fit};
pub use overlay::{default_bevel, watermark_filter};
pub use tonemap::{tonemap_job, TONEMAP_FILTER};
