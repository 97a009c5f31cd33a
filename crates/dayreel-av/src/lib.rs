//! # dayreel-av
//!
//! Media processing for dayreel: everything that touches video bytes.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- locate ffmpeg and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for running external processes.
//! - **Media Engine** ([`MediaEngine`], [`FfmpegEngine`]) -- probe a clip and
//!   run a [`TranscodeJob`].
//! - **Clip Normalizer** ([`normalize`], [`normalize_clip`]) -- audio repair,
//!   tone-mapping, aspect-preserving fit, date watermark and constant frame
//!   rate encode.
//! - **Merge Engine** ([`merge`]) -- ordered concatenation of canonical clips.
//!
//! ## Example
//!
//! ```no_run
//! use dayreel_av::{FfmpegEngine, NormalizeSettings, ToolRegistry, normalize};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # async fn example() -> dayreel_common::Result<()> {
//! let tools = ToolRegistry::discover(None, None);
//! let engine = FfmpegEngine::from_registry(&tools, Duration::from_secs(3600))?;
//! let settings = NormalizeSettings::default();
//! normalize(
//!     &engine,
//!     Path::new("tmp/uploads/1.mp4"),
//!     Path::new("tmp/uploads/1_processed.mp4"),
//!     "1 Jan 2024",
//!     &settings,
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod artifact;
pub mod command;
pub mod engine;
pub mod merge;
pub mod normalize;
pub mod probe;
pub mod tools;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ---- Re-exports for convenience ----

pub use artifact::PartialArtifact;
pub use command::{ToolCommand, ToolOutput};
pub use engine::{FfmpegEngine, MediaEngine, TranscodeInput, TranscodeJob};
pub use merge::{list_canonical_clips, merge, MergeOutcome, MergeSettings};
pub use normalize::{normalize, normalize_clip, ClipJob, NormalizeSettings};
pub use probe::{ClipProbe, ColorTags};
pub use tools::{ToolInfo, ToolRegistry};
