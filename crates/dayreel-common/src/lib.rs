//! dayreel-common: shared types used by every dayreel crate.
//!
//! - **Error handling**: the [`Error`] taxonomy surfaced by the media layer
//!   and the coordinator, with a [`Result`] alias.
//! - **Storage layout**: [`layout::StorageLayout`] names every raw clip,
//!   canonical clip, marker file and merge artifact on disk.
//! - **Codec policy**: [`Quality`] models the `lossless` setting shared by
//!   per-clip and merge encodes.
//!
//! # Examples
//!
//! ```
//! use dayreel_common::layout::{parse_canonical_index, StorageLayout};
//!
//! let layout = StorageLayout::new("tmp");
//! assert_eq!(
//!     layout.canonical_clip(7),
//!     std::path::Path::new("tmp/uploads/7_processed.mp4")
//! );
//! assert_eq!(parse_canonical_index("12_processed.mp4"), Some(12));
//! ```

pub mod error;
pub mod layout;
pub mod quality;

pub use error::{Error, Result};
pub use layout::StorageLayout;
pub use quality::Quality;
