//! Codec quality policy.
//!
//! In configuration the policy is written as `true`, `false` or a positive
//! integer:
//!
//! | value   | meaning                                   | quantizer |
//! |---------|-------------------------------------------|-----------|
//! | `true`  | maximum quality (lossless-equivalent)     | `0`       |
//! | `N >= 1`| fixed quality level                       | `N - 1`   |
//! | `false` | whatever the encoder defaults to          | none      |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality policy applied to a video encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawQuality", into = "RawQuality")]
pub enum Quality {
    /// Lossless-equivalent setting (quantizer 0).
    #[default]
    Lossless,
    /// Explicit level; the encoder quantizer is `level - 1`.
    Level(u32),
    /// Leave quality to the encoder.
    EncoderDefault,
}

impl Quality {
    /// Constant quantizer to hand to the encoder, if any.
    pub fn quantizer(&self) -> Option<u32> {
        match self {
            Quality::Lossless => Some(0),
            Quality::Level(n) => Some(n.saturating_sub(1)),
            Quality::EncoderDefault => None,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Lossless => write!(f, "lossless"),
            Quality::Level(n) => write!(f, "level {n}"),
            Quality::EncoderDefault => write!(f, "encoder default"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum RawQuality {
    Flag(bool),
    Level(u32),
}

impl TryFrom<RawQuality> for Quality {
    type Error = String;

    fn try_from(raw: RawQuality) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawQuality::Flag(true) => Ok(Quality::Lossless),
            RawQuality::Flag(false) => Ok(Quality::EncoderDefault),
            RawQuality::Level(0) => Err("quality level must be at least 1".to_string()),
            RawQuality::Level(n) => Ok(Quality::Level(n)),
        }
    }
}

impl From<Quality> for RawQuality {
    fn from(q: Quality) -> Self {
        match q {
            Quality::Lossless => RawQuality::Flag(true),
            Quality::Level(n) => RawQuality::Level(n),
            Quality::EncoderDefault => RawQuality::Flag(false),
        }
    }
}
