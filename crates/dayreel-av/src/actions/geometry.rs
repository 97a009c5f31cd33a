//! Aspect-preserving fit of a clip into the output frame.

/// Whether a display rotation turns the frame on its side.
pub fn is_quarter_turn(rotation_degrees: i32) -> bool {
    rotation_degrees.rem_euclid(180) == 90
}

/// Displayed `(width, height)` after applying the rotation tag.
pub fn effective_dimensions(width: u32, height: u32, rotation_degrees: i32) -> (u32, u32) {
    if is_quarter_turn(rotation_degrees) {
        (height, width)
    } else {
        (width, height)
    }
}

/// Scaled size and padding offsets that center a source inside a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fit {
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub target_width: u32,
    pub target_height: u32,
}

impl Fit {
    /// `scale` and `pad` filters for this fit. Padding is black.
    pub fn filter(&self) -> String {
        format!(
            "scale={}:{},pad={}:{}:{}:{}:black,setsar=1",
            self.scaled_width,
            self.scaled_height,
            self.target_width,
            self.target_height,
            self.pad_x,
            self.pad_y
        )
    }
}

/// Fit `source` inside `target` preserving aspect ratio.
///
/// A source wider than the target fills the width and is letterboxed; one
/// that is taller or equal fills the height and is pillarboxed. Scaled sizes
/// are floored, offsets are `(target - scaled) / 2` floored. Arithmetic is
/// done on integers so exact aspect matches fill the frame.
pub fn fit_within(source: (u32, u32), target: (u32, u32)) -> Fit {
    let (sw, sh) = (u64::from(source.0), u64::from(source.1.max(1)));
    let (tw, th) = (u64::from(target.0), u64::from(target.1));

    let (scaled_width, scaled_height) = if sw * th > tw * sh {
        (tw, tw * sh / sw.max(1))
    } else {
        (th * sw / sh, th)
    };

    Fit {
        scaled_width: scaled_width as u32,
        scaled_height: scaled_height as u32,
        pad_x: ((tw - scaled_width) / 2) as u32,
        pad_y: ((th - scaled_height) / 2) as u32,
        target_width: target.0,
        target_height: target.1,
    }
}
