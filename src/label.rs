//! Watermark text for a clip.

use chrono::{Days, NaiveDate};
use dayreel_common::{Error, Result};

/// Calendar date of clip `index`, counting clip 1 as `start`.
pub fn clip_date(start: NaiveDate, index: u32) -> Result<NaiveDate> {
    if index == 0 {
        return Err(Error::Validation("clip indices start at 1".to_string()));
    }
    start
        .checked_add_days(Days::new(u64::from(index - 1)))
        .ok_or_else(|| Error::Validation(format!("clip {index} is beyond the calendar")))
}

/// Label burned into clip `index`, e.g. `1 Feb 2024`.
pub fn date_label(start: NaiveDate, index: u32) -> Result<String> {
    Ok(clip_date(start, index)?.format("%-d %b %Y").to_string())
}
