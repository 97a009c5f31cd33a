//! Date watermark drawn in the bottom-left corner with a drop shadow.

/// Shadow offset used when none is configured.
pub fn default_bevel(font_size: u32) -> u32 {
    font_size / 30
}

/// Two `drawtext` filters: a black copy offset by `bevel` and a white copy
/// on top, both inset from the bottom-left corner by `font_size / 5`.
pub fn watermark_filter(text: &str, font: &str, font_size: u32, bevel: Option<u32>) -> String {
    let bevel = bevel.unwrap_or_else(|| default_bevel(font_size));
    let inset = font_size / 5;
    let text = escape_text(text);
    let font = font_option(font);

    let shadow = format!(
        "drawtext=text='{text}':{font}:fontsize={font_size}:fontcolor=black:\
x={x}:y=h-th-{inset}+{bevel}",
        x = inset + bevel,
    );
    let face = format!(
        "drawtext=text='{text}':{font}:fontsize={font_size}:fontcolor=white:\
x={inset}:y=h-th-{inset}"
    );
    format!("{shadow},{face}")
}

/// A font that looks like a file path is loaded directly, anything else is
/// resolved by family name.
fn font_option(font: &str) -> String {
    let lower = font.to_ascii_lowercase();
    let is_file = font.contains('/')
        || font.contains('\\')
        || [".ttf", ".otf", ".ttc"].iter().any(|ext| lower.ends_with(ext));
    let escaped = font.replace('\\', "/").replace(':', "\\:").replace('\'', "'\\''");
    if is_file {
        format!("fontfile='{escaped}'")
    } else {
        format!("font='{escaped}'")
    }
}

/// Quote-safe drawtext text. `%` starts an expansion sequence in drawtext.
fn escape_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\'', "'\\''")
        .replace('%', "\\%")
}
