mod types;

pub use types::*;

use anyhow::{Context, Result};
use dayreel_av::actions::SUPPORTED_HW_ACCEL;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./dayreel.toml",
        "./config.toml",
        "~/.config/dayreel/config.toml",
        "/etc/dayreel/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }
    if config.server.max_upload_mb == 0 {
        anyhow::bail!("server.max_upload_mb must be at least 1");
    }

    if config.clips.expected_total == Some(0) {
        anyhow::bail!("clips.expected_total must be at least 1 when set");
    }

    let render = &config.render;
    if render.width == 0 || render.height == 0 {
        anyhow::bail!(
            "Output size {}x{} must be non-zero",
            render.width,
            render.height
        );
    }
    // 4:2:0 chroma needs even dimensions.
    if render.width % 2 != 0 || render.height % 2 != 0 {
        anyhow::bail!(
            "Output size {}x{} must have even width and height",
            render.width,
            render.height
        );
    }
    if render.framerate == 0 {
        anyhow::bail!("render.framerate must be at least 1");
    }
    if render.font.trim().is_empty() {
        anyhow::bail!("render.font cannot be empty");
    }
    if render.font_size == 0 {
        anyhow::bail!("render.font_size must be at least 1");
    }
    if let Some(hw) = render.hw_accel() {
        if !SUPPORTED_HW_ACCEL.contains(&hw.as_str()) {
            anyhow::bail!(
                "Unknown render.hw_accel '{}' (expected one of: {}, none)",
                hw,
                SUPPORTED_HW_ACCEL.join(", ")
            );
        }
    }
    if let Some(secs) = render.force_duration_secs {
        if !secs.is_finite() || secs <= 0.0 {
            anyhow::bail!("render.force_duration_secs must be positive, got {}", secs);
        }
    }

    if config.tools.timeout_secs == 0 {
        anyhow::bail!("tools.timeout_secs must be at least 1");
    }
    for path in [&config.tools.ffmpeg_path, &config.tools.ffprobe_path]
        .into_iter()
        .flatten()
    {
        if !path.exists() {
            tracing::warn!("Configured tool path does not exist: {:?}", path);
        }
    }

    if config.storage.work_dir.as_os_str().is_empty() {
        anyhow::bail!("storage.work_dir cannot be empty");
    }

    Ok(())
}
