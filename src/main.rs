mod cli;

use dayreel::{config, coordinator::Coordinator, replay, server};
use dayreel_av::{FfmpegEngine, MediaEngine, ToolRegistry};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;

fn build_engine(config: &config::Config) -> Result<FfmpegEngine> {
    let tools = ToolRegistry::discover(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    );
    FfmpegEngine::from_registry(&tools, config.tools.timeout())
        .context("ffmpeg and ffprobe are required; run `dayreel check-tools`")
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting dayreel server");
    tracing::info!(
        "Working directory {}, clips dated from {}",
        config.storage.work_dir.display(),
        config.clips.start_date
    );

    let engine = build_engine(&config)?;
    let coordinator = Coordinator::new(&config, Arc::new(engine));
    server::start_server(config, coordinator).await
}

async fn run_replay(
    originals: &Path,
    count: Option<u32>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    config::validate_config(&config)?;

    let engine = build_engine(&config)?;
    let coordinator = Coordinator::new(&config, Arc::new(engine));

    tracing::info!("Replaying clips from {}", originals.display());
    let (video, completion) = replay::replay(&coordinator, originals, count).await?;

    println!("Merged video: {}", video.display());
    if completion.cleaned_up && completion.saved_to.is_none() {
        println!("Note: storage.save_result_to is unset and the working set was deleted.");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "dayreel=trace,dayreel_av=debug,tower_http=debug".to_string()
        } else {
            "dayreel=info,dayreel_av=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Replay { originals, count } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_replay(&originals, count, cli.config.as_deref()))
        }
        Commands::Probe { file, json } => probe_file(&file, json, cli.config.as_deref()),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("dayreel {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let engine = build_engine(&config)?;
    let rt = tokio::runtime::Runtime::new()?;
    let probe = rt.block_on(engine.probe(file))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&probe)?);
        return Ok(());
    }

    println!("File: {}", probe.path.display());
    match probe.dimensions() {
        Ok((w, h)) => println!("Video: {}x{}", w, h),
        Err(e) => println!("Video: {}", e),
    }
    if let Some(rotation) = probe.rotation {
        println!("Rotation: {}°", rotation);
    }
    println!(
        "Color: primaries={} transfer={} space={}{}",
        probe.color.primaries.as_deref().unwrap_or("-"),
        probe.color.transfer.as_deref().unwrap_or("-"),
        probe.color.space.as_deref().unwrap_or("-"),
        if probe.is_hdr() { " [HDR]" } else { "" }
    );
    println!("Audio streams: {}", probe.audio_streams);
    if let Some(duration) = probe.duration {
        println!("Duration: {:.3}s", duration);
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    )
    .check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg (with ffprobe) to process clips.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };
    config::validate_config(&config)?;

    println!("✓ Configuration is valid");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!(
        "  Output: {}x{} @ {} fps",
        config.render.width, config.render.height, config.render.framerate
    );
    println!("  Start date: {}", config.clips.start_date);
    match config.clips.expected_total {
        Some(total) => println!("  Expected clips: {}", total),
        None => println!("  Expected clips: set at runtime"),
    }
    println!(
        "  Hardware acceleration: {}",
        config.render.hw_accel().unwrap_or_else(|| "none".to_string())
    );
    println!("  Work dir: {}", config.storage.work_dir.display());

    Ok(())
}
