//! Offline replay of a directory of original clips.
//!
//! Feeds `<dir>/1.mp4 .. <dir>/N.mp4` through the same [`Coordinator`] the
//! server uses, one clip at a time, then merges and completes the run.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use dayreel_common::layout::parse_raw_index;

use crate::coordinator::{Completion, Coordinator, Intake, Readiness};

/// Count the numerically named `.mp4` files in `dir`.
pub fn count_originals(dir: &Path) -> Result<u32> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read originals directory {}", dir.display()))?;

    let mut count = 0;
    for entry in entries {
        let entry = entry?;
        if entry.file_name().to_str().and_then(parse_raw_index).is_some() {
            count += 1;
        }
    }
    Ok(count)
}

/// Replay `count` clips (default: all of them) from `originals` and return
/// the completion outcome together with the merged video's final path.
pub async fn replay(
    coordinator: &Coordinator,
    originals: &Path,
    count: Option<u32>,
) -> Result<(PathBuf, Completion)> {
    let total = match count {
        Some(n) => n,
        None => count_originals(originals)?,
    };
    if total == 0 {
        bail!("No numbered clips found in {}", originals.display());
    }

    coordinator.prepare().await?;
    coordinator.set_total(total)?;

    let layout = coordinator.layout();
    for index in 1..=total {
        if layout.canonical_clip(index).exists() && !layout.pending_marker(index).exists() {
            tracing::info!(index, "Clip already normalized, skipping");
            continue;
        }
        let source = originals.join(format!("{index}.mp4"));
        if !source.is_file() {
            bail!("Missing clip {}", source.display());
        }
        coordinator
            .accept_clip(index, &source, Intake::Copy)
            .await
            .with_context(|| format!("Failed to accept clip {index}"))?;
        coordinator.wait_idle().await;
    }

    let progress = coordinator.progress();
    if let Some(failed) = progress.failed.first() {
        bail!("Clip {} failed: {}", failed.index, failed.error);
    }

    match coordinator.readiness().await? {
        Readiness::MergeStarted => {}
        other => bail!("Merge could not start: {:?}", other),
    }
    coordinator.wait_idle().await;

    let merged = match coordinator.readiness().await? {
        Readiness::Ready(path) => path,
        _ => {
            let detail = coordinator
                .progress()
                .merge_error
                .unwrap_or_else(|| "merge did not complete".to_string());
            bail!("Merge failed: {}", detail);
        }
    };

    let saved = coordinator.finish().await?;
    let delivered = saved.saved_to.clone().unwrap_or(merged);
    Ok((delivered, saved))
}
